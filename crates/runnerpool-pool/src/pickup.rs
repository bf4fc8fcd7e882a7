//! Pool pickup manager.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use runnerpool_core::config::DEFAULT_FREQUENCY_TOLERANCE;
use runnerpool_core::{is_valid_class_name, parse_timestamp, pool_queue_name, ResourceClassTable};
use runnerpool_state::{PoolMessage, PoolQueue};

use crate::error::{PoolError, PoolResult};
use crate::matcher::TypeMatcher;

/// What to do with a received pool message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Hand the instance out.
    Ok,
    /// Usable by a different request; put it back.
    Requeue(String),
    /// Never usable; drop it.
    Delete(String),
}

/// Consumes one resource-class pool on behalf of one selection batch.
///
/// The frequency map lives as long as the manager. Build a new manager per
/// batch.
pub struct PoolPickupManager {
    resource_class: String,
    queue_name: String,
    matcher: TypeMatcher,
    usage_class: String,
    table: ResourceClassTable,
    queue: Arc<dyn PoolQueue>,
    frequency_tolerance: u32,
    frequency: HashMap<String, u32>,
    requeued: u32,
    deleted: u32,
}

impl PoolPickupManager {
    /// Fails with [`PoolError::InvalidResourceClass`] if `resource_class`
    /// is absent from `table` or contains the '/' queue key separator.
    pub fn new<S: AsRef<str>>(
        resource_class: &str,
        allowed_types: &[S],
        usage_class: &str,
        table: ResourceClassTable,
        queue: Arc<dyn PoolQueue>,
    ) -> PoolResult<Self> {
        if !is_valid_class_name(resource_class) || !table.contains(resource_class) {
            return Err(PoolError::InvalidResourceClass(resource_class.to_string()));
        }
        Ok(Self {
            resource_class: resource_class.to_string(),
            queue_name: pool_queue_name(resource_class),
            matcher: TypeMatcher::new(allowed_types)?,
            usage_class: usage_class.to_string(),
            table,
            queue,
            frequency_tolerance: DEFAULT_FREQUENCY_TOLERANCE,
            frequency: HashMap::new(),
            requeued: 0,
            deleted: 0,
        })
    }

    pub fn with_frequency_tolerance(mut self, tolerance: u32) -> Self {
        self.frequency_tolerance = tolerance;
        self
    }

    pub fn resource_class(&self) -> &str {
        &self.resource_class
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// How many times a message for `id` has been received so far.
    pub fn frequency(&self, id: &str) -> u32 {
        self.frequency.get(id).copied().unwrap_or(0)
    }

    /// Messages put back because they did not fit this request.
    pub fn requeued(&self) -> u32 {
        self.requeued
    }

    /// Messages dropped as permanently unusable.
    pub fn deleted(&self) -> u32 {
        self.deleted
    }

    /// Classify a message against the request at `now`.
    pub fn classify(&self, message: &PoolMessage, now: DateTime<Utc>) -> Classification {
        let Some(spec) = self.table.get(&message.resource_class) else {
            return Classification::Delete(format!(
                "resource class {} is not configured",
                message.resource_class
            ));
        };
        if message.cpu != spec.cpu {
            return Classification::Delete(format!(
                "cpu {} does not equal {}",
                message.cpu, spec.cpu
            ));
        }
        if message.mmem < spec.mmem {
            return Classification::Delete(format!(
                "mmem {} is below {}",
                message.mmem, spec.mmem
            ));
        }
        if let Some(threshold) = parse_timestamp(&message.threshold) {
            if threshold <= now {
                return Classification::Delete(format!("threshold {} passed", message.threshold));
            }
        }
        if !self.matcher.matches(&message.instance_type) {
            return Classification::Requeue(format!(
                "instance type {} not allowed",
                message.instance_type
            ));
        }
        if message.usage_class != self.usage_class {
            return Classification::Requeue(format!(
                "usage class {} differs from {}",
                message.usage_class, self.usage_class
            ));
        }
        Classification::Ok
    }

    /// Receive messages until one fits the request.
    ///
    /// Returns `None` when the queue is empty, or when some id has come
    /// round more often than the frequency tolerance allows. In the latter
    /// case that message is put back once more before returning.
    pub fn pickup(&mut self) -> PoolResult<Option<PoolMessage>> {
        loop {
            let Some(message) = self.queue.receive_one(&self.queue_name)? else {
                debug!(queue = %self.queue_name, "pool empty");
                return Ok(None);
            };

            let seen = self.frequency.entry(message.id.clone()).or_insert(0);
            *seen += 1;
            if *seen > self.frequency_tolerance {
                let seen = *seen;
                self.queue.send(&self.queue_name, &message)?;
                info!(
                    queue = %self.queue_name,
                    id = %message.id,
                    seen,
                    tolerance = self.frequency_tolerance,
                    "pool practically empty"
                );
                return Ok(None);
            }

            match self.classify(&message, Utc::now()) {
                Classification::Ok => {
                    debug!(queue = %self.queue_name, id = %message.id, "pool message picked up");
                    return Ok(Some(message));
                }
                Classification::Requeue(reason) => {
                    self.queue.send(&self.queue_name, &message)?;
                    self.requeued += 1;
                    debug!(queue = %self.queue_name, id = %message.id, %reason, "pool message requeued");
                }
                Classification::Delete(reason) => {
                    self.deleted += 1;
                    info!(queue = %self.queue_name, id = %message.id, %reason, "pool message discarded");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use chrono::Duration as ChronoDuration;
    use runnerpool_core::{format_timestamp, ResourceClassSpec};
    use runnerpool_state::{StateResult, StateStore};

    /// Hands out the same message on every receive and counts traffic.
    struct RepeatingQueue {
        message: PoolMessage,
        receives: Mutex<u32>,
        sends: Mutex<u32>,
    }

    impl PoolQueue for RepeatingQueue {
        fn receive_one(&self, _queue: &str) -> StateResult<Option<PoolMessage>> {
            *self.receives.lock().unwrap() += 1;
            Ok(Some(self.message.clone()))
        }

        fn send(&self, _queue: &str, _message: &PoolMessage) -> StateResult<()> {
            *self.sends.lock().unwrap() += 1;
            Ok(())
        }
    }

    /// In-memory FIFO.
    #[derive(Default)]
    struct VecQueue {
        messages: Mutex<VecDeque<PoolMessage>>,
    }

    impl PoolQueue for VecQueue {
        fn receive_one(&self, _queue: &str) -> StateResult<Option<PoolMessage>> {
            Ok(self.messages.lock().unwrap().pop_front())
        }

        fn send(&self, _queue: &str, message: &PoolMessage) -> StateResult<()> {
            self.messages.lock().unwrap().push_back(message.clone());
            Ok(())
        }
    }

    fn table() -> ResourceClassTable {
        ResourceClassTable::new().with_class("large", ResourceClassSpec { cpu: 4, mmem: 16384 })
    }

    fn message(id: &str) -> PoolMessage {
        PoolMessage {
            id: id.to_string(),
            resource_class: "large".to_string(),
            instance_type: "c6i.xlarge".to_string(),
            cpu: 4,
            mmem: 16384,
            usage_class: "on-demand".to_string(),
            threshold: format_timestamp(Utc::now() + ChronoDuration::hours(1)),
        }
    }

    fn manager(queue: Arc<dyn PoolQueue>) -> PoolPickupManager {
        PoolPickupManager::new("large", &["c*", "m*"], "on-demand", table(), queue).unwrap()
    }

    #[test]
    fn unknown_resource_class_is_rejected() {
        let queue: Arc<dyn PoolQueue> = Arc::new(VecQueue::default());
        let err = PoolPickupManager::new("huge", &["*"], "on-demand", table(), queue)
            .err()
            .unwrap();
        assert!(matches!(err, PoolError::InvalidResourceClass(ref c) if c == "huge"));
    }

    #[test]
    fn class_with_queue_separator_is_rejected() {
        let queue: Arc<dyn PoolQueue> = Arc::new(VecQueue::default());
        let mut table = table();
        table.insert("large/b", ResourceClassSpec { cpu: 8, mmem: 32768 });
        let err = PoolPickupManager::new("large/b", &["*"], "on-demand", table, queue)
            .err()
            .unwrap();
        assert!(matches!(err, PoolError::InvalidResourceClass(ref c) if c == "large/b"));
    }

    #[test]
    fn classification_rules() {
        let manager = manager(Arc::new(VecQueue::default()));
        let now = Utc::now();

        assert_eq!(manager.classify(&message("ok"), now), Classification::Ok);

        let mut unknown = message("a");
        unknown.resource_class = "medium".to_string();
        assert!(matches!(manager.classify(&unknown, now), Classification::Delete(_)));

        let mut more_cpu = message("b");
        more_cpu.cpu = 8;
        assert!(matches!(manager.classify(&more_cpu, now), Classification::Delete(_)));

        let mut small = message("c");
        small.mmem = 8192;
        assert!(matches!(manager.classify(&small, now), Classification::Delete(_)));

        let mut roomy = message("d");
        roomy.mmem = 32768;
        assert_eq!(manager.classify(&roomy, now), Classification::Ok);

        let mut expired = message("e");
        expired.threshold = format_timestamp(now - ChronoDuration::minutes(1));
        assert!(matches!(manager.classify(&expired, now), Classification::Delete(_)));

        let mut untimed = message("f");
        untimed.threshold = String::new();
        assert_eq!(manager.classify(&untimed, now), Classification::Ok);

        let mut burstable = message("g");
        burstable.instance_type = "t4g.xlarge".to_string();
        assert!(matches!(manager.classify(&burstable, now), Classification::Requeue(_)));

        let mut spot = message("h");
        spot.usage_class = "spot".to_string();
        assert!(matches!(manager.classify(&spot, now), Classification::Requeue(_)));
    }

    #[test]
    fn size_mismatch_wins_over_type_mismatch() {
        let manager = manager(Arc::new(VecQueue::default()));
        let mut m = message("a");
        m.cpu = 2;
        m.instance_type = "t4g.large".to_string();
        assert!(matches!(manager.classify(&m, Utc::now()), Classification::Delete(_)));
    }

    #[test]
    fn repeating_message_stops_at_tolerance() {
        let mut unusable = message("x");
        unusable.instance_type = "t4g.micro".to_string();
        let queue = Arc::new(RepeatingQueue {
            message: unusable,
            receives: Mutex::new(0),
            sends: Mutex::new(0),
        });
        let mut manager = manager(queue.clone());

        assert_eq!(manager.pickup().unwrap(), None);
        assert_eq!(*queue.receives.lock().unwrap(), DEFAULT_FREQUENCY_TOLERANCE + 1);
        assert_eq!(manager.requeued(), DEFAULT_FREQUENCY_TOLERANCE);
        // The message goes back once more when tolerance is exceeded.
        assert_eq!(*queue.sends.lock().unwrap(), DEFAULT_FREQUENCY_TOLERANCE + 1);
        assert_eq!(manager.frequency("x"), DEFAULT_FREQUENCY_TOLERANCE + 1);
    }

    #[test]
    fn custom_tolerance() {
        let mut unusable = message("x");
        unusable.usage_class = "spot".to_string();
        let queue = Arc::new(RepeatingQueue {
            message: unusable,
            receives: Mutex::new(0),
            sends: Mutex::new(0),
        });
        let mut manager = manager(queue.clone()).with_frequency_tolerance(2);

        assert_eq!(manager.pickup().unwrap(), None);
        assert_eq!(*queue.receives.lock().unwrap(), 3);
    }

    #[test]
    fn skips_unusable_messages_to_reach_a_usable_one() {
        let queue = Arc::new(VecQueue::default());
        let mut wrong_type = message("wrong-type");
        wrong_type.instance_type = "t4g.xlarge".to_string();
        let mut too_small = message("too-small");
        too_small.mmem = 1024;
        queue.send("pool-large", &wrong_type).unwrap();
        queue.send("pool-large", &too_small).unwrap();
        queue.send("pool-large", &message("good")).unwrap();

        let mut manager = manager(queue.clone());
        assert_eq!(manager.pickup().unwrap().map(|m| m.id), Some("good".to_string()));
        assert_eq!(manager.requeued(), 1);
        assert_eq!(manager.deleted(), 1);

        // Only the requeued message is left.
        let left: Vec<String> = queue.messages.lock().unwrap().iter().map(|m| m.id.clone()).collect();
        assert_eq!(left, vec!["wrong-type".to_string()]);
    }

    #[test]
    fn empty_queue_returns_none_without_sending() {
        let queue = Arc::new(VecQueue::default());
        let mut manager = manager(queue.clone());
        assert_eq!(manager.pickup().unwrap(), None);
        assert!(queue.messages.lock().unwrap().is_empty());
    }

    #[test]
    fn works_against_the_store_queue() {
        let store = StateStore::open_in_memory().unwrap();
        store.send("pool-large", &message("a")).unwrap();
        store.send("pool-large", &message("b")).unwrap();

        let mut manager = manager(Arc::new(store.clone()));
        assert_eq!(manager.queue_name(), "pool-large");
        assert_eq!(manager.pickup().unwrap().map(|m| m.id), Some("a".to_string()));
        assert_eq!(manager.pickup().unwrap().map(|m| m.id), Some("b".to_string()));
        assert_eq!(manager.pickup().unwrap(), None);
        assert_eq!(store.queue_depth("pool-large").unwrap(), 0);
    }
}

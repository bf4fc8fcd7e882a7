//! Pool queues.
//!
//! A pool queue holds the descriptors of idle instances for one resource
//! class. Receiving is destructive: the message is removed in the same
//! write transaction that reads it, so two concurrent receivers never get
//! the same copy.

use redb::{ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::{map_err, StateStore};
use crate::tables::QUEUES;
use crate::types::PoolMessage;

/// Receive-and-remove / send access to named FIFO queues.
pub trait PoolQueue: Send + Sync {
    /// Pop the oldest message, or `None` if the queue is empty.
    fn receive_one(&self, queue: &str) -> StateResult<Option<PoolMessage>>;

    /// Append a message.
    fn send(&self, queue: &str, message: &PoolMessage) -> StateResult<()>;
}

/// Key range of `queue`. Names may not contain '/', or one queue's range
/// would cover another's keys.
fn queue_bounds(queue: &str) -> StateResult<(String, String)> {
    if queue.is_empty() || queue.contains('/') {
        return Err(StateError::InvalidQueue(queue.to_string()));
    }
    // '0' sorts directly after '/', so this range covers exactly `{queue}/*`.
    Ok((format!("{queue}/"), format!("{queue}0")))
}

fn sequence_of(key: &str) -> StateResult<u64> {
    key.rsplit('/')
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| StateError::Read(format!("malformed queue key: {key}")))
}

impl StateStore {
    /// Number of messages currently waiting in `queue`.
    pub fn queue_depth(&self, queue: &str) -> StateResult<usize> {
        let (start, end) = queue_bounds(queue)?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
        let mut depth = 0;
        for entry in table
            .range(start.as_str()..end.as_str())
            .map_err(map_err!(Read))?
        {
            entry.map_err(map_err!(Read))?;
            depth += 1;
        }
        Ok(depth)
    }
}

impl PoolQueue for StateStore {
    fn receive_one(&self, queue: &str) -> StateResult<Option<PoolMessage>> {
        let (start, end) = queue_bounds(queue)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let head = {
            let mut table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
            let first = table
                .range(start.as_str()..end.as_str())
                .map_err(map_err!(Read))?
                .next()
                .transpose()
                .map_err(map_err!(Read))?
                .map(|(k, v)| (k.value().to_string(), v.value().to_vec()));
            if let Some((key, _)) = &first {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            first
        };
        txn.commit().map_err(map_err!(Transaction))?;

        match head {
            Some((key, bytes)) => {
                let message: PoolMessage =
                    serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                debug!(%queue, %key, id = %message.id, "message received");
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }

    fn send(&self, queue: &str, message: &PoolMessage) -> StateResult<()> {
        let (start, end) = queue_bounds(queue)?;
        let value = serde_json::to_vec(message).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(QUEUES).map_err(map_err!(Table))?;
            let last = table
                .range(start.as_str()..end.as_str())
                .map_err(map_err!(Read))?
                .next_back()
                .transpose()
                .map_err(map_err!(Read))?
                .map(|(k, _)| k.value().to_string());
            let next = match last {
                Some(key) => sequence_of(&key)? + 1,
                None => 0,
            };
            let key = format!("{queue}/{next:020}");
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%queue, id = %message.id, "message sent");
        Ok(())
    }
}

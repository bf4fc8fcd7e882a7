//! Resource-class spec table.
//!
//! A resource class names a pool of interchangeable workers (`large`,
//! `xlarge`, ...). The live table maps each class to the exact vCPU count
//! and minimum memory a pooled instance must offer to be handed out.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Sizing requirements of one resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceClassSpec {
    /// Exact vCPU count.
    pub cpu: u32,
    /// Minimum memory in MiB.
    pub mmem: u64,
}

/// The live resource-class table, keyed by class name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceClassTable {
    classes: HashMap<String, ResourceClassSpec>,
}

impl ResourceClassTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a class, builder style.
    pub fn with_class(mut self, name: &str, spec: ResourceClassSpec) -> Self {
        self.insert(name, spec);
        self
    }

    pub fn insert(&mut self, name: &str, spec: ResourceClassSpec) {
        self.classes.insert(name.to_string(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&ResourceClassSpec> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    /// Class names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.classes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl FromIterator<(String, ResourceClassSpec)> for ResourceClassTable {
    fn from_iter<I: IntoIterator<Item = (String, ResourceClassSpec)>>(iter: I) -> Self {
        Self {
            classes: iter.into_iter().collect(),
        }
    }
}

/// Class names become queue names, so they must be non-empty and free of
/// the '/' queue key separator.
pub fn is_valid_class_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/')
}

/// Queue reference holding the idle pool for a resource class.
pub fn pool_queue_name(resource_class: &str) -> String {
    format!("pool-{resource_class}")
}

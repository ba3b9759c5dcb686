//! Tracks record ids dispatched to the worker pool that have not yet
//! been saved.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct InFlightSet {
    inner: Arc<Mutex<HashSet<i64>>>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, id: i64) {
        self.inner.lock().expect("in-flight set lock poisoned").insert(id);
    }

    pub fn contains(&self, id: i64) -> bool {
        self.inner.lock().expect("in-flight set lock poisoned").contains(&id)
    }

    pub fn delete(&self, id: i64) {
        self.inner.lock().expect("in-flight set lock poisoned").remove(&id);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("in-flight set lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

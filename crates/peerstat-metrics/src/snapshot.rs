//! Value types exchanged between peers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Synchronisable state of one store at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub comments: Vec<String>,
    pub data: BTreeMap<String, u64>,
}

/// Synchronisable state of every store, keyed by store name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateSnapshot {
    pub graphs: BTreeMap<String, StoreSnapshot>,
}

impl AggregateSnapshot {
    pub fn get(&self, store: &str) -> Option<&StoreSnapshot> {
        self.graphs.get(store)
    }
}

/// One bar of a chart: a label and its current value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    pub label: String,
    pub value: u64,
}

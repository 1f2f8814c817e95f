//! Timeline markers
//!
//! Named positions keyed by a single character for jump-to-marker.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A named position on the timeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub offset: u64,
    pub name: String,
}

impl Marker {
    pub fn new(offset: u64, name: impl Into<String>) -> Self {
        Self {
            offset,
            name: name.into(),
        }
    }
}

/// Character-keyed marker registry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkerMap {
    markers: HashMap<char, Marker>,
}

impl MarkerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or replace the marker on `key`
    pub fn set(&mut self, key: char, marker: Marker) {
        self.markers.insert(key, marker);
    }

    pub fn get(&self, key: char) -> Option<&Marker> {
        self.markers.get(&key)
    }

    pub fn remove(&mut self, key: char) -> Option<Marker> {
        self.markers.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Markers ordered by timeline position
    pub fn sorted(&self) -> Vec<(char, &Marker)> {
        let mut entries: Vec<(char, &Marker)> =
            self.markers.iter().map(|(k, m)| (*k, m)).collect();
        entries.sort_by_key(|(_, m)| m.offset);
        entries
    }
}

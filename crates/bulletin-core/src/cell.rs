//! Cell presences
//!
//! The live [`CellSet`] is the ground truth for whether a cell is alive.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Resources a cell advertises
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellCapacity {
    pub memory_mb: i32,
    pub disk_mb: i32,
    pub containers: i32,
}

/// A registered cell agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellPresence {
    pub cell_id: String,
    pub rep_address: String,
    #[serde(default)]
    pub rep_url: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub capacity: CellCapacity,
}

impl CellPresence {
    pub fn new(cell_id: impl Into<String>, rep_address: impl Into<String>) -> Self {
        Self {
            cell_id: cell_id.into(),
            rep_address: rep_address.into(),
            rep_url: String::new(),
            zone: String::new(),
            capacity: CellCapacity::default(),
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    pub fn with_rep_url(mut self, rep_url: impl Into<String>) -> Self {
        self.rep_url = rep_url.into();
        self
    }
}

/// Live cells keyed by cell id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellSet {
    cells: HashMap<String, CellPresence>,
}

impl CellSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, cell: CellPresence) {
        self.cells.insert(cell.cell_id.clone(), cell);
    }

    pub fn contains(&self, cell_id: &str) -> bool {
        self.cells.contains_key(cell_id)
    }

    pub fn get(&self, cell_id: &str) -> Option<&CellPresence> {
        self.cells.get(cell_id)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell_ids(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }
}

impl FromIterator<CellPresence> for CellSet {
    fn from_iter<I: IntoIterator<Item = CellPresence>>(iter: I) -> Self {
        let mut set = Self::new();
        for cell in iter {
            set.insert(cell);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_set_contains() {
        let set: CellSet = [
            CellPresence::new("cell-1", "10.0.0.1:1800"),
            CellPresence::new("cell-2", "10.0.0.2:1800").with_zone("z1"),
        ]
        .into_iter()
        .collect();

        assert_eq!(set.len(), 2);
        assert!(set.contains("cell-1"));
        assert!(!set.contains("cell-3"));
        assert_eq!(set.get("cell-2").map(|c| c.zone.as_str()), Some("z1"));
    }

    #[test]
    fn test_insert_replaces_same_cell() {
        let mut set = CellSet::new();
        set.insert(CellPresence::new("cell-1", "a"));
        set.insert(CellPresence::new("cell-1", "b"));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("cell-1").map(|c| c.rep_address.as_str()), Some("b"));
    }
}

//! Tombstone registry — durable record of deleted ids.
//!
//! DESIGN
//! ======
//! The registry is disjoint from the live collections and holds both
//! conversation ids and canvas element ids. A remote merge consults it before
//! admitting anything: deleted always wins over resurrected. Entries leave the
//! registry only through a full `clear`.
//!
//! The persisted form is a list of `{id, deletedAt}` objects. A bare list of
//! id strings is also accepted on load.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tombstone {
    pub id: String,
    pub deleted_at: i64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TombstoneRecord {
    Stamped(Vec<Tombstone>),
    Bare(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TombstoneRegistry {
    entries: BTreeMap<String, i64>,
}

impl TombstoneRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a persisted tombstone record.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the record is neither form.
    pub fn from_record(raw: &str) -> Result<Self, serde_json::Error> {
        let entries = match serde_json::from_str::<TombstoneRecord>(raw)? {
            TombstoneRecord::Stamped(list) => list.into_iter().map(|t| (t.id, t.deleted_at)).collect(),
            TombstoneRecord::Bare(ids) => ids.into_iter().map(|id| (id, 0)).collect(),
        };
        Ok(Self { entries })
    }

    /// Serialize to the persisted record form.
    ///
    /// # Errors
    ///
    /// Returns the JSON error from serialization.
    pub fn to_record(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.iter().collect::<Vec<_>>())
    }

    /// Record a deletion. Returns `false` if the id was already tombstoned;
    /// the original deletion time is kept.
    pub fn insert(&mut self, id: impl Into<String>, deleted_at: i64) -> bool {
        let id = id.into();
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, deleted_at);
        true
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn iter(&self) -> impl Iterator<Item = Tombstone> + '_ {
        self.entries
            .iter()
            .map(|(id, deleted_at)| Tombstone { id: id.clone(), deleted_at: *deleted_at })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
#[path = "tombstone_test.rs"]
mod tests;

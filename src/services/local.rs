//! Local persistence adapter — snapshots of the working set in key-value storage.
//!
//! DESIGN
//! ======
//! The whole conversation map is written as one record under the configured
//! key, with conversations as an explicit `[id, record]` pair list ordered by
//! `updatedAt` descending. Message lists are capped to the most recent
//! `message_limit` entries on the way out and again on the way in, so an
//! oversized record written by an older build is trimmed on load.
//!
//! ERROR HANDLING
//! ==============
//! A quota refusal evicts other keys, least recently written first, then
//! retries once. Keys owned by this adapter and keys under protected prefixes
//! are never evicted. When the retry also fails the adapter enters degraded
//! mode: the in-memory working set stays authoritative and the remote tier is
//! the only durable copy until a later save succeeds. Nothing here returns an
//! error to the store; every failure becomes a `SaveOutcome` or `LoadOutcome`.

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::services::canvas;
use crate::services::guard::{self, Corruption, GuardLimits, SCHEMA_VERSION};
use crate::services::tombstone::TombstoneRegistry;
use crate::state::{CanvasElement, ChatMessage, Conversation};
use crate::storage::{KeyValueStorage, StorageError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    SavedAfterEviction { evicted: Vec<String> },
    /// Nothing was written. In-memory state remains the source of truth.
    Degraded,
}

impl SaveOutcome {
    #[must_use]
    pub fn is_saved(&self) -> bool {
        !matches!(self, Self::Degraded)
    }
}

/// Hydrated working set.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub conversations: Vec<Conversation>,
    pub active_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Empty,
    Loaded(Snapshot),
    Corrupt(Corruption),
}

pub struct LocalPersistence {
    storage: Box<dyn KeyValueStorage>,
    conversations_key: String,
    tombstones_key: String,
    protected_prefixes: Vec<String>,
    message_limit: usize,
    limits: GuardLimits,
    degraded: bool,
}

// =============================================================================
// WIRE VIEWS
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotView<'a> {
    schema_version: u64,
    conversations: Vec<(String, RecordView<'a>)>,
    active_conversation_id: Option<String>,
    saved_at: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordView<'a> {
    id: Uuid,
    title: &'a str,
    messages: &'a [ChatMessage],
    canvas_elements: &'a [CanvasElement],
    created_at: i64,
    updated_at: i64,
    pinned: bool,
}

impl LocalPersistence {
    #[must_use]
    pub fn new(storage: Box<dyn KeyValueStorage>, config: &EngineConfig) -> Self {
        Self {
            storage,
            conversations_key: config.conversations_key.clone(),
            tombstones_key: config.tombstones_key.clone(),
            protected_prefixes: config.protected_prefixes.clone(),
            message_limit: config.message_limit.max(1),
            limits: GuardLimits {
                max_conversations: config.max_conversations,
                max_messages: config.max_messages,
            },
            degraded: false,
        }
    }

    #[must_use]
    pub fn storage(&self) -> &dyn KeyValueStorage {
        self.storage.as_ref()
    }

    /// Whether the last write failed and nothing durable reflects the
    /// current working set locally.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    // =========================================================================
    // SAVE
    // =========================================================================

    /// Write the full working set.
    pub fn save<'a>(
        &mut self,
        conversations: impl IntoIterator<Item = &'a Conversation>,
        active: Option<Uuid>,
    ) -> SaveOutcome {
        let payload = match self.encode(conversations, active) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "conversation snapshot encode failed");
                return self.degrade();
            }
        };
        let key = self.conversations_key.clone();
        self.write_with_eviction(&key, &payload)
    }

    fn encode<'a>(
        &self,
        conversations: impl IntoIterator<Item = &'a Conversation>,
        active: Option<Uuid>,
    ) -> Result<String, serde_json::Error> {
        let mut ordered: Vec<&Conversation> = conversations.into_iter().collect();
        ordered.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let conversations = ordered
            .into_iter()
            .map(|conv| {
                let keep_from = conv.messages.len().saturating_sub(self.message_limit);
                let record = RecordView {
                    id: conv.id,
                    title: &conv.title,
                    messages: &conv.messages[keep_from..],
                    canvas_elements: &conv.canvas_elements,
                    created_at: conv.created_at,
                    updated_at: conv.updated_at,
                    pinned: conv.pinned,
                };
                (conv.id.to_string(), record)
            })
            .collect();

        let view = SnapshotView {
            schema_version: SCHEMA_VERSION,
            conversations,
            active_conversation_id: active.map(|id| id.to_string()),
            saved_at: OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        };
        serde_json::to_string(&view)
    }

    /// Persist the tombstone registry under its own key.
    pub fn save_tombstones(&mut self, tombstones: &TombstoneRegistry) -> SaveOutcome {
        let payload = match tombstones.to_record() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "tombstone record encode failed");
                return self.degrade();
            }
        };
        let key = self.tombstones_key.clone();
        self.write_with_eviction(&key, &payload)
    }

    fn write_with_eviction(&mut self, key: &str, value: &str) -> SaveOutcome {
        match self.storage.set(key, value) {
            Ok(()) => {
                self.recover();
                SaveOutcome::Saved
            }
            Err(StorageError::QuotaExceeded { needed, available, .. }) => {
                let evicted = self.evict(needed.saturating_sub(available));
                match self.storage.set(key, value) {
                    Ok(()) => {
                        info!(key, evicted = evicted.len(), "local save succeeded after eviction");
                        self.recover();
                        SaveOutcome::SavedAfterEviction { evicted }
                    }
                    Err(e) => {
                        warn!(key, error = %e, evicted = evicted.len(), "local save failed after eviction; running degraded");
                        self.degrade()
                    }
                }
            }
            Err(e) => {
                error!(key, error = %e, "local save failed; running degraded");
                self.degrade()
            }
        }
    }

    /// Remove other keys, least recently written first, until `deficit`
    /// bytes are freed or no candidates remain.
    fn evict(&mut self, deficit: usize) -> Vec<String> {
        let mut candidates = match self.storage.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "storage listing failed; nothing evicted");
                return Vec::new();
            }
        };
        candidates.retain(|entry| !self.is_retained(&entry.key));
        candidates.sort_by_key(|entry| entry.touched);

        let mut freed = 0;
        let mut evicted = Vec::new();
        for entry in candidates {
            if freed >= deficit {
                break;
            }
            match self.storage.remove(&entry.key) {
                Ok(_) => {
                    freed += entry.bytes;
                    evicted.push(entry.key);
                }
                Err(e) => warn!(key = %entry.key, error = %e, "eviction failed"),
            }
        }
        evicted
    }

    fn is_retained(&self, key: &str) -> bool {
        key == self.conversations_key
            || key == self.tombstones_key
            || self.protected_prefixes.iter().any(|prefix| key.starts_with(prefix.as_str()))
    }

    fn degrade(&mut self) -> SaveOutcome {
        self.degraded = true;
        SaveOutcome::Degraded
    }

    fn recover(&mut self) {
        if self.degraded {
            info!("local persistence recovered");
            self.degraded = false;
        }
    }

    // =========================================================================
    // LOAD
    // =========================================================================

    /// Read and validate the persisted working set.
    #[must_use]
    pub fn load(&self) -> LoadOutcome {
        let raw = match self.storage.get(&self.conversations_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return LoadOutcome::Empty,
            Err(e) => {
                error!(error = %e, "local snapshot read failed; starting empty");
                return LoadOutcome::Empty;
            }
        };
        match self.decode(&raw) {
            Ok(snapshot) => LoadOutcome::Loaded(snapshot),
            Err(corruption) => LoadOutcome::Corrupt(corruption),
        }
    }

    fn decode(&self, raw: &str) -> Result<Snapshot, Corruption> {
        let validated = guard::validate(raw, self.limits)?;

        let mut conversations: Vec<Conversation> = Vec::with_capacity(validated.conversations.len());
        for (index, (pair_id, record)) in validated.conversations.into_iter().enumerate() {
            let mut conv: Conversation = serde_json::from_value(record)
                .map_err(|e| Corruption::Decode(format!("entry {index}: {e}")))?;

            match Uuid::parse_str(&pair_id) {
                Ok(id) if id == conv.id => {}
                _ => return Err(Corruption::Decode(format!("entry {index}: pair id does not match record id"))),
            }
            if conversations.iter().any(|c| c.id == conv.id) {
                return Err(Corruption::Decode(format!("entry {index}: duplicate conversation id")));
            }
            for element in &conv.canvas_elements {
                canvas::check_invariants(element).map_err(|e| Corruption::Decode(format!("entry {index}: {e}")))?;
            }

            conv.messages.retain(|m| !m.text.trim().is_empty());
            let overflow = conv.messages.len().saturating_sub(self.message_limit);
            conv.messages.drain(..overflow);
            conversations.push(conv);
        }

        // EDGE: an active id that is not a UUID is dropped, not fatal; the
        // store promotes the most recent conversation instead.
        let active_id = validated
            .active_conversation_id
            .and_then(|raw| Uuid::parse_str(&raw).ok());

        Ok(Snapshot { conversations, active_id })
    }

    /// Load tombstones. A malformed record is cleared rather than trusted.
    pub fn load_tombstones(&mut self) -> TombstoneRegistry {
        let raw = match self.storage.get(&self.tombstones_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return TombstoneRegistry::new(),
            Err(e) => {
                error!(error = %e, "tombstone read failed; starting with none");
                return TombstoneRegistry::new();
            }
        };
        match TombstoneRegistry::from_record(&raw) {
            Ok(registry) => registry,
            Err(e) => {
                warn!(error = %e, "tombstone record malformed; clearing");
                if let Err(e) = self.storage.remove(&self.tombstones_key) {
                    warn!(error = %e, "tombstone record removal failed");
                }
                TombstoneRegistry::new()
            }
        }
    }

    /// Remove the persisted working set. Tombstones are kept.
    pub fn clear_working_set(&mut self) -> bool {
        match self.storage.remove(&self.conversations_key) {
            Ok(existed) => existed,
            Err(e) => {
                error!(error = %e, "local snapshot removal failed");
                false
            }
        }
    }
}

#[cfg(test)]
#[path = "local_test.rs"]
mod tests;

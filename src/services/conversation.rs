//! Conversation store — the single writer of the working set.
//!
//! DESIGN
//! ======
//! Every mutation follows the same path: apply to the in-memory map, persist
//! synchronously through the local adapter, mark the conversation dirty for
//! the remote tier, publish an event. Mutations take `&mut self` and never
//! await, so two of them cannot interleave and there is no in-flight state
//! to double-create.
//!
//! Startup runs one versioned loader: tombstones first, then the guarded
//! snapshot. A corrupt snapshot triggers a hard reset to exactly one default
//! conversation; nothing of the corrupted payload is kept.
//!
//! ERROR HANDLING
//! ==============
//! Invalid operations (unknown ids, blank text, version rule violations)
//! return `false` / `None` and log at DEBUG or WARN. Storage and remote
//! errors never reach callers; the adapters convert them into outcomes.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::event::{EventBus, StoreEvent};
use crate::services::canvas::{self, VersionError};
use crate::services::local::{LoadOutcome, LocalPersistence, SaveOutcome, Snapshot};
use crate::services::sync::{SyncPlan, SyncQueue};
use crate::services::tombstone::TombstoneRegistry;
use crate::state::{
    CanvasElement, CanvasKind, ChatMessage, Conversation, NewMessage, Version, VersionContent, VersionState, derive_title,
    now_ms,
};
use crate::storage::KeyValueStorage;

pub struct ConversationStore {
    conversations: HashMap<Uuid, Conversation>,
    active_id: Option<Uuid>,
    tombstones: TombstoneRegistry,
    local: LocalPersistence,
    sync: SyncQueue,
    events: EventBus,
}

impl ConversationStore {
    /// Load tombstones, validate and hydrate the local snapshot (or reset).
    #[must_use]
    pub fn open(config: &EngineConfig, storage: Box<dyn KeyValueStorage>, events: EventBus) -> Self {
        Self::open_at(config, storage, events, Instant::now())
    }

    #[must_use]
    pub fn open_at(config: &EngineConfig, storage: Box<dyn KeyValueStorage>, events: EventBus, now: Instant) -> Self {
        let mut local = LocalPersistence::new(storage, config);

        // PHASE: TOMBSTONES
        // WHY: deletions must be known before any record is admitted.
        let tombstones = local.load_tombstones();

        let mut store = Self {
            conversations: HashMap::new(),
            active_id: None,
            tombstones,
            local,
            sync: SyncQueue::new(config.sync, now),
            events,
        };

        // PHASE: GUARD + HYDRATE
        match store.local.load() {
            LoadOutcome::Empty => debug!("no local conversations"),
            LoadOutcome::Loaded(snapshot) => store.hydrate(snapshot),
            LoadOutcome::Corrupt(reason) => store.reset(&reason.to_string()),
        }
        store
    }

    fn hydrate(&mut self, snapshot: Snapshot) {
        let total = snapshot.conversations.len();
        for mut conv in snapshot.conversations {
            if self.tombstones.contains(&conv.id.to_string()) {
                continue;
            }
            conv.canvas_elements
                .retain(|element| !self.tombstones.contains(&element.id));
            self.conversations.insert(conv.id, conv);
        }

        self.active_id = snapshot
            .active_id
            .filter(|id| self.conversations.contains_key(id))
            .or_else(|| self.most_recent_id());

        let dropped = total - self.conversations.len();
        if dropped > 0 {
            warn!(dropped, "tombstoned conversations dropped on load");
        }
        info!(count = self.conversations.len(), "local conversations loaded");
    }

    /// Hard reset: drop the persisted working set and every conversation,
    /// then start over with one default conversation. Tombstones survive.
    pub fn reset(&mut self, reason: &str) {
        warn!(reason, "resetting local conversations");
        self.local.clear_working_set();
        self.conversations.clear();
        self.active_id = None;
        self.create_conversation(None);
    }

    // =========================================================================
    // READS
    // =========================================================================

    #[must_use]
    pub fn active(&self) -> Option<&Conversation> {
        self.active_id.and_then(|id| self.conversations.get(&id))
    }

    #[must_use]
    pub fn active_id(&self) -> Option<Uuid> {
        self.active_id
    }

    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    /// Every conversation, pinned first, then most recently updated.
    #[must_use]
    pub fn all(&self) -> Vec<&Conversation> {
        let mut all: Vec<&Conversation> = self.conversations.values().collect();
        all.sort_by(|a, b| display_order(a, b));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    /// Case-insensitive search over titles, message text, and canvas content.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<Conversation> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut hits: Vec<&Conversation> = self.conversations.values().filter(|c| c.matches(&needle)).collect();
        hits.sort_by(|a, b| display_order(a, b));
        hits.into_iter().cloned().collect()
    }

    /// Canvas elements of a conversation; empty for unknown ids.
    #[must_use]
    pub fn canvas_elements(&self, conversation_id: Uuid) -> &[CanvasElement] {
        self.conversations
            .get(&conversation_id)
            .map(|conv| conv.canvas_elements.as_slice())
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn canvas_element(&self, element_id: &str) -> Option<&CanvasElement> {
        self.conversations.values().find_map(|conv| conv.canvas_element(element_id))
    }

    #[must_use]
    pub fn tombstones(&self) -> &TombstoneRegistry {
        &self.tombstones
    }

    #[must_use]
    pub fn local(&self) -> &LocalPersistence {
        &self.local
    }

    #[must_use]
    pub fn sync_queue(&self) -> &SyncQueue {
        &self.sync
    }

    fn most_recent_id(&self) -> Option<Uuid> {
        self.conversations
            .values()
            .max_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.created_at.cmp(&b.created_at)))
            .map(|conv| conv.id)
    }

    // =========================================================================
    // CONVERSATION MUTATIONS
    // =========================================================================

    /// Create a conversation and make it active.
    pub fn create_conversation(&mut self, title: Option<&str>) -> Conversation {
        let conv = Conversation::new(title, now_ms());
        let id = conv.id;
        self.conversations.insert(id, conv.clone());
        self.active_id = Some(id);
        self.commit(id);
        self.events.publish(StoreEvent::ConversationCreated { id });
        info!(%id, "conversation created");
        conv
    }

    /// The active conversation, promoting the most recent one or creating a
    /// default when none is active.
    pub fn ensure_active(&mut self) -> &Conversation {
        let id = self.ensure_active_id();
        &self.conversations[&id]
    }

    fn ensure_active_id(&mut self) -> Uuid {
        if let Some(id) = self.active_id.filter(|id| self.conversations.contains_key(id)) {
            return id;
        }
        if let Some(id) = self.most_recent_id() {
            self.active_id = Some(id);
            self.persist();
            return id;
        }
        self.create_conversation(None).id
    }

    pub fn switch_to(&mut self, id: Uuid) -> Option<&Conversation> {
        if !self.conversations.contains_key(&id) {
            debug!(%id, "switch to unknown conversation ignored");
            return None;
        }
        if self.active_id != Some(id) {
            self.active_id = Some(id);
            self.persist();
        }
        self.conversations.get(&id)
    }

    /// Append a message to `conversation_id`, or to the active conversation.
    /// Returns `None` for blank text or an unknown conversation.
    pub fn add_message(&mut self, conversation_id: Option<Uuid>, message: NewMessage) -> Option<ChatMessage> {
        if message.text.trim().is_empty() {
            debug!("blank message ignored");
            return None;
        }
        let id = match conversation_id {
            Some(id) if self.conversations.contains_key(&id) => id,
            Some(id) => {
                warn!(%id, "message for unknown conversation ignored");
                return None;
            }
            None => self.ensure_active_id(),
        };

        let now = now_ms();
        let conv = self.conversations.get_mut(&id)?;
        let message = message.into_message(now);
        if message.is_user
            && conv.has_placeholder_title()
            && let Some(title) = derive_title(&message.text)
        {
            conv.title = title;
        }
        conv.messages.push(message.clone());
        conv.updated_at = conv.updated_at.max(now);
        let total = conv.messages.len();

        self.commit(id);
        self.events
            .publish(StoreEvent::ConversationUpdated { id, message: message.clone(), total });
        Some(message)
    }

    /// Delete a conversation and tombstone its id. The active pointer moves
    /// to the most recent remaining conversation, or a fresh default.
    pub fn delete_conversation(&mut self, id: Uuid) -> bool {
        if self.conversations.remove(&id).is_none() {
            debug!(%id, "delete of unknown conversation ignored");
            return false;
        }

        self.tombstones.insert(id.to_string(), now_ms());
        self.persist_tombstones();
        self.sync.enqueue_deletion_at(id, Instant::now());

        if self.active_id == Some(id) {
            self.active_id = self.most_recent_id();
        }
        if self.conversations.is_empty() {
            self.create_conversation(None);
        } else {
            self.persist();
        }
        info!(%id, "conversation deleted");
        true
    }

    pub fn rename_conversation(&mut self, id: Uuid, title: &str) -> bool {
        let title = title.trim();
        if title.is_empty() {
            return false;
        }
        let Some(conv) = self.conversations.get_mut(&id) else {
            return false;
        };
        conv.title = title.to_owned();
        conv.updated_at = conv.updated_at.max(now_ms());
        self.commit(id);
        true
    }

    pub fn set_pinned(&mut self, id: Uuid, pinned: bool) -> bool {
        let Some(conv) = self.conversations.get_mut(&id) else {
            return false;
        };
        if conv.pinned != pinned {
            conv.pinned = pinned;
            conv.updated_at = conv.updated_at.max(now_ms());
            self.commit(id);
        }
        true
    }

    // =========================================================================
    // CANVAS
    // =========================================================================

    /// Create a canvas element in `conversation_id` (or the active
    /// conversation) and activate it.
    pub fn create_canvas_element(
        &mut self,
        conversation_id: Option<Uuid>,
        kind: CanvasKind,
        title: &str,
        content: VersionContent,
        request: &str,
    ) -> Option<CanvasElement> {
        let id = match conversation_id {
            Some(id) if self.conversations.contains_key(&id) => id,
            Some(_) => return None,
            None => self.ensure_active_id(),
        };
        let now = now_ms();
        let element = match canvas::new_element(kind, title, content, request, now) {
            Ok(element) => element,
            Err(e) => {
                warn!(error = %e, "canvas element rejected");
                return None;
            }
        };

        let conv = self.conversations.get_mut(&id)?;
        conv.canvas_elements.push(element.clone());
        conv.updated_at = conv.updated_at.max(now);
        self.commit(id);
        self.events.publish(StoreEvent::CanvasActivated {
            element_id: element.id.clone(),
            conversation_id: id,
            kind,
        });
        Some(element)
    }

    pub fn add_canvas_version(&mut self, element_id: &str, content: VersionContent, request: &str) -> Option<Version> {
        let now = now_ms();
        let (conversation_id, version) =
            self.update_element(element_id, |element| canvas::add_version(element, content, request, now))?;
        self.touch(conversation_id, now);
        Some(version)
    }

    pub fn rollback_canvas(&mut self, element_id: &str, number: u32) -> bool {
        let Some((conversation_id, ())) = self.update_element(element_id, |element| canvas::rollback(element, number))
        else {
            return false;
        };
        self.touch(conversation_id, now_ms());
        true
    }

    pub fn delete_canvas_version(&mut self, element_id: &str, number: u32) -> bool {
        let Some((conversation_id, ())) =
            self.update_element(element_id, |element| canvas::delete_version(element, number))
        else {
            return false;
        };
        self.touch(conversation_id, now_ms());
        true
    }

    pub fn advance_canvas_playback(&mut self, element_id: &str, number: u32) -> Option<VersionState> {
        let (conversation_id, state) =
            self.update_element(element_id, |element| canvas::advance_playback(element, number))?;
        self.touch(conversation_id, now_ms());
        Some(state)
    }

    /// Bump the conversation's `updated_at` to `now`, then persist and queue it.
    fn touch(&mut self, conversation_id: Uuid, now: i64) {
        if let Some(conv) = self.conversations.get_mut(&conversation_id) {
            conv.updated_at = conv.updated_at.max(now);
        }
        self.commit(conversation_id);
    }

    /// Announce an element as the one the user is looking at.
    pub fn activate_canvas(&self, element_id: &str) -> bool {
        let Some(conv) = self
            .conversations
            .values()
            .find(|conv| conv.canvas_element(element_id).is_some())
        else {
            return false;
        };
        let Some(element) = conv.canvas_element(element_id) else {
            return false;
        };
        self.events.publish(StoreEvent::CanvasActivated {
            element_id: element.id.clone(),
            conversation_id: conv.id,
            kind: element.kind,
        });
        true
    }

    /// Remove an element with its whole history and tombstone its id.
    pub fn delete_canvas_element_permanently(&mut self, element_id: &str) -> bool {
        let Some(conversation_id) = self.conversation_of(element_id) else {
            return false;
        };
        let Some(conv) = self.conversations.get_mut(&conversation_id) else {
            return false;
        };
        conv.canvas_elements.retain(|element| element.id != element_id);

        let now = now_ms();
        self.tombstones.insert(element_id, now);
        self.persist_tombstones();
        self.touch(conversation_id, now);
        info!(element = element_id, "canvas element deleted");
        true
    }

    fn conversation_of(&self, element_id: &str) -> Option<Uuid> {
        self.conversations
            .values()
            .find(|conv| conv.canvas_element(element_id).is_some())
            .map(|conv| conv.id)
    }

    fn update_element<R>(
        &mut self,
        element_id: &str,
        apply: impl FnOnce(&mut CanvasElement) -> Result<R, VersionError>,
    ) -> Option<(Uuid, R)> {
        let Some(conversation_id) = self.conversation_of(element_id) else {
            debug!(element = element_id, "unknown canvas element");
            return None;
        };
        let element = self
            .conversations
            .get_mut(&conversation_id)?
            .canvas_element_mut(element_id)?;
        match apply(element) {
            Ok(result) => Some((conversation_id, result)),
            Err(e) => {
                debug!(element = element_id, error = %e, "canvas operation refused");
                None
            }
        }
    }

    // =========================================================================
    // REMOTE
    // =========================================================================

    /// Admit pulled conversations that are neither tombstoned nor already
    /// known locally. Returns how many were admitted.
    pub fn merge_remote(&mut self, incoming: Vec<Conversation>) -> usize {
        let offered = incoming.len();
        let mut admitted = 0;
        for mut conv in incoming {
            if self.tombstones.contains(&conv.id.to_string()) || self.conversations.contains_key(&conv.id) {
                continue;
            }
            conv.canvas_elements
                .retain(|element| !self.tombstones.contains(&element.id));
            conv.messages.retain(|m| !m.text.trim().is_empty());
            self.conversations.insert(conv.id, conv);
            admitted += 1;
        }

        if admitted > 0 {
            if self.active().is_none() {
                self.active_id = self.most_recent_id();
            }
            self.persist();
        }
        info!(offered, admitted, "remote conversations merged");
        admitted
    }

    pub fn take_sync_plan_at(&mut self, now: Instant) -> Option<SyncPlan> {
        self.sync.take_due_at(now, &self.conversations)
    }

    pub fn requeue_sync(&mut self, ids: Vec<Uuid>, deletions: Vec<Uuid>, now: Instant) {
        self.sync.requeue_at(ids, deletions, now);
    }

    /// Request and take an immediate plan in one step.
    pub fn take_immediate_sync_plan_at(&mut self, now: Instant) -> Option<SyncPlan> {
        self.sync.request_immediate();
        self.sync.take_due_at(now, &self.conversations)
    }

    // =========================================================================
    // PERSISTENCE
    // =========================================================================

    fn commit(&mut self, id: Uuid) {
        self.persist();
        self.sync.enqueue_at(id, Instant::now());
    }

    fn persist(&mut self) -> SaveOutcome {
        self.local.save(self.conversations.values(), self.active_id)
    }

    fn persist_tombstones(&mut self) -> SaveOutcome {
        self.local.save_tombstones(&self.tombstones)
    }
}

fn display_order(a: &Conversation, b: &Conversation) -> std::cmp::Ordering {
    b.pinned
        .cmp(&a.pinned)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
#[path = "conversation_test.rs"]
mod tests;

//! Engine state — conversation model and the shared composition root.
//!
//! DESIGN
//! ======
//! Conversations and their embedded canvas elements are plain owned values.
//! `ConversationStore` is the only writer; collaborators read clones or
//! borrowed references, and the canvas version manager only ever sees the
//! single `&mut CanvasElement` it is asked to change.
//!
//! `EngineState` is constructed explicitly at the composition root and cloned
//! into whatever needs it. The store sits behind an async `RwLock` so the
//! background sync task can snapshot due work, release the lock, and perform
//! network I/O without holding up local mutations.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::event::{EventBus, StoreEvent};
use crate::services::conversation::ConversationStore;
use crate::services::remote::{RemoteBackend, RemoteSync};
use crate::storage::KeyValueStorage;

/// Title given to conversations until a meaningful user message names them.
pub const PLACEHOLDER_TITLE: &str = "New Chat";

const ID_SUFFIX_LEN: usize = 9;
const TITLE_MAX_CHARS: usize = 50;

// =============================================================================
// TIME + IDS
// =============================================================================

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// Locally generated id of the form `<prefix>_<millis>_<suffix>`.
///
/// Nothing outside this process depends on the format.
#[must_use]
pub fn local_id(prefix: &str) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{prefix}_{}_{suffix}", now_ms())
}

// =============================================================================
// MESSAGES
// =============================================================================

/// A single chat message. Appended only, never edited or reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub is_user: bool,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_element_ids: Option<Vec<String>>,
}

/// Caller-supplied message content; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub text: String,
    pub is_user: bool,
    pub tool_results: Option<Vec<serde_json::Value>>,
    pub canvas_element_ids: Option<Vec<String>>,
}

impl NewMessage {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_user: true, tool_results: None, canvas_element_ids: None }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self { text: text.into(), is_user: false, tool_results: None, canvas_element_ids: None }
    }

    #[must_use]
    pub fn with_tool_results(mut self, results: Vec<serde_json::Value>) -> Self {
        self.tool_results = Some(results);
        self
    }

    #[must_use]
    pub fn with_canvas_elements(mut self, ids: Vec<String>) -> Self {
        self.canvas_element_ids = Some(ids);
        self
    }

    /// Stamp the message with a fresh id and the given timestamp.
    #[must_use]
    pub fn into_message(self, timestamp: i64) -> ChatMessage {
        ChatMessage {
            id: local_id("msg"),
            text: self.text,
            is_user: self.is_user,
            timestamp,
            tool_results: self.tool_results,
            canvas_element_ids: self.canvas_element_ids,
        }
    }
}

// =============================================================================
// CANVAS
// =============================================================================

/// Closed set of canvas element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CanvasKind {
    Document,
    Code,
    Chart,
}

impl CanvasKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Code => "code",
            Self::Chart => "chart",
        }
    }
}

impl std::fmt::Display for CanvasKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific payload of one canvas version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum VersionContent {
    Document { markdown: String },
    Code { language: String, source: String },
    Chart { spec: serde_json::Value },
}

impl VersionContent {
    #[must_use]
    pub fn kind(&self) -> CanvasKind {
        match self {
            Self::Document { .. } => CanvasKind::Document,
            Self::Code { .. } => CanvasKind::Code,
            Self::Chart { .. } => CanvasKind::Chart,
        }
    }

    /// Text fed to search. Charts contribute their serialized spec.
    #[must_use]
    pub fn searchable_text(&self) -> String {
        match self {
            Self::Document { markdown } => markdown.clone(),
            Self::Code { language, source } => format!("{language}\n{source}"),
            Self::Chart { spec } => spec.to_string(),
        }
    }
}

/// Playback state of a version. `Deleted` is terminal for that version only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionState {
    Draft,
    Typing,
    Frozen,
    Displayed,
    Deleted,
}

impl VersionState {
    /// Next playback state, or `None` once displayed or deleted.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Draft => Some(Self::Typing),
            Self::Typing => Some(Self::Frozen),
            Self::Frozen => Some(Self::Displayed),
            Self::Displayed | Self::Deleted => None,
        }
    }
}

/// One immutable snapshot in a canvas element's version chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub number: u32,
    pub content: VersionContent,
    pub state: VersionState,
    pub request: String,
    pub timestamp: i64,
}

/// A canvas artifact attached to a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasElement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CanvasKind,
    pub title: String,
    pub versions: Vec<Version>,
    pub current_version: u32,
    #[serde(default)]
    pub completed_versions: BTreeSet<u32>,
}

impl CanvasElement {
    #[must_use]
    pub fn version(&self, number: u32) -> Option<&Version> {
        let index = usize::try_from(number).ok()?.checked_sub(1)?;
        self.versions.get(index)
    }

    pub(crate) fn version_mut(&mut self, number: u32) -> Option<&mut Version> {
        let index = usize::try_from(number).ok()?.checked_sub(1)?;
        self.versions.get_mut(index)
    }

    /// The version the current-version pointer refers to.
    #[must_use]
    pub fn current(&self) -> Option<&Version> {
        self.version(self.current_version)
    }

    /// Versions not marked deleted.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.versions
            .iter()
            .filter(|v| v.state != VersionState::Deleted)
            .count()
    }

    fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self
                .versions
                .iter()
                .any(|v| v.content.searchable_text().to_lowercase().contains(needle))
    }
}

// =============================================================================
// CONVERSATION
// =============================================================================

/// A conversation thread. The id never changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub canvas_elements: Vec<CanvasElement>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub pinned: bool,
}

impl Conversation {
    #[must_use]
    pub fn new(title: Option<&str>, now: i64) -> Self {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(PLACEHOLDER_TITLE);
        Self {
            id: Uuid::new_v4(),
            title: title.to_owned(),
            messages: Vec::new(),
            canvas_elements: Vec::new(),
            created_at: now,
            updated_at: now,
            pinned: false,
        }
    }

    #[must_use]
    pub fn has_placeholder_title(&self) -> bool {
        self.title.trim().is_empty() || self.title == PLACEHOLDER_TITLE
    }

    #[must_use]
    pub fn canvas_element(&self, element_id: &str) -> Option<&CanvasElement> {
        self.canvas_elements.iter().find(|e| e.id == element_id)
    }

    pub(crate) fn canvas_element_mut(&mut self, element_id: &str) -> Option<&mut CanvasElement> {
        self.canvas_elements.iter_mut().find(|e| e.id == element_id)
    }

    /// Case-insensitive match; `needle` must already be lowercased.
    #[must_use]
    pub fn matches(&self, needle: &str) -> bool {
        self.title.to_lowercase().contains(needle)
            || self
                .messages
                .iter()
                .any(|m| m.text.to_lowercase().contains(needle))
            || self.canvas_elements.iter().any(|e| e.matches(needle))
    }
}

/// Title derived from a user message, or `None` when the text carries no
/// words worth naming a conversation after.
#[must_use]
pub fn derive_title(text: &str) -> Option<String> {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if !collapsed.chars().any(char::is_alphanumeric) {
        return None;
    }
    if collapsed.chars().count() <= TITLE_MAX_CHARS {
        return Some(collapsed);
    }

    let truncated: String = collapsed.chars().take(TITLE_MAX_CHARS).collect();
    let cut = match truncated.rfind(' ') {
        Some(idx) if idx > 0 => &truncated[..idx],
        _ => truncated.as_str(),
    };
    Some(format!("{cut}..."))
}

// =============================================================================
// ENGINE STATE
// =============================================================================

/// Shared engine handle. Clone is cheap; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct EngineState {
    pub store: Arc<RwLock<ConversationStore>>,
    /// `None` when no remote tier is configured; local storage is then the
    /// only durable copy.
    pub remote: Option<Arc<RemoteSync>>,
    pub events: EventBus,
    pub config: EngineConfig,
}

impl EngineState {
    /// Open the local tier (tombstones, guard, hydrate) and wire the remote.
    #[must_use]
    pub fn new(
        config: EngineConfig,
        storage: Box<dyn KeyValueStorage>,
        remote: Option<Arc<dyn RemoteBackend>>,
    ) -> Self {
        let events = EventBus::new();
        let store = ConversationStore::open(&config, storage, events.clone());
        let remote = remote.map(|backend| Arc::new(RemoteSync::new(backend, config.user_id.clone())));
        Self { store: Arc::new(RwLock::new(store)), remote, events, config }
    }

    /// Subscribe to store events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use super::*;
    use crate::storage::memory::MemoryStorage;

    /// Engine config tuned for tests: default limits, no env lookups.
    #[must_use]
    pub fn test_config() -> EngineConfig {
        EngineConfig::default()
    }

    /// A store over fresh in-memory storage.
    #[must_use]
    pub fn test_store() -> ConversationStore {
        ConversationStore::open(&test_config(), Box::new(MemoryStorage::new()), EventBus::new())
    }

    /// A store over the given storage with its own event bus.
    #[must_use]
    pub fn test_store_with(storage: MemoryStorage) -> (ConversationStore, EventBus) {
        let events = EventBus::new();
        let store = ConversationStore::open(&test_config(), Box::new(storage), events.clone());
        (store, events)
    }

    /// A conversation with `count` alternating user/assistant messages.
    #[must_use]
    pub fn conversation_with_messages(count: usize) -> Conversation {
        let mut conv = Conversation::new(Some("Seeded"), 1_700_000_000_000);
        for i in 0..count {
            let msg = if i % 2 == 0 {
                NewMessage::user(format!("question {i}"))
            } else {
                NewMessage::assistant(format!("answer {i}"))
            };
            conv.messages
                .push(msg.into_message(1_700_000_000_000 + i64::try_from(i).unwrap_or(0)));
        }
        conv
    }

    #[must_use]
    pub fn document(markdown: &str) -> VersionContent {
        VersionContent::Document { markdown: markdown.to_owned() }
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;

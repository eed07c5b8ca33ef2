//! Remote tier — wire records, backends, and availability tracking.
//!
//! DESIGN
//! ======
//! `RemoteBackend` is the seam: `HttpRemote` speaks the JSON query envelope
//! over HTTP, `MemoryRemote` keeps records in-process. `RemoteSync` wraps a
//! backend with an availability flag. After any failure the remote is marked
//! unavailable and a cheap `ping` must succeed before the next attempt.
//!
//! Canvas elements travel only as `{id, type, title, versionCount}`
//! summaries. Version content never leaves the local tier, so a pulled
//! conversation arrives without canvas elements.
//!
//! ERROR HANDLING
//! ==============
//! Backends return `RemoteError`. `RemoteSync` logs and absorbs them: push
//! reports failure through its return value, pull degrades to an empty list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::state::{CanvasKind, ChatMessage, Conversation, local_id};

const CONNECT_TIMEOUT_SECS: u64 = 5;
const COLLECTION: &str = "conversations";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("remote request failed: {0}")]
    Request(String),
    #[error("remote returned status {status}: {body}")]
    Response { status: u16, body: String },
    #[error("remote rejected {action}: {reason}")]
    Rejected { action: QueryAction, reason: String },
    #[error("remote reply malformed: {0}")]
    Parse(String),
    #[error("http client build failed: {0}")]
    HttpClientBuild(String),
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_element_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCanvasSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CanvasKind,
    pub title: String,
    pub version_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<RemoteMessage>,
    #[serde(default)]
    pub canvas: Vec<RemoteCanvasSummary>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub pinned: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryAction {
    Save,
    Get,
    Delete,
}

impl std::fmt::Display for QueryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Save => "save",
            Self::Get => "get",
            Self::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilters {
    pub user_id: String,
}

/// Request body POSTed to the remote query endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEnvelope {
    pub action: QueryAction,
    pub collection: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<RemoteConversation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<QueryFilters>,
}

impl QueryEnvelope {
    fn new(action: QueryAction) -> Self {
        Self { action, collection: COLLECTION.to_owned(), data: None, key: None, filters: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<RemoteConversation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// =============================================================================
// TRANSLATION
// =============================================================================

/// Translate a local conversation into its remote record.
#[must_use]
pub fn to_remote(conv: &Conversation, user_id: &str) -> RemoteConversation {
    RemoteConversation {
        id: conv.id.to_string(),
        user_id: user_id.to_owned(),
        title: conv.title.clone(),
        messages: conv
            .messages
            .iter()
            .map(|m| RemoteMessage {
                id: m.id.clone(),
                role: if m.is_user { Role::User } else { Role::Assistant },
                content: m.text.clone(),
                timestamp: m.timestamp,
                tool_results: m.tool_results.clone(),
                canvas_element_ids: m.canvas_element_ids.clone(),
            })
            .collect(),
        canvas: conv
            .canvas_elements
            .iter()
            .map(|e| RemoteCanvasSummary {
                id: e.id.clone(),
                kind: e.kind,
                title: e.title.clone(),
                version_count: e.versions.len(),
            })
            .collect(),
        created_at: conv.created_at,
        updated_at: conv.updated_at,
        pinned: conv.pinned,
    }
}

/// Translate a remote record into a local conversation. Records whose id is
/// not a UUID are skipped; messages with blank content are dropped.
#[must_use]
pub fn from_remote(record: RemoteConversation) -> Option<Conversation> {
    let Ok(id) = Uuid::parse_str(&record.id) else {
        warn!(id = %record.id, "remote conversation id is not a uuid; skipping");
        return None;
    };
    let messages = record
        .messages
        .into_iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| ChatMessage {
            id: if m.id.is_empty() { local_id("msg") } else { m.id },
            text: m.content,
            is_user: m.role == Role::User,
            timestamp: m.timestamp,
            tool_results: m.tool_results,
            canvas_element_ids: m.canvas_element_ids,
        })
        .collect();
    Some(Conversation {
        id,
        title: record.title,
        messages,
        canvas_elements: Vec::new(),
        created_at: record.created_at,
        updated_at: record.updated_at,
        pinned: record.pinned,
    })
}

// =============================================================================
// BACKEND SEAM
// =============================================================================

#[async_trait::async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Cheap reachability probe.
    async fn ping(&self) -> Result<(), RemoteError>;

    async fn save(&self, records: Vec<RemoteConversation>) -> Result<(), RemoteError>;

    async fn fetch(&self, user_id: &str) -> Result<Vec<RemoteConversation>, RemoteError>;

    async fn delete(&self, id: &str) -> Result<(), RemoteError>;
}

// =============================================================================
// HTTP BACKEND
// =============================================================================

pub struct HttpRemote {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpRemote {
    /// # Errors
    ///
    /// Returns [`RemoteError::HttpClientBuild`] if the client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
            .build()
            .map_err(|e| RemoteError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, endpoint: endpoint.into() })
    }

    async fn query(&self, envelope: &QueryEnvelope) -> Result<QueryReply, RemoteError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(envelope)
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(RemoteError::Response { status, body: text });
        }

        let reply = parse_reply(&text)?;
        if !reply.success {
            return Err(RemoteError::Rejected {
                action: envelope.action,
                reason: reply.error.unwrap_or_else(|| "unspecified".to_owned()),
            });
        }
        Ok(reply)
    }
}

fn parse_reply(json: &str) -> Result<QueryReply, RemoteError> {
    serde_json::from_str(json).map_err(|e| RemoteError::Parse(e.to_string()))
}

#[async_trait::async_trait]
impl RemoteBackend for HttpRemote {
    async fn ping(&self) -> Result<(), RemoteError> {
        let response = self
            .http
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| RemoteError::Request(e.to_string()))?;
        let status = response.status().as_u16();
        // EDGE: a query endpoint may refuse GET; any answer below 500 proves
        // the server is reachable.
        if status >= 500 {
            return Err(RemoteError::Response { status, body: String::new() });
        }
        Ok(())
    }

    async fn save(&self, records: Vec<RemoteConversation>) -> Result<(), RemoteError> {
        let envelope = QueryEnvelope { data: Some(records), ..QueryEnvelope::new(QueryAction::Save) };
        self.query(&envelope).await.map(|_| ())
    }

    async fn fetch(&self, user_id: &str) -> Result<Vec<RemoteConversation>, RemoteError> {
        let envelope = QueryEnvelope {
            filters: Some(QueryFilters { user_id: user_id.to_owned() }),
            ..QueryEnvelope::new(QueryAction::Get)
        };
        Ok(self.query(&envelope).await?.data.unwrap_or_default())
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        let envelope = QueryEnvelope { key: Some(id.to_owned()), ..QueryEnvelope::new(QueryAction::Delete) };
        self.query(&envelope).await.map(|_| ())
    }
}

// =============================================================================
// IN-PROCESS BACKEND
// =============================================================================

/// In-process backend keyed by conversation id. Clones share records.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    inner: Arc<MemoryRemoteInner>,
}

#[derive(Default)]
struct MemoryRemoteInner {
    records: Mutex<HashMap<String, RemoteConversation>>,
    failing: AtomicBool,
    pings: AtomicUsize,
    saves: Mutex<Vec<Vec<String>>>,
    deletes: Mutex<Vec<String>>,
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    pub fn seed(&self, record: RemoteConversation) {
        if let Ok(mut records) = self.inner.records.lock() {
            records.insert(record.id.clone(), record);
        }
    }

    #[must_use]
    pub fn record(&self, id: &str) -> Option<RemoteConversation> {
        self.inner.records.lock().ok()?.get(id).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.records.lock().map_or(0, |records| records.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every accepted save call, one entry per call.
    #[must_use]
    pub fn save_calls(&self) -> Vec<Vec<String>> {
        self.inner.saves.lock().map(|saves| saves.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        self.inner.deletes.lock().map(|deletes| deletes.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn ping_count(&self) -> usize {
        self.inner.pings.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), RemoteError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Request("memory remote set to fail".to_owned()));
        }
        Ok(())
    }

    fn poisoned() -> RemoteError {
        RemoteError::Request("memory remote lock poisoned".to_owned())
    }
}

#[async_trait::async_trait]
impl RemoteBackend for MemoryRemote {
    async fn ping(&self) -> Result<(), RemoteError> {
        self.inner.pings.fetch_add(1, Ordering::SeqCst);
        self.check()
    }

    async fn save(&self, records: Vec<RemoteConversation>) -> Result<(), RemoteError> {
        self.check()?;
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let mut stored = self.inner.records.lock().map_err(|_| Self::poisoned())?;
        for record in records {
            stored.insert(record.id.clone(), record);
        }
        self.inner.saves.lock().map_err(|_| Self::poisoned())?.push(ids);
        Ok(())
    }

    async fn fetch(&self, user_id: &str) -> Result<Vec<RemoteConversation>, RemoteError> {
        self.check()?;
        let stored = self.inner.records.lock().map_err(|_| Self::poisoned())?;
        Ok(stored.values().filter(|r| r.user_id == user_id).cloned().collect())
    }

    async fn delete(&self, id: &str) -> Result<(), RemoteError> {
        self.check()?;
        self.inner.records.lock().map_err(|_| Self::poisoned())?.remove(id);
        self.inner.deletes.lock().map_err(|_| Self::poisoned())?.push(id.to_owned());
        Ok(())
    }
}

// =============================================================================
// AVAILABILITY WRAPPER
// =============================================================================

pub struct RemoteSync {
    backend: Arc<dyn RemoteBackend>,
    available: AtomicBool,
    user_id: String,
}

impl RemoteSync {
    #[must_use]
    pub fn new(backend: Arc<dyn RemoteBackend>, user_id: String) -> Self {
        Self { backend, available: AtomicBool::new(true), user_id }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn mark_unavailable(&self, error: &RemoteError) {
        if self.available.swap(false, Ordering::SeqCst) {
            warn!(%error, "remote marked unavailable");
        }
    }

    /// Ping if the remote was marked unavailable. Returns whether a sync
    /// attempt may proceed.
    pub async fn ensure_available(&self) -> bool {
        if self.is_available() {
            return true;
        }
        match self.backend.ping().await {
            Ok(()) => {
                info!("remote reachable again");
                self.available.store(true, Ordering::SeqCst);
                true
            }
            Err(e) => {
                debug!(error = %e, "remote still unreachable");
                false
            }
        }
    }

    /// Push one batch. Returns whether the backend accepted it.
    pub async fn push(&self, batch: &[Conversation]) -> bool {
        if batch.is_empty() {
            return true;
        }
        let records = batch.iter().map(|conv| to_remote(conv, &self.user_id)).collect();
        match self.backend.save(records).await {
            Ok(()) => {
                debug!(count = batch.len(), "remote push succeeded");
                true
            }
            Err(e) => {
                warn!(error = %e, count = batch.len(), "remote push failed");
                self.mark_unavailable(&e);
                false
            }
        }
    }

    /// Send one deletion. Returns whether the backend accepted it.
    pub async fn delete(&self, id: Uuid) -> bool {
        match self.backend.delete(&id.to_string()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, %id, "remote delete failed");
                self.mark_unavailable(&e);
                false
            }
        }
    }

    /// Fetch every conversation for the configured user. Failures yield an
    /// empty list.
    pub async fn pull(&self) -> Vec<Conversation> {
        if !self.ensure_available().await {
            return Vec::new();
        }
        match self.backend.fetch(&self.user_id).await {
            Ok(records) => records.into_iter().filter_map(from_remote).collect(),
            Err(e) => {
                warn!(error = %e, "remote pull failed");
                self.mark_unavailable(&e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
#[path = "remote_test.rs"]
mod tests;

//! Engine configuration parsed from environment variables.
//!
//! Every knob has a `DEFAULT_*` constant; unset or unparseable numeric
//! variables fall back to it. Only values that cannot be defaulted safely
//! (a malformed remote URL, a zero batch size) are reported as errors.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MESSAGE_LIMIT: usize = 50;
pub const DEFAULT_MAX_CONVERSATIONS: usize = 2000;
pub const DEFAULT_MAX_MESSAGES: usize = 5000;
pub const DEFAULT_SYNC_DEBOUNCE_MS: u64 = 2000;
pub const DEFAULT_SYNC_COOLDOWN_MS: u64 = 5000;
pub const DEFAULT_SYNC_BATCH_SIZE: usize = 10;
pub const DEFAULT_FULL_SYNC_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_SYNC_TICK_MS: u64 = 250;
pub const DEFAULT_LOCAL_QUOTA_BYTES: usize = 5 * 1024 * 1024;
pub const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 15;
pub const DEFAULT_STORAGE_DIR: &str = ".chatsync";
pub const DEFAULT_USER_ID: &str = "local";

pub const CONVERSATIONS_KEY: &str = "chat.conversations";
pub const TOMBSTONES_KEY: &str = "chat.tombstones";
/// Keys under these prefixes are never evicted to make room.
pub const PROTECTED_KEY_PREFIXES: [&str; 2] = ["user", "auth"];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Remote sync timing and batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Quiet period that collapses bursts of mutations into one push.
    pub debounce: Duration,
    /// Minimum interval between two pushes.
    pub cooldown: Duration,
    /// Conversations pushed per incremental cycle.
    pub batch_size: usize,
    /// Interval of the sweep that pushes every conversation.
    pub full_sync_interval: Duration,
    /// How often the background task polls for due work.
    pub tick: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_SYNC_DEBOUNCE_MS),
            cooldown: Duration::from_millis(DEFAULT_SYNC_COOLDOWN_MS),
            batch_size: DEFAULT_SYNC_BATCH_SIZE,
            full_sync_interval: Duration::from_millis(DEFAULT_FULL_SYNC_INTERVAL_MS),
            tick: Duration::from_millis(DEFAULT_SYNC_TICK_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Messages kept per conversation when writing or reading local storage.
    pub message_limit: usize,
    /// Conversation count above which persisted state is treated as a runaway write.
    pub max_conversations: usize,
    /// Per-conversation message count above which persisted state is treated as a runaway write.
    pub max_messages: usize,
    pub sync: SyncConfig,
    pub storage_dir: PathBuf,
    pub local_quota_bytes: usize,
    pub remote_url: Option<String>,
    pub remote_timeout: Duration,
    pub user_id: String,
    pub conversations_key: String,
    pub tombstones_key: String,
    pub protected_prefixes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            message_limit: DEFAULT_MESSAGE_LIMIT,
            max_conversations: DEFAULT_MAX_CONVERSATIONS,
            max_messages: DEFAULT_MAX_MESSAGES,
            sync: SyncConfig::default(),
            storage_dir: PathBuf::from(DEFAULT_STORAGE_DIR),
            local_quota_bytes: DEFAULT_LOCAL_QUOTA_BYTES,
            remote_url: None,
            remote_timeout: Duration::from_secs(DEFAULT_REMOTE_TIMEOUT_SECS),
            user_id: DEFAULT_USER_ID.to_owned(),
            conversations_key: CONVERSATIONS_KEY.to_owned(),
            tombstones_key: TOMBSTONES_KEY.to_owned(),
            protected_prefixes: PROTECTED_KEY_PREFIXES.iter().map(|p| (*p).to_owned()).collect(),
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables.
    ///
    /// - `CHAT_MESSAGE_LIMIT`, `CHAT_MAX_CONVERSATIONS`, `CHAT_MAX_MESSAGES`
    /// - `CHAT_SYNC_DEBOUNCE_MS`, `CHAT_SYNC_COOLDOWN_MS`, `CHAT_SYNC_BATCH_SIZE`,
    ///   `CHAT_FULL_SYNC_INTERVAL_MS`, `CHAT_SYNC_TICK_MS`
    /// - `CHAT_STORAGE_DIR`, `CHAT_LOCAL_QUOTA_BYTES`
    /// - `CHAT_REMOTE_URL` (remote tier disabled when unset), `CHAT_REMOTE_TIMEOUT_SECS`
    /// - `CHAT_USER_ID`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a malformed remote URL or a
    /// zero batch size / message limit.
    pub fn from_env() -> Result<Self, ConfigError> {
        let sync = SyncConfig {
            debounce: Duration::from_millis(env_parse("CHAT_SYNC_DEBOUNCE_MS", DEFAULT_SYNC_DEBOUNCE_MS)),
            cooldown: Duration::from_millis(env_parse("CHAT_SYNC_COOLDOWN_MS", DEFAULT_SYNC_COOLDOWN_MS)),
            batch_size: env_parse("CHAT_SYNC_BATCH_SIZE", DEFAULT_SYNC_BATCH_SIZE),
            full_sync_interval: Duration::from_millis(env_parse(
                "CHAT_FULL_SYNC_INTERVAL_MS",
                DEFAULT_FULL_SYNC_INTERVAL_MS,
            )),
            tick: Duration::from_millis(env_parse("CHAT_SYNC_TICK_MS", DEFAULT_SYNC_TICK_MS)),
        };
        if sync.batch_size == 0 {
            return Err(ConfigError::InvalidValue { key: "CHAT_SYNC_BATCH_SIZE", reason: "must be at least 1".into() });
        }

        let message_limit = env_parse("CHAT_MESSAGE_LIMIT", DEFAULT_MESSAGE_LIMIT);
        if message_limit == 0 {
            return Err(ConfigError::InvalidValue { key: "CHAT_MESSAGE_LIMIT", reason: "must be at least 1".into() });
        }

        let remote_url = match env_string("CHAT_REMOTE_URL") {
            Some(url) => Some(parse_remote_url(&url)?),
            None => None,
        };

        let defaults = Self::default();
        Ok(Self {
            message_limit,
            max_conversations: env_parse("CHAT_MAX_CONVERSATIONS", DEFAULT_MAX_CONVERSATIONS),
            max_messages: env_parse("CHAT_MAX_MESSAGES", DEFAULT_MAX_MESSAGES),
            sync,
            storage_dir: env_string("CHAT_STORAGE_DIR").map_or(defaults.storage_dir, PathBuf::from),
            local_quota_bytes: env_parse("CHAT_LOCAL_QUOTA_BYTES", DEFAULT_LOCAL_QUOTA_BYTES),
            remote_url,
            remote_timeout: Duration::from_secs(env_parse("CHAT_REMOTE_TIMEOUT_SECS", DEFAULT_REMOTE_TIMEOUT_SECS)),
            user_id: env_string("CHAT_USER_ID").unwrap_or(defaults.user_id),
            ..defaults
        })
    }
}

fn parse_remote_url(raw: &str) -> Result<String, ConfigError> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| ConfigError::InvalidValue { key: "CHAT_REMOTE_URL", reason: e.to_string() })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key: "CHAT_REMOTE_URL",
            reason: format!("unsupported scheme `{}`", url.scheme()),
        });
    }
    Ok(url.to_string())
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

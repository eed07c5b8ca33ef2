use super::*;

const ENV_KEYS: [&str; 13] = [
    "CHAT_MESSAGE_LIMIT",
    "CHAT_MAX_CONVERSATIONS",
    "CHAT_MAX_MESSAGES",
    "CHAT_SYNC_DEBOUNCE_MS",
    "CHAT_SYNC_COOLDOWN_MS",
    "CHAT_SYNC_BATCH_SIZE",
    "CHAT_FULL_SYNC_INTERVAL_MS",
    "CHAT_SYNC_TICK_MS",
    "CHAT_STORAGE_DIR",
    "CHAT_LOCAL_QUOTA_BYTES",
    "CHAT_REMOTE_URL",
    "CHAT_REMOTE_TIMEOUT_SECS",
    "CHAT_USER_ID",
];

/// # Safety
/// Only `from_env_reads_overrides_and_rejects_bad_values` touches these keys.
unsafe fn clear_chat_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

#[test]
fn env_parse_missing_returns_default() {
    let val: usize = env_parse("__CHATSYNC_TEST_MISSING__", 42);
    assert_eq!(val, 42);
}

#[test]
fn env_parse_invalid_returns_default() {
    unsafe { std::env::set_var("__CHATSYNC_TEST_INVALID__", "soon") };
    let val: u64 = env_parse("__CHATSYNC_TEST_INVALID__", 7);
    assert_eq!(val, 7);
    unsafe { std::env::remove_var("__CHATSYNC_TEST_INVALID__") };
}

#[test]
fn env_parse_trims_whitespace() {
    unsafe { std::env::set_var("__CHATSYNC_TEST_PADDED__", " 12 ") };
    let val: usize = env_parse("__CHATSYNC_TEST_PADDED__", 0);
    assert_eq!(val, 12);
    unsafe { std::env::remove_var("__CHATSYNC_TEST_PADDED__") };
}

#[test]
fn defaults_match_constants() {
    let cfg = EngineConfig::default();
    assert_eq!(cfg.message_limit, DEFAULT_MESSAGE_LIMIT);
    assert_eq!(cfg.max_conversations, DEFAULT_MAX_CONVERSATIONS);
    assert_eq!(cfg.max_messages, DEFAULT_MAX_MESSAGES);
    assert_eq!(cfg.sync.batch_size, DEFAULT_SYNC_BATCH_SIZE);
    assert_eq!(cfg.sync.debounce, Duration::from_millis(DEFAULT_SYNC_DEBOUNCE_MS));
    assert_eq!(cfg.sync.cooldown, Duration::from_millis(DEFAULT_SYNC_COOLDOWN_MS));
    assert_eq!(cfg.conversations_key, CONVERSATIONS_KEY);
    assert_eq!(cfg.tombstones_key, TOMBSTONES_KEY);
    assert_eq!(cfg.protected_prefixes, vec!["user".to_owned(), "auth".to_owned()]);
    assert!(cfg.remote_url.is_none());
}

#[test]
fn parse_remote_url_accepts_http_and_https() {
    assert_eq!(parse_remote_url("https://db.example.com/api/query").unwrap(), "https://db.example.com/api/query");
    assert!(parse_remote_url("http://127.0.0.1:8080/q").is_ok());
}

#[test]
fn parse_remote_url_rejects_other_schemes() {
    assert!(matches!(
        parse_remote_url("ftp://db.example.com"),
        Err(ConfigError::InvalidValue { key: "CHAT_REMOTE_URL", .. })
    ));
    assert!(parse_remote_url("not a url").is_err());
}

#[test]
fn from_env_reads_overrides_and_rejects_bad_values() {
    unsafe {
        clear_chat_env();
        std::env::set_var("CHAT_MESSAGE_LIMIT", "20");
        std::env::set_var("CHAT_SYNC_DEBOUNCE_MS", "100");
        std::env::set_var("CHAT_USER_ID", "user-7");
        std::env::set_var("CHAT_STORAGE_DIR", "/tmp/chatsync-test");
        std::env::set_var("CHAT_REMOTE_URL", "https://db.example.com/api/query");
    }

    let cfg = EngineConfig::from_env().unwrap();
    assert_eq!(cfg.message_limit, 20);
    assert_eq!(cfg.sync.debounce, Duration::from_millis(100));
    assert_eq!(cfg.sync.cooldown, Duration::from_millis(DEFAULT_SYNC_COOLDOWN_MS));
    assert_eq!(cfg.user_id, "user-7");
    assert_eq!(cfg.storage_dir, PathBuf::from("/tmp/chatsync-test"));
    assert_eq!(cfg.remote_url.as_deref(), Some("https://db.example.com/api/query"));

    unsafe { std::env::set_var("CHAT_SYNC_BATCH_SIZE", "0") };
    assert!(matches!(
        EngineConfig::from_env(),
        Err(ConfigError::InvalidValue { key: "CHAT_SYNC_BATCH_SIZE", .. })
    ));

    unsafe {
        std::env::remove_var("CHAT_SYNC_BATCH_SIZE");
        std::env::set_var("CHAT_REMOTE_URL", "mailto:someone");
    }
    assert!(EngineConfig::from_env().is_err());

    unsafe { clear_chat_env() };
}

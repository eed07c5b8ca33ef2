use super::*;

#[test]
fn set_then_get_returns_value() {
    let mut storage = MemoryStorage::new();
    storage.set("a", "1").unwrap();
    assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));
    assert_eq!(storage.get("missing").unwrap(), None);
}

#[test]
fn empty_key_is_rejected() {
    let mut storage = MemoryStorage::new();
    assert!(matches!(storage.set("", "x"), Err(StorageError::InvalidKey(_))));
}

#[test]
fn quota_rejects_oversized_write_and_keeps_previous_value() {
    let mut storage = MemoryStorage::with_quota(10);
    storage.set("k", "1234").unwrap();

    let err = storage.set("k", "0123456789").unwrap_err();
    assert!(matches!(err, StorageError::QuotaExceeded { needed: 11, available: 10, .. }));
    assert_eq!(storage.get("k").unwrap().as_deref(), Some("1234"));
}

#[test]
fn quota_counts_other_keys() {
    let mut storage = MemoryStorage::with_quota(10);
    storage.set("a", "1234").unwrap();
    assert_eq!(storage.used_bytes(), 5);
    assert!(storage.set("b", "12345").is_err());
    assert!(storage.set("b", "123").is_ok());
}

#[test]
fn entries_report_write_recency() {
    let mut storage = MemoryStorage::new();
    storage.set("first", "x").unwrap();
    storage.set("second", "y").unwrap();
    storage.set("first", "z").unwrap();

    let entries = storage.entries().unwrap();
    let first = entries.iter().find(|e| e.key == "first").unwrap();
    let second = entries.iter().find(|e| e.key == "second").unwrap();
    assert!(first.touched > second.touched);
    assert_eq!(first.bytes, 6);
}

#[test]
fn remove_reports_presence() {
    let mut storage = MemoryStorage::new();
    storage.set("a", "1").unwrap();
    assert!(storage.remove("a").unwrap());
    assert!(!storage.remove("a").unwrap());
    assert!(storage.is_empty());
}

use super::*;

#[test]
fn insert_is_idempotent_and_keeps_first_deletion_time() {
    let mut registry = TombstoneRegistry::new();
    assert!(registry.insert("conv-1", 100));
    assert!(!registry.insert("conv-1", 200));
    assert!(registry.to_record().unwrap().contains("\"deletedAt\":100"));
    assert_eq!(registry.len(), 1);
}

#[test]
fn stamped_record_round_trips() {
    let mut registry = TombstoneRegistry::new();
    registry.insert("a", 1);
    registry.insert("canvas_9", 2);

    let raw = registry.to_record().unwrap();
    let restored = TombstoneRegistry::from_record(&raw).unwrap();
    assert_eq!(restored, registry);
    assert!(raw.contains("\"deletedAt\":1"));
}

#[test]
fn bare_id_list_is_accepted() {
    let registry = TombstoneRegistry::from_record(r#"["a","b"]"#).unwrap();
    assert!(registry.contains("a"));
    assert!(registry.contains("b"));
    assert!(registry.to_record().unwrap().contains(r#"{"id":"a","deletedAt":0}"#));
}

#[test]
fn empty_list_parses_to_empty_registry() {
    let registry = TombstoneRegistry::from_record("[]").unwrap();
    assert!(registry.is_empty());
}

#[test]
fn malformed_record_is_an_error() {
    assert!(TombstoneRegistry::from_record(r#"{"ids":"a"}"#).is_err());
    assert!(TombstoneRegistry::from_record("not json").is_err());
}


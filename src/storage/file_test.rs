use super::*;

fn create_test_storage(quota: Option<usize>) -> (tempfile::TempDir, FileStorage) {
    let dir = tempfile::TempDir::new().unwrap();
    let storage = FileStorage::open(local_dir(&dir), quota).unwrap();
    (dir, storage)
}

fn local_dir(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("local")
}

#[test]
fn open_creates_directory() {
    let (dir, _storage) = create_test_storage(None);
    assert!(local_dir(&dir).is_dir());
}

#[test]
fn set_then_get_round_trips_value() {
    let (_dir, mut storage) = create_test_storage(None);
    storage.set("chat.conversations", "{\"a\":1}").unwrap();
    assert_eq!(storage.get("chat.conversations").unwrap().as_deref(), Some("{\"a\":1}"));
}

#[test]
fn missing_key_reads_as_none() {
    let (_dir, storage) = create_test_storage(None);
    assert_eq!(storage.get("absent").unwrap(), None);
}

#[test]
fn overwrite_replaces_value_and_leaves_no_temp_file() {
    let (dir, mut storage) = create_test_storage(None);
    storage.set("k", "old").unwrap();
    storage.set("k", "new").unwrap();

    assert_eq!(storage.get("k").unwrap().as_deref(), Some("new"));
    let leftovers: Vec<_> = fs::read_dir(local_dir(&dir))
        .unwrap()
        .flatten()
        .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn path_like_keys_are_rejected() {
    let (_dir, mut storage) = create_test_storage(None);
    assert!(matches!(storage.set("../escape", "x"), Err(StorageError::InvalidKey(_))));
    assert!(matches!(storage.set("a/b", "x"), Err(StorageError::InvalidKey(_))));
    assert!(matches!(storage.get(".hidden"), Err(StorageError::InvalidKey(_))));
}

#[test]
fn quota_counts_other_files_but_not_the_replaced_value() {
    let (_dir, mut storage) = create_test_storage(Some(20));
    storage.set("a", "123456789").unwrap();
    storage.set("b", "12345678").unwrap();

    assert!(matches!(storage.set("c", "1"), Err(StorageError::QuotaExceeded { .. })));
    storage.set("b", "1234").unwrap();
    assert_eq!(storage.get("b").unwrap().as_deref(), Some("1234"));
}

#[test]
fn entries_list_only_value_files() {
    let (dir, mut storage) = create_test_storage(None);
    storage.set("one", "1").unwrap();
    storage.set("two", "22").unwrap();
    fs::write(local_dir(&dir).join("stray.txt"), "ignored").unwrap();

    let mut keys: Vec<String> = storage.entries().unwrap().into_iter().map(|e| e.key).collect();
    keys.sort();
    assert_eq!(keys, vec!["one".to_owned(), "two".to_owned()]);
}

#[test]
fn remove_deletes_file() {
    let (_dir, mut storage) = create_test_storage(None);
    storage.set("k", "v").unwrap();
    assert!(storage.remove("k").unwrap());
    assert!(!storage.remove("k").unwrap());
    assert_eq!(storage.get("k").unwrap(), None);
}

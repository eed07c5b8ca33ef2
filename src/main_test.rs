use super::*;
use chatsync::event::EventBus;
use chatsync::storage::MemoryStorage;

fn store() -> ConversationStore {
    ConversationStore::open(&EngineConfig::default(), Box::new(MemoryStorage::new()), EventBus::new())
}

#[test]
fn chat_without_target_uses_active_conversation() {
    assert!(check_conversation(&store(), None).is_ok());
}

#[test]
fn chat_into_known_conversation_is_accepted() {
    let mut store = store();
    let id = store.create_conversation(Some("known")).id;
    assert!(check_conversation(&store, Some(id)).is_ok());
}

#[test]
fn chat_into_unknown_conversation_is_refused() {
    let id = Uuid::new_v4();
    let err = check_conversation(&store(), Some(id)).unwrap_err();
    assert!(matches!(err, CliError::UnknownConversation(found) if found == id));
}

#[test]
fn canvas_kind_names_parse_case_insensitively() {
    assert_eq!(parse_kind("Document").unwrap(), CanvasKind::Document);
    assert_eq!(parse_kind("doc").unwrap(), CanvasKind::Document);
    assert_eq!(parse_kind("CHART").unwrap(), CanvasKind::Chart);
    assert!(matches!(parse_kind("table"), Err(CliError::UnknownKind(raw)) if raw == "table"));
}

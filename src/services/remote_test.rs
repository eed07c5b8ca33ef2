use super::*;
use crate::services::canvas;
use crate::state::{NewMessage, VersionContent};
use crate::state::test_helpers::{conversation_with_messages, document};
use serde_json::json;

fn sync_over(remote: &MemoryRemote) -> RemoteSync {
    RemoteSync::new(Arc::new(remote.clone()), "user-1".to_owned())
}

#[test]
fn to_remote_maps_roles_and_summarizes_canvas() {
    let mut conv = conversation_with_messages(2);
    let mut element = canvas::new_element(CanvasKind::Document, "Plan", document("a"), "r", 1).unwrap();
    canvas::add_version(&mut element, document("b"), "r2", 2).unwrap();
    conv.canvas_elements.push(element.clone());

    let record = to_remote(&conv, "user-1");
    assert_eq!(record.id, conv.id.to_string());
    assert_eq!(record.user_id, "user-1");
    assert_eq!(record.messages[0].role, Role::User);
    assert_eq!(record.messages[1].role, Role::Assistant);
    assert_eq!(record.messages[1].content, "answer 1");
    assert_eq!(
        record.canvas,
        vec![RemoteCanvasSummary {
            id: element.id,
            kind: CanvasKind::Document,
            title: "Plan".into(),
            version_count: 2
        }]
    );
}

#[test]
fn remote_record_serializes_camel_case_with_canvas_type() {
    let mut conv = Conversation::new(Some("t"), 1);
    conv.canvas_elements
        .push(canvas::new_element(CanvasKind::Chart, "c", VersionContent::Chart { spec: json!({}) }, "", 1).unwrap());
    let value = serde_json::to_value(to_remote(&conv, "u")).unwrap();

    assert_eq!(value["userId"], json!("u"));
    assert_eq!(value["canvas"][0]["type"], json!("chart"));
    assert_eq!(value["canvas"][0]["versionCount"], json!(1));
    assert!(value["canvas"][0].get("versions").is_none());
}

#[test]
fn from_remote_restores_messages_without_canvas() {
    let mut conv = conversation_with_messages(3);
    conv.pinned = true;
    conv.canvas_elements
        .push(canvas::new_element(CanvasKind::Document, "d", document("x"), "", 1).unwrap());

    let restored = from_remote(to_remote(&conv, "u")).unwrap();
    assert_eq!(restored.id, conv.id);
    assert_eq!(restored.messages, conv.messages);
    assert!(restored.pinned);
    assert!(restored.canvas_elements.is_empty());
}

#[test]
fn from_remote_skips_bad_ids_and_blank_messages() {
    let mut record = to_remote(&Conversation::new(None, 1), "u");
    record.messages.push(RemoteMessage {
        id: String::new(),
        role: Role::User,
        content: "  ".into(),
        timestamp: 1,
        tool_results: None,
        canvas_element_ids: None,
    });
    assert!(from_remote(record.clone()).unwrap().messages.is_empty());

    record.id = "not-a-uuid".into();
    assert!(from_remote(record).is_none());
}

#[test]
fn envelope_serializes_only_present_fields() {
    let envelope = QueryEnvelope {
        filters: Some(QueryFilters { user_id: "u".into() }),
        ..QueryEnvelope::new(QueryAction::Get)
    };
    assert_eq!(
        serde_json::to_value(&envelope).unwrap(),
        json!({"action": "get", "collection": "conversations", "filters": {"userId": "u"}})
    );
}

#[test]
fn parse_reply_reads_success_and_error() {
    let reply = parse_reply(r#"{"success":false,"error":"nope"}"#).unwrap();
    assert!(!reply.success);
    assert_eq!(reply.error.as_deref(), Some("nope"));
    assert!(matches!(parse_reply("<html>"), Err(RemoteError::Parse(_))));
}

#[tokio::test]
async fn push_failure_marks_unavailable_until_ping_succeeds() {
    let remote = MemoryRemote::new();
    let sync = sync_over(&remote);
    let conv = Conversation::new(None, 1);

    remote.set_failing(true);
    assert!(!sync.push(std::slice::from_ref(&conv)).await);
    assert!(!sync.is_available());
    assert!(!sync.ensure_available().await);
    assert_eq!(remote.ping_count(), 1);

    remote.set_failing(false);
    assert!(sync.ensure_available().await);
    assert!(sync.is_available());
    assert!(sync.push(std::slice::from_ref(&conv)).await);
    assert_eq!(remote.save_calls(), vec![vec![conv.id.to_string()]]);
}

#[tokio::test]
async fn available_remote_is_not_pinged() {
    let remote = MemoryRemote::new();
    let sync = sync_over(&remote);
    assert!(sync.ensure_available().await);
    assert_eq!(remote.ping_count(), 0);
}

#[tokio::test]
async fn pull_returns_only_this_users_records() {
    let remote = MemoryRemote::new();
    let mine = Conversation::new(Some("mine"), 1);
    let theirs = Conversation::new(Some("theirs"), 1);
    remote.seed(to_remote(&mine, "user-1"));
    remote.seed(to_remote(&theirs, "user-2"));

    let pulled = sync_over(&remote).pull().await;
    assert_eq!(pulled.len(), 1);
    assert_eq!(pulled[0].id, mine.id);
}

#[tokio::test]
async fn pull_failure_yields_empty_list() {
    let remote = MemoryRemote::new();
    remote.seed(to_remote(&Conversation::new(None, 1), "user-1"));
    remote.set_failing(true);

    let sync = sync_over(&remote);
    assert!(sync.pull().await.is_empty());
    assert!(!sync.is_available());
}

#[tokio::test]
async fn delete_removes_record_and_is_recorded() {
    let remote = MemoryRemote::new();
    let conv = Conversation::new(None, 1);
    remote.seed(to_remote(&conv, "user-1"));

    assert!(sync_over(&remote).delete(conv.id).await);
    assert!(remote.is_empty());
    assert_eq!(remote.deleted(), vec![conv.id.to_string()]);
}

#[test]
fn message_builder_output_translates() {
    let message = NewMessage::assistant("done").with_canvas_elements(vec!["canvas_1".into()]).into_message(5);
    let mut conv = Conversation::new(None, 1);
    conv.messages.push(message);
    let record = to_remote(&conv, "u");
    assert_eq!(record.messages[0].canvas_element_ids, Some(vec!["canvas_1".to_owned()]));
}

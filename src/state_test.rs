use super::*;

#[test]
fn new_conversation_uses_placeholder_when_title_blank() {
    let conv = Conversation::new(Some("   "), 10);
    assert_eq!(conv.title, PLACEHOLDER_TITLE);
    assert!(conv.has_placeholder_title());
    assert_eq!(conv.created_at, 10);
    assert_eq!(conv.updated_at, 10);
}

#[test]
fn new_conversation_keeps_explicit_title() {
    let conv = Conversation::new(Some("Trip planning"), 10);
    assert_eq!(conv.title, "Trip planning");
    assert!(!conv.has_placeholder_title());
}

#[test]
fn local_id_has_prefix_and_suffix() {
    let id = local_id("msg");
    let parts: Vec<&str> = id.split('_').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "msg");
    assert!(parts[1].parse::<i64>().is_ok());
    assert_eq!(parts[2].len(), 9);
    assert_ne!(local_id("msg"), id);
}

#[test]
fn derive_title_uses_short_text_verbatim() {
    assert_eq!(derive_title("  Hello  "), Some("Hello".to_owned()));
    assert_eq!(derive_title("how   do\nI sort"), Some("how do I sort".to_owned()));
}

#[test]
fn derive_title_rejects_text_without_words() {
    assert_eq!(derive_title("?!"), None);
    assert_eq!(derive_title("   "), None);
}

#[test]
fn derive_title_truncates_long_text_at_word_boundary() {
    let text = "please explain the difference between borrowing and ownership in detail";
    let title = derive_title(text).unwrap();
    assert!(title.ends_with("..."));
    assert!(title.chars().count() <= 53);
    assert!(text.starts_with(title.trim_end_matches("...")));
}

#[test]
fn version_state_playback_order() {
    assert_eq!(VersionState::Draft.next(), Some(VersionState::Typing));
    assert_eq!(VersionState::Typing.next(), Some(VersionState::Frozen));
    assert_eq!(VersionState::Frozen.next(), Some(VersionState::Displayed));
    assert_eq!(VersionState::Displayed.next(), None);
    assert_eq!(VersionState::Deleted.next(), None);
}

#[test]
fn conversation_matches_messages_and_canvas_content() {
    let mut conv = test_helpers::conversation_with_messages(2);
    conv.canvas_elements.push(CanvasElement {
        id: "canvas_1".into(),
        kind: CanvasKind::Code,
        title: "Parser".into(),
        versions: vec![Version {
            number: 1,
            content: VersionContent::Code { language: "rust".into(), source: "fn tokenize() {}".into() },
            state: VersionState::Typing,
            request: "write a tokenizer".into(),
            timestamp: 0,
        }],
        current_version: 1,
        completed_versions: BTreeSet::new(),
    });

    assert!(conv.matches("question 0"));
    assert!(conv.matches("parser"));
    assert!(conv.matches("tokenize"));
    assert!(!conv.matches("nonexistent"));
}

#[test]
fn conversation_serializes_camel_case_fields() {
    let conv = test_helpers::conversation_with_messages(1);
    let json = serde_json::to_value(&conv).unwrap();
    assert!(json.get("canvasElements").is_some());
    assert!(json.get("updatedAt").is_some());
    assert_eq!(json["messages"][0]["isUser"], true);
    assert!(json["messages"][0].get("toolResults").is_none());
}

#[test]
fn canvas_element_serializes_kind_as_type() {
    let element = CanvasElement {
        id: "canvas_1".into(),
        kind: CanvasKind::Chart,
        title: "Revenue".into(),
        versions: vec![Version {
            number: 1,
            content: VersionContent::Chart { spec: serde_json::json!({"mark": "bar"}) },
            state: VersionState::Displayed,
            request: "chart it".into(),
            timestamp: 5,
        }],
        current_version: 1,
        completed_versions: BTreeSet::from([1]),
    };
    let json = serde_json::to_value(&element).unwrap();
    assert_eq!(json["type"], "chart");
    assert_eq!(json["versions"][0]["content"]["kind"], "chart");
    assert_eq!(json["versions"][0]["state"], "displayed");
    assert_eq!(json["completedVersions"], serde_json::json!([1]));
}

#[test]
fn canvas_element_version_lookup_is_one_based() {
    let element = CanvasElement {
        id: "canvas_1".into(),
        kind: CanvasKind::Document,
        title: "Notes".into(),
        versions: vec![Version {
            number: 1,
            content: test_helpers::document("v1"),
            state: VersionState::Typing,
            request: String::new(),
            timestamp: 0,
        }],
        current_version: 1,
        completed_versions: BTreeSet::new(),
    };
    assert!(element.version(0).is_none());
    assert_eq!(element.version(1).map(|v| v.number), Some(1));
    assert!(element.version(2).is_none());
    assert_eq!(element.current().map(|v| v.number), Some(1));
}

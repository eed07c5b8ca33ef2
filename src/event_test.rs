use super::*;

#[test]
fn publish_without_subscribers_returns_zero() {
    let bus = EventBus::new();
    let delivered = bus.publish(StoreEvent::ConversationCreated { id: Uuid::new_v4() });
    assert_eq!(delivered, 0);
}

#[test]
fn every_subscriber_receives_each_event() {
    let bus = EventBus::new();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();
    let id = Uuid::new_v4();

    assert_eq!(bus.publish(StoreEvent::ConversationCreated { id }), 2);
    assert_eq!(a.try_recv().unwrap(), StoreEvent::ConversationCreated { id });
    assert_eq!(b.try_recv().unwrap(), StoreEvent::ConversationCreated { id });
}

#[test]
fn clones_share_one_channel() {
    let bus = EventBus::new();
    let clone = bus.clone();
    let mut rx = bus.subscribe();

    let id = Uuid::new_v4();
    clone.publish(StoreEvent::CanvasActivated {
        element_id: "canvas_1".into(),
        conversation_id: id,
        kind: CanvasKind::Document,
    });

    match rx.try_recv().unwrap() {
        StoreEvent::CanvasActivated { conversation_id, kind, .. } => {
            assert_eq!(conversation_id, id);
            assert_eq!(kind, CanvasKind::Document);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn lagging_subscriber_skips_oldest_events() {
    let bus = EventBus::with_capacity(2);
    let mut rx = bus.subscribe();
    for _ in 0..3 {
        bus.publish(StoreEvent::ConversationCreated { id: Uuid::new_v4() });
    }
    assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Lagged(1))));
    assert!(rx.try_recv().is_ok());
}

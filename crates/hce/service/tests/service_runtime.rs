//! Integration tests: the service driven through its tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use hce_dispatch::{
    select_command, BindPurpose, ChannelId, HandlerMessage, HostEvent, PollingFrame,
    PollingFrameKind,
};
use hce_routing::MockController;
use hce_service::runtime;
use hce_service::{
    HandlerManifest, HceService, InMemoryStore, JsonFileStore, MockCollaborators,
    PreferenceChange, ServiceConfig, ServiceEvent, SettingsStore, TransportCall,
};
use hce_types::{Aid, Category, HandlerId, HandlerInfo, HandlerRef, UserId};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn handler(pkg: &str) -> HandlerInfo {
    HandlerInfo::new(HandlerId::new(pkg, "Svc"), UserId(0))
}

fn select(aid: &str) -> Vec<u8> {
    select_command(&Aid::parse(aid).unwrap())
}

fn build(store: Arc<dyn SettingsStore>) -> (Arc<HceService>, MockCollaborators, Arc<MockController>) {
    let mocks = MockCollaborators::new();
    let controller = Arc::new(MockController::new());
    let service = Arc::new(HceService::new(
        &ServiceConfig::default(),
        controller.clone(),
        mocks.collaborators(),
        store,
    ));
    (service, mocks, controller)
}

/// Poll until `check` holds or a second has passed.
async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn handler_set_change_rebuilds_in_background() {
    let (service, _, controller) = build(Arc::new(InMemoryStore::new()));
    let handle = runtime::spawn(service.clone(), 16);

    let se = handler("com.se")
        .off_host("eSE1")
        .with_aids(Category::Other, ["A0000000030101"]);
    handle
        .send(ServiceEvent::HandlersChanged {
            user: UserId(0),
            handlers: vec![se.clone()],
        })
        .await
        .unwrap();

    let aid = Aid::parse("A0000000030101").unwrap();
    assert!(eventually(|| service.resolve(&aid).default_handler() == Some(&se.handler_ref())).await);
    assert!(eventually(|| controller.last_commit().is_some_and(|t| t.len() == 1)).await);

    handle.shutdown().await;
}

#[tokio::test]
async fn events_are_dispatched_in_order() {
    let (service, mocks, _) = build(Arc::new(InMemoryStore::new()));
    let a = handler("com.a").with_aids(Category::Other, ["F0010203040506"]);
    service.on_handler_set_changed(UserId(0), vec![a.clone()]);
    let handle = runtime::spawn(service.clone(), 16);

    for event in [
        HostEvent::Activated,
        HostEvent::frame(select("F0010203040506")),
        HostEvent::HandlerConnected {
            handler: a.handler_ref(),
            channel: ChannelId(7),
            purpose: BindPurpose::Regular,
        },
        HostEvent::frame([0x80, 0xCA, 0x00, 0x00]),
        HostEvent::Deactivated,
    ] {
        handle.send(ServiceEvent::Host(event)).await.unwrap();
    }

    let a_ref = a.handler_ref();
    assert!(eventually(|| mocks.transport.sent_to(&a_ref).len() == 3).await);
    let sent = mocks.transport.sent_to(&a_ref);
    assert_eq!(
        sent[0],
        HandlerMessage::Command {
            data: select("F0010203040506")
        }
    );
    assert_eq!(
        sent[1],
        HandlerMessage::Command {
            data: vec![0x80, 0xCA, 0x00, 0x00]
        }
    );
    assert!(matches!(sent[2], HandlerMessage::Deactivated { .. }));
    assert!(mocks
        .transport
        .calls()
        .contains(&TransportCall::Unbind(a_ref, BindPurpose::Regular)));

    handle.shutdown().await;
}

#[tokio::test]
async fn preference_change_reaches_dispatcher_after_rebuild() {
    let (service, mocks, _) = build(Arc::new(InMemoryStore::new()));
    let pay = handler("com.pay").with_aids(Category::Payment, ["A0000000041010"]);
    service.on_handler_set_changed(UserId(0), vec![pay.clone()]);
    let version = service.engine().snapshot().version;
    let handle = runtime::spawn(service.clone(), 16);

    handle
        .send(ServiceEvent::Preference(PreferenceChange::PaymentDefault {
            handler: Some(pay.handler_ref()),
        }))
        .await
        .unwrap();

    let expected = vec![(pay.handler_ref(), BindPurpose::Payment)];
    assert!(eventually(|| mocks.transport.binds() == expected).await);
    assert!(service.engine().snapshot().version > version);
    assert_eq!(
        service.engine().snapshot().payment_default(),
        Some(&pay.handler_ref())
    );

    handle.shutdown().await;
}

#[tokio::test]
async fn routing_table_cleared_recommits_in_background() {
    let (service, _, controller) = build(Arc::new(InMemoryStore::new()));
    let se = handler("com.se")
        .off_host("eSE1")
        .with_aids(Category::Other, ["A0000000030101"]);
    service.on_handler_set_changed(UserId(0), vec![se]);
    let commits = controller.commits().len();
    let handle = runtime::spawn(service.clone(), 16);

    handle.send(ServiceEvent::RoutingTableCleared).await.unwrap();
    assert!(eventually(|| controller.commits().len() == commits + 1).await);

    handle.shutdown().await;
}

#[tokio::test]
async fn field_off_timer_returns_to_idle() {
    let (service, _, _) = build(Arc::new(InMemoryStore::new()));
    let handle = runtime::spawn(service.clone(), 16);

    handle
        .send(ServiceEvent::Host(HostEvent::PollingFrames {
            frames: vec![
                PollingFrame::of_kind(PollingFrameKind::On),
                PollingFrame::of_kind(PollingFrameKind::Off),
            ],
        }))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.host_state(), hce_dispatch::HostState::PollingLoop);

    tokio::time::sleep(hce_dispatch::FIELD_OFF_IDLE_DELAY).await;
    assert!(eventually(|| service.host_state() == hce_dispatch::HostState::Idle).await);

    handle.shutdown().await;
}

#[tokio::test]
async fn payment_default_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let pay = handler("com.pay").with_aids(Category::Payment, ["A0000000041010"]);

    {
        let (service, _, _) = build(Arc::new(JsonFileStore::new(&path)));
        service.on_handler_set_changed(UserId(0), vec![pay.clone()]);
        service
            .on_preference_changed(PreferenceChange::PaymentDefault {
                handler: Some(pay.handler_ref()),
            })
            .await
            .unwrap();
    }

    let (service, mocks, _) = build(Arc::new(JsonFileStore::new(&path)));
    service.on_handler_set_changed(UserId(0), vec![pay.clone()]);
    service.load_settings().await.unwrap();
    assert_eq!(
        service.engine().preferences().payment_default(),
        Some(&pay.handler_ref())
    );
    assert_eq!(
        mocks.transport.binds(),
        vec![(pay.handler_ref(), BindPurpose::Payment)]
    );
}

#[tokio::test]
async fn manifest_applies_handlers_and_preferences() {
    let manifest = HandlerManifest::from_json(
        r#"{
            "handlers": [
                {"id": {"package": "com.a", "class": "A"},
                 "aid_groups": [{"aids": ["F0010203040506"]}]},
                {"id": {"package": "com.b", "class": "B"},
                 "aid_groups": [{"aids": ["F0010203040506"]}]}
            ],
            "preferences": {
                "foreground": {"id": {"package": "com.b", "class": "B"}, "user": 0}
            }
        }"#,
    )
    .unwrap();
    let (service, _, _) = build(Arc::new(InMemoryStore::new()));
    manifest.apply(&service).await.unwrap();

    let b = HandlerRef::new(HandlerId::new("com.b", "B"), UserId(0));
    let aid = Aid::parse("F0010203040506").unwrap();
    assert_eq!(service.resolve(&aid).default_handler(), Some(&b));
}

//! Listener registration, event delivery, failover and removal.

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{ping_reply, MockBehavior, MockRequest, MockServer, RequestBody};
use hotrod_client::core::protocol::{
    encode_event, ReplyBuilder, ADD_CLIENT_LISTENER_REQUEST, ADD_CLIENT_LISTENER_RESPONSE,
    CACHE_ENTRY_CREATED_EVENT, CACHE_ENTRY_REMOVED_EVENT, NO_ERROR, PING_REQUEST,
    REMOVE_CLIENT_LISTENER_REQUEST, REMOVE_CLIENT_LISTENER_RESPONSE, SERVER_ERROR,
};
use hotrod_client::{EventKind, ListenerDescriptor};
use tokio::time::timeout;

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

fn ack(request: &MockRequest) -> bytes::BytesMut {
    ReplyBuilder::new(
        request.message_id,
        ADD_CLIENT_LISTENER_RESPONSE,
        NO_ERROR,
        None,
    )
    .build()
}

fn listener_id_of(request: &MockRequest) -> Vec<u8> {
    match &request.body {
        RequestBody::AddListener { listener_id, .. } => listener_id.clone(),
        other => panic!("expected an add-listener body, got {other:?}"),
    }
}

#[tokio::test]
async fn test_listener_receives_events() {
    let server = MockServer::start(|request: &MockRequest| match request.opcode {
        PING_REQUEST => MockBehavior::reply(ping_reply(request.message_id)),
        ADD_CLIENT_LISTENER_REQUEST => {
            let id = listener_id_of(request);
            MockBehavior::Frames(vec![
                ack(request),
                encode_event(CACHE_ENTRY_CREATED_EVENT, &id, false, b"k1", 7),
                encode_event(CACHE_ENTRY_REMOVED_EVENT, &id, false, b"k2", 0),
            ])
        }
        other => panic!("unexpected opcode {other:#04x}"),
    })
    .await;

    let client = common::connect_client(&[server.addr()]).await;
    let cache = client.cache("test");

    let (registration, mut events) = cache
        .add_listener(ListenerDescriptor::new())
        .await
        .unwrap();
    assert!(registration.is_active());

    let first = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(first.kind, EventKind::Created);
    assert_eq!(first.key, b"k1");
    assert_eq!(first.version, 7);
    assert!(!first.retried);

    let second = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(second.kind, EventKind::Removed);
    assert_eq!(second.key, b"k2");
    assert_eq!(second.version, 0);

    client.shutdown().await;
}

#[tokio::test]
async fn test_pre_ack_events_are_forwarded() {
    // A state-replay server pushes events before acknowledging the
    // registration; none may be lost.
    let server = MockServer::start(|request: &MockRequest| match request.opcode {
        PING_REQUEST => MockBehavior::reply(ping_reply(request.message_id)),
        ADD_CLIENT_LISTENER_REQUEST => {
            let id = listener_id_of(request);
            MockBehavior::Frames(vec![
                encode_event(CACHE_ENTRY_CREATED_EVENT, &id, false, b"replayed", 1),
                ack(request),
            ])
        }
        other => panic!("unexpected opcode {other:#04x}"),
    })
    .await;

    let client = common::connect_client(&[server.addr()]).await;
    let (_registration, mut events) = client
        .cache("test")
        .add_listener(ListenerDescriptor::new().include_state())
        .await
        .unwrap();

    let event = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.key, b"replayed");

    client.shutdown().await;
}

#[tokio::test]
async fn test_listener_failover_marks_events_retried() {
    let first_registration = Arc::new(AtomicBool::new(true));

    let mut servers = Vec::new();
    for _ in 0..2 {
        let first_registration = Arc::clone(&first_registration);
        let server = MockServer::start(move |request: &MockRequest| match request.opcode {
            PING_REQUEST => MockBehavior::reply(ping_reply(request.message_id)),
            ADD_CLIENT_LISTENER_REQUEST => {
                let id = listener_id_of(request);
                if first_registration.swap(false, Ordering::SeqCst) {
                    // Accept, then drop the channel to force a failover.
                    MockBehavior::FramesThenClose(vec![ack(request)])
                } else {
                    // The server did not flag the event as retried; the
                    // client must, because it re-registered elsewhere.
                    MockBehavior::Frames(vec![
                        ack(request),
                        encode_event(CACHE_ENTRY_CREATED_EVENT, &id, false, b"after-move", 9),
                    ])
                }
            }
            other => panic!("unexpected opcode {other:#04x}"),
        })
        .await;
        servers.push(server);
    }
    let addrs: Vec<_> = servers.iter().map(|s| s.addr()).collect();

    let client = common::connect_client(&addrs).await;
    let (registration, mut events) = client
        .cache("test")
        .add_listener(ListenerDescriptor::new())
        .await
        .unwrap();

    let event = timeout(RECV_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.key, b"after-move");
    assert!(event.retried);
    assert!(registration.is_active());

    client.shutdown().await;
}

#[tokio::test]
async fn test_remove_listener_round_trip() {
    let removed_id = Arc::new(Mutex::new(None::<Vec<u8>>));

    let seen = Arc::clone(&removed_id);
    let server = MockServer::start(move |request: &MockRequest| match request.opcode {
        PING_REQUEST => MockBehavior::reply(ping_reply(request.message_id)),
        ADD_CLIENT_LISTENER_REQUEST => MockBehavior::reply(ack(request)),
        REMOVE_CLIENT_LISTENER_REQUEST => {
            if let RequestBody::RemoveListener { listener_id } = &request.body {
                *seen.lock().unwrap() = Some(listener_id.clone());
            }
            MockBehavior::reply(
                ReplyBuilder::new(
                    request.message_id,
                    REMOVE_CLIENT_LISTENER_RESPONSE,
                    NO_ERROR,
                    None,
                )
                .build(),
            )
        }
        other => panic!("unexpected opcode {other:#04x}"),
    })
    .await;

    let client = common::connect_client(&[server.addr()]).await;
    let cache = client.cache("test");

    let (registration, _events) = cache
        .add_listener(ListenerDescriptor::new())
        .await
        .unwrap();
    assert!(registration.is_active());
    cache.remove_listener(&registration).await.unwrap();
    // The server accepted; the local event task is gone too.
    assert!(!registration.is_active());

    let seen = removed_id.lock().unwrap().clone().expect("removal sent");
    assert_eq!(seen, registration.id().as_bytes().to_vec());

    client.shutdown().await;
}

#[tokio::test]
async fn test_failed_removal_keeps_listener_active() {
    let server = MockServer::start(|request: &MockRequest| match request.opcode {
        PING_REQUEST => MockBehavior::reply(ping_reply(request.message_id)),
        ADD_CLIENT_LISTENER_REQUEST => MockBehavior::reply(ack(request)),
        REMOVE_CLIENT_LISTENER_REQUEST => MockBehavior::reply(
            ReplyBuilder::error(request.message_id, SERVER_ERROR, "cannot remove").build(),
        ),
        other => panic!("unexpected opcode {other:#04x}"),
    })
    .await;

    let client = common::connect_client(&[server.addr()]).await;
    let cache = client.cache("test");

    let (registration, _events) = cache
        .add_listener(ListenerDescriptor::new())
        .await
        .unwrap();
    assert!(cache.remove_listener(&registration).await.is_err());
    // Server refused; the local event task must keep running.
    assert!(registration.is_active());

    client.shutdown().await;
}

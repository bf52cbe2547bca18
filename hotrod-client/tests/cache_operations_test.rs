//! End-to-end cache operations against a scripted mock server.

mod common;

use common::{empty_reply, ping_reply, MockBehavior, MockRequest, MockServer, RequestBody};
use hotrod_client::core::protocol::{
    EntryMetadata, ReplyBuilder, CLEAR_RESPONSE, CONTAINS_KEY_REQUEST, CONTAINS_KEY_RESPONSE,
    GET_REQUEST, GET_RESPONSE, GET_WITH_METADATA_REQUEST, GET_WITH_METADATA_RESPONSE,
    KEY_DOES_NOT_EXIST, NOT_EXECUTED, NO_ERROR, PING_REQUEST, PUT_IF_ABSENT_REQUEST,
    PUT_IF_ABSENT_RESPONSE, PUT_REQUEST, PUT_RESPONSE, REMOVE_IF_UNMODIFIED_REQUEST,
    REMOVE_IF_UNMODIFIED_RESPONSE, REMOVE_REQUEST, REMOVE_RESPONSE,
    REPLACE_IF_UNMODIFIED_REQUEST, REPLACE_IF_UNMODIFIED_RESPONSE, REPLACE_REQUEST,
    REPLACE_RESPONSE, SIZE_REQUEST, SIZE_RESPONSE, SUCCESS_WITH_PREVIOUS,
};
use hotrod_client::CallOptions;

const STORED_VERSION: i64 = 42;

fn scripted(request: &MockRequest) -> MockBehavior {
    let id = request.message_id;
    match request.opcode {
        PING_REQUEST => MockBehavior::reply(ping_reply(id)),
        GET_REQUEST => {
            if request.key() == Some(b"hit") {
                MockBehavior::reply(
                    ReplyBuilder::new(id, GET_RESPONSE, NO_ERROR, None)
                        .value(b"value")
                        .build(),
                )
            } else {
                MockBehavior::reply(
                    ReplyBuilder::new(id, GET_RESPONSE, KEY_DOES_NOT_EXIST, None).build(),
                )
            }
        }
        GET_WITH_METADATA_REQUEST => {
            if request.key() == Some(b"hit") {
                let meta = EntryMetadata {
                    lifespan: Some((1_000, 60)),
                    max_idle: None,
                    version: STORED_VERSION,
                };
                MockBehavior::reply(
                    ReplyBuilder::new(id, GET_WITH_METADATA_RESPONSE, NO_ERROR, None)
                        .metadata(&meta)
                        .value(b"value")
                        .build(),
                )
            } else {
                MockBehavior::reply(
                    ReplyBuilder::new(id, GET_WITH_METADATA_RESPONSE, KEY_DOES_NOT_EXIST, None)
                        .build(),
                )
            }
        }
        PUT_REQUEST => {
            // FORCE_RETURN_VALUE flag asks for the previous value.
            if request.flags & 0x01 != 0 {
                MockBehavior::reply(
                    ReplyBuilder::new(id, PUT_RESPONSE, SUCCESS_WITH_PREVIOUS, None)
                        .value(b"old")
                        .build(),
                )
            } else {
                MockBehavior::reply(ReplyBuilder::new(id, PUT_RESPONSE, NO_ERROR, None).build())
            }
        }
        PUT_IF_ABSENT_REQUEST => {
            if request.key() == Some(b"taken") {
                MockBehavior::reply(
                    ReplyBuilder::new(id, PUT_IF_ABSENT_RESPONSE, NOT_EXECUTED, None).build(),
                )
            } else {
                MockBehavior::reply(
                    ReplyBuilder::new(id, PUT_IF_ABSENT_RESPONSE, NO_ERROR, None).build(),
                )
            }
        }
        REPLACE_REQUEST => {
            MockBehavior::reply(ReplyBuilder::new(id, REPLACE_RESPONSE, NO_ERROR, None).build())
        }
        REPLACE_IF_UNMODIFIED_REQUEST => {
            let won = matches!(
                request.body,
                RequestBody::KeyValueVersion { version, .. } if version == STORED_VERSION
            );
            let status = if won { NO_ERROR } else { NOT_EXECUTED };
            MockBehavior::reply(
                ReplyBuilder::new(id, REPLACE_IF_UNMODIFIED_RESPONSE, status, None).build(),
            )
        }
        REMOVE_REQUEST => {
            if request.flags & 0x01 != 0 {
                MockBehavior::reply(
                    ReplyBuilder::new(id, REMOVE_RESPONSE, SUCCESS_WITH_PREVIOUS, None)
                        .value(b"gone")
                        .build(),
                )
            } else {
                MockBehavior::reply(ReplyBuilder::new(id, REMOVE_RESPONSE, NO_ERROR, None).build())
            }
        }
        REMOVE_IF_UNMODIFIED_REQUEST => {
            let won = matches!(
                request.body,
                RequestBody::KeyVersion { version, .. } if version == STORED_VERSION
            );
            let status = if won { NO_ERROR } else { NOT_EXECUTED };
            MockBehavior::reply(
                ReplyBuilder::new(id, REMOVE_IF_UNMODIFIED_RESPONSE, status, None).build(),
            )
        }
        CONTAINS_KEY_REQUEST => {
            let status = if request.key() == Some(b"hit") {
                NO_ERROR
            } else {
                KEY_DOES_NOT_EXIST
            };
            MockBehavior::reply(
                ReplyBuilder::new(id, CONTAINS_KEY_RESPONSE, status, None).build(),
            )
        }
        SIZE_REQUEST => MockBehavior::reply(
            ReplyBuilder::new(id, SIZE_RESPONSE, NO_ERROR, None)
                .count(42)
                .build(),
        ),
        _ => MockBehavior::reply(empty_reply(request)),
    }
}

#[tokio::test]
async fn test_get_hit_and_miss() {
    let server = MockServer::start(scripted).await;
    let client = common::connect_client(&[server.addr()]).await;
    let cache = client.cache("test");

    assert_eq!(cache.get(b"hit").await.unwrap(), Some(b"value".to_vec()));
    assert_eq!(cache.get(b"miss").await.unwrap(), None);

    client.shutdown().await;
}

#[tokio::test]
async fn test_get_with_metadata() {
    let server = MockServer::start(scripted).await;
    let client = common::connect_client(&[server.addr()]).await;
    let cache = client.cache("test");

    let (meta, value) = cache.get_with_metadata(b"hit").await.unwrap().unwrap();
    assert_eq!(value, b"value");
    assert_eq!(meta.version, STORED_VERSION);
    assert_eq!(meta.lifespan, Some((1_000, 60)));
    assert_eq!(meta.max_idle, None);

    assert!(cache.get_with_metadata(b"miss").await.unwrap().is_none());

    client.shutdown().await;
}

#[tokio::test]
async fn test_put_returns_previous_only_when_asked() {
    let server = MockServer::start(scripted).await;
    let client = common::connect_client(&[server.addr()]).await;
    let cache = client.cache("test");

    let plain = cache.put(b"k", b"v", CallOptions::new()).await.unwrap();
    assert_eq!(plain, None);

    let with_prev = cache
        .put(b"k", b"v", CallOptions::new().return_previous())
        .await
        .unwrap();
    assert_eq!(with_prev, Some(b"old".to_vec()));

    client.shutdown().await;
}

#[tokio::test]
async fn test_put_if_absent() {
    let server = MockServer::start(scripted).await;
    let client = common::connect_client(&[server.addr()]).await;
    let cache = client.cache("test");

    let (stored, _) = cache
        .put_if_absent(b"fresh", b"v", CallOptions::new())
        .await
        .unwrap();
    assert!(stored);

    let (stored, _) = cache
        .put_if_absent(b"taken", b"v", CallOptions::new())
        .await
        .unwrap();
    assert!(!stored);

    client.shutdown().await;
}

#[tokio::test]
async fn test_versioned_replace_and_remove() {
    let server = MockServer::start(scripted).await;
    let client = common::connect_client(&[server.addr()]).await;
    let cache = client.cache("test");

    assert!(cache
        .replace_with_version(b"k", b"v", STORED_VERSION, CallOptions::new())
        .await
        .unwrap());
    assert!(!cache
        .replace_with_version(b"k", b"v", STORED_VERSION + 1, CallOptions::new())
        .await
        .unwrap());

    assert!(cache.remove_with_version(b"k", STORED_VERSION).await.unwrap());
    assert!(!cache
        .remove_with_version(b"k", STORED_VERSION + 1)
        .await
        .unwrap());

    client.shutdown().await;
}

#[tokio::test]
async fn test_remove_with_previous() {
    let server = MockServer::start(scripted).await;
    let client = common::connect_client(&[server.addr()]).await;
    let cache = client.cache("test");

    let prev = cache
        .remove(b"k", CallOptions::new().return_previous())
        .await
        .unwrap();
    assert_eq!(prev, Some(b"gone".to_vec()));

    client.shutdown().await;
}

#[tokio::test]
async fn test_contains_size_clear() {
    let server = MockServer::start(scripted).await;
    let client = common::connect_client(&[server.addr()]).await;
    let cache = client.cache("test");

    assert!(cache.contains_key(b"hit").await.unwrap());
    assert!(!cache.contains_key(b"miss").await.unwrap());
    assert_eq!(cache.size().await.unwrap(), 42);
    cache.clear().await.unwrap();

    client.shutdown().await;
}

#[tokio::test]
async fn test_requests_carry_cache_name() {
    let server = MockServer::start(|request: &MockRequest| {
        if request.opcode == PING_REQUEST {
            MockBehavior::reply(ping_reply(request.message_id))
        } else {
            assert_eq!(request.cache_name, b"sessions");
            MockBehavior::reply(
                ReplyBuilder::new(request.message_id, CLEAR_RESPONSE, NO_ERROR, None).build(),
            )
        }
    })
    .await;
    let client = common::connect_client(&[server.addr()]).await;

    client.cache("sessions").clear().await.unwrap();

    client.shutdown().await;
}

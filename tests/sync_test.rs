use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use warp::ws::Message;

use drawroom::auth::TokenVerifier;
use drawroom::registry::Registry;
use drawroom::server::Server;
use drawroom::store::{MemoryStore, Store};

fn fixture() -> (Arc<Server>, Arc<Registry>, Arc<MemoryStore>) {
    let registry = Arc::new(Registry::new());
    let store = Arc::new(MemoryStore::new());
    let verifier = Arc::new(TokenVerifier::new("test-secret"));
    let server = Arc::new(Server::new(
        registry.clone(),
        store.clone() as Arc<dyn Store>,
        verifier,
    ));
    (server, registry, store)
}

async fn connect(registry: &Registry, user: &str) -> (String, UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let id = registry.register(user.to_string(), tx).await;
    (id, rx)
}

fn next_frame(rx: &mut UnboundedReceiver<Message>) -> Value {
    let msg = rx.try_recv().expect("expected a delivered frame");
    serde_json::from_str(msg.to_str().expect("text frame")).expect("json frame")
}

fn no_frame(rx: &mut UnboundedReceiver<Message>) -> bool {
    rx.try_recv().is_err()
}

// Spec'd scenario: A and B share room 42, C never joined. A draws a rect;
// a row is persisted and exactly A and B receive the broadcast.
#[tokio::test]
async fn rect_reaches_both_members_and_nobody_else() {
    let (server, registry, store) = fixture();
    let (a, mut rx_a) = connect(&registry, "alice").await;
    let (b, mut rx_b) = connect(&registry, "bob").await;
    let (_c, mut rx_c) = connect(&registry, "carol").await;

    server.dispatch(&a, r#"{"type":"join-room","roomId":42}"#).await;
    server.dispatch(&b, r#"{"type":"join-room","roomId":42}"#).await;

    server
        .dispatch(
            &a,
            r#"{"type":"shapes","roomId":42,"message":{"type":"rect","x":0.0,"y":0.0,"width":10.0,"height":10.0}}"#,
        )
        .await;

    let stored = store.shapes_for_room(42).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].room_id, 42);
    assert_eq!(stored[0].user_id, "alice");

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = next_frame(rx);
        assert_eq!(frame["type"], "shapes");
        assert_eq!(frame["roomId"], 42);
        assert_eq!(frame["userId"], "alice");
        assert_eq!(frame["message"]["id"], stored[0].id);
        assert_eq!(frame["message"]["roomId"], 42);
        assert_eq!(frame["message"]["userId"], "alice");
        assert_eq!(frame["message"]["shape"]["type"], "rect");
        assert_eq!(frame["message"]["shape"]["width"], 10.0);
    }

    assert!(no_frame(&mut rx_c));
}

// Spec'd scenario: a chat sent before B joined is not delivered live to B
// but shows up when B reads the persisted history.
#[tokio::test]
async fn chat_before_join_survives_in_history() {
    let (server, registry, store) = fixture();
    let (a, mut rx_a) = connect(&registry, "alice").await;

    server.dispatch(&a, r#"{"type":"join-room","roomId":42}"#).await;
    server
        .dispatch(&a, r#"{"type":"chat","roomId":42,"message":"hi"}"#)
        .await;
    assert_eq!(next_frame(&mut rx_a)["message"]["message"], "hi");

    let (b, mut rx_b) = connect(&registry, "bob").await;
    server.dispatch(&b, r#"{"type":"join-room","roomId":42}"#).await;
    assert!(no_frame(&mut rx_b));

    let history = store.chats_for_room(42, 1000).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].message, "hi");
    assert_eq!(history[0].user_id, "alice");
}

#[tokio::test]
async fn leave_room_stops_delivery() {
    let (server, registry, _store) = fixture();
    let (a, mut rx_a) = connect(&registry, "alice").await;
    let (b, mut rx_b) = connect(&registry, "bob").await;

    server.dispatch(&a, r#"{"type":"join-room","roomId":7}"#).await;
    server.dispatch(&b, r#"{"type":"join-room","roomId":7}"#).await;
    server.dispatch(&b, r#"{"type":"leave-room","roomId":7}"#).await;

    server
        .dispatch(&a, r#"{"type":"chat","roomId":7,"message":"bye bob"}"#)
        .await;

    assert_eq!(next_frame(&mut rx_a)["message"]["message"], "bye bob");
    assert!(no_frame(&mut rx_b));
}

// After unregister the connection never shows up in a fan-out again.
#[tokio::test]
async fn disconnect_cleanup_excludes_the_connection_from_fanout() {
    let (server, registry, _store) = fixture();
    let (a, mut rx_a) = connect(&registry, "alice").await;
    let (b, mut rx_b) = connect(&registry, "bob").await;

    server.dispatch(&a, r#"{"type":"join-room","roomId":9}"#).await;
    server.dispatch(&b, r#"{"type":"join-room","roomId":9}"#).await;

    registry.unregister(&b).await;
    assert_eq!(registry.members_of(9).await.len(), 1);

    server
        .dispatch(&a, r#"{"type":"chat","roomId":9,"message":"still here"}"#)
        .await;

    assert_eq!(next_frame(&mut rx_a)["message"]["message"], "still here");
    assert!(no_frame(&mut rx_b));
}

// Update-by-id rewrites the geometry and keeps id, room and author; the
// replay read immediately after sees the new geometry.
#[tokio::test]
async fn update_overwrites_geometry_in_place() {
    let (server, registry, store) = fixture();
    let (a, mut rx_a) = connect(&registry, "alice").await;
    let (b, mut rx_b) = connect(&registry, "bob").await;

    server.dispatch(&a, r#"{"type":"join-room","roomId":42}"#).await;
    server.dispatch(&b, r#"{"type":"join-room","roomId":42}"#).await;

    server
        .dispatch(
            &a,
            r#"{"type":"shapes","roomId":42,"message":{"type":"rect","x":0.0,"y":0.0,"width":10.0,"height":10.0}}"#,
        )
        .await;
    let shape_id = next_frame(&mut rx_a)["message"]["id"].as_i64().unwrap();
    let _ = next_frame(&mut rx_b);

    // bob drags alice's rect somewhere else
    server
        .dispatch(
            &b,
            &format!(
                r#"{{"type":"update","roomId":42,"message":{{"id":{shape_id},"shape":{{"type":"rect","x":50.0,"y":50.0,"width":10.0,"height":10.0}}}}}}"#
            ),
        )
        .await;

    for rx in [&mut rx_a, &mut rx_b] {
        let frame = next_frame(rx);
        assert_eq!(frame["type"], "update");
        assert_eq!(frame["userId"], "bob");
        assert_eq!(frame["message"]["id"], shape_id);
        assert_eq!(frame["message"]["shape"]["x"], 50.0);
    }

    let replay = store.shapes_for_room(42).await.unwrap();
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].id, shape_id);
    assert_eq!(replay[0].user_id, "alice");
    let value = serde_json::to_value(&replay[0].shape).unwrap();
    assert_eq!(value["x"], 50.0);
}

// Events from one connection apply in the order they arrived; replay
// reconstructs the same board the store holds at a quiescent point.
#[tokio::test]
async fn replay_matches_live_application_order() {
    let (server, registry, store) = fixture();
    let (a, mut rx_a) = connect(&registry, "alice").await;
    server.dispatch(&a, r#"{"type":"join-room","roomId":1}"#).await;

    for x in 0..3 {
        server
            .dispatch(
                &a,
                &format!(
                    r#"{{"type":"shapes","roomId":1,"message":{{"type":"line","x1":{x}.0,"y1":0.0,"x2":1.0,"y2":1.0}}}}"#
                ),
            )
            .await;
    }

    let mut live_ids = Vec::new();
    for _ in 0..3 {
        live_ids.push(next_frame(&mut rx_a)["message"]["id"].as_i64().unwrap());
    }

    let replay_ids: Vec<i64> = store
        .shapes_for_room(1)
        .await
        .unwrap()
        .iter()
        .map(|row| row.id)
        .collect();
    assert_eq!(live_ids, replay_ids);
}

#[tokio::test]
async fn rooms_are_isolated_from_each_other() {
    let (server, registry, _store) = fixture();
    let (a, mut rx_a) = connect(&registry, "alice").await;
    let (b, mut rx_b) = connect(&registry, "bob").await;

    server.dispatch(&a, r#"{"type":"join-room","roomId":1}"#).await;
    server.dispatch(&b, r#"{"type":"join-room","roomId":2}"#).await;

    server
        .dispatch(&a, r#"{"type":"chat","roomId":1,"message":"room one"}"#)
        .await;
    server
        .dispatch(&b, r#"{"type":"chat","roomId":2,"message":"room two"}"#)
        .await;

    assert_eq!(next_frame(&mut rx_a)["message"]["message"], "room one");
    assert!(no_frame(&mut rx_a));
    assert_eq!(next_frame(&mut rx_b)["message"]["message"], "room two");
    assert!(no_frame(&mut rx_b));
}

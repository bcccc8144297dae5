#![allow(missing_docs)]

//! End-to-end dispatch scenarios driven through the public API: inbound
//! frames in, outbound frames observed on the sessions' delivery channels.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use eventgate_core::logging::{LogLevel, LogSink};
use eventgate_server::session::OutboundFrame;
use eventgate_server::{EventGate, GateConfig, handler_fn};
use serde_json::{Value, json};
use tokio::sync::mpsc;

fn broker(publish_changes: bool) -> EventGate {
    let mut gate = EventGate::new(
        GateConfig {
            keep_alive: Duration::from_millis(6000),
            reap_interval: Duration::from_millis(500),
            publish_changes,
        },
        LogSink::new(),
    );
    // Echo broker: the response body doubles as the change-event body.
    gate.all(
        "/*",
        handler_fn(|req, res| {
            res.send(req.body.clone());
            Ok(())
        }),
    );
    gate
}

async fn connect(
    gate: &EventGate,
    client_id: &str,
    reconnect: bool,
) -> (
    Arc<eventgate_server::session::Session>,
    eventgate_server::session::ConnectionHandle,
    mpsc::UnboundedReceiver<OutboundFrame>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (gate.connect(client_id, reconnect, tx.clone()).await, tx, rx)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> Vec<Value> {
    std::iter::from_fn(|| rx.try_recv().ok())
        .map(|frame| serde_json::from_str(&frame).unwrap())
        .collect()
}

#[tokio::test]
async fn subscribe_then_mutate_delivers_filtered_events() {
    let gate = broker(true);
    let (watcher, _watcher_tx, mut watcher_rx) = connect(&gate, "watcher", false).await;
    let (writer, _writer_tx, mut writer_rx) = connect(&gate, "writer", false).await;

    // Watcher subscribes to open orders.
    gate.dispatch_message(
        &watcher,
        &json!({
            "type": "subscription",
            "uuid": "s1",
            "data": {
                "method": "subscribe",
                "url": "/orders",
                "filters": {"status": {"eq": "open"}}
            }
        })
        .to_string(),
    )
    .await;

    let acks = drain(&mut watcher_rx);
    assert_eq!(acks.len(), 1);
    assert_eq!(acks[0]["data"]["statusText"], "Subscribed.");
    let sub_id = acks[0]["data"]["data"]["id"].as_str().unwrap().to_string();

    // A closed order does not pass the filter.
    gate.dispatch_message(
        &writer,
        &json!({
            "type": "request",
            "uuid": "r1",
            "data": {
                "method": "post",
                "url": "/orders/77",
                "data": {"status": "closed"}
            }
        })
        .to_string(),
    )
    .await;
    assert!(drain(&mut watcher_rx).is_empty());

    // An open order does; the writer short-circuits nothing, so the change
    // event reaches the /orders subscriber via the ancestor-prefix rule.
    gate.dispatch_message(
        &writer,
        &json!({
            "type": "request",
            "uuid": "r2",
            "data": {
                "method": "post",
                "url": "/orders/77",
                "data": {"status": "open"}
            }
        })
        .to_string(),
    )
    .await;

    let events = drain(&mut watcher_rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "event");
    assert_eq!(events[0]["uuid"], sub_id);
    assert_eq!(events[0]["data"]["path"], "/orders");
    assert_eq!(events[0]["data"]["referer"]["path"], "/orders/77");

    // The writer saw exactly one response per request.
    let responses = drain(&mut writer_rx);
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r["type"] == "response"));
}

#[tokio::test]
async fn offline_subscriber_replays_on_reconnect() {
    let gate = broker(true);
    let (watcher, watcher_tx, watcher_rx) = connect(&gate, "watcher", false).await;
    let (writer, _writer_tx, _writer_rx) = connect(&gate, "writer", false).await;

    let _ = gate.registry().subscribe("/stock", "watcher", None).await;

    gate.disconnect(&watcher, &watcher_tx);
    drop(watcher_rx);

    for n in 1..=3 {
        gate.dispatch_message(
            &writer,
            &json!({
                "type": "request",
                "uuid": format!("r{n}"),
                "data": {"method": "put", "url": "/stock", "data": {"n": n}}
            })
            .to_string(),
        )
        .await;
    }
    assert_eq!(watcher.pending_len(), 3);

    // Reconnect with replay: queued events arrive in publish order.
    let (upgraded, _tx, mut rx) = connect(&gate, "watcher", true).await;
    assert!(Arc::ptr_eq(&watcher, &upgraded));
    let frames = drain(&mut rx);
    let ns: Vec<i64> = frames
        .iter()
        .map(|f| f["data"]["data"]["n"].as_i64().unwrap())
        .collect();
    assert_eq!(ns, vec![1, 2, 3]);
}

#[tokio::test]
async fn reaped_session_loses_queue_and_subscriptions() {
    let gate = broker(false);
    let (watcher, watcher_tx, rx) = connect(&gate, "watcher", false).await;
    let _ = gate.registry().subscribe("/stock", "watcher", None).await;
    gate.disconnect(&watcher, &watcher_tx);
    drop(rx);

    let later = Utc::now() + chrono::Duration::milliseconds(6001);
    assert_eq!(gate.reap(later).await, 1);
    assert!(gate.sessions().get("watcher").await.is_none());
    assert!(gate.registry().is_empty().await);

    // Reconnecting after eviction is a fresh session with nothing queued.
    let (fresh, _fresh_tx, mut rx) = connect(&gate, "watcher", true).await;
    assert!(!Arc::ptr_eq(&watcher, &fresh));
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn pipeline_failures_reach_the_log_sink() {
    let mut gate = EventGate::new(GateConfig::default(), LogSink::new());
    gate.get(
        "/broken",
        handler_fn(|_req, _res| {
            Err(eventgate_core::errors::GateError::handler("boom"))
        }),
    );
    let mut errors = gate.log().subscribe_error();

    let (session, _tx, mut rx) = connect(&gate, "c1", false).await;
    gate.dispatch_message(
        &session,
        &json!({
            "type": "request",
            "uuid": "r1",
            "data": {"method": "get", "url": "/broken"}
        })
        .to_string(),
    )
    .await;

    let frames = drain(&mut rx);
    assert_eq!(frames[0]["data"]["status"], 500);

    let entry = errors.recv().await.unwrap();
    assert_eq!(entry.level, LogLevel::Error);
    assert_eq!(entry.payload.unwrap()["uuid"], "r1");
}

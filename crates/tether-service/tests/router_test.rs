mod support;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use support::MockConnection;
use tether_core::{handler_fn, Message, Service, ACK_OPCODE};
use tether_service::{ControlService, MessageRouter};

#[tokio::test]
async fn routes_to_the_matching_opcode() {
    let conn = MockConnection::new();
    let svc = ControlService::new(CancellationToken::new(), conn.clone());

    let hits = Arc::new(AtomicU32::new(0));
    svc.set_message_handler(Arc::new(MessageRouter::new().route(
        1,
        handler_fn({
            let hits = hits.clone();
            move |message| {
                hits.fetch_add(1, Ordering::SeqCst);
                message.ack();
            }
        }),
    )));

    conn.push_inbound(Message::new(Uuid::new_v4(), 1, Bytes::new()));

    let outbound = conn.wait_outbound(1).await;
    assert_eq!(outbound[0].opcode(), ACK_OPCODE);
    assert!(outbound[0].payload().is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unrouted_opcode_is_acked_with_an_error() {
    let conn = MockConnection::new();
    let svc = ControlService::new(CancellationToken::new(), conn.clone());

    let hits = Arc::new(AtomicU32::new(0));
    svc.set_message_handler(Arc::new(MessageRouter::new().route(
        1,
        handler_fn({
            let hits = hits.clone();
            move |message| {
                hits.fetch_add(1, Ordering::SeqCst);
                message.ack();
            }
        }),
    )));

    let uuid = Uuid::new_v4();
    conn.push_inbound(Message::new(uuid, 10, Bytes::new()));

    let outbound = conn.wait_outbound(1).await;
    assert_eq!(outbound[0].opcode(), ACK_OPCODE);
    assert_eq!(outbound[0].uuid(), uuid);
    assert!(!outbound[0].payload().is_empty());
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn dispatches_across_multiple_routes() {
    let conn = MockConnection::new();
    let svc = ControlService::new(CancellationToken::new(), conn.clone());

    let opcode1 = Arc::new(AtomicU32::new(0));
    let opcode2 = Arc::new(AtomicU32::new(0));
    svc.set_message_handler(Arc::new(
        MessageRouter::new()
            .route(
                1,
                handler_fn({
                    let opcode1 = opcode1.clone();
                    move |message| {
                        opcode1.fetch_add(1, Ordering::SeqCst);
                        message.ack();
                    }
                }),
            )
            .route(
                2,
                handler_fn({
                    let opcode2 = opcode2.clone();
                    move |message| {
                        opcode2.fetch_add(1, Ordering::SeqCst);
                        message.ack();
                    }
                }),
            ),
    ));

    for i in 0..10u8 {
        conn.push_inbound(Message::new(Uuid::new_v4(), (i % 2) + 1, Bytes::new()));
    }

    conn.wait_outbound(10).await;
    assert_eq!(opcode1.load(Ordering::SeqCst), 5);
    assert_eq!(opcode2.load(Ordering::SeqCst), 5);
}

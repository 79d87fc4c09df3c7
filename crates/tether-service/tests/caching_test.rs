mod support;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use support::MockConnection;
use tether_core::{Message, Service, ServiceError};
use tether_service::{with_caching, ControlService};

#[tokio::test]
async fn identical_sends_hit_the_wire_once() {
    let conn = MockConnection::new();
    let svc = with_caching(ControlService::new(CancellationToken::new(), conn.clone()));

    let first = tokio::spawn({
        let svc = svc.clone();
        async move { svc.send_and_wait_for_ack(1, Bytes::from_static(b"Funky!")).await }
    });

    let outbound = conn.wait_outbound(1).await;
    conn.push_inbound(Message::ack(outbound[0].uuid(), Bytes::new()));
    first.await.unwrap().unwrap();

    for _ in 0..9 {
        svc.send_and_wait_for_ack(1, Bytes::from_static(b"Funky!"))
            .await
            .unwrap();
    }

    assert_eq!(conn.outbound_snapshot().len(), 1);
}

#[tokio::test]
async fn concurrent_identical_sends_share_one_frame() {
    let conn = MockConnection::new();
    let svc = with_caching(ControlService::new(CancellationToken::new(), conn.clone()));

    let sends: Vec<_> = (0..5)
        .map(|_| {
            let svc = svc.clone();
            tokio::spawn(async move { svc.send_and_wait_for_ack(1, Bytes::from_static(b"Funky!")).await })
        })
        .collect();

    let outbound = conn.wait_outbound(1).await;
    conn.push_inbound(Message::ack(outbound[0].uuid(), Bytes::new()));

    for send in sends {
        send.await.unwrap().unwrap();
    }
    assert_eq!(conn.outbound_snapshot().len(), 1);
}

#[tokio::test]
async fn different_payload_goes_out() {
    let conn = MockConnection::new();
    let svc = with_caching(ControlService::new(CancellationToken::new(), conn.clone()));

    let first = tokio::spawn({
        let svc = svc.clone();
        async move { svc.send_and_wait_for_ack(1, Bytes::from_static(b"one")).await }
    });
    let outbound = conn.wait_outbound(1).await;
    conn.push_inbound(Message::ack(outbound[0].uuid(), Bytes::new()));
    first.await.unwrap().unwrap();

    let second = tokio::spawn({
        let svc = svc.clone();
        async move { svc.send_and_wait_for_ack(1, Bytes::from_static(b"two")).await }
    });
    let outbound = conn.wait_outbound(2).await;
    conn.push_inbound(Message::ack(outbound[1].uuid(), Bytes::new()));
    second.await.unwrap().unwrap();

    assert_eq!(conn.outbound_snapshot().len(), 2);
}

#[tokio::test]
async fn failed_send_is_not_cached() {
    let conn = MockConnection::new();
    let svc = with_caching(ControlService::new(CancellationToken::new(), conn.clone()));

    let first = tokio::spawn({
        let svc = svc.clone();
        async move { svc.send_and_wait_for_ack(1, Bytes::from_static(b"Funky!")).await }
    });
    let outbound = conn.wait_outbound(1).await;
    conn.push_inbound(Message::ack(outbound[0].uuid(), Bytes::from_static(b"nope")));
    assert_eq!(
        first.await.unwrap().unwrap_err(),
        ServiceError::Ack("nope".to_string())
    );

    // The failure cleared the slot: the retry goes out again.
    let second = tokio::spawn({
        let svc = svc.clone();
        async move { svc.send_and_wait_for_ack(1, Bytes::from_static(b"Funky!")).await }
    });
    let outbound = conn.wait_outbound(2).await;
    conn.push_inbound(Message::ack(outbound[1].uuid(), Bytes::new()));
    second.await.unwrap().unwrap();

    assert_eq!(conn.outbound_snapshot().len(), 2);
}

#[tokio::test]
async fn opcodes_are_cached_independently() {
    let conn = MockConnection::new();
    let svc = with_caching(ControlService::new(CancellationToken::new(), conn.clone()));

    for opcode in [1u8, 2] {
        let send = tokio::spawn({
            let svc = svc.clone();
            async move { svc.send_and_wait_for_ack(opcode, Bytes::from_static(b"Funky!")).await }
        });
        let outbound = conn.wait_outbound(opcode as usize).await;
        conn.push_inbound(Message::ack(outbound[opcode as usize - 1].uuid(), Bytes::new()));
        send.await.unwrap().unwrap();
    }

    assert_eq!(conn.outbound_snapshot().len(), 2);
}

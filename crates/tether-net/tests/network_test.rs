//! Plain-TCP client/server tests. The mutually-authenticated variants live
//! in the integration-tests crate, next to the certificate fixtures.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use tether_core::{handler_fn, Service, ServiceError};
use tether_net::{
    start_control_client, start_insecure_control_server, ControlClient, ControlServer, ServerOptions,
    TcpDialer,
};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, fut).await.expect("test timed out")
}

async fn setup_pair(cancel: &CancellationToken) -> (ControlServer, ControlClient) {
    let server = start_insecure_control_server(cancel.clone(), ServerOptions::default().with_port(0))
        .await
        .unwrap();
    let client = start_control_client(
        cancel.clone(),
        Arc::new(TcpDialer::default()),
        format!("127.0.0.1:{}", server.listening_port()),
    )
    .await
    .unwrap();
    (server, client)
}

fn echo_handler(expect_opcode: u8, expect_payload: &'static [u8], hits: Arc<AtomicU32>) -> Arc<dyn tether_core::MessageHandler> {
    handler_fn(move |message| {
        assert_eq!(message.opcode(), expect_opcode);
        assert_eq!(&message.payload()[..], expect_payload);
        hits.fetch_add(1, Ordering::SeqCst);
        message.ack();
    })
}

#[tokio::test]
async fn ephemeral_port_is_discoverable() {
    let cancel = CancellationToken::new();
    let server = start_insecure_control_server(cancel.clone(), ServerOptions::default().with_port(0))
        .await
        .unwrap();
    assert_ne!(server.listening_port(), 0);
    cancel.cancel();
    within(server.closed()).await;
}

#[tokio::test]
async fn client_to_server() {
    let cancel = CancellationToken::new();
    let (server, client) = setup_pair(&cancel).await;

    let hits = Arc::new(AtomicU32::new(0));
    server.set_message_handler(echo_handler(1, b"Funky!", hits.clone()));

    within(client.send_and_wait_for_ack(1, Bytes::from_static(b"Funky!")))
        .await
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    cancel.cancel();
    within(server.closed()).await;
}

#[tokio::test]
async fn server_to_client() {
    let cancel = CancellationToken::new();
    let (server, client) = setup_pair(&cancel).await;

    let hits = Arc::new(AtomicU32::new(0));
    client.set_message_handler(echo_handler(1, b"Funky!", hits.clone()));

    within(server.send_and_wait_for_ack(1, Bytes::from_static(b"Funky!")))
        .await
        .unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    cancel.cancel();
    within(server.closed()).await;
}

#[tokio::test]
async fn noop_handler_still_acks() {
    let cancel = CancellationToken::new();
    let (_server, client) = setup_pair(&cancel).await;

    within(client.send_and_wait_for_ack(10, Bytes::from_static(b"anyone home?")))
        .await
        .unwrap();

    cancel.cancel();
}

#[tokio::test]
async fn ack_error_reaches_the_sender() {
    let cancel = CancellationToken::new();
    let (server, client) = setup_pair(&cancel).await;

    server.set_message_handler(handler_fn(|message| {
        message.ack_with_error("abc");
    }));

    let err = within(client.send_and_wait_for_ack(2, Bytes::from_static(b"Funky!")))
        .await
        .unwrap_err();
    assert_eq!(err, ServiceError::Ack("abc".to_string()));

    cancel.cancel();
}

#[tokio::test]
async fn client_restart_reaches_the_same_server() {
    let root = CancellationToken::new();
    let server_cancel = root.child_token();
    let server = start_insecure_control_server(server_cancel.clone(), ServerOptions::default().with_port(0))
        .await
        .unwrap();
    let target = format!("127.0.0.1:{}", server.listening_port());

    let hits = Arc::new(AtomicU32::new(0));
    server.set_message_handler(echo_handler(1, b"Funky!", hits.clone()));

    let client1_cancel = root.child_token();
    let client1 = start_control_client(client1_cancel.clone(), Arc::new(TcpDialer::default()), target.clone())
        .await
        .unwrap();
    within(client1.send_and_wait_for_ack(1, Bytes::from_static(b"Funky!")))
        .await
        .unwrap();

    client1_cancel.cancel();
    within(client1.closed()).await;

    let client2 = start_control_client(root.child_token(), Arc::new(TcpDialer::default()), target)
        .await
        .unwrap();
    within(client2.send_and_wait_for_ack(1, Bytes::from_static(b"Funky!")))
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    root.cancel();
    within(server.closed()).await;
}

#[tokio::test]
async fn server_restart_client_reconnects() {
    let root = CancellationToken::new();

    let server1_cancel = root.child_token();
    let server1 = start_insecure_control_server(server1_cancel.clone(), ServerOptions::default().with_port(0))
        .await
        .unwrap();
    let port = server1.listening_port();

    let hits = Arc::new(AtomicU32::new(0));
    server1.set_message_handler(echo_handler(1, b"Funky!", hits.clone()));

    let client = start_control_client(
        root.child_token(),
        Arc::new(TcpDialer::default()),
        format!("127.0.0.1:{port}"),
    )
    .await
    .unwrap();
    within(client.send_and_wait_for_ack(1, Bytes::from_static(b"Funky!")))
        .await
        .unwrap();

    server1_cancel.cancel();
    within(server1.closed()).await;

    let server2_cancel = root.child_token();
    let server2 = start_insecure_control_server(server2_cancel.clone(), ServerOptions::default().with_port(port))
        .await
        .unwrap();
    server2.set_message_handler(echo_handler(1, b"Funky!", hits.clone()));

    within(client.send_and_wait_for_ack(1, Bytes::from_static(b"Funky!")))
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    root.cancel();
    within(server2.closed()).await;
}

#[tokio::test]
async fn closed_resolves_after_cancellation() {
    let cancel = CancellationToken::new();
    let (server, client) = setup_pair(&cancel).await;

    cancel.cancel();
    within(server.closed()).await;
    within(client.closed()).await;
}

#[tokio::test]
async fn interleaved_sends_both_directions() {
    let cancel = CancellationToken::new();
    let (server, client) = setup_pair(&cancel).await;

    let server_hits = Arc::new(AtomicU32::new(0));
    let client_hits = Arc::new(AtomicU32::new(0));
    server.set_message_handler(echo_handler(2, b"Funky2!", server_hits.clone()));
    client.set_message_handler(echo_handler(1, b"Funky!", client_hits.clone()));

    let server = Arc::new(server);
    let client = Arc::new(client);

    let mut sends = Vec::new();
    for i in 0..100 {
        if i % 2 == 0 {
            let server = server.clone();
            sends.push(tokio::spawn(async move {
                server.send_and_wait_for_ack(1, Bytes::from_static(b"Funky!")).await
            }));
        } else {
            let client = client.clone();
            sends.push(tokio::spawn(async move {
                client.send_and_wait_for_ack(2, Bytes::from_static(b"Funky2!")).await
            }));
        }
    }

    for send in sends {
        within(send).await.unwrap().unwrap();
    }
    assert_eq!(server_hits.load(Ordering::SeqCst), 50);
    assert_eq!(client_hits.load(Ordering::SeqCst), 50);

    cancel.cancel();
}

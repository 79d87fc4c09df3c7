mod support;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use support::MockConnection;
use tether_core::{int64_command_id, AsyncCommandResult, Message, Service, ACK_OPCODE};
use tether_service::{AsyncCommandHandler, ControlService};

const RESULT_OPCODE: u8 = 2;

#[tokio::test]
async fn successful_command_reports_an_ok_result() {
    let conn = MockConnection::new();
    let svc = ControlService::new(CancellationToken::new(), conn.clone());

    svc.set_message_handler(AsyncCommandHandler::new(svc.clone(), RESULT_OPCODE, |message| {
        message.ack();
        async move { (int64_command_id(42), Ok(())) }
    }));

    let command_uuid = Uuid::new_v4();
    conn.push_inbound(Message::new(command_uuid, 1, Bytes::from_static(b"do-it")));

    // First the command ack, then the result frame.
    let outbound = conn.wait_outbound(2).await;
    assert_eq!(outbound[0].opcode(), ACK_OPCODE);
    assert_eq!(outbound[0].uuid(), command_uuid);

    assert_eq!(outbound[1].opcode(), RESULT_OPCODE);
    let result = AsyncCommandResult::decode(outbound[1].payload()).unwrap();
    assert_eq!(result.command_id, int64_command_id(42));
    assert!(!result.is_failed());
}

#[tokio::test]
async fn failed_command_reports_the_error() {
    let conn = MockConnection::new();
    let svc = ControlService::new(CancellationToken::new(), conn.clone());

    svc.set_message_handler(AsyncCommandHandler::new(svc.clone(), RESULT_OPCODE, |message| {
        message.ack();
        async move { (int64_command_id(7), Err("disk on fire".to_string())) }
    }));

    conn.push_inbound(Message::new(Uuid::new_v4(), 1, Bytes::new()));

    let outbound = conn.wait_outbound(2).await;
    let result = AsyncCommandResult::decode(outbound[1].payload()).unwrap();
    assert_eq!(result.command_id, int64_command_id(7));
    assert_eq!(result.error.as_deref(), Some("disk on fire"));
}

#[tokio::test]
async fn command_message_is_auto_acked_when_the_handler_does_not_ack() {
    let conn = MockConnection::new();
    let svc = ControlService::new(CancellationToken::new(), conn.clone());

    svc.set_message_handler(AsyncCommandHandler::new(svc.clone(), RESULT_OPCODE, |_message| async move {
        (int64_command_id(1), Ok(()))
    }));

    let command_uuid = Uuid::new_v4();
    conn.push_inbound(Message::new(command_uuid, 1, Bytes::new()));

    let outbound = conn.wait_outbound(2).await;
    let ack = outbound.iter().find(|m| m.opcode() == ACK_OPCODE).unwrap();
    assert_eq!(ack.uuid(), command_uuid);
    assert!(ack.payload().is_empty());
}

//! HLink protocol behavior over a scripted channel

use bulkusb::hlink::{Hlink, HlinkError};
use bulkusb::testing::ScriptedChannel;
use bulkusb::transport::TransportError;
use bulkusb::HlinkConfig;
use protocol::{
    encode_message, Message, ProtocolError, MAX_OUT_CHUNK, SALUTATION, SUBSCRIBE_COMMAND,
    UNSUBSCRIBE_COMMAND,
};

fn open_link(channel: &ScriptedChannel) -> Hlink<ScriptedChannel> {
    channel.queue_salutation();
    let link = Hlink::open(channel.clone(), HlinkConfig::default()).expect("handshake");
    channel.clear_out_log();
    link
}

#[test]
fn handshake_accepts_exact_salutation() {
    let channel = ScriptedChannel::new();
    channel.queue_salutation();
    assert!(Hlink::open(channel, HlinkConfig::default()).is_ok());
}

#[test]
fn handshake_rejects_wrong_salutation() {
    let channel = ScriptedChannel::new();
    channel.queue_in(b"HLink v1".to_vec());

    let probe = channel.clone();
    let err = Hlink::open(channel, HlinkConfig::default()).unwrap_err();
    assert_eq!(
        err,
        HlinkError::HandshakeMismatch {
            received: b"HLink v1".to_vec()
        }
    );
    // Nothing beyond the two reset writes went out.
    assert_eq!(probe.out_log().len(), 2);
}

#[test]
fn handshake_rejects_salutation_prefix() {
    // A prefix of the salutation is not good enough.
    let channel = ScriptedChannel::new();
    channel.queue_in(b"HLink".to_vec());
    assert!(matches!(
        Hlink::open(channel, HlinkConfig::default()).unwrap_err(),
        HlinkError::HandshakeMismatch { .. }
    ));
}

#[test]
fn large_sends_are_chunked() {
    let channel = ScriptedChannel::new();
    let link = open_link(&channel);

    let message = Message::new("fat-write".to_owned(), vec![0xAB; 20_000]);
    let frame_len = encode_message(&message).len();
    link.send(&message).unwrap();

    let writes = channel.out_log();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].len(), MAX_OUT_CHUNK);
    assert_eq!(writes[1].len(), frame_len - MAX_OUT_CHUNK);
    assert_eq!(channel.sent_messages(), vec![message]);
}

#[test]
fn short_writes_resume_from_the_transferred_offset() {
    let channel = ScriptedChannel::new();
    let link = open_link(&channel);

    // Device accepts only 5 bytes of the first transfer.
    channel.queue_out(Ok(5));
    let message = Message::new("cmd".to_owned(), vec![1, 2, 3, 4]);
    let frame = encode_message(&message);
    link.send(&message).unwrap();

    let writes = channel.out_log();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0], frame);
    assert_eq!(writes[1], frame[5..].to_vec());
}

#[test]
fn send_surfaces_transport_errors() {
    let channel = ScriptedChannel::new();
    let link = open_link(&channel);

    channel.queue_out(Err(TransportError::Pipe));
    let err = link.send(&Message::new("cmd".to_owned(), vec![])).unwrap_err();
    assert_eq!(err, HlinkError::Transport(TransportError::Pipe));
}

#[test]
fn receive_reassembles_header_and_payload_phases() {
    let channel = ScriptedChannel::new();
    let link = open_link(&channel);

    let message = Message::new("camera/status_reply".to_owned(), b"pan=3".to_vec());
    let frame = encode_message(&message);
    let split = frame.len() - message.payload.len();
    channel.queue_in(frame[..split].to_vec());
    channel.queue_in(frame[split..].to_vec());

    assert_eq!(link.receive().unwrap(), message);
}

#[test]
fn zero_payload_receive_consumes_the_payload_phase() {
    let channel = ScriptedChannel::new();
    let link = open_link(&channel);

    // Zero-payload messages still carry a payload phase, as a ZLP. Leaving
    // it unconsumed would corrupt the framing of everything that follows.
    let empty = Message::new("ping_reply".to_owned(), vec![]);
    channel.queue_in(encode_message(&empty));
    channel.queue_in(vec![]);

    let next = Message::new("camera/status_reply".to_owned(), b"ok".to_vec());
    let frame = encode_message(&next);
    let split = frame.len() - next.payload.len();
    channel.queue_in(frame[..split].to_vec());
    channel.queue_in(frame[split..].to_vec());

    assert_eq!(link.receive().unwrap(), empty);
    assert_eq!(link.receive().unwrap(), next);
}

#[test]
fn receive_rejects_payload_length_mismatch() {
    let channel = ScriptedChannel::new();
    let link = open_link(&channel);

    let message = Message::new("cmd_reply".to_owned(), vec![9; 64]);
    let frame = encode_message(&message);
    let split = frame.len() - 64;
    channel.queue_in(frame[..split].to_vec());
    channel.queue_in(frame[split..split + 10].to_vec());

    assert_eq!(
        link.receive().unwrap_err(),
        HlinkError::Protocol(ProtocolError::PayloadLengthMismatch {
            declared: 64,
            actual: 10
        })
    );
}

#[test]
fn receive_rejects_oversized_payload_declaration() {
    let channel = ScriptedChannel::new();
    let link = open_link(&channel);

    let message = Message::new("cmd_reply".to_owned(), vec![0; 5000]);
    let frame = encode_message(&message);
    channel.queue_in(frame[..frame.len() - 5000].to_vec());

    assert!(matches!(
        link.receive().unwrap_err(),
        HlinkError::Protocol(ProtocolError::PayloadTooLarge { declared: 5000, .. })
    ));
}

#[test]
fn subscribe_sends_the_command_name_as_payload() {
    let channel = ScriptedChannel::new();
    let link = open_link(&channel);

    let subscription = link.subscribe("camera/attach").unwrap();
    drop(subscription);

    let sent = channel.sent_messages();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].name, SUBSCRIBE_COMMAND);
    assert_eq!(sent[0].payload, b"camera/attach");
    assert_eq!(sent[1].name, UNSUBSCRIBE_COMMAND);
    assert_eq!(sent[1].payload, b"camera/attach");
}

#[test]
fn subscriptions_release_in_any_order() {
    let channel = ScriptedChannel::new();
    let link = open_link(&channel);

    let first = link.subscribe("camera/attach").unwrap();
    let second = link.subscribe("camera/detach").unwrap();
    drop(second);
    drop(first);

    let names: Vec<_> = channel
        .sent_messages()
        .into_iter()
        .map(|m| (m.name, String::from_utf8(m.payload).unwrap()))
        .collect();
    assert_eq!(
        names,
        vec![
            (SUBSCRIBE_COMMAND.to_owned(), "camera/attach".to_owned()),
            (SUBSCRIBE_COMMAND.to_owned(), "camera/detach".to_owned()),
            (UNSUBSCRIBE_COMMAND.to_owned(), "camera/detach".to_owned()),
            (UNSUBSCRIBE_COMMAND.to_owned(), "camera/attach".to_owned()),
        ]
    );
}

#[test]
fn send_receive_orders_subscribe_request_unsubscribe() {
    let channel = ScriptedChannel::new();
    let link = open_link(&channel);

    let reply = Message::new("camera/get_reply".to_owned(), b"value".to_vec());
    let frame = encode_message(&reply);
    let split = frame.len() - reply.payload.len();
    channel.queue_in(frame[..split].to_vec());
    channel.queue_in(frame[split..].to_vec());

    let request = Message::new("camera/get".to_owned(), vec![]);
    assert_eq!(link.send_receive(&request).unwrap(), reply);

    let names: Vec<_> = channel.sent_messages().into_iter().map(|m| m.name).collect();
    assert_eq!(
        names,
        vec![
            SUBSCRIBE_COMMAND.to_owned(),
            "camera/get".to_owned(),
            UNSUBSCRIBE_COMMAND.to_owned(),
        ]
    );
}

#[test]
fn send_receive_rejects_mismatched_reply_name() {
    let channel = ScriptedChannel::new();
    let link = open_link(&channel);

    let stray = Message::new("camera/other_reply".to_owned(), vec![]);
    channel.queue_in(encode_message(&stray));
    channel.queue_in(vec![]);

    let request = Message::new("camera/get".to_owned(), vec![]);
    let err = link.send_receive(&request).unwrap_err();
    assert_eq!(
        err,
        HlinkError::ReplyMismatch {
            expected: "camera/get_reply".to_owned(),
            received: "camera/other_reply".to_owned(),
        }
    );

    // The subscription guard still unsubscribed on the way out.
    let names: Vec<_> = channel.sent_messages().into_iter().map(|m| m.name).collect();
    assert_eq!(names.last().map(String::as_str), Some(UNSUBSCRIBE_COMMAND));
}

#[test]
fn send_receive_unsubscribes_after_receive_errors() {
    let channel = ScriptedChannel::new();
    let link = open_link(&channel);

    channel.queue_in_error(TransportError::Timeout);
    let request = Message::new("camera/get".to_owned(), vec![]);
    assert_eq!(
        link.send_receive(&request).unwrap_err(),
        HlinkError::Transport(TransportError::Timeout)
    );

    let names: Vec<_> = channel.sent_messages().into_iter().map(|m| m.name).collect();
    assert_eq!(names.last().map(String::as_str), Some(UNSUBSCRIBE_COMMAND));
}

#[test]
fn handshake_writes_come_before_salutation_read() {
    let channel = ScriptedChannel::new();
    channel.queue_in(SALUTATION.to_vec());
    let probe = channel.clone();
    Hlink::open(channel, HlinkConfig::default()).unwrap();

    let writes = probe.out_log();
    assert_eq!(writes, vec![Vec::<u8>::new(), vec![0u8]]);
}

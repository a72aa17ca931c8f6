
use super::*;
use crate::channel::ChannelError;
use crate::testing::MockTransport;

fn open_client() -> WsClient<MockTransport> {
    WsClient::new(MockTransport::connected())
}

#[test]
fn written_frames_read_back_identically() {
    let payloads: [&[u8]; 5] =
        [b"", b"hi", b"socket mode envelope", &[0u8; 300], &[7u8; 65535]];
    for payload in payloads {
        let mut writer = open_client();
        writer.write_frame(Opcode::Text, payload).expect("write");

        let mut reader = open_client();
        reader.channel.reads.push_back(crate::testing::Script::Data(writer.channel.written.clone()));

        let mut buf = vec![0u8; 65536];
        let (opcode, decoded) = reader
            .read_frame(&mut buf)
            .expect("read")
            .expect("a frame is available");
        assert_eq!(opcode, Opcode::Text);
        assert_eq!(decoded, payload);
    }
}

#[test]
fn oversize_write_is_rejected_before_any_bytes_hit_the_wire() {
    let mut client = open_client();
    let payload = vec![0u8; 65536];

    let err = client.write_frame(Opcode::Binary, &payload).expect_err("must reject");

    assert!(matches!(err, WsError::Frame(FrameError::PayloadTooLong(65536))));
    assert!(client.channel.written.is_empty());
}

#[test]
fn no_pending_frame_reads_as_none() {
    let mut client = open_client();
    client.channel.push_would_block();
    let mut buf = vec![0u8; 64];

    let result = client.read_frame(&mut buf).expect("no frame is not an error");

    assert!(result.is_none());
    assert!(client.channel.is_open());
    assert!(client.channel.nonblocking, "header probe must not block");
}

#[test]
fn unmasked_server_frame_decodes() {
    let mut client = open_client();
    client.channel.push_data(&[0x81, 0x02, b'h', b'i']);
    let mut buf = vec![0u8; 64];

    let (opcode, payload) = client
        .read_frame(&mut buf)
        .expect("read")
        .expect("a frame is available");

    assert_eq!(opcode, Opcode::Text);
    assert_eq!(payload, b"hi");
}

#[test]
fn split_header_is_reassembled() {
    let mut client = open_client();
    client.channel.push_data(&[0x89]);
    client.channel.push_data(&[0x03, b'p', b'n', b'g']);
    let mut buf = vec![0u8; 64];

    let (opcode, payload) = client
        .read_frame(&mut buf)
        .expect("read")
        .expect("a frame is available");

    assert_eq!(opcode, Opcode::Ping);
    assert_eq!(payload, b"png");
}

#[test]
fn sixty_four_bit_length_forces_the_channel_closed() {
    let mut client = open_client();
    client.channel.push_data(&[0x81, 127]);
    let mut buf = vec![0u8; 64];

    let err = client.read_frame(&mut buf).expect_err("must reject");

    assert!(matches!(err, WsError::UnsupportedLength));
    assert!(!client.channel.is_open());
}

#[test]
fn frame_larger_than_buffer_forces_the_channel_closed() {
    let mut client = open_client();
    // Announces 256 bytes; the buffer holds 64.
    client.channel.push_data(&[0x81, 126, 0x01, 0x00]);
    let mut buf = vec![0u8; 64];

    let err = client.read_frame(&mut buf).expect_err("must reject");

    assert!(matches!(err, WsError::FrameTooLarge { len: 256, capacity: 64 }));
    assert!(!client.channel.is_open());
}

#[test]
fn unknown_opcode_forces_the_channel_closed() {
    let mut client = open_client();
    client.channel.push_data(&[0x83, 0x00]);
    let mut buf = vec![0u8; 64];

    let err = client.read_frame(&mut buf).expect_err("must reject");

    assert!(matches!(err, WsError::BadOpcode(0x3)));
    assert!(!client.channel.is_open());
}

#[test]
fn peer_hangup_during_probe_is_an_error_and_closes() {
    let mut client = open_client();
    client.channel.push_eof();
    let mut buf = vec![0u8; 64];

    let err = client.read_frame(&mut buf).expect_err("hangup is an error");

    assert!(matches!(err, WsError::Channel(ChannelError::Io(_))));
    assert!(!client.channel.is_open());
}

#[test]
fn open_negotiates_the_upgrade_and_keeps_the_channel() {
    let mut channel = MockTransport::new();
    channel.push_data(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n");
    let mut client = WsClient::new(channel);
    let mut buf = vec![0u8; 1024];

    client.open("example.com", "/link/abc", &mut buf).expect("open");

    assert!(client.channel.is_open());
    assert_eq!(client.channel.connects, vec![("example.com".to_owned(), 443)]);

    let written = String::from_utf8(client.channel.written.clone()).expect("utf-8 head");
    assert!(written.starts_with("GET /link/abc HTTP/1.1\r\nHost: example.com\r\n"));
    assert!(written.contains("Upgrade: websocket\r\n"));
    assert!(written.contains("Connection: Upgrade\r\n"));
    assert!(written.contains("Sec-WebSocket-Key: "));
    assert!(written.contains("Sec-WebSocket-Version: 13\r\n"));
}

#[test]
fn open_rejects_a_normal_response() {
    let mut channel = MockTransport::new();
    channel.push_data(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n");
    let mut client = WsClient::new(channel);
    let mut buf = vec![0u8; 1024];

    let err = client.open("example.com", "/link/abc", &mut buf).expect_err("must reject");

    assert!(matches!(err, WsError::UpgradeRejected(403)));
    assert!(!client.channel.is_open());
}

#[test]
fn connected_tracks_channel_state_and_liveness() {
    let mut client = open_client();
    assert!(client.connected());

    client.channel.alive = false;
    assert!(!client.connected());

    client.channel.alive = true;
    client.close();
    assert!(!client.connected());
}

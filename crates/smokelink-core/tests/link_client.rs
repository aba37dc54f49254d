mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::Harness;
use pretty_assertions::assert_eq;
use smokelink_core::config::LinkConfig;
use smokelink_core::protocol::frame::{flags, FrameStatus};
use smokelink_core::protocol::{
    Command, ConnectionState, Frame, LinkError, Packet, PacketFlags, Request, Status,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_ping_round_trip() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;
    let client = &harness.client;
    assert_eq!(client.state(), ConnectionState::Connected);

    let (response, reply_seq) = tokio::join!(client.send(Command::Ping, &[]), async {
        let (header, request) = remote.next_request().await;
        assert_eq!(header.sequence, 1);
        assert!(header.ack_requested());
        assert_eq!(request.command, Command::Ping);
        assert_eq!(request.request_id, 1);
        assert!(!request.is_response());
        remote.respond(&request, Status::Ok, &[]).await
    });

    let response = response.unwrap();
    assert_eq!(response.command, Command::Ping);
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.request_id, 1);

    // Client acknowledges the response frame
    let ack = remote.next_reply().await;
    assert_eq!(ack.flags, flags::IS_ACK);
    assert_eq!(ack.sequence, reply_seq);
    assert_eq!(ack.status, FrameStatus::Ok as u8);

    let stats = client.stats();
    assert_eq!(stats.tx_frames, 1);
    assert_eq!(stats.rx_frames, 1);
    assert_eq!(stats.rx_ack_requests, 1);
    assert_eq!(stats.rx_ack_sent, 1);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_response_without_ack_request() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;
    let client = &harness.client;

    let (response, ()) = tokio::join!(client.send(Command::Ping, &[]), async {
        let (_, request) = remote.next_request().await;
        let reply = Packet::response_to(&request, Status::Ok, &[]);
        remote.send_packet_unacked(&reply).await;
    });

    let response = response.unwrap();
    assert_eq!(response.command, Command::Ping);
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.flags, PacketFlags::RESPONSE);
    assert_eq!(response.data_length, 0);

    let stats = client.stats();
    assert_eq!(stats.tx_frames, 1);
    assert_eq!(stats.rx_frames, 1);
    assert_eq!(stats.rx_ack_requests, 0);
    assert_eq!(stats.rx_ack_sent, 0);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_responses_matched_out_of_order() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;
    let client = &harness.client;

    let (ping, rssi, ()) = tokio::join!(
        client.send(Command::Ping, &[]),
        client.send(Command::GetRssi, &[]),
        async {
            let (_, first) = remote.next_request().await;
            let (_, second) = remote.next_request().await;
            assert_ne!(first.request_id, second.request_id);
            remote.respond(&second, Status::Ok, &[0xC4, 0xB5, 0xBA]).await;
            remote.respond(&first, Status::Ok, &[]).await;
        }
    );

    assert_eq!(ping.unwrap().command, Command::Ping);
    let rssi = rssi.unwrap();
    assert_eq!(rssi.command, Command::GetRssi);
    assert_eq!(rssi.data(), &[0xC4, 0xB5, 0xBA]);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_late_response_becomes_event() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;
    let client = &harness.client;

    let (events_tx, mut events) = mpsc::unbounded_channel();
    client.set_event_handler(move |packet| {
        let _ = events_tx.send(packet);
    });

    let (result, request) = tokio::join!(client.send(Command::GetTimerStats, &[]), async {
        remote.next_request().await.1
    });

    assert!(matches!(result, Err(LinkError::Timeout)));
    assert_eq!(client.stats().tx_timeout, 1);
    assert_eq!(client.pending_requests(), 0);

    remote.respond(&request, Status::Ok, &[1, 2, 3]).await;
    let late = events.recv().await.unwrap();
    assert_eq!(late.request_id, request.request_id);
    assert_eq!(late.data(), &[1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_configured_timeout_is_used() {
    let config = LinkConfig {
        request_timeout_ms: 250,
        ..LinkConfig::for_endpoint("mock0")
    };
    let mut harness = Harness::with_config(config);
    let _remote = harness.connect().await;

    let started = tokio::time::Instant::now();
    let result = harness.client.send(Command::Ping, &[]).await;
    assert!(matches!(result, Err(LinkError::Timeout)));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(250));
    assert!(waited < Duration::from_secs(3));
}

#[tokio::test]
async fn test_cancellation() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;
    let client = &harness.client;
    let token = CancellationToken::new();

    let (result, ()) = tokio::join!(
        client.send_with(Command::Ping, &[], Duration::from_secs(60), &token),
        async {
            remote.next_request().await;
            token.cancel();
        }
    );

    assert!(matches!(result, Err(LinkError::Cancelled)));
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.stats().tx_timeout, 0);

    // An already-cancelled token never reaches the wire
    let result = client
        .send_with(Command::Ping, &[], Duration::from_secs(1), &token)
        .await;
    assert!(matches!(result, Err(LinkError::Cancelled)));
    assert_eq!(client.stats().tx_frames, 1);
}

#[tokio::test]
async fn test_disconnect_cancels_pending_requests() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;
    let client = &harness.client;

    let (first, second, ()) = tokio::join!(
        client.send(Command::GetRemoteStats, &[]),
        client.send(Command::GetDeviceInfo, &[]),
        async {
            remote.next_request().await;
            remote.next_request().await;
            client.disconnect().await;
        }
    );

    assert!(matches!(first, Err(LinkError::Cancelled)));
    assert!(matches!(second, Err(LinkError::Cancelled)));
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(matches!(
        client.send(Command::Ping, &[]).await,
        Err(LinkError::NotConnected)
    ));

    // Disconnecting twice is harmless
    client.disconnect().await;
}

#[tokio::test]
async fn test_sequence_wraps_without_zero() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;
    let client = &harness.client;

    let requests = async {
        for _ in 0..256 {
            client.send(Command::Ping, &[]).await.unwrap();
        }
    };
    let device = async {
        let mut sequences = Vec::new();
        let mut request_ids = Vec::new();
        for _ in 0..256 {
            let (header, request) = remote.next_request().await;
            sequences.push(header.sequence);
            request_ids.push(request.request_id);
            remote.respond(&request, Status::Ok, &[]).await;
        }
        (sequences, request_ids)
    };
    let ((), (sequences, request_ids)) = tokio::join!(requests, device);

    let expected: Vec<u8> = (1..=255).chain(std::iter::once(1)).collect();
    assert_eq!(sequences, expected);
    assert!(request_ids.iter().all(|&id| id != 0));
    assert_eq!(request_ids[255], 256);
    assert_eq!(client.stats().tx_frames, 256);
}

#[tokio::test]
async fn test_streaming_packets_reach_event_handler() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;
    let (events_tx, mut events) = mpsc::unbounded_channel();
    harness.client.set_event_handler(move |packet| {
        let _ = events_tx.send(packet);
    });

    let telemetry = Packet::request(Command::GetRemoteStats, &[0u8; 96], 0)
        .with_flags(PacketFlags::RESPONSE | PacketFlags::STREAMING);
    let seq = remote.send_packet(&telemetry).await;

    let event = events.recv().await.unwrap();
    assert!(event.is_streaming());
    assert_eq!(event.command, Command::GetRemoteStats);
    assert_eq!(event.data().len(), 96);

    let ack = remote.next_reply().await;
    assert!(ack.is_ack());
    assert_eq!(ack.sequence, seq);
}

#[tokio::test]
async fn test_corrupt_frame_is_nakd() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;

    let packet = Packet::empty(Command::Ping, 7).with_flags(PacketFlags::RESPONSE);
    let mut bytes = Frame::data(33, true, packet.to_bytes().to_vec())
        .to_bytes()
        .unwrap()
        .to_vec();
    bytes[20] ^= 0x80;
    remote.send_raw(&bytes).await;

    let nak = remote.next_reply().await;
    assert!(nak.is_nak());
    assert_eq!(nak.sequence, 33);
    assert_eq!(nak.status, FrameStatus::CrcMismatch as u8);
    assert_eq!(harness.client.stats().rx_crc_errors, 1);
    assert_eq!(harness.client.stats().rx_frames, 0);
}

#[tokio::test]
async fn test_wrong_length_payload_is_declined() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;

    let frame = Frame::data(9, true, vec![0xD1u8; 40]).to_bytes().unwrap();
    remote.send_raw(&frame).await;

    let nak = remote.next_reply().await;
    assert!(nak.is_nak());
    assert_eq!(nak.status, FrameStatus::HandlerDeclined as u8);

    let stats = harness.client.stats();
    assert_eq!(stats.rx_frames, 1);
    assert_eq!(stats.rx_invalid_length, 1);
    assert_eq!(stats.rx_nak_sent, 1);
}

#[tokio::test]
async fn test_remote_ack_updates_stats() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;

    remote
        .send_raw(&Frame::nak(1, FrameStatus::HandlerDeclined).to_bytes().unwrap())
        .await;
    remote
        .send_raw(&Frame::ack(2, FrameStatus::Ok).to_bytes().unwrap())
        .await;

    // Round-trip a ping so both frames are known to be processed
    let ((), _) = tokio::join!(
        async {
            let (_, request) = remote.next_request().await;
            remote.respond(&request, Status::Ok, &[]).await;
        },
        harness.client.send(Command::Ping, &[])
    );

    let stats = harness.client.stats();
    assert_eq!(stats.tx_nak, 1);
    assert_eq!(stats.tx_acked, 1);
    assert_eq!(stats.last_status_code, FrameStatus::Ok as u8);
    assert!(stats.last_ack_or_nak.is_some());
}

#[tokio::test]
async fn test_send_packet_validation() {
    let mut harness = Harness::new();
    let _remote = harness.connect().await;
    let client = &harness.client;
    let token = CancellationToken::new();

    let mut invalid = Packet::empty(Command::Ping, 10);
    invalid.data_length = 200;
    let err = client
        .send_packet(&invalid, Duration::from_secs(1), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::InvalidArgument(_)));

    let zero_id = Packet::empty(Command::Ping, 0);
    let err = client
        .send_packet(&zero_id, Duration::from_secs(1), &token)
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::InvalidArgument(_)));
    assert_eq!(client.stats().tx_frames, 0);
}

#[tokio::test]
async fn test_invalid_request_not_sent() {
    let mut harness = Harness::new();
    let _remote = harness.connect().await;

    let err = harness
        .client
        .request(&Request::SetChannel {
            channel: 14,
            inform_timer: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, LinkError::InvalidArgument(_)));
    assert_eq!(harness.client.stats().tx_frames, 0);
}

#[tokio::test]
async fn test_connect_failure() {
    let harness = Harness::new();
    harness.refuse.store(true, Ordering::SeqCst);

    let err = harness.client.connect("ttyNOPE", 115200).await.unwrap_err();
    assert!(matches!(err, LinkError::ConnectionFailed(_)));
    assert!(err.to_string().contains("ttyNOPE"));
    assert_eq!(harness.client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_reconnect_resets_sequence_and_stats() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;

    let (result, ()) = tokio::join!(harness.client.send(Command::Ping, &[]), async {
        let (_, request) = remote.next_request().await;
        remote.respond(&request, Status::Ok, &[]).await;
    });
    result.unwrap();
    assert_eq!(harness.client.stats().tx_frames, 1);

    let mut remote = harness.connect().await;
    assert_eq!(harness.client.stats().tx_frames, 0);

    let (result, ()) = tokio::join!(harness.client.send(Command::Ping, &[]), async {
        let (header, request) = remote.next_request().await;
        assert_eq!(header.sequence, 1);
        assert_eq!(request.request_id, 2);
        remote.respond(&request, Status::Ok, &[]).await;
    });
    result.unwrap();
}

#[tokio::test]
async fn test_write_failure_is_transport_error() {
    let mut harness = Harness::new();
    let remote = harness.connect().await;
    remote.unplug();

    let err = harness.client.send(Command::Ping, &[]).await.unwrap_err();
    assert!(matches!(err, LinkError::Transport(_)));
    let stats = harness.client.stats();
    assert_eq!(stats.tx_send_errors, 1);
    assert_eq!(harness.client.pending_requests(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_send_releases_request_id() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;
    let client = &harness.client;

    let abandoned =
        tokio::time::timeout(Duration::from_millis(100), client.send(Command::Ping, &[])).await;
    assert!(abandoned.is_err());
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.stats().tx_timeout, 0);

    let (response, ()) = tokio::join!(client.send(Command::Ping, &[]), async {
        let (_, dropped) = remote.next_request().await;
        assert_eq!(dropped.request_id, 1);
        let (_, request) = remote.next_request().await;
        assert_eq!(request.request_id, 2);
        remote.respond(&request, Status::Ok, &[]).await;
    });
    assert_eq!(response.unwrap().request_id, 2);
    assert_eq!(client.pending_requests(), 0);
}

#[tokio::test]
async fn test_peer_close_marks_link_down() {
    let mut harness = Harness::new();
    let mut remote = harness.connect().await;

    let (result, ()) = tokio::join!(harness.client.send(Command::Ping, &[]), async move {
        remote.next_request().await;
        remote.unplug();
    });

    assert!(matches!(result, Err(LinkError::NotConnected)));
    assert_eq!(harness.client.state(), ConnectionState::Disconnected);
    assert!(!harness.client.is_connected());
    assert_eq!(harness.client.pending_requests(), 0);
    assert_eq!(harness.client.stats().tx_timeout, 0);

    let err = harness.client.send(Command::Ping, &[]).await.unwrap_err();
    assert!(matches!(err, LinkError::NotConnected));

    let _remote = harness.connect().await;
    assert_eq!(harness.client.state(), ConnectionState::Connected);
}

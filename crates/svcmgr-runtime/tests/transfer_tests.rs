//! Integration tests for chunked uploads and downloads

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{pattern, Fixture, RawPeer, SkewedHashCrypto, EVIDENCE};
use svcmgr_core::protocol::file_transfer::{
    FileInfo, Pace, Segment, SourceRequest, TransferDirection, TransferOffer,
};
use svcmgr_core::{
    CryptoProvider, ErrorCode, GroupKey, KeyPair, ManagerError, RequestData, ResponseData,
    TransferError, TunnelPayload,
};
use svcmgr_runtime::CancelSignal;

fn remote_code(err: &ManagerError) -> Option<ErrorCode> {
    match err {
        ManagerError::Remote { code, .. } => Some(*code),
        _ => None,
    }
}

async fn negotiate(
    peer: &mut RawPeer,
    group_key: &GroupKey,
    direction: TransferDirection,
) -> (KeyPair, TransferOffer) {
    let key_pair = peer.crypto.generate_key_pair();
    let public_key = key_pair.public_key();
    let data = match direction {
        TransferDirection::Upload => RequestData::PutRequest { public_key },
        TransferDirection::Download => RequestData::GetRequest { public_key },
    };
    peer.send(group_key, data).await;
    let sealed = match peer.recv().await.data {
        ResponseData::PutRequestResponse { offer } | ResponseData::GetRequestResponse { offer } => {
            offer
        }
        other => panic!("unexpected {:?}", other),
    };
    let offer = sealed.open_value(&peer.crypto, &key_pair).unwrap();
    (key_pair, offer)
}

/// Negotiate an upload and announce `info`, returning the manager's answer
async fn announce(peer: &mut RawPeer, group_key: &GroupKey, name: &str, data: &[u8]) -> ResponseData {
    let (_key_pair, offer) = negotiate(peer, group_key, TransferDirection::Upload).await;
    let info = FileInfo {
        name: name.to_string(),
        length: data.len() as u64,
        hash: offer.hash_algorithm.digest(data),
    };
    let sealed = TunnelPayload::seal_value(&peer.crypto, &offer.public_key, &info).unwrap();
    peer.send(group_key, RequestData::PutInformation { info: sealed })
        .await;
    peer.recv().await.data
}

fn segment(sequence: u64, total: u64, sent: u64, data: &[u8]) -> RequestData {
    RequestData::PutSegment(Segment {
        sequence,
        total,
        sent,
        data: data.to_vec(),
    })
}

/// Poll until the manager has no transfer in flight
async fn wait_for_idle_transfers(fixture: &Fixture) {
    for _ in 0..100 {
        if fixture.manager.in_flight_transfers() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transfers still in flight: {}", fixture.manager.in_flight_transfers());
}

/// Negotiate a download of `name` and start the stream
async fn start_download(peer: &mut RawPeer, group_key: &GroupKey, name: &str) -> FileInfo {
    let (key_pair, offer) = negotiate(peer, group_key, TransferDirection::Download).await;
    let request = SourceRequest {
        name: name.to_string(),
    };
    let sealed = TunnelPayload::seal_value(&peer.crypto, &offer.public_key, &request).unwrap();
    peer.send(group_key, RequestData::GetInformation { source: sealed })
        .await;
    let info: FileInfo = match peer.recv().await.data {
        ResponseData::GetInformationResponse { info } => {
            info.open_value(&peer.crypto, &key_pair).unwrap()
        }
        other => panic!("unexpected {:?}", other),
    };
    peer.send(group_key, RequestData::GetReady).await;
    info
}

// ----------------------------------------------------------------------------
// Uploads
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_upload_completes_on_final_segment() {
    let fixture = Fixture::start(common::config()).await;
    let mut peer = fixture.raw("peer");
    peer.login(EVIDENCE).await;
    let data = pattern(3000);
    let group_key = GroupKey::generate();

    assert_eq!(
        announce(&mut peer, &group_key, "raw/upload.bin", &data).await,
        ResponseData::PutReady
    );
    assert_eq!(fixture.manager.in_flight_transfers(), 1);

    for (sequence, chunk) in data.chunks(1000).enumerate() {
        let sent = (sequence as u64 + 1) * 1000;
        peer.send(&group_key, segment(sequence as u64, 3000, sent, chunk))
            .await;
        if sent < 3000 {
            assert!(peer.recv_within(Duration::from_millis(100)).await.is_none());
        }
    }

    match peer.recv().await.data {
        ResponseData::PutComplete(outcome) => assert!(outcome.success, "{:?}", outcome.error),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        std::fs::read(fixture.file_root().join("raw/upload.bin")).unwrap(),
        data
    );
    assert_eq!(fixture.manager.in_flight_transfers(), 0);
    // Only the session is left.
    assert_eq!(fixture.manager.pending_operations(), 1);
}

#[tokio::test]
async fn test_corrupted_upload_is_rejected_and_removed() {
    let fixture = Fixture::start(common::config()).await;
    let mut peer = fixture.raw("peer");
    peer.login(EVIDENCE).await;
    let data = pattern(2000);
    let group_key = GroupKey::generate();

    announce(&mut peer, &group_key, "corrupt.bin", &data).await;
    peer.send(&group_key, segment(0, 2000, 1000, &data[..1000]))
        .await;
    let mut tampered = data[1000..].to_vec();
    tampered[0] ^= 0xff;
    peer.send(&group_key, segment(1, 2000, 2000, &tampered)).await;

    match peer.recv().await.data {
        ResponseData::PutComplete(outcome) => {
            assert!(!outcome.success);
            assert!(outcome.error.is_some());
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!fixture.file_root().join("corrupt.bin").exists());
}

#[tokio::test]
async fn test_segments_out_of_order_are_reassembled() {
    let fixture = Fixture::start(common::config()).await;
    let mut peer = fixture.raw("peer");
    peer.login(EVIDENCE).await;
    let data = pattern(3000);
    let group_key = GroupKey::generate();

    announce(&mut peer, &group_key, "shuffled.bin", &data).await;
    peer.send(&group_key, segment(2, 3000, 1000, &data[2000..])).await;
    peer.send(&group_key, segment(0, 3000, 2000, &data[..1000])).await;
    peer.send(&group_key, segment(1, 3000, 3000, &data[1000..2000]))
        .await;

    match peer.recv().await.data {
        ResponseData::PutComplete(outcome) => assert!(outcome.success),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        std::fs::read(fixture.file_root().join("shuffled.bin")).unwrap(),
        data
    );
}

#[tokio::test]
async fn test_zero_length_upload() {
    let fixture = Fixture::start(common::config()).await;
    let client = fixture.logged_in_client("client-a").await;
    let source = fixture.scratch("empty.bin");
    std::fs::write(&source, b"").unwrap();

    let report = client
        .upload(&GroupKey::generate(), &source, "empty.bin", &CancelSignal::new())
        .await
        .unwrap();
    assert_eq!(report.bytes, 0);
    assert_eq!(report.segments, 0);
    let written = fixture.file_root().join("empty.bin");
    assert_eq!(std::fs::metadata(written).unwrap().len(), 0);
}

#[tokio::test]
async fn test_upload_disabled() {
    let mut config = common::config();
    config.transfer.upload_enabled = false;
    let fixture = Fixture::start(config).await;
    let client = fixture.logged_in_client("client-a").await;
    let source = fixture.scratch("disabled.bin");
    std::fs::write(&source, pattern(10)).unwrap();

    let err = client
        .upload(&GroupKey::generate(), &source, "disabled.bin", &CancelSignal::new())
        .await
        .unwrap_err();
    assert_eq!(remote_code(&err), Some(ErrorCode::FeatureDisabled));
}

#[tokio::test]
async fn test_upload_destination_cannot_escape_root() {
    let fixture = Fixture::start(common::config()).await;
    let client = fixture.logged_in_client("client-a").await;
    let source = fixture.scratch("escape.bin");
    std::fs::write(&source, pattern(10)).unwrap();

    let err = client
        .upload(&GroupKey::generate(), &source, "../x", &CancelSignal::new())
        .await
        .unwrap_err();
    assert_eq!(remote_code(&err), Some(ErrorCode::InvalidPath));
}

#[tokio::test]
async fn test_abandoned_upload_expires_with_notification() {
    let mut config = common::config();
    config.transfer.transfer_timeout_ms = 200;
    config.store.purge_interval_ms = 20;
    let fixture = Fixture::start(config).await;
    let mut peer = fixture.raw("peer");
    peer.login(EVIDENCE).await;

    let group_key = GroupKey::generate();
    negotiate(&mut peer, &group_key, TransferDirection::Upload).await;
    assert_eq!(fixture.manager.in_flight_transfers(), 1);

    let response = peer.recv().await;
    assert_eq!(response.group_key, group_key);
    match response.data {
        ResponseData::PutComplete(outcome) => assert!(!outcome.success),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(fixture.manager.in_flight_transfers(), 0);
}

#[tokio::test]
async fn test_failed_upload_keeps_existing_file() {
    let fixture = Fixture::start(common::config()).await;
    std::fs::write(fixture.file_root().join("stable.bin"), b"original").unwrap();
    let mut peer = fixture.raw("peer");
    peer.login(EVIDENCE).await;
    let data = pattern(2000);
    let group_key = GroupKey::generate();

    announce(&mut peer, &group_key, "stable.bin", &data).await;
    peer.send(&group_key, segment(0, 2000, 1000, &data[..1000]))
        .await;
    let mut tampered = data[1000..].to_vec();
    tampered[10] ^= 0x01;
    peer.send(&group_key, segment(1, 2000, 2000, &tampered)).await;

    match peer.recv().await.data {
        ResponseData::PutComplete(outcome) => assert!(!outcome.success),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(
        std::fs::read(fixture.file_root().join("stable.bin")).unwrap(),
        b"original"
    );
    assert!(fixture.staging_entries().is_empty());
}

#[tokio::test]
async fn test_cancel_stops_paced_upload() {
    let mut config = common::config();
    config.transfer.base_delay_ms = 100;
    let fixture = Fixture::start(config).await;
    let client = fixture.logged_in_client("client-a").await;
    let source = fixture.scratch("paced-upload.bin");
    std::fs::write(&source, pattern(10_000)).unwrap();

    let cancel = CancelSignal::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        trigger.cancel();
    });
    let err = client
        .upload(&GroupKey::generate(), &source, "paced-upload.bin", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ManagerError::Canceled), "{:?}", err);

    wait_for_idle_transfers(&fixture).await;
    assert!(!fixture.file_root().join("paced-upload.bin").exists());
    assert!(fixture.staging_entries().is_empty());
}

#[tokio::test]
async fn test_canceled_upload_sends_no_completion() {
    let fixture = Fixture::start(common::config()).await;
    let mut peer = fixture.raw("peer");
    peer.login(EVIDENCE).await;
    let data = pattern(3000);
    let group_key = GroupKey::generate();

    announce(&mut peer, &group_key, "halted.bin", &data).await;
    assert_eq!(fixture.staging_entries().len(), 1);
    peer.send(&group_key, segment(0, 3000, 1000, &data[..1000]))
        .await;
    peer.send(&group_key, RequestData::Cancel).await;
    loop {
        match peer.recv().await.data {
            // The segment may be handled after the cancel and find no upload.
            ResponseData::Error(_) => continue,
            ResponseData::Canceled { was_active } => {
                assert!(was_active);
                break;
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    assert!(fixture.staging_entries().is_empty());

    // Late segments find nothing to feed.
    peer.send(&group_key, segment(1, 3000, 2000, &data[1000..2000]))
        .await;
    peer.send(&group_key, segment(2, 3000, 3000, &data[2000..]))
        .await;
    while let Some(response) = peer.recv_within(Duration::from_millis(300)).await {
        assert!(
            !matches!(response.data, ResponseData::PutComplete(_)),
            "canceled upload completed"
        );
    }
    assert!(!fixture.file_root().join("halted.bin").exists());
    assert_eq!(fixture.manager.in_flight_transfers(), 0);
}

#[tokio::test]
async fn test_receiving_upload_expiry_discards_staging() {
    let mut config = common::config();
    config.transfer.transfer_timeout_ms = 200;
    config.store.purge_interval_ms = 20;
    let fixture = Fixture::start(config).await;
    let mut peer = fixture.raw("peer");
    peer.login(EVIDENCE).await;
    let data = pattern(3000);
    let group_key = GroupKey::generate();

    assert_eq!(
        announce(&mut peer, &group_key, "stalled.bin", &data).await,
        ResponseData::PutReady
    );
    peer.send(&group_key, segment(0, 3000, 1000, &data[..1000]))
        .await;
    assert_eq!(fixture.staging_entries().len(), 1);

    let response = peer.recv().await;
    assert_eq!(response.group_key, group_key);
    match response.data {
        ResponseData::PutComplete(outcome) => {
            assert!(!outcome.success);
            assert_eq!(outcome.error, Some(TransferError::Expired.to_string()));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(fixture.staging_entries().is_empty());
    assert!(!fixture.file_root().join("stalled.bin").exists());
    assert_eq!(fixture.manager.in_flight_transfers(), 0);
}

#[tokio::test]
async fn test_manager_throttles_running_upload() {
    let mut config = common::config();
    config.transfer.base_delay_ms = 50;
    let fixture = Fixture::start(config).await;
    let client = fixture.logged_in_client("client-a").await;
    let source = fixture.scratch("throttled.bin");
    let data = pattern(5000);
    std::fs::write(&source, &data).unwrap();
    let group_key = GroupKey::generate();

    let cancel = CancelSignal::new();
    let upload = client.upload(&group_key, &source, "throttled.bin", &cancel);
    let throttle = async {
        while fixture.manager.in_flight_transfers() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Let the negotiation finish so the throttle lands mid-stream.
        tokio::time::sleep(Duration::from_millis(30)).await;
        fixture
            .manager
            .throttle_upload(&group_key, Pace::new(500, 0))
            .await
            .unwrap();
    };
    let (report, _) = tokio::join!(upload, throttle);

    let report = report.unwrap();
    assert_eq!(report.bytes, 5000);
    assert!(report.segments > 5, "segments: {}", report.segments);
    assert_eq!(
        std::fs::read(fixture.file_root().join("throttled.bin")).unwrap(),
        data
    );
}

// ----------------------------------------------------------------------------
// Downloads
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_upload_then_download_round_trip() {
    let fixture = Fixture::start(common::config()).await;
    let client = fixture.logged_in_client("client-a").await;
    let source = fixture.scratch("round.bin");
    let data = pattern(3000);
    std::fs::write(&source, &data).unwrap();
    let cancel = CancelSignal::new();

    let upload = client
        .upload(&GroupKey::generate(), &source, "docs/round.bin", &cancel)
        .await
        .unwrap();
    assert_eq!(upload.direction, TransferDirection::Upload);
    assert_eq!(upload.segments, 3);

    let destination = fixture.scratch("round-back.bin");
    let download = client
        .download(
            &GroupKey::generate(),
            "docs/round.bin",
            &destination,
            false,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(download.direction, TransferDirection::Download);
    assert_eq!(download.segments, 3);
    assert_eq!(download.bytes, 3000);
    assert_eq!(download.hash, upload.hash);
    assert_eq!(std::fs::read(&destination).unwrap(), data);
    assert_eq!(fixture.manager.in_flight_transfers(), 0);
}

#[tokio::test]
async fn test_download_refuses_existing_destination() {
    let fixture = Fixture::start(common::config()).await;
    let client = fixture.logged_in_client("client-a").await;
    std::fs::write(fixture.file_root().join("present.bin"), pattern(100)).unwrap();
    let destination = fixture.scratch("already-here.bin");
    std::fs::write(&destination, b"keep me").unwrap();

    let err = client
        .download(
            &GroupKey::generate(),
            "present.bin",
            &destination,
            false,
            &CancelSignal::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ManagerError::Transfer(TransferError::DestinationExists { .. })
    ));
    assert_eq!(std::fs::read(&destination).unwrap(), b"keep me");
    // Refused before anything reached the manager.
    assert_eq!(fixture.manager.pending_operations(), 1);

    client
        .download(
            &GroupKey::generate(),
            "present.bin",
            &destination,
            true,
            &CancelSignal::new(),
        )
        .await
        .unwrap();
    assert_eq!(std::fs::read(&destination).unwrap(), pattern(100));
}

#[tokio::test]
async fn test_download_failing_integrity_check_never_reaches_destination() {
    let fixture = Fixture::start(common::config()).await;
    std::fs::write(fixture.file_root().join("checked.bin"), pattern(2500)).unwrap();
    let client = fixture.client_with_crypto("client-a", Arc::new(SkewedHashCrypto::default()));
    client.login(EVIDENCE, &CancelSignal::new()).await.unwrap();

    let destination = fixture.scratch("checked.bin");
    let err = client
        .download(
            &GroupKey::generate(),
            "checked.bin",
            &destination,
            false,
            &CancelSignal::new(),
        )
        .await
        .unwrap_err();
    assert!(
        matches!(err, ManagerError::Transfer(TransferError::IntegrityMismatch { .. })),
        "{:?}",
        err
    );
    assert!(!destination.exists());

    // An overwrite that fails the check leaves the previous file alone.
    std::fs::write(&destination, b"previous").unwrap();
    let err = client
        .download(
            &GroupKey::generate(),
            "checked.bin",
            &destination,
            true,
            &CancelSignal::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ManagerError::Transfer(TransferError::IntegrityMismatch { .. })
    ));
    assert_eq!(std::fs::read(&destination).unwrap(), b"previous");
    assert_eq!(fixture.manager.in_flight_transfers(), 0);
}

#[tokio::test]
async fn test_download_of_missing_file() {
    let fixture = Fixture::start(common::config()).await;
    let client = fixture.logged_in_client("client-a").await;

    let err = client
        .download(
            &GroupKey::generate(),
            "nowhere.bin",
            &fixture.scratch("nowhere.bin"),
            false,
            &CancelSignal::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(remote_code(&err), Some(ErrorCode::NotFound));
}

#[tokio::test]
async fn test_cancel_stops_download_stream() {
    let mut config = common::config();
    config.transfer.base_delay_ms = 100;
    let fixture = Fixture::start(config).await;
    std::fs::write(fixture.file_root().join("slow.bin"), pattern(5000)).unwrap();
    let mut peer = fixture.raw("peer");
    peer.login(EVIDENCE).await;
    let group_key = GroupKey::generate();

    start_download(&mut peer, &group_key, "slow.bin").await;
    assert!(matches!(peer.recv().await.data, ResponseData::GetSegment(_)));
    peer.send(&group_key, RequestData::Cancel).await;

    loop {
        match peer.recv().await.data {
            ResponseData::GetSegment(_) => continue,
            ResponseData::Canceled { was_active } => {
                assert!(was_active);
                break;
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    while let Some(response) = peer.recv_within(Duration::from_millis(500)).await {
        assert!(
            !matches!(response.data, ResponseData::GetComplete { .. }),
            "canceled download completed"
        );
    }
    assert_eq!(fixture.manager.in_flight_transfers(), 0);

    // A second cancel finds nothing to stop.
    peer.send(&group_key, RequestData::Cancel).await;
    assert_eq!(
        peer.recv().await.data,
        ResponseData::Canceled { was_active: false }
    );
}

#[tokio::test]
async fn test_logout_stops_download_with_invalid_session() {
    let mut config = common::config();
    config.transfer.base_delay_ms = 100;
    let fixture = Fixture::start(config).await;
    std::fs::write(fixture.file_root().join("long.bin"), pattern(5000)).unwrap();
    let mut peer = fixture.raw("peer");
    peer.login(EVIDENCE).await;
    let group_key = GroupKey::generate();

    start_download(&mut peer, &group_key, "long.bin").await;
    assert!(matches!(peer.recv().await.data, ResponseData::GetSegment(_)));
    peer.send(&GroupKey::generate(), RequestData::Logout).await;

    loop {
        let response = peer.recv().await;
        match response.data {
            ResponseData::GetSegment(_) => continue,
            ResponseData::LogoutResponse { was_active } => assert!(was_active),
            ResponseData::Error(info) => {
                assert_eq!(response.group_key, group_key);
                assert_eq!(info.code, ErrorCode::InvalidSession);
                break;
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    while let Some(response) = peer.recv_within(Duration::from_millis(300)).await {
        assert!(
            !matches!(response.data, ResponseData::GetComplete { .. }),
            "download outlived its session"
        );
    }
    assert_eq!(fixture.manager.in_flight_transfers(), 0);
}

#[tokio::test]
async fn test_download_throttle_changes_chunk_size() {
    let mut config = common::config();
    config.transfer.base_delay_ms = 100;
    let fixture = Fixture::start(config).await;
    let data = pattern(5000);
    std::fs::write(fixture.file_root().join("paced.bin"), &data).unwrap();
    let mut peer = fixture.raw("peer");
    peer.login(EVIDENCE).await;
    let group_key = GroupKey::generate();

    let info = start_download(&mut peer, &group_key, "paced.bin").await;
    assert_eq!(info.length, 5000);
    peer.send(&group_key, RequestData::GetThrottle(Pace::new(500, 0)))
        .await;

    let mut received = Vec::new();
    let mut segments = 0;
    loop {
        match peer.recv().await.data {
            ResponseData::GetSegment(segment) => {
                segments += 1;
                received.extend(segment.data);
                assert_eq!(segment.sent, received.len() as u64);
            }
            ResponseData::GetComplete { .. } => break,
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(received, data);
    assert!(segments > 5, "segments: {}", segments);
}

#[tokio::test]
async fn test_foreign_endpoint_cannot_cancel_transfer() {
    let mut config = common::config();
    config.transfer.base_delay_ms = 100;
    let fixture = Fixture::start(config).await;
    std::fs::write(fixture.file_root().join("mine.bin"), pattern(3000)).unwrap();
    let mut owner = fixture.raw("owner");
    owner.login(EVIDENCE).await;
    let mut other = fixture.raw("other");
    other.login(EVIDENCE).await;
    let group_key = GroupKey::generate();

    start_download(&mut owner, &group_key, "mine.bin").await;
    other.send(&group_key, RequestData::Cancel).await;
    assert_eq!(
        other.recv().await.error().map(|e| e.code),
        Some(ErrorCode::InvalidCaller)
    );

    let mut completed = false;
    while let Some(response) = owner.recv_within(Duration::from_secs(2)).await {
        if matches!(response.data, ResponseData::GetComplete { .. }) {
            completed = true;
            break;
        }
    }
    assert!(completed);
}

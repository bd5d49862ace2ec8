//! File transfer command handlers
//!
//! Uploads are client driven: each `PutSegment` is persisted to the transfer's staging
//! directory and the segment that brings the received count to the declared length
//! triggers reassembly and the integrity check. The destination is only replaced by a
//! verified file. Downloads are manager driven: `GetReady`
//! starts a streaming task that emits `GetSegment` responses at the live pace until the
//! file is exhausted, the operation is canceled or the owner's session ends.
//!
//! Whichever path removes the transfer's store entry owns its completion; a path that
//! finds the entry gone does nothing further.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use svcmgr_core::protocol::file_transfer::{
    recommended_delay_ms, FileInfo, Pace, Segment, SourceRequest, TransferDirection,
    TransferOffer, TransferOutcome,
};
use svcmgr_core::{
    ClientId, ErrorCode, GroupKey, ManagerError, ProtocolError, PublicKey, Request, Response,
    ResponseData, Result, SessionId, TransferError, TunnelPayload,
};

use super::state::{
    DownloadSource, DownloadState, ManagerState, PendingOperation, UploadPhase, UploadProgress,
    UploadState,
};
use crate::cancel::CancelSignal;
use crate::managers::{
    on_expire, ExpiredEntry, OwnedRemoval, PaceControl, PendingEntry, StagingArea, TtlPolicy,
};

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn malformed(err: ManagerError) -> ManagerError {
    ProtocolError::MalformedCredential {
        reason: err.to_string(),
    }
    .into()
}

/// Handlers for the upload, download and cancel commands
pub struct TransferHandlers;

impl TransferHandlers {
    // ------------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------------

    /// Live entry under `key` created by `caller`; counts as traffic for the entry
    fn owned_entry(
        state: &ManagerState,
        caller: &ClientId,
        key: &str,
    ) -> Result<PendingEntry<PendingOperation>> {
        let entry = state
            .store
            .peek(key)
            .ok_or_else(|| ManagerError::invalid_state(key, "no operation in progress"))?;
        if &entry.owner != caller {
            return Err(ManagerError::invalid_caller(key, caller.as_str()));
        }
        state.store.touch(key);
        Ok(entry)
    }

    fn owned_upload(state: &ManagerState, caller: &ClientId, key: &str) -> Result<UploadState> {
        match Self::owned_entry(state, caller, key)?.payload {
            PendingOperation::Upload(upload) => Ok(upload),
            other => Err(ManagerError::invalid_state(
                key,
                format!("{} is not an upload", other.kind()),
            )),
        }
    }

    fn owned_download(state: &ManagerState, caller: &ClientId, key: &str) -> Result<DownloadState> {
        match Self::owned_entry(state, caller, key)?.payload {
            PendingOperation::Download(download) => Ok(download),
            other => Err(ManagerError::invalid_state(
                key,
                format!("{} is not a download", other.kind()),
            )),
        }
    }

    /// Hash a file on the blocking pool
    async fn hash_file(state: &ManagerState, path: PathBuf) -> Result<Vec<u8>> {
        let crypto = state.crypto.clone();
        let algorithm = state.config.transfer.hash_algorithm;
        tokio::task::spawn_blocking(move || crypto.hash_file(algorithm, &path))
            .await
            .map_err(|err| ManagerError::internal(format!("hash task failed: {}", err)))?
    }

    fn offer(state: &ManagerState, public_key: PublicKey) -> TransferOffer {
        let transfer = &state.config.transfer;
        TransferOffer {
            public_key,
            chunk_size: transfer.chunk_size,
            delay_ms: recommended_delay_ms(transfer.base_delay_ms, state.in_flight_transfers()),
            hash_algorithm: transfer.hash_algorithm,
        }
    }

    // ------------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------------

    pub async fn handle_put_request(
        state: &Arc<ManagerState>,
        caller: &ClientId,
        request: &Request,
        client_key: &PublicKey,
    ) -> Result<Vec<ResponseData>> {
        if !state.config.transfer.upload_enabled {
            return Err(TransferError::Disabled {
                direction: TransferDirection::Upload.to_string(),
            }
            .into());
        }

        let key_pair = state.crypto.generate_key_pair();
        let upload = UploadState {
            key_pair: key_pair.clone(),
            session_id: request.session_id.clone(),
            started: Instant::now(),
            cancel: CancelSignal::new(),
            phase: UploadPhase::Negotiated,
        };

        let outbox = state.outbox.clone();
        let group_key = request.group_key.clone();
        state.store.add(
            request.group_key.as_str(),
            caller.clone(),
            TtlPolicy::Sliding(state.config.transfer.transfer_timeout()),
            PendingOperation::Upload(upload),
            Some(on_expire(move |entry: ExpiredEntry<PendingOperation>| async move {
                let PendingOperation::Upload(upload) = entry.payload else {
                    return;
                };
                upload.cancel.cancel();
                if let UploadPhase::Receiving(progress) = &upload.phase {
                    StagingArea::discard(&progress.staging).await;
                }
                warn!(group_key = %group_key, owner = %entry.owner, "Upload expired");
                let outcome = TransferOutcome::failed(
                    elapsed_ms(upload.started),
                    TransferError::Expired.to_string(),
                );
                outbox
                    .notify(
                        &entry.owner,
                        &group_key,
                        &upload.session_id,
                        ResponseData::PutComplete(outcome),
                    )
                    .await;
            })),
        )?;

        let offer = Self::offer(state, key_pair.public_key());
        let sealed = match TunnelPayload::seal_value(state.crypto.as_ref(), client_key, &offer) {
            Ok(sealed) => sealed,
            Err(err) => {
                state.store.remove(request.group_key.as_str());
                return Err(err);
            }
        };

        info!(
            group_key = %request.group_key,
            caller = %caller,
            chunk_size = offer.chunk_size,
            delay_ms = offer.delay_ms,
            "Upload negotiated"
        );
        Ok(vec![ResponseData::PutRequestResponse { offer: sealed }])
    }

    pub async fn handle_put_information(
        state: &Arc<ManagerState>,
        caller: &ClientId,
        request: &Request,
        sealed: &TunnelPayload,
    ) -> Result<Vec<ResponseData>> {
        let key = request.group_key.as_str();
        let upload = Self::owned_upload(state, caller, key)?;
        if !matches!(upload.phase, UploadPhase::Negotiated) {
            return Err(ManagerError::invalid_state(key, "file already announced"));
        }

        let info: FileInfo = sealed
            .open_value(state.crypto.as_ref(), &upload.key_pair)
            .map_err(malformed)?;
        info.validate()?;
        let destination = state.file_root.resolve(&info.name)?;

        if info.length == 0 {
            if state.store.remove(key).is_none() {
                return Ok(Vec::new());
            }
            let outcome = match state.staging.allocate().await {
                Ok(staging) => {
                    Self::finish_upload(state, &request.group_key, &staging, &destination, &info, upload.started)
                        .await
                }
                Err(err) => TransferOutcome::failed(elapsed_ms(upload.started), err.to_string()),
            };
            return Ok(vec![ResponseData::PutComplete(outcome)]);
        }

        let staging = state.staging.allocate().await?;
        let progress = UploadProgress {
            received: 0,
            staging: staging.clone(),
            destination,
            info,
        };
        let switched = state.store.with_payload_mut(key, |op| match op {
            PendingOperation::Upload(upload) if matches!(upload.phase, UploadPhase::Negotiated) => {
                upload.phase = UploadPhase::Receiving(progress);
                true
            }
            _ => false,
        });
        if switched != Some(true) {
            StagingArea::discard(&staging).await;
            return Err(ManagerError::invalid_state(key, "upload is no longer negotiating"));
        }

        debug!(group_key = %request.group_key, staging = %staging.display(), "Upload ready");
        Ok(vec![ResponseData::PutReady])
    }

    pub async fn handle_put_segment(
        state: &Arc<ManagerState>,
        caller: &ClientId,
        request: &Request,
        segment: &Segment,
    ) -> Result<Vec<ResponseData>> {
        let key = request.group_key.as_str();
        let upload = Self::owned_upload(state, caller, key)?;
        let UploadPhase::Receiving(progress) = &upload.phase else {
            return Err(ManagerError::invalid_state(key, "file not announced"));
        };
        let declared = progress.info.length;
        if segment.total != declared {
            return Err(ManagerError::invalid_request(format!(
                "segment total {} does not match declared length {}",
                segment.total, declared
            )));
        }
        if upload.cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        // Persist first so the byte count never runs ahead of what is on disk.
        if let Err(err) =
            StagingArea::write_segment(&progress.staging, segment.sequence, &segment.data).await
        {
            if state.store.peek(key).is_none() {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        let length = segment.data.len() as u64;
        let received = state
            .store
            .with_payload_mut(key, |op| match op {
                PendingOperation::Upload(UploadState {
                    phase: UploadPhase::Receiving(progress),
                    ..
                }) => {
                    progress.received += length;
                    Some(progress.received)
                }
                _ => None,
            })
            .flatten();
        let Some(received) = received else {
            return Ok(Vec::new());
        };
        if received < declared {
            return Ok(Vec::new());
        }

        if state.store.remove(key).is_none() {
            return Ok(Vec::new());
        }

        if received > declared {
            StagingArea::discard(&progress.staging).await;
            let err = TransferError::LengthExceeded { received, declared };
            warn!(group_key = %request.group_key, "Upload failed: {}", err);
            return Ok(vec![ResponseData::PutComplete(TransferOutcome::failed(
                elapsed_ms(upload.started),
                err.to_string(),
            ))]);
        }

        let outcome = Self::finish_upload(
            state,
            &request.group_key,
            &progress.staging,
            &progress.destination,
            &progress.info,
            upload.started,
        )
        .await;
        Ok(vec![ResponseData::PutComplete(outcome)])
    }

    /// Reassemble, verify and commit a fully received upload, then drop its staging
    /// directory
    async fn finish_upload(
        state: &ManagerState,
        group_key: &GroupKey,
        staging: &Path,
        destination: &Path,
        info: &FileInfo,
        started: Instant,
    ) -> TransferOutcome {
        let committed = Self::commit_upload(state, staging, destination, info).await;
        StagingArea::discard(staging).await;
        let elapsed = elapsed_ms(started);
        match committed {
            Ok(()) => {
                info!(
                    group_key = %group_key,
                    file = %info.name,
                    bytes = info.length,
                    elapsed_ms = elapsed,
                    "Upload complete"
                );
                TransferOutcome::succeeded(elapsed)
            }
            Err(err) => {
                warn!(group_key = %group_key, file = %info.name, "Upload failed: {}", err);
                TransferOutcome::failed(elapsed, err.to_string())
            }
        }
    }

    /// The destination is only replaced once the staged file matches the announced hash
    async fn commit_upload(
        state: &ManagerState,
        staging: &Path,
        destination: &Path,
        info: &FileInfo,
    ) -> Result<()> {
        let (assembled, _) = StagingArea::assemble(staging).await?;
        let actual = Self::hash_file(state, assembled.clone()).await?;
        if actual != info.hash {
            return Err(TransferError::IntegrityMismatch {
                expected: info.hash_hex(),
                actual: hex::encode(actual),
            }
            .into());
        }
        StagingArea::commit(&assembled, destination).await
    }

    /// Ask the owner of an upload to change its pace before the next segment
    pub async fn throttle_upload(state: &ManagerState, group_key: &GroupKey, pace: Pace) -> Result<()> {
        let key = group_key.as_str();
        let entry = state
            .store
            .peek(key)
            .ok_or_else(|| ManagerError::invalid_state(key, "no upload in progress"))?;
        let PendingOperation::Upload(upload) = entry.payload else {
            return Err(ManagerError::invalid_state(key, "not an upload"));
        };
        let pace = pace.clamped(state.config.transfer.max_chunk_size);
        let response = Response::new(
            group_key.clone(),
            upload.session_id,
            state.manager_id.clone(),
            ResponseData::PutThrottle(pace),
        );
        state.outbox.send(&entry.owner, &response).await?;
        info!(group_key = %group_key, chunk_size = pace.chunk_size, delay_ms = pace.delay_ms, "Upload throttled");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Download
    // ------------------------------------------------------------------------

    pub async fn handle_get_request(
        state: &Arc<ManagerState>,
        caller: &ClientId,
        request: &Request,
        client_key: &PublicKey,
    ) -> Result<Vec<ResponseData>> {
        if !state.config.transfer.download_enabled {
            return Err(TransferError::Disabled {
                direction: TransferDirection::Download.to_string(),
            }
            .into());
        }

        let key_pair = state.crypto.generate_key_pair();
        let pace = Pace::new(state.config.transfer.chunk_size, 0);
        let download = DownloadState {
            key_pair: key_pair.clone(),
            client_key: *client_key,
            session_id: request.session_id.clone(),
            started: Instant::now(),
            cancel: CancelSignal::new(),
            pace: Arc::new(PaceControl::new(pace)),
            source: None,
            streaming: false,
        };
        let pace_control = download.pace.clone();

        let outbox = state.outbox.clone();
        let group_key = request.group_key.clone();
        state.store.add(
            request.group_key.as_str(),
            caller.clone(),
            TtlPolicy::Sliding(state.config.transfer.transfer_timeout()),
            PendingOperation::Download(download),
            Some(on_expire(move |entry: ExpiredEntry<PendingOperation>| async move {
                let PendingOperation::Download(download) = entry.payload else {
                    return;
                };
                download.cancel.cancel();
                warn!(group_key = %group_key, owner = %entry.owner, "Download expired");
                outbox
                    .notify(
                        &entry.owner,
                        &group_key,
                        &download.session_id,
                        ResponseData::error(ErrorCode::Timeout, TransferError::Expired.to_string()),
                    )
                    .await;
            })),
        )?;

        let offer = Self::offer(state, key_pair.public_key());
        pace_control.set(offer.pace());
        let sealed = match TunnelPayload::seal_value(state.crypto.as_ref(), client_key, &offer) {
            Ok(sealed) => sealed,
            Err(err) => {
                state.store.remove(request.group_key.as_str());
                return Err(err);
            }
        };

        info!(group_key = %request.group_key, caller = %caller, "Download negotiated");
        Ok(vec![ResponseData::GetRequestResponse { offer: sealed }])
    }

    pub async fn handle_get_information(
        state: &Arc<ManagerState>,
        caller: &ClientId,
        request: &Request,
        sealed: &TunnelPayload,
    ) -> Result<Vec<ResponseData>> {
        let key = request.group_key.as_str();
        let download = Self::owned_download(state, caller, key)?;
        if download.source.is_some() {
            return Err(ManagerError::invalid_state(key, "source already selected"));
        }

        let source: SourceRequest = sealed
            .open_value(state.crypto.as_ref(), &download.key_pair)
            .map_err(malformed)?;
        let path = state.file_root.resolve(&source.name)?;
        let not_found = || ManagerError::from(TransferError::NotFound {
            path: source.name.clone(),
        });
        let metadata = fs::metadata(&path).await.map_err(|_| not_found())?;
        if !metadata.is_file() {
            return Err(not_found());
        }

        let hash = Self::hash_file(state, path.clone()).await?;
        let info = FileInfo {
            name: source.name.clone(),
            length: metadata.len(),
            hash,
        };
        let selected = DownloadSource {
            path,
            length: info.length,
        };
        let updated = state.store.with_payload_mut(key, |op| {
            if let PendingOperation::Download(download) = op {
                download.source = Some(selected);
            }
        });
        if updated.is_none() {
            return Ok(Vec::new());
        }

        let sealed = TunnelPayload::seal_value(state.crypto.as_ref(), &download.client_key, &info)?;
        debug!(group_key = %request.group_key, file = %info.name, bytes = info.length, "Download source selected");
        Ok(vec![ResponseData::GetInformationResponse { info: sealed }])
    }

    pub async fn handle_get_ready(
        state: &Arc<ManagerState>,
        caller: &ClientId,
        request: &Request,
    ) -> Result<Vec<ResponseData>> {
        let key = request.group_key.as_str();
        let download = Self::owned_download(state, caller, key)?;
        let source = download
            .source
            .clone()
            .ok_or_else(|| ManagerError::invalid_state(key, "no source selected"))?;

        let started = state.store.with_payload_mut(key, |op| match op {
            PendingOperation::Download(download) if !download.streaming => {
                download.streaming = true;
                true
            }
            _ => false,
        });
        if started != Some(true) {
            return Err(ManagerError::invalid_state(key, "download already streaming"));
        }

        tokio::spawn(Self::stream_download(
            state.clone(),
            caller.clone(),
            request.group_key.clone(),
            download,
            source,
        ));
        Ok(Vec::new())
    }

    pub async fn handle_get_throttle(
        state: &Arc<ManagerState>,
        caller: &ClientId,
        request: &Request,
        pace: Pace,
    ) -> Result<Vec<ResponseData>> {
        let download = Self::owned_download(state, caller, request.group_key.as_str())?;
        let pace = pace.clamped(state.config.transfer.max_chunk_size);
        download.pace.set(pace);
        debug!(
            group_key = %request.group_key,
            chunk_size = pace.chunk_size,
            delay_ms = pace.delay_ms,
            "Download throttled"
        );
        Ok(Vec::new())
    }

    async fn stream_download(
        state: Arc<ManagerState>,
        owner: ClientId,
        group_key: GroupKey,
        download: DownloadState,
        source: DownloadSource,
    ) {
        if let Err(err) = Self::run_download(&state, &owner, &group_key, &download, &source).await {
            if state.store.remove(group_key.as_str()).is_some() {
                download.cancel.cancel();
                warn!(group_key = %group_key, error = %err, "Download failed");
                state
                    .outbox
                    .notify(
                        &owner,
                        &group_key,
                        &download.session_id,
                        ResponseData::error(err.code(), err.to_string()),
                    )
                    .await;
            }
        }
    }

    async fn run_download(
        state: &ManagerState,
        owner: &ClientId,
        group_key: &GroupKey,
        download: &DownloadState,
        source: &DownloadSource,
    ) -> Result<()> {
        let key = group_key.as_str();
        let session_id: &SessionId = &download.session_id;
        let total = source.length;
        let mut file = fs::File::open(&source.path).await?;
        let mut sent = 0u64;
        let mut sequence = 0u64;

        while sent < total {
            if download.cancel.is_cancelled() || !state.store.touch(key) {
                debug!(group_key = %group_key, sent, "Download loop stopped");
                return Ok(());
            }
            if !state.store.touch(session_id.as_str()) {
                if state.store.remove(key).is_some() {
                    download.cancel.cancel();
                    info!(group_key = %group_key, session = %session_id, "Session ended, download stopped");
                    state
                        .outbox
                        .notify(
                            owner,
                            group_key,
                            session_id,
                            ResponseData::error(ErrorCode::InvalidSession, "session ended during download"),
                        )
                        .await;
                }
                return Ok(());
            }

            let pace = download.pace.get();
            let length = (total - sent).min(pace.chunk_size as u64) as usize;
            let mut data = vec![0u8; length];
            file.read_exact(&mut data).await?;
            sent += length as u64;

            let response = Response::new(
                group_key.clone(),
                session_id.clone(),
                state.manager_id.clone(),
                ResponseData::GetSegment(Segment {
                    sequence,
                    total,
                    sent,
                    data,
                }),
            );
            state.outbox.send(owner, &response).await?;
            sequence += 1;

            if pace.delay_ms > 0 {
                tokio::select! {
                    _ = download.cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(pace.delay()) => {}
                }
            }
        }

        if state.store.remove(key).is_some() {
            let elapsed = elapsed_ms(download.started);
            info!(group_key = %group_key, bytes = total, segments = sequence, elapsed_ms = elapsed, "Download complete");
            let response = Response::new(
                group_key.clone(),
                session_id.clone(),
                state.manager_id.clone(),
                ResponseData::GetComplete { elapsed_ms: elapsed },
            );
            state.outbox.send(owner, &response).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------------

    /// Tear down the caller's upload, download or log stream under the group key
    pub async fn handle_cancel(
        state: &Arc<ManagerState>,
        caller: &ClientId,
        request: &Request,
    ) -> Result<Vec<ResponseData>> {
        let key = request.group_key.as_str();
        let Some(entry) = state.store.peek(key) else {
            return Ok(vec![ResponseData::Canceled { was_active: false }]);
        };
        if !matches!(
            entry.payload,
            PendingOperation::Upload(_) | PendingOperation::Download(_) | PendingOperation::LogStream { .. }
        ) {
            return Err(ManagerError::invalid_request(format!(
                "{} cannot be canceled",
                entry.payload.kind()
            )));
        }

        match state.store.remove_owned(key, caller) {
            OwnedRemoval::Removed(removed) => {
                match &removed.payload {
                    PendingOperation::Upload(upload) => {
                        upload.cancel.cancel();
                        if let UploadPhase::Receiving(progress) = &upload.phase {
                            StagingArea::discard(&progress.staging).await;
                        }
                    }
                    PendingOperation::Download(download) => download.cancel.cancel(),
                    PendingOperation::LogStream { cancel } => cancel.cancel(),
                    PendingOperation::Login { .. } | PendingOperation::Session { .. } => {}
                }
                info!(
                    group_key = %request.group_key,
                    caller = %caller,
                    operation = removed.payload.kind(),
                    "Operation canceled"
                );
                Ok(vec![ResponseData::Canceled { was_active: true }])
            }
            OwnedRemoval::NotOwned => Err(ManagerError::invalid_caller(key, caller.as_str())),
            OwnedRemoval::Missing => Ok(vec![ResponseData::Canceled { was_active: false }]),
        }
    }
}

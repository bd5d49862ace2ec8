//! Client side of chunked transfers
//!
//! Uploads are paced by the client: after the negotiation it reads the source file in
//! chunks and sends one `PutSegment` per chunk, picking up any `PutThrottle` the manager
//! sent in between. Downloads are paced by the manager; the client stages each
//! `GetSegment` under its sequence-derived name and reassembles on `GetComplete`.
//! Both directions end with a whole-file hash check.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use svcmgr_core::protocol::file_transfer::{
    FileInfo, Pace, Segment, SourceRequest, TransferDirection, TransferOffer, TransferOutcome,
};
use svcmgr_core::{
    GroupKey, HashAlgorithm, KeyPair, ManagerError, RequestData, ResponseData, Result,
    TransferError, TunnelPayload,
};

use super::{into_data, unexpected, ManagerClient, ResponseStream};
use crate::cancel::CancelSignal;
use crate::managers::StagingArea;

/// Summary of a finished transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    pub group_key: GroupKey,
    pub direction: TransferDirection,
    pub bytes: u64,
    pub segments: u64,
    pub elapsed_ms: u64,
    /// Hex-encoded whole-file hash
    pub hash: String,
}

impl ManagerClient {
    async fn hash_local_file(&self, algorithm: HashAlgorithm, path: PathBuf) -> Result<Vec<u8>> {
        let crypto = self.crypto_handle();
        tokio::task::spawn_blocking(move || crypto.hash_file(algorithm, &path))
            .await
            .map_err(|err| ManagerError::internal(format!("hash task failed: {}", err)))?
    }

    /// Request a transfer key and open the manager's sealed offer
    async fn negotiate(
        &self,
        group_key: &GroupKey,
        stream: &mut ResponseStream,
        direction: TransferDirection,
        cancel: &CancelSignal,
    ) -> Result<(KeyPair, TransferOffer)> {
        let key_pair = self.crypto().generate_key_pair();
        let public_key = key_pair.public_key();
        let data = match direction {
            TransferDirection::Upload => RequestData::PutRequest { public_key },
            TransferDirection::Download => RequestData::GetRequest { public_key },
        };
        self.send(&self.request(group_key, data)).await?;

        let sealed = match self.expect(stream, cancel).await? {
            ResponseData::PutRequestResponse { offer } | ResponseData::GetRequestResponse { offer } => offer,
            other => return Err(unexpected("transfer offer", &other)),
        };
        let offer: TransferOffer = sealed.open_value(self.crypto(), &key_pair)?;
        debug!(
            group_key = %group_key,
            %direction,
            chunk_size = offer.chunk_size,
            delay_ms = offer.delay_ms,
            hash = %offer.hash_algorithm,
            "Transfer negotiated"
        );
        Ok((key_pair, offer))
    }

    // ------------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------------

    /// Upload `source` to `destination` under the manager's file root
    ///
    /// A failed integrity check on the manager side is reported as
    /// [`TransferError::Failed`]. Canceling sends `Cancel` to the manager and returns
    /// [`ManagerError::Canceled`].
    pub async fn upload(
        &self,
        group_key: &GroupKey,
        source: &Path,
        destination: &str,
        cancel: &CancelSignal,
    ) -> Result<TransferReport> {
        let mut stream = self.register(group_key)?;
        match self
            .run_upload(group_key, &mut stream, source, destination, cancel)
            .await
        {
            Err(ManagerError::Canceled) => {
                self.send_cancel(group_key).await;
                info!(group_key = %group_key, "Upload canceled");
                Err(ManagerError::Canceled)
            }
            result => result,
        }
    }

    async fn run_upload(
        &self,
        group_key: &GroupKey,
        stream: &mut ResponseStream,
        source: &Path,
        destination: &str,
        cancel: &CancelSignal,
    ) -> Result<TransferReport> {
        let started = Instant::now();
        let length = fs::metadata(source).await?.len();
        let (_key_pair, offer) = self
            .negotiate(group_key, stream, TransferDirection::Upload, cancel)
            .await?;

        let hash = self
            .hash_local_file(offer.hash_algorithm, source.to_path_buf())
            .await?;
        let info = FileInfo {
            name: destination.to_string(),
            length,
            hash,
        };
        let sealed = TunnelPayload::seal_value(self.crypto(), &offer.public_key, &info)?;
        self.send(&self.request(group_key, RequestData::PutInformation { info: sealed }))
            .await?;

        let mut pace = offer.pace();
        loop {
            match self.expect(stream, cancel).await? {
                ResponseData::PutReady => break,
                ResponseData::PutThrottle(throttle) => pace = throttle,
                ResponseData::PutComplete(outcome) => {
                    return Self::finish_upload(group_key, &info, 0, outcome, started);
                }
                ResponseData::Canceled { .. } => return Err(ManagerError::Canceled),
                other => return Err(unexpected("PutReady", &other)),
            }
        }

        let mut file = fs::File::open(source).await?;
        let mut sent = 0u64;
        let mut sequence = 0u64;

        while sent < length {
            while let Some(response) = stream.try_next() {
                match into_data(response)? {
                    ResponseData::PutThrottle(throttle) => {
                        debug!(group_key = %group_key, chunk_size = throttle.chunk_size, delay_ms = throttle.delay_ms, "Upload throttled");
                        pace = throttle;
                    }
                    ResponseData::PutComplete(outcome) => {
                        return Self::finish_upload(group_key, &info, sequence, outcome, started);
                    }
                    ResponseData::Canceled { .. } => return Err(ManagerError::Canceled),
                    other => return Err(unexpected("PutThrottle", &other)),
                }
            }
            if cancel.is_cancelled() {
                return Err(ManagerError::Canceled);
            }

            let chunk = (length - sent).min(pace.chunk_size.max(1) as u64) as usize;
            let mut data = vec![0u8; chunk];
            file.read_exact(&mut data).await?;
            sent += chunk as u64;
            let segment = Segment {
                sequence,
                total: length,
                sent,
                data,
            };
            self.send(&self.request(group_key, RequestData::PutSegment(segment)))
                .await?;
            sequence += 1;

            if sent < length && pace.delay_ms > 0 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ManagerError::Canceled),
                    _ = tokio::time::sleep(pace.delay()) => {}
                }
            }
        }

        loop {
            match self.expect(stream, cancel).await? {
                ResponseData::PutComplete(outcome) => {
                    return Self::finish_upload(group_key, &info, sequence, outcome, started);
                }
                ResponseData::PutThrottle(_) => {}
                ResponseData::Canceled { .. } => return Err(ManagerError::Canceled),
                other => return Err(unexpected("PutComplete", &other)),
            }
        }
    }

    fn finish_upload(
        group_key: &GroupKey,
        info: &FileInfo,
        segments: u64,
        outcome: TransferOutcome,
        started: Instant,
    ) -> Result<TransferReport> {
        if !outcome.success {
            let reason = outcome
                .error
                .unwrap_or_else(|| "manager rejected the upload".to_string());
            warn!(group_key = %group_key, destination = %info.name, "Upload failed: {}", reason);
            return Err(TransferError::Failed { reason }.into());
        }
        info!(
            group_key = %group_key,
            destination = %info.name,
            bytes = info.length,
            segments,
            manager_elapsed_ms = outcome.elapsed_ms,
            "Upload complete"
        );
        Ok(TransferReport {
            group_key: group_key.clone(),
            direction: TransferDirection::Upload,
            bytes: info.length,
            segments,
            elapsed_ms: started.elapsed().as_millis() as u64,
            hash: info.hash_hex(),
        })
    }

    // ------------------------------------------------------------------------
    // Download
    // ------------------------------------------------------------------------

    /// Download `source` from the manager's file root into `destination`
    ///
    /// An existing destination is refused unless `overwrite` is set. The file is
    /// reassembled and hashed in the client's staging directory, so a download that fails
    /// the check never reaches `destination`.
    pub async fn download(
        &self,
        group_key: &GroupKey,
        source: &str,
        destination: &Path,
        overwrite: bool,
        cancel: &CancelSignal,
    ) -> Result<TransferReport> {
        if !overwrite && fs::try_exists(destination).await? {
            return Err(TransferError::DestinationExists {
                path: destination.display().to_string(),
            }
            .into());
        }

        let mut stream = self.register(group_key)?;
        let staging = StagingArea::new(self.config().staging_root.clone())
            .allocate()
            .await?;
        let result = self
            .run_download(group_key, &mut stream, source, destination, &staging, cancel)
            .await;
        StagingArea::discard(&staging).await;

        match result {
            Err(ManagerError::Canceled) => {
                self.send_cancel(group_key).await;
                info!(group_key = %group_key, "Download canceled");
                Err(ManagerError::Canceled)
            }
            result => result,
        }
    }

    async fn run_download(
        &self,
        group_key: &GroupKey,
        stream: &mut ResponseStream,
        source: &str,
        destination: &Path,
        staging: &Path,
        cancel: &CancelSignal,
    ) -> Result<TransferReport> {
        let started = Instant::now();
        let (key_pair, offer) = self
            .negotiate(group_key, stream, TransferDirection::Download, cancel)
            .await?;

        let request = SourceRequest {
            name: source.to_string(),
        };
        let sealed = TunnelPayload::seal_value(self.crypto(), &offer.public_key, &request)?;
        self.send(&self.request(group_key, RequestData::GetInformation { source: sealed }))
            .await?;
        let info: FileInfo = match self.expect(stream, cancel).await? {
            ResponseData::GetInformationResponse { info } => info.open_value(self.crypto(), &key_pair)?,
            ResponseData::Canceled { .. } => return Err(ManagerError::Canceled),
            other => return Err(unexpected("GetInformationResponse", &other)),
        };

        self.send(&self.request(group_key, RequestData::GetReady)).await?;

        let mut received = 0u64;
        let mut segments = 0u64;
        loop {
            match self.expect(stream, cancel).await? {
                ResponseData::GetSegment(segment) => {
                    received += segment.data.len() as u64;
                    if received > info.length {
                        return Err(TransferError::LengthExceeded {
                            received,
                            declared: info.length,
                        }
                        .into());
                    }
                    StagingArea::write_segment(staging, segment.sequence, &segment.data).await?;
                    segments += 1;
                }
                ResponseData::GetComplete { elapsed_ms } => {
                    debug!(group_key = %group_key, segments, manager_elapsed_ms = elapsed_ms, "Download stream finished");
                    break;
                }
                ResponseData::Canceled { .. } => return Err(ManagerError::Canceled),
                other => return Err(unexpected("GetSegment", &other)),
            }
        }

        let (assembled, written) = StagingArea::assemble(staging).await?;
        let actual = self
            .hash_local_file(offer.hash_algorithm, assembled.clone())
            .await?;
        if written != info.length || actual != info.hash {
            warn!(group_key = %group_key, source, "Download failed integrity check");
            return Err(TransferError::IntegrityMismatch {
                expected: info.hash_hex(),
                actual: hex::encode(&actual),
            }
            .into());
        }
        StagingArea::commit(&assembled, destination).await?;

        info!(
            group_key = %group_key,
            source,
            destination = %destination.display(),
            bytes = written,
            segments,
            "Download complete"
        );
        Ok(TransferReport {
            group_key: group_key.clone(),
            direction: TransferDirection::Download,
            bytes: written,
            segments,
            elapsed_ms: started.elapsed().as_millis() as u64,
            hash: info.hash_hex(),
        })
    }

    /// Ask the manager to change the pace of a running download
    pub async fn throttle_download(&self, group_key: &GroupKey, pace: Pace) -> Result<()> {
        self.send(&self.request(group_key, RequestData::GetThrottle(pace)))
            .await
    }
}

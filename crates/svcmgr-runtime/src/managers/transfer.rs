//! File-system side of chunked transfers
//!
//! - [`FileRoot`] confines every transfer and file operation to one directory tree.
//! - [`StagingArea`] hands out private per-transfer staging directories, persists
//!   segments under sequence-derived names, reassembles them in order inside the
//!   staging directory and moves the verified result into place.
//! - [`PaceControl`] holds the live chunk size and delay of a running transfer so a
//!   throttle can change them between segments.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use svcmgr_core::protocol::file_transfer::{segment_file_name, Pace, SEGMENT_PREFIX};
use svcmgr_core::{Result, TransferError};

// ----------------------------------------------------------------------------
// File Root
// ----------------------------------------------------------------------------

/// Directory tree that client-supplied relative paths are resolved in
#[derive(Debug, Clone)]
pub struct FileRoot {
    root: PathBuf,
}

impl FileRoot {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a client-supplied relative path inside the root
    ///
    /// Absolute paths and parent-directory components are rejected. The empty path
    /// and `.` resolve to the root itself.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative);
        let mut resolved = self.root.clone();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(TransferError::InvalidPath {
                        path: relative.to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(resolved)
    }

    /// Create the root directory if it does not exist yet
    pub async fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Staging Area
// ----------------------------------------------------------------------------

/// Name of the reassembled file inside a staging directory
const ASSEMBLED_FILE: &str = "assembled";

/// Allocator of private staging directories
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the staging root if it does not exist yet
    pub async fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    /// Create a fresh, uniquely named staging directory
    pub async fn allocate(&self) -> Result<PathBuf> {
        let dir = self.root.join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Persist one segment under its sequence-derived name
    pub async fn write_segment(dir: &Path, sequence: u64, data: &[u8]) -> Result<()> {
        fs::write(dir.join(segment_file_name(sequence)), data).await?;
        Ok(())
    }

    /// Concatenate staged segments in sequence order into one file inside `dir`
    ///
    /// Each segment file is deleted once appended. Returns the assembled file's path and
    /// the number of bytes written. Nothing outside `dir` is touched.
    pub async fn assemble(dir: &Path) -> Result<(PathBuf, u64)> {
        let mut segments = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(SEGMENT_PREFIX) {
                segments.push(name);
            }
        }
        segments.sort();

        let assembled = dir.join(ASSEMBLED_FILE);
        let mut output = fs::File::create(&assembled).await?;
        let mut written = 0u64;
        for name in segments {
            let path = dir.join(&name);
            let data = fs::read(&path).await?;
            output.write_all(&data).await?;
            written += data.len() as u64;
            fs::remove_file(&path).await?;
        }
        output.flush().await?;
        Ok((assembled, written))
    }

    /// Move a verified file into place, replacing whatever `destination` held
    ///
    /// Falls back to copy and delete when the staging root sits on another file system.
    pub async fn commit(assembled: &Path, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(err) = fs::rename(assembled, destination).await {
            debug!(error = %err, "Rename failed, copying into place");
            fs::copy(assembled, destination).await?;
            fs::remove_file(assembled).await?;
        }
        Ok(())
    }

    /// Remove a staging directory and whatever it still holds
    pub async fn discard(dir: &Path) {
        if let Err(err) = fs::remove_dir_all(dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(dir = %dir.display(), error = %err, "Failed to remove staging directory");
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Pace Control
// ----------------------------------------------------------------------------

/// Live chunk size and delay of a running transfer
#[derive(Debug)]
pub struct PaceControl {
    chunk_size: AtomicUsize,
    delay_ms: AtomicU64,
}

impl PaceControl {
    pub fn new(pace: Pace) -> Self {
        Self {
            chunk_size: AtomicUsize::new(pace.chunk_size),
            delay_ms: AtomicU64::new(pace.delay_ms),
        }
    }

    pub fn get(&self) -> Pace {
        Pace::new(
            self.chunk_size.load(Ordering::Acquire),
            self.delay_ms.load(Ordering::Acquire),
        )
    }

    pub fn set(&self, pace: Pace) {
        self.chunk_size.store(pace.chunk_size, Ordering::Release);
        self.delay_ms.store(pace.delay_ms, Ordering::Release);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> PathBuf {
        std::env::temp_dir().join(format!("svcmgr-transfer-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_resolve_confines_paths() {
        let root = FileRoot::new("/srv/files");
        assert_eq!(root.resolve("a/b.txt").unwrap(), PathBuf::from("/srv/files/a/b.txt"));
        assert_eq!(root.resolve("./c.txt").unwrap(), PathBuf::from("/srv/files/c.txt"));
        assert_eq!(root.resolve("").unwrap(), PathBuf::from("/srv/files"));

        for bad in ["../etc/passwd", "/etc/passwd", "a/../../b"] {
            let err = root.resolve(bad).unwrap_err();
            assert_eq!(err.code(), svcmgr_core::ErrorCode::InvalidPath, "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_staging_directories_are_private() {
        let area = StagingArea::new(scratch());
        let a = area.allocate().await.unwrap();
        let b = area.allocate().await.unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
        let _ = fs::remove_dir_all(area.root()).await;
    }

    #[tokio::test]
    async fn test_assemble_restores_sequence_order() {
        let base = scratch();
        let area = StagingArea::new(base.join("staging"));
        let dir = area.allocate().await.unwrap();

        // Written out of order; sequence 10 must sort after 9.
        for seq in [10u64, 0, 9, 1] {
            StagingArea::write_segment(&dir, seq, format!("[{}]", seq).as_bytes())
                .await
                .unwrap();
        }

        let (assembled, written) = StagingArea::assemble(&dir).await.unwrap();
        assert!(assembled.starts_with(&dir));
        let content = fs::read_to_string(&assembled).await.unwrap();
        assert_eq!(content, "[0][1][9][10]");
        assert_eq!(written, content.len() as u64);

        let destination = base.join("out/file.bin");
        StagingArea::commit(&assembled, &destination).await.unwrap();
        assert_eq!(fs::read_to_string(&destination).await.unwrap(), "[0][1][9][10]");

        let mut remaining = fs::read_dir(&dir).await.unwrap();
        assert!(remaining.next_entry().await.unwrap().is_none());

        StagingArea::discard(&dir).await;
        assert!(!dir.exists());
        StagingArea::discard(&dir).await;
        let _ = fs::remove_dir_all(&base).await;
    }

    #[tokio::test]
    async fn test_assemble_leaves_destination_until_commit() {
        let base = scratch();
        let area = StagingArea::new(base.join("staging"));
        let destination = base.join("keep.bin");
        fs::create_dir_all(&base).await.unwrap();
        fs::write(&destination, b"original").await.unwrap();

        let dir = area.allocate().await.unwrap();
        StagingArea::write_segment(&dir, 0, b"replacement").await.unwrap();
        let (assembled, _) = StagingArea::assemble(&dir).await.unwrap();
        assert_eq!(fs::read(&destination).await.unwrap(), b"original");

        StagingArea::commit(&assembled, &destination).await.unwrap();
        assert_eq!(fs::read(&destination).await.unwrap(), b"replacement");
        assert!(!assembled.exists());
        StagingArea::discard(&dir).await;
        let _ = fs::remove_dir_all(&base).await;
    }

    #[tokio::test]
    async fn test_assemble_without_segments_is_empty() {
        let area = StagingArea::new(scratch());
        let dir = area.allocate().await.unwrap();
        let (assembled, written) = StagingArea::assemble(&dir).await.unwrap();
        assert_eq!(written, 0);
        assert_eq!(fs::metadata(&assembled).await.unwrap().len(), 0);
        let _ = fs::remove_dir_all(area.root()).await;
    }

    #[test]
    fn test_pace_control_updates() {
        let pace = PaceControl::new(Pace::new(1000, 0));
        pace.set(Pace::new(250, 40));
        assert_eq!(pace.get(), Pace::new(250, 40));
    }
}

//! Storage collaborator: the removable medium files are written to.
//!
//! The write worker only uses the [`Storage`] / [`StorageFile`] capability
//! pair and never depends on a concrete storage technology. [`FsStorage`]
//! maps it onto a mounted filesystem.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::utils::get_space_info;

/// Capability interface of the storage medium
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Whether the medium is inserted and mounted
    async fn medium_present(&self) -> bool;

    /// Try to bring the medium back; returns whether it succeeded
    async fn reinit(&self) -> bool;

    /// Create or truncate the file at `path` (relative to the medium root)
    async fn open(&self, path: &Path) -> std::io::Result<Box<dyn StorageFile>>;
}

/// A file opened for writing on the medium
#[async_trait::async_trait]
pub trait StorageFile: Send {
    /// Append `bytes`, returning how many were accepted
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize>;

    /// Flush and close the file
    async fn close(self: Box<Self>) -> std::io::Result<()>;
}

/// [`Storage`] on a mounted filesystem
#[derive(Clone, Debug)]
pub struct FsStorage {
    mount_point: PathBuf,
}

impl FsStorage {
    /// Storage rooted at `mount_point`
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
        }
    }

    /// Root of the medium
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }
}

#[async_trait::async_trait]
impl Storage for FsStorage {
    async fn medium_present(&self) -> bool {
        tokio::fs::metadata(&self.mount_point)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false)
    }

    async fn reinit(&self) -> bool {
        // A hot-plugged card comes back at the same mount point; nothing to
        // re-probe beyond checking it is reachable again.
        let present = self.medium_present().await;
        tracing::debug!(mount_point = %self.mount_point.display(), present, "Re-probed storage medium");
        present
    }

    async fn open(&self, path: &Path) -> std::io::Result<Box<dyn StorageFile>> {
        let full_path = self.mount_point.join(path);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&full_path).await?;
        Ok(Box::new(FsFile { file }))
    }
}

struct FsFile {
    file: tokio::fs::File,
}

#[async_trait::async_trait]
impl StorageFile for FsFile {
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        self.file.write(bytes).await
    }

    async fn close(mut self: Box<Self>) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

const MB: u64 = 1024 * 1024;

/// Capacity report published on the storage status topic
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StorageStatus {
    /// Free space in MB
    pub free: u64,
    /// Total space in MB
    pub total: u64,
    /// Always "MB"
    pub unit: &'static str,
}

impl StorageStatus {
    /// Measure the medium mounted at `mount_point`; an absent medium reports zeros
    pub fn measure(mount_point: &Path) -> Self {
        match get_space_info(mount_point) {
            Ok(info) => Self {
                free: info.available / MB,
                total: info.total / MB,
                unit: "MB",
            },
            Err(e) => {
                tracing::warn!(mount_point = %mount_point.display(), error = %e, "Storage medium not measurable");
                Self {
                    free: 0,
                    total: 0,
                    unit: "MB",
                }
            }
        }
    }

    /// JSON payload `{"storage": {"free", "total", "unit"}}`
    pub fn to_payload(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&serde_json::json!({ "storage": self }))?)
    }
}

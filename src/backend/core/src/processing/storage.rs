//! Blob storage for source artifacts.
//!
//! Layout under the configured roots:
//!
//! - processed: `{processed_dir}/{document_id}/{name}`
//! - archive: `{archive_dir}/{document_id}/{timestamp}_{name}`
//! - temp: anything; swept by age
//!
//! [`StorageStats`] reports file counts and sizes for all four roots,
//! uploads included.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncReadExt;

use crate::config::StorageConfig;
use crate::error::{MdusError, Result};
use crate::jobs::{DocumentId, FileInfo};

/// Storage operations the processor and the maintenance tasks rely on.
#[async_trait]
pub trait DocumentStorage: Send + Sync {
    /// Metadata of the artifact at `locator`; `ArtifactMissing` if absent.
    async fn file_info(&self, locator: &str) -> Result<FileInfo>;

    /// Move a processed artifact to durable storage; returns the new path.
    async fn move_to_processed(&self, locator: &str, document_id: DocumentId) -> Result<PathBuf>;

    /// Move an artifact into the archive; returns the new path.
    async fn archive(&self, locator: &str, document_id: DocumentId) -> Result<PathBuf>;

    /// Undo [`DocumentStorage::archive`]: move `archived` back to `locator`.
    async fn restore(&self, archived: &Path, locator: &str) -> Result<()>;

    /// Delete temp files last modified more than `older_than` ago.
    async fn cleanup_temp(&self, older_than: Duration) -> Result<u64>;

    /// Delete archived files last modified more than `older_than` ago.
    async fn cleanup_archive(&self, older_than: Duration) -> Result<u64>;

    /// File counts and sizes per storage root.
    async fn storage_stats(&self) -> Result<StorageStats>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Usage Report
// ═══════════════════════════════════════════════════════════════════════════════

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GB: f64 = BYTES_PER_MB * 1024.0;

/// Usage of one storage root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryUsage {
    /// uploads, processed, temp or archive
    pub name: String,
    pub path: PathBuf,
    pub exists: bool,
    pub file_count: u64,
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
}

/// Sums over every root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageTotals {
    pub total_files: u64,
    pub total_size_bytes: u64,
    pub total_size_mb: f64,
    pub total_size_gb: f64,
}

/// Snapshot returned by [`DocumentStorage::storage_stats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub directories: Vec<DirectoryUsage>,
    pub totals: StorageTotals,
    pub timestamp: DateTime<Utc>,
}

impl StorageStats {
    fn from_directories(directories: Vec<DirectoryUsage>) -> Self {
        let total_files = directories.iter().map(|d| d.file_count).sum();
        let total_size_bytes = directories.iter().map(|d| d.total_size_bytes).sum();
        Self {
            directories,
            totals: StorageTotals {
                total_files,
                total_size_bytes,
                total_size_mb: round2(total_size_bytes as f64 / BYTES_PER_MB),
                total_size_gb: round2(total_size_bytes as f64 / BYTES_PER_GB),
            },
            timestamp: Utc::now(),
        }
    }

    pub fn directory(&self, name: &str) -> Option<&DirectoryUsage> {
        self.directories.iter().find(|d| d.name == name)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// [`DocumentStorage`] on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    upload_dir: PathBuf,
    processed_dir: PathBuf,
    temp_dir: PathBuf,
    archive_dir: PathBuf,
}

impl LocalFileStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            upload_dir: config.upload_dir.clone(),
            processed_dir: config.processed_dir.clone(),
            temp_dir: config.temp_dir.clone(),
            archive_dir: config.archive_dir.clone(),
        }
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }
}

fn missing_or_io(locator: &str, e: std::io::Error) -> MdusError {
    if e.kind() == std::io::ErrorKind::NotFound {
        MdusError::artifact_missing(locator)
    } else {
        MdusError::from(e).with_context("locator", locator)
    }
}

fn file_name_of(source: &Path) -> Result<String> {
    source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| MdusError::artifact_missing(source.display().to_string()))
}

/// Rename, falling back to copy and delete across filesystems.
async fn move_file(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(source, dest).await.is_ok() {
        return Ok(());
    }

    let locator = source.display().to_string();
    tokio::fs::copy(source, dest)
        .await
        .map_err(|e| missing_or_io(&locator, e))?;
    tokio::fs::remove_file(source)
        .await
        .map_err(|e| missing_or_io(&locator, e))?;
    Ok(())
}

/// Delete every regular file under `root` modified before `cutoff`.
///
/// A missing root counts as empty. Files that cannot be deleted are logged
/// and skipped.
async fn sweep_older_than(root: &Path, cutoff: SystemTime) -> Result<u64> {
    let mut removed = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue,
            };

            if meta.is_dir() {
                pending.push(path);
                continue;
            }

            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            if meta.is_file() && modified < cutoff {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        tracing::error!(path = %path.display(), error = %e, "Failed to delete file")
                    }
                }
            }
        }
    }

    Ok(removed)
}

/// Count and size every regular file under `root`.
async fn directory_usage(name: &str, root: &Path) -> Result<DirectoryUsage> {
    let mut usage = DirectoryUsage {
        name: name.to_string(),
        path: root.to_path_buf(),
        exists: tokio::fs::metadata(root).await.map(|m| m.is_dir()).unwrap_or(false),
        file_count: 0,
        total_size_bytes: 0,
        total_size_mb: 0.0,
    };
    if !usage.exists {
        return Ok(usage);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(meta) => meta,
                Err(_) => continue,
            };
            if meta.is_dir() {
                pending.push(entry.path());
            } else if meta.is_file() {
                usage.file_count += 1;
                usage.total_size_bytes += meta.len();
            }
        }
    }

    usage.total_size_mb = round2(usage.total_size_bytes as f64 / BYTES_PER_MB);
    Ok(usage)
}

fn cutoff(older_than: Duration) -> SystemTime {
    SystemTime::now()
        .checked_sub(older_than)
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

#[async_trait]
impl DocumentStorage for LocalFileStorage {
    async fn file_info(&self, locator: &str) -> Result<FileInfo> {
        let path = Path::new(locator);
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| missing_or_io(locator, e))?;
        if !meta.is_file() {
            return Err(MdusError::artifact_missing(locator));
        }

        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| missing_or_io(locator, e))?;
        let mut hasher = Sha256::new();
        let mut head: Vec<u8> = Vec::new();
        let mut buf = vec![0u8; 8192];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            if head.is_empty() {
                head.extend_from_slice(&buf[..n]);
            }
            hasher.update(&buf[..n]);
        }

        Ok(FileInfo {
            filename: file_name_of(path)?,
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            mime_type: infer::get(&head).map(|kind| kind.mime_type().to_string()),
            checksum: Some(hex::encode(hasher.finalize())),
        })
    }

    async fn move_to_processed(&self, locator: &str, document_id: DocumentId) -> Result<PathBuf> {
        let source = Path::new(locator);
        let dest = self
            .processed_dir
            .join(document_id.to_string())
            .join(file_name_of(source)?);

        move_file(source, &dest).await?;
        tracing::info!(document_id, path = %dest.display(), "File moved to processed");
        Ok(dest)
    }

    async fn archive(&self, locator: &str, document_id: DocumentId) -> Result<PathBuf> {
        let source = Path::new(locator);
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.6f");
        let dest = self
            .archive_dir
            .join(document_id.to_string())
            .join(format!("{}_{}", stamp, file_name_of(source)?));

        move_file(source, &dest).await?;
        tracing::info!(document_id, path = %dest.display(), "File archived");
        Ok(dest)
    }

    async fn restore(&self, archived: &Path, locator: &str) -> Result<()> {
        move_file(archived, Path::new(locator)).await?;
        tracing::info!(path = %archived.display(), locator, "Archived file restored");
        Ok(())
    }

    async fn cleanup_temp(&self, older_than: Duration) -> Result<u64> {
        let removed = sweep_older_than(&self.temp_dir, cutoff(older_than)).await?;
        tracing::info!(removed, "Cleaned up temporary files");
        Ok(removed)
    }

    async fn cleanup_archive(&self, older_than: Duration) -> Result<u64> {
        let removed = sweep_older_than(&self.archive_dir, cutoff(older_than)).await?;
        tracing::info!(removed, "Cleaned up archived files");
        Ok(removed)
    }

    async fn storage_stats(&self) -> Result<StorageStats> {
        let mut directories = Vec::with_capacity(4);
        for (name, root) in [
            ("uploads", &self.upload_dir),
            ("processed", &self.processed_dir),
            ("temp", &self.temp_dir),
            ("archive", &self.archive_dir),
        ] {
            directories.push(directory_usage(name, root).await?);
        }
        Ok(StorageStats::from_directories(directories))
    }
}

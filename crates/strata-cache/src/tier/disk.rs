//! Local disk tier for large payloads.
//!
//! Each key maps to `<cache_dir>/<sha256(key)>.cache`. A file holds an
//! 8-byte big-endian expiry (Unix milliseconds) followed by the raw payload.
//! Every write goes to its own uniquely named temporary file that is then
//! renamed into place, so a reader never observes a partial or mixed file.
//! Files past their expiry, or older than `max_age`, are deleted when read
//! and reported as a miss.

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

use super::TierError;
use crate::config::DiskConfig;

const CACHE_FILE_EXTENSION: &str = "cache";

/// Length of the expiry header preceding the payload.
const HEADER_LEN: usize = 8;

/// A payload read from disk with the time it has left to live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskHit {
    pub value: Bytes,
    pub remaining: Duration,
}

/// Filesystem-backed tier.
#[derive(Debug, Clone)]
pub struct DiskTier {
    dir: PathBuf,
    max_age: Duration,
}

impl DiskTier {
    /// Create a disk tier rooted at the configured directory.
    ///
    /// The directory is created lazily on the first write.
    pub fn new(config: &DiskConfig) -> Self {
        Self {
            dir: config.cache_dir.clone(),
            max_age: config.max_age(),
        }
    }

    /// Root directory of the tier.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file holding `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir
            .join(format!("{:x}.{}", digest, CACHE_FILE_EXTENSION))
    }

    /// Read the payload for `key`, expiring stale files.
    pub async fn get(&self, key: &str) -> Result<Option<DiskHit>, TierError> {
        let path = self.path_for(key);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or_default();
        if age > self.max_age {
            debug!(key = %key, age_secs = age.as_secs(), "Disk entry past max age");
            remove_if_present(&path).await?;
            return Ok(None);
        }

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let Some((expires_at_ms, payload)) = split_header(&data) else {
            debug!(key = %key, "Disk entry truncated, removing");
            remove_if_present(&path).await?;
            return Ok(None);
        };

        let now_ms = unix_millis(SystemTime::now());
        if now_ms >= expires_at_ms {
            debug!(key = %key, "Disk entry expired");
            remove_if_present(&path).await?;
            return Ok(None);
        }

        Ok(Some(DiskHit {
            value: Bytes::copy_from_slice(payload),
            remaining: Duration::from_millis(expires_at_ms - now_ms),
        }))
    }

    /// Write the payload for `key`, expiring after `ttl`.
    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), TierError> {
        let expires_at_ms = unix_millis(SystemTime::now()).saturating_add(ttl.as_millis() as u64);
        let mut contents = Vec::with_capacity(HEADER_LEN + value.len());
        contents.extend_from_slice(&expires_at_ms.to_be_bytes());
        contents.extend_from_slice(value);

        let dir = self.dir.clone();
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::Builder::new().suffix(".tmp").tempfile_in(&dir)?;
            tmp.write_all(&contents)?;
            tmp.persist(&path).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| TierError::Unavailable(format!("disk write task failed: {e}")))??;
        Ok(())
    }

    /// Remove the file for `key`. A missing file is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), TierError> {
        remove_if_present(&self.path_for(key)).await
    }

    /// Remove every `.cache` file in the directory.
    pub async fn clear(&self) -> Result<usize, TierError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == CACHE_FILE_EXTENSION) {
                remove_if_present(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis() as u64)
}

fn split_header(data: &[u8]) -> Option<(u64, &[u8])> {
    let (header, payload) = data.split_at_checked(HEADER_LEN)?;
    let expires_at_ms = u64::from_be_bytes(header.try_into().ok()?);
    Some((expires_at_ms, payload))
}

async fn remove_if_present(path: &Path) -> Result<(), TierError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

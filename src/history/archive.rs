//! Content-addressed audio archive.
//!
//! Finalized session audio is stored as 16-bit PCM WAV under
//! `<root>/YYYY/MM/<hash>.wav`, where the hash is the hex SHA-256 of the
//! raw f32 buffer. Identical audio maps to one file; reference counting
//! lives in the history database, not here.

use crate::error::Result;
use chrono::{DateTime, Datelike, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Hex SHA-256 of a raw f32 sample buffer (little-endian bytes).
pub fn hash_audio(samples: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for sample in samples {
        hasher.update(sample.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Audio file archive rooted at a single directory.
pub struct AudioArchive {
    root: PathBuf,
}

impl AudioArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path an object with this hash would live at, for the given date.
    fn object_path(&self, hash: &str, when: DateTime<Utc>) -> PathBuf {
        self.root
            .join(format!("{:04}", when.year()))
            .join(format!("{:02}", when.month()))
            .join(format!("{}.wav", hash))
    }

    /// Save audio under its content hash.
    ///
    /// # Arguments
    /// * `samples` - f32 mono buffer, normalized to [-1, 1]
    /// * `sample_rate` - Sample rate in Hz
    /// * `hash` - Hex SHA-256 of the buffer (from [`hash_audio`])
    ///
    /// # Returns
    /// Path to the archived WAV file.
    ///
    /// Saving is idempotent: if the object already exists the existing file
    /// is reused (deduplication).
    pub fn save(&self, samples: &[f32], sample_rate: u32, hash: &str) -> Result<PathBuf> {
        let path = self.object_path(hash, Utc::now());

        if path.exists() {
            tracing::debug!(path = %path.display(), "audio object already archived");
            return Ok(path);
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&path, spec).map_err(|e| {
            crate::error::WhisperAloudError::History {
                message: format!("failed to create archive file: {}", e),
            }
        })?;
        for &sample in samples {
            let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(value)
                .map_err(|e| crate::error::WhisperAloudError::History {
                    message: format!("failed to write archive file: {}", e),
                })?;
        }
        writer
            .finalize()
            .map_err(|e| crate::error::WhisperAloudError::History {
                message: format!("failed to finalize archive file: {}", e),
            })?;

        tracing::debug!(
            path = %path.display(),
            samples = samples.len(),
            "archived audio object"
        );
        Ok(path)
    }

    /// Delete an archived object. Returns false if the file was already
    /// gone (a deleted archive directory is not an error).
    pub fn delete(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete audio object");
            return false;
        }
        if let Some(parent) = path.parent() {
            self.cleanup_empty_dirs(parent);
        }
        true
    }

    /// Total byte size of all archived objects.
    pub fn total_size(&self) -> u64 {
        fn walk(dir: &Path, total: &mut u64) {
            let Ok(entries) = std::fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, total);
                } else if let Ok(meta) = entry.metadata() {
                    *total += meta.len();
                }
            }
        }
        let mut total = 0;
        walk(&self.root, &mut total);
        total
    }

    /// Remove empty date directories up to the archive root.
    fn cleanup_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current != self.root && current.starts_with(&self.root) {
            let empty = std::fs::read_dir(&current)
                .map(|mut it| it.next().is_none())
                .unwrap_or(false);
            if !empty {
                break;
            }
            if std::fs::remove_dir(&current).is_err() {
                break;
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
    }
}

//! Model download and installation management.
//!
//! Handles downloading Whisper models from HuggingFace, verifying their integrity,
//! and storing them in the user's cache directory.

use crate::error::{Result, WhisperAloudError};
use crate::models::catalog::{ModelInfo, get_model};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Get the directory where models are stored
/// (`~/.cache/whisper_aloud/models/`).
pub fn models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("whisper_aloud")
        .join("models")
}

/// Get the full path for a model file, or None if the name is not in the
/// catalog.
pub fn model_path(name: &str) -> Option<PathBuf> {
    let model_info = get_model(name)?;
    let filename = format!("ggml-{}.bin", model_info.name);
    Some(models_dir().join(filename))
}

/// Check if a model is installed.
pub fn is_model_installed(name: &str) -> bool {
    model_path(name).is_some_and(|p| p.exists())
}

/// Find any installed model, preferring smaller ones.
pub fn find_any_installed_model() -> Option<&'static str> {
    crate::models::catalog::list_models()
        .iter()
        .map(|m| m.name)
        .find(|name| is_model_installed(name))
}

/// Resolve a model name to its on-disk path, downloading it if necessary.
///
/// # Arguments
/// * `name` - Model name from the catalog (e.g., "base.en", "tiny")
/// * `no_download` - Fail with `ModelNotFound` instead of downloading
/// * `progress` - Whether to show a progress bar during a download
///
/// # Returns
/// PathBuf to the installed model file.
pub async fn ensure_model(name: &str, no_download: bool, progress: bool) -> Result<PathBuf> {
    if is_model_installed(name) {
        return Ok(model_path(name).expect("path exists for installed model"));
    }
    if no_download {
        return Err(WhisperAloudError::ModelNotFound {
            name: name.to_string(),
        });
    }
    download_model(name, progress).await
}

/// Download a Whisper model from the catalog.
///
/// # Arguments
/// * `name` - Model name from the catalog (e.g., "base.en", "tiny")
/// * `progress` - Whether to show a progress bar
///
/// # Returns
/// PathBuf to the downloaded model file on success.
///
/// # Errors
///
/// Returns `ModelNotFound` if the name is not in the catalog or the
/// download fails (neither cached nor downloadable), `ModelLoadFailed` on a
/// checksum mismatch, and I/O errors if the file cannot be written.
pub async fn download_model(name: &str, progress: bool) -> Result<PathBuf> {
    let model_info = get_model(name).ok_or_else(|| WhisperAloudError::ModelNotFound {
        name: name.to_string(),
    })?;

    if is_model_installed(name) {
        let path = model_path(name).expect("path should exist for installed model");
        return Ok(path);
    }

    let dir = models_dir();
    fs::create_dir_all(&dir)?;

    let output_path = model_path(name).expect("path should exist for valid model");

    if progress {
        eprintln!(
            "Downloading {} ({} MB)...",
            model_info.name, model_info.size_mb
        );
    }

    let client = reqwest::Client::new();
    let response = client.get(model_info.url).send().await.map_err(|e| {
        WhisperAloudError::ModelNotFound {
            name: format!("{} (download failed: {})", name, e),
        }
    })?;

    if !response.status().is_success() {
        return Err(WhisperAloudError::ModelNotFound {
            name: format!("{} (download failed with status {})", name, response.status()),
        });
    }

    let total_size = response.content_length().unwrap_or(0);

    let pb = if progress {
        let pb = ProgressBar::new(total_size);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                .unwrap()
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    // Download with streaming and hash calculation
    let mut hasher = Sha256::new();
    let mut stream = response.bytes_stream();
    let mut file = fs::File::create(&output_path)?;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| WhisperAloudError::ModelNotFound {
            name: format!("{} (download interrupted: {})", name, e),
        })?;

        file.write_all(&chunk)?;
        hasher.update(&chunk);

        if let Some(ref pb) = pb {
            pb.inc(chunk.len() as u64);
        }
    }

    if let Some(pb) = pb {
        pb.finish_with_message("Downloaded");
    }

    // Verify SHA-256 if the catalog carries one
    if let Some(expected) = model_info.sha256 {
        let calculated_hash = format!("{:x}", hasher.finalize());
        if calculated_hash != expected {
            // Remove corrupted file
            let _ = fs::remove_file(&output_path);
            return Err(WhisperAloudError::ModelLoadFailed {
                name: name.to_string(),
                message: format!(
                    "SHA-256 checksum mismatch. Expected: {}, got: {}",
                    expected, calculated_hash
                ),
            });
        }
        if progress {
            eprintln!("Checksum verified");
        }
    }

    if progress {
        eprintln!("Model installed to: {}", output_path.display());
    }

    Ok(output_path)
}

/// Format model information for display.
pub fn format_model_info(model: &ModelInfo) -> String {
    let status = if is_model_installed(model.name) {
        "[installed]"
    } else {
        "[not installed]"
    };
    format!("{:16} {:5} MB   {}", model.name, model.size_mb, status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_models_dir_is_valid_path() {
        let dir = models_dir();
        assert!(dir.to_string_lossy().contains("whisper_aloud"));
        assert!(dir.to_string_lossy().contains("models"));
    }

    #[test]
    fn test_model_path_for_valid_model() {
        let path = model_path("tiny.en");
        assert!(path.is_some());
        assert!(path.unwrap().to_string_lossy().contains("ggml-tiny.en.bin"));
    }

    #[test]
    fn test_model_path_for_invalid_model() {
        assert!(model_path("nonexistent").is_none());
    }

    #[test]
    fn test_is_model_installed_returns_false_for_invalid_model() {
        assert!(!is_model_installed("nonexistent_model"));
    }

    #[test]
    fn test_format_model_info_shows_name_and_size() {
        let model = get_model("tiny.en").unwrap();
        let formatted = format_model_info(model);
        assert!(formatted.contains("tiny.en"));
        assert!(formatted.contains("75"));
        assert!(formatted.contains("MB"));
        assert!(formatted.contains("installed"));
    }

    #[tokio::test]
    async fn test_ensure_model_no_download_missing_is_not_found() {
        // "large-v3" is large enough that it is never preinstalled in CI
        if is_model_installed("large-v3") {
            return;
        }
        let result = ensure_model("large-v3", true, false).await;
        assert!(matches!(
            result,
            Err(WhisperAloudError::ModelNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_ensure_model_unknown_name_is_not_found() {
        let result = ensure_model("gigantic", true, false).await;
        assert!(matches!(
            result,
            Err(WhisperAloudError::ModelNotFound { .. })
        ));
    }
}

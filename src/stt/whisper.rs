//! Whisper-based speech-to-text transcription.
//!
//! This module provides a Whisper implementation of the Transcriber trait using whisper-rs.
//! The model is loaded lazily on first use so daemon startup (and bus name
//! registration) is never blocked by a multi-second model load.
//!
//! # Feature Gate
//!
//! This module requires the `whisper` feature to be enabled and cmake to be installed.
//! To build with Whisper support:
//!
//! ```bash
//! cargo build --features whisper
//! ```

use crate::defaults;
use crate::error::{Result, WhisperAloudError};
use crate::stt::transcriber::{TranscribeOptions, Transcriber, TranscriptionResult, validate_audio};
#[cfg(feature = "whisper")]
use crate::stt::transcriber::TranscriptionSegment;
use std::path::PathBuf;

#[cfg(feature = "whisper")]
use std::sync::{Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Configuration for the Whisper transcriber.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Model name (for status reporting and errors).
    pub model: String,
    /// Path to the ggml model file.
    pub model_path: PathBuf,
    /// Compute target: "auto", "cpu" or "gpu".
    pub device: String,
    /// Number of threads for inference (None = auto-detect).
    pub threads: Option<usize>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: defaults::DEFAULT_MODEL.to_string(),
            model_path: PathBuf::new(),
            device: "auto".to_string(),
            threads: None,
        }
    }
}

/// Whisper-based transcriber implementation.
///
/// The context is created on first transcription and kept resident until
/// [`Transcriber::unload`]. With `device = "auto"`, a GPU context that fails
/// to initialize (or fails a dummy inference) falls back to CPU with a
/// warning; the failure is only reported if CPU also fails.
#[cfg(feature = "whisper")]
pub struct WhisperTranscriber {
    config: WhisperConfig,
    context: Mutex<Option<WhisperContext>>,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("config", &self.config)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Whisper-based transcriber placeholder (without the whisper feature).
///
/// This is a stub implementation that returns errors when used.
/// Enable the `whisper` feature to use real transcription.
#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperTranscriber {
    config: WhisperConfig,
}

#[cfg(feature = "whisper")]
impl WhisperTranscriber {
    /// Create the transcriber without loading the model.
    ///
    /// # Arguments
    /// * `config` - Model identity, path and compute target
    ///
    /// The model file is checked at first use, so the daemon can come up
    /// (and register its bus name) before the model is even downloaded.
    pub fn new(config: WhisperConfig) -> Self {
        // Install logging hooks to suppress whisper.cpp output (only once)
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        Self {
            config,
            context: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }

    /// Try to create a context and run a dummy inference to smoke out
    /// accelerator incompatibilities that only surface at inference time.
    fn try_load(&self, use_gpu: bool) -> std::result::Result<WhisperContext, String> {
        let mut context_params = WhisperContextParameters::default();
        context_params.use_gpu(use_gpu);

        let path = self
            .config
            .model_path
            .to_str()
            .ok_or_else(|| "Invalid UTF-8 in model path".to_string())?;

        let context =
            WhisperContext::new_with_params(path, context_params).map_err(|e| e.to_string())?;

        // Dummy inference: 100ms of silence
        let mut state = context.create_state().map_err(|e| e.to_string())?;
        let params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        let dummy = vec![0.0_f32; defaults::CHUNK_SAMPLES];
        state.full(params, &dummy).map_err(|e| e.to_string())?;

        Ok(context)
    }

    /// Load the model if not already resident.
    fn ensure_loaded(&self) -> Result<()> {
        let mut guard = self
            .context
            .lock()
            .map_err(|e| WhisperAloudError::ModelLoadFailed {
                name: self.config.model.clone(),
                message: format!("context lock poisoned: {}", e),
            })?;
        if guard.is_some() {
            return Ok(());
        }

        if !self.config.model_path.exists() {
            return Err(WhisperAloudError::ModelNotFound {
                name: self.config.model.clone(),
            });
        }

        let want_gpu = matches!(self.config.device.as_str(), "auto" | "gpu");

        let context = match self.try_load(want_gpu) {
            Ok(context) => context,
            Err(gpu_error) if self.config.device == "auto" && want_gpu => {
                tracing::warn!(
                    error = %gpu_error,
                    "GPU initialization failed, falling back to CPU"
                );
                self.try_load(false)
                    .map_err(|cpu_error| WhisperAloudError::ModelLoadFailed {
                        name: self.config.model.clone(),
                        message: format!(
                            "GPU failed ({}); CPU fallback failed ({})",
                            gpu_error, cpu_error
                        ),
                    })?
            }
            Err(message) => {
                return Err(WhisperAloudError::ModelLoadFailed {
                    name: self.config.model.clone(),
                    message,
                });
            }
        };

        tracing::info!(model = %self.config.model, "whisper model loaded");
        *guard = Some(context);
        Ok(())
    }
}

#[cfg(feature = "whisper")]
impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[f32], options: &TranscribeOptions) -> Result<TranscriptionResult> {
        validate_audio(audio)?;
        if audio.is_empty() {
            return Ok(TranscriptionResult::empty());
        }

        self.ensure_loaded()?;

        let started = std::time::Instant::now();

        let guard = self
            .context
            .lock()
            .map_err(|e| WhisperAloudError::TranscriptionFailed {
                message: format!("context lock poisoned: {}", e),
            })?;
        let context = guard
            .as_ref()
            .ok_or_else(|| WhisperAloudError::TranscriptionFailed {
                message: "model unloaded during transcription".to_string(),
            })?;

        let mut state =
            context
                .create_state()
                .map_err(|e| WhisperAloudError::TranscriptionFailed {
                    message: format!("Failed to create Whisper state: {}", e),
                })?;

        let mut params = if options.beam_size > 1 {
            FullParams::new(SamplingStrategy::BeamSearch {
                beam_size: options.beam_size as std::ffi::c_int,
                patience: -1.0,
            })
        } else {
            FullParams::new(SamplingStrategy::Greedy { best_of: 1 })
        };

        params.set_language(options.language.as_deref());
        params.set_translate(options.translate);

        if let Some(threads) = self.config.threads {
            params.set_n_threads(threads as std::ffi::c_int);
        }

        // Disable printing to stdout/stderr
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, audio)
            .map_err(|e| WhisperAloudError::TranscriptionFailed {
                message: format!("Whisper inference failed: {}", e),
            })?;

        // Detected language
        let lang_id = state.full_lang_id_from_state();
        let language = whisper_rs::get_lang_str(lang_id).unwrap_or("").to_string();

        // Per-segment text, timing and confidence. Segment confidence is
        // exp(mean(ln p_token)); the overall confidence averages the segment
        // log-probabilities before exponentiating.
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut logprob_sum = 0.0_f64;

        for segment in state.as_iter() {
            let seg_text = match segment.to_str_lossy() {
                Ok(t) => t.trim().to_string(),
                Err(_) => continue,
            };

            let mut token_logprob_sum = 0.0_f64;
            let mut token_count = 0u32;
            for i in 0..segment.n_tokens() {
                if let Some(token) = segment.get_token(i) {
                    let p = (token.token_probability() as f64).max(1e-10);
                    token_logprob_sum += p.ln();
                    token_count += 1;
                }
            }
            let avg_logprob = if token_count > 0 {
                token_logprob_sum / token_count as f64
            } else {
                f64::NEG_INFINITY
            };

            if !text.is_empty() && !seg_text.is_empty() {
                text.push(' ');
            }
            text.push_str(&seg_text);

            logprob_sum += avg_logprob.max(-23.0);
            segments.push(TranscriptionSegment {
                start: segment.start_timestamp() as f64 / 100.0,
                end: segment.end_timestamp() as f64 / 100.0,
                text: seg_text,
                confidence: avg_logprob.exp().clamp(0.0, 1.0) as f32,
            });
        }

        let confidence = if segments.is_empty() {
            0.0
        } else {
            (logprob_sum / segments.len() as f64).exp().clamp(0.0, 1.0) as f32
        };

        Ok(TranscriptionResult {
            text: text.trim().to_string(),
            language_probability: if options.language.is_some() { 1.0 } else { confidence },
            language,
            segments,
            confidence,
            duration: audio.len() as f64 / defaults::SAMPLE_RATE as f64,
            processing_time: started.elapsed().as_secs_f64(),
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn is_loaded(&self) -> bool {
        self.context.lock().map(|g| g.is_some()).unwrap_or(false)
    }

    fn unload(&self) {
        if let Ok(mut guard) = self.context.lock() {
            if guard.take().is_some() {
                tracing::info!(model = %self.config.model, "whisper model unloaded");
            }
        }
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperTranscriber {
    /// Create a new Whisper transcriber (stub implementation).
    pub fn new(config: WhisperConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(not(feature = "whisper"))]
impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[f32], _options: &TranscribeOptions) -> Result<TranscriptionResult> {
        validate_audio(audio)?;
        if audio.is_empty() {
            return Ok(TranscriptionResult::empty());
        }
        if !self.config.model_path.exists() {
            return Err(WhisperAloudError::ModelNotFound {
                name: self.config.model.clone(),
            });
        }
        Err(WhisperAloudError::ModelLoadFailed {
            name: self.config.model.clone(),
            message: "built without the 'whisper' feature".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn is_loaded(&self) -> bool {
        false
    }

    fn unload(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_file_is_model_not_found_at_use() {
        let transcriber = WhisperTranscriber::new(WhisperConfig {
            model: "base".to_string(),
            model_path: PathBuf::from("/nonexistent/ggml-base.bin"),
            ..Default::default()
        });
        assert!(!transcriber.is_loaded());

        let audio = vec![0.1_f32; 1600];
        let result = transcriber.transcribe(&audio, &TranscribeOptions::default());
        assert!(matches!(
            result,
            Err(WhisperAloudError::ModelNotFound { name }) if name == "base"
        ));
    }

    #[test]
    fn test_config_default_device_is_auto() {
        let config = WhisperConfig::default();
        assert_eq!(config.device, "auto");
        assert_eq!(config.model, "base");
        assert_eq!(config.threads, None);
    }

    #[cfg(not(feature = "whisper"))]
    #[test]
    fn test_stub_reports_feature_missing() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("ggml-base.bin");
        std::fs::write(&model_path, b"fake model").unwrap();

        let transcriber = WhisperTranscriber::new(WhisperConfig {
            model: "base".to_string(),
            model_path,
            ..Default::default()
        });

        let audio = vec![0.1_f32; 1600];
        let result = transcriber.transcribe(&audio, &TranscribeOptions::default());
        assert!(matches!(
            result,
            Err(WhisperAloudError::ModelLoadFailed { .. })
        ));
        assert!(!transcriber.is_loaded());
    }

    #[cfg(not(feature = "whisper"))]
    #[test]
    fn test_stub_empty_audio_still_returns_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("ggml-base.bin");
        std::fs::write(&model_path, b"fake model").unwrap();

        let transcriber = WhisperTranscriber::new(WhisperConfig {
            model: "base".to_string(),
            model_path,
            ..Default::default()
        });

        let result = transcriber
            .transcribe(&[], &TranscribeOptions::default())
            .unwrap();
        assert_eq!(result, TranscriptionResult::empty());
    }
}

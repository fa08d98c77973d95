use crate::defaults;
use crate::error::{Result, WhisperAloudError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One decoded segment with timing in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    pub confidence: f32,
}

/// Result of a transcription operation. Immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionResult {
    pub text: String,
    /// Detected (or forced) language code.
    pub language: String,
    pub language_probability: f32,
    pub segments: Vec<TranscriptionSegment>,
    /// Mean segment confidence, `exp(mean(avg_logprob))`; 0 with no segments.
    pub confidence: f32,
    /// Audio duration in seconds.
    pub duration: f64,
    /// Wall-clock processing time in seconds.
    pub processing_time: f64,
}

impl TranscriptionResult {
    /// Result for an empty input buffer: empty text, duration 0, no error.
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            language: String::new(),
            language_probability: 0.0,
            segments: Vec::new(),
            confidence: 0.0,
            duration: 0.0,
            processing_time: 0.0,
        }
    }
}

/// Per-call decoding options.
#[derive(Debug, Clone)]
pub struct TranscribeOptions {
    /// Language hint; None = auto-detect.
    pub language: Option<String>,
    pub beam_size: u32,
    /// Translate to English instead of transcribing.
    pub translate: bool,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            language: None,
            beam_size: 5,
            translate: false,
        }
    }
}

impl TranscribeOptions {
    /// Build options from the transcription config group.
    pub fn from_config(config: &crate::config::TranscriptionConfig) -> Self {
        let language = if config.language == defaults::AUTO_LANGUAGE {
            None
        } else {
            Some(config.language.clone())
        };
        Self {
            language,
            beam_size: config.beam_size,
            translate: config.task == "translate",
        }
    }
}

/// Trait for speech-to-text transcription.
///
/// This trait allows swapping implementations (real Whisper vs mock).
/// Input is f32 mono audio at the engine rate, samples in [-1.0, 1.0].
pub trait Transcriber: Send + Sync {
    /// Transcribe an audio buffer.
    ///
    /// # Arguments
    /// * `audio` - f32 mono samples at the engine rate, in [-1.0, 1.0]
    /// * `options` - Per-call decoding options (language hint, beam size, task)
    ///
    /// # Returns
    /// The transcription with language, segments and confidence metadata.
    /// An empty buffer yields an empty result with duration 0, not an error.
    /// The underlying model is loaded on first use.
    fn transcribe(&self, audio: &[f32], options: &TranscribeOptions) -> Result<TranscriptionResult>;

    /// Get the name of the configured model.
    fn model_name(&self) -> &str;

    /// Whether the model is currently resident in memory.
    fn is_loaded(&self) -> bool;

    /// Drop the in-memory model. The next transcription reloads it.
    fn unload(&self);
}

impl<T: Transcriber + ?Sized> Transcriber for Arc<T> {
    fn transcribe(&self, audio: &[f32], options: &TranscribeOptions) -> Result<TranscriptionResult> {
        (**self).transcribe(audio, options)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }

    fn is_loaded(&self) -> bool {
        (**self).is_loaded()
    }

    fn unload(&self) {
        (**self).unload()
    }
}

/// Reject buffers the DSP pipeline should never have produced.
pub fn validate_audio(audio: &[f32]) -> Result<()> {
    if audio.iter().any(|s| !s.is_finite()) {
        return Err(WhisperAloudError::AudioFormat {
            message: "buffer contains non-finite samples".to_string(),
        });
    }
    Ok(())
}

/// Mock transcriber for testing.
#[derive(Debug)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    language: String,
    should_fail: bool,
    delay: Option<std::time::Duration>,
    loaded: AtomicBool,
}

impl MockTranscriber {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            language: "en".to_string(),
            should_fail: false,
            delay: None,
            loaded: AtomicBool::new(false),
        }
    }

    /// Configure the mock to return a specific response.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail on transcribe.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Make transcribe block for a while (for cancellation tests).
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, audio: &[f32], options: &TranscribeOptions) -> Result<TranscriptionResult> {
        validate_audio(audio)?;
        if audio.is_empty() {
            return Ok(TranscriptionResult::empty());
        }

        self.loaded.store(true, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        if self.should_fail {
            return Err(WhisperAloudError::TranscriptionFailed {
                message: "mock transcription failure".to_string(),
            });
        }

        let duration = audio.len() as f64 / defaults::SAMPLE_RATE as f64;
        let language = options
            .language
            .clone()
            .unwrap_or_else(|| self.language.clone());
        Ok(TranscriptionResult {
            text: self.response.clone(),
            language,
            language_probability: 1.0,
            segments: vec![TranscriptionSegment {
                start: 0.0,
                end: duration,
                text: self.response.clone(),
                confidence: 0.9,
            }],
            confidence: 0.9,
            duration,
            processing_time: 0.001,
        })
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn unload(&self) {
        self.loaded.store(false, Ordering::SeqCst);
    }
}

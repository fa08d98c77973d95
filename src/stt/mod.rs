//! Speech-to-text: the `Transcriber` trait and its Whisper implementation.

pub mod transcriber;
pub mod whisper;

pub use transcriber::{
    MockTranscriber, TranscribeOptions, Transcriber, TranscriptionResult, TranscriptionSegment,
};
pub use whisper::{WhisperConfig, WhisperTranscriber};

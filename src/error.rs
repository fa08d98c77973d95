//! Error types for whisper-aloud.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WhisperAloudError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalid { key: String, message: String },

    // Audio device errors
    #[error("No microphone available")]
    NoMicrophone,

    #[error("Audio device busy: {device}")]
    DeviceBusy { device: String },

    #[error("Audio device format unsupported: {message}")]
    DeviceFormatUnsupported { message: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    // Model errors
    #[error("Model not found: {name}")]
    ModelNotFound { name: String },

    #[error("Failed to load model '{name}': {message}")]
    ModelLoadFailed { name: String, message: String },

    // Transcription errors
    #[error("Transcription failed: {message}")]
    TranscriptionFailed { message: String },

    #[error("Invalid audio format: {message}")]
    AudioFormat { message: String },

    // State errors
    #[error("Not recording")]
    NotRecording,

    #[error("Recording already in progress")]
    RecordingInProgress,

    #[error("Operation not accepted in state '{state}'")]
    InvalidState { state: String },

    // History store errors
    #[error("History store error: {message}")]
    History { message: String },

    #[error("History database error: {0}")]
    Database(#[from] sqlx::Error),

    // Control surface errors
    #[error("Bus connection error: {0}")]
    Bus(#[from] zbus::Error),

    #[error("Another instance is already running")]
    AlreadyRunning,

    // Delivery errors
    #[error("Clipboard error: {message}")]
    Clipboard { message: String },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    // Shutdown
    #[error("Shutdown requested")]
    Shutdown,

    // SIGINT/SIGTERM; mapped to exit code 130 by the CLI entry point
    #[error("Interrupted")]
    Interrupted,

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl WhisperAloudError {
    /// Stable error code published on the `Error(code, message)` signal.
    ///
    /// Codes are part of the external contract; front-ends match on them.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigParse { .. } | Self::ConfigInvalid { .. } => "config_invalid",
            Self::NoMicrophone => "no_microphone",
            Self::DeviceBusy { .. } => "device_busy",
            Self::DeviceFormatUnsupported { .. } | Self::AudioCapture { .. } => "no_microphone",
            Self::ModelNotFound { .. } => "model_not_found",
            Self::ModelLoadFailed { .. } => "model_load_failed",
            Self::TranscriptionFailed { .. } | Self::AudioFormat { .. } => "transcription_failed",
            Self::NotRecording => "not_recording",
            Self::RecordingInProgress => "recording_in_progress",
            Self::InvalidState { .. } => "invalid_state",
            Self::History { .. } | Self::Database(_) => "history_error",
            Self::Bus(_) | Self::AlreadyRunning => "bus_error",
            Self::Clipboard { .. } => "clipboard_error",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Shutdown => "shutdown",
            Self::Interrupted => "interrupted",
            Self::Io(_) | Self::Other(_) => "internal_error",
        }
    }

    /// Whether this failure should be published on the `Error` signal in
    /// addition to being returned to the caller. Pure state violations are
    /// returned only.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            Self::NotRecording | Self::RecordingInProgress | Self::InvalidState { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, WhisperAloudError>;

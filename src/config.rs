use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use crate::defaults;
use crate::error::{Result, WhisperAloudError};

/// Root configuration structure.
///
/// Serialized as JSON at `~/.config/whisper_aloud/config.json`. Missing
/// keys take defaults; unknown keys are preserved across load/save cycles
/// so newer configs survive older binaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub transcription: TranscriptionConfig,
    pub audio: AudioConfig,
    pub audio_processing: AudioProcessingConfig,
    pub clipboard: ClipboardConfig,
    pub persistence: PersistenceConfig,
    pub hotkey: HotkeyConfig,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Whisper model configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub name: String,
    /// Compute target: "auto", "cpu" or "gpu".
    pub device: String,
    pub compute_type: String,
    pub download_root: Option<PathBuf>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Transcription decoding configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Language hint ("auto" = detect).
    pub language: String,
    pub beam_size: u32,
    /// ASR task: "transcribe" or "translate".
    pub task: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Input device name (None = default device).
    pub device: Option<String>,
    /// Seconds per capture chunk.
    pub chunk_duration: f64,
    /// Trim leading/trailing silence from the finalized buffer.
    pub vad_enabled: bool,
    pub vad_threshold: f32,
    pub silence_duration: f64,
    /// Peak-normalize the finalized buffer before transcription.
    pub normalize_audio: bool,
    pub max_recording_duration: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// DSP pipeline configuration (gate -> AGC -> denoise -> limiter).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioProcessingConfig {
    pub noise_gate_enabled: bool,
    pub noise_gate_threshold_db: f32,
    pub noise_gate_attack_ms: f32,
    pub noise_gate_release_ms: f32,
    pub agc_enabled: bool,
    pub agc_target_db: f32,
    pub agc_max_gain_db: f32,
    pub agc_min_gain_db: f32,
    pub agc_attack_ms: f32,
    pub agc_release_ms: f32,
    pub agc_window_ms: f32,
    pub denoising_enabled: bool,
    pub denoising_strength: f32,
    pub limiter_enabled: bool,
    pub limiter_ceiling_db: f32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Clipboard delivery configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClipboardConfig {
    pub auto_copy: bool,
    pub auto_paste: bool,
    pub paste_delay_ms: u64,
    pub timeout_seconds: f64,
    pub fallback_to_file: bool,
    pub fallback_path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// History persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Database file (None = `~/.local/share/whisper_aloud/history.db`).
    pub db_path: Option<PathBuf>,
    pub save_audio: bool,
    /// Archive root (None = `~/.local/share/whisper_aloud/audio`).
    pub audio_archive_path: Option<PathBuf>,
    pub audio_format: String,
    pub deduplicate_audio: bool,
    pub auto_cleanup_enabled: bool,
    pub auto_cleanup_days: u32,
    pub max_entries: u32,
    /// Write history entries for empty transcriptions.
    pub save_empty: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Hotkey configuration (consumed by the external binder, carried here).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HotkeyConfig {
    pub toggle_recording: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: defaults::DEFAULT_MODEL.to_string(),
            device: "auto".to_string(),
            compute_type: "int8".to_string(),
            download_root: None,
            extra: Map::new(),
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            beam_size: 5,
            task: "transcribe".to_string(),
            extra: Map::new(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            channels: 1,
            device: None,
            chunk_duration: defaults::CHUNK_DURATION,
            vad_enabled: true,
            vad_threshold: 0.02,
            silence_duration: 1.0,
            normalize_audio: true,
            max_recording_duration: defaults::MAX_RECORDING_DURATION,
            extra: Map::new(),
        }
    }
}

impl Default for AudioProcessingConfig {
    fn default() -> Self {
        Self {
            noise_gate_enabled: true,
            noise_gate_threshold_db: defaults::GATE_THRESHOLD_DB,
            noise_gate_attack_ms: defaults::GATE_ATTACK_MS,
            noise_gate_release_ms: defaults::GATE_RELEASE_MS,
            agc_enabled: true,
            agc_target_db: defaults::AGC_TARGET_DB,
            agc_max_gain_db: defaults::AGC_MAX_GAIN_DB,
            agc_min_gain_db: defaults::AGC_MIN_GAIN_DB,
            agc_attack_ms: defaults::AGC_ATTACK_MS,
            agc_release_ms: defaults::AGC_RELEASE_MS,
            agc_window_ms: defaults::AGC_WINDOW_MS,
            denoising_enabled: true,
            denoising_strength: defaults::DENOISE_STRENGTH,
            limiter_enabled: true,
            limiter_ceiling_db: defaults::LIMITER_CEILING_DB,
            extra: Map::new(),
        }
    }
}

impl Default for ClipboardConfig {
    fn default() -> Self {
        Self {
            auto_copy: true,
            auto_paste: false,
            paste_delay_ms: 100,
            timeout_seconds: 5.0,
            fallback_to_file: true,
            fallback_path: "/tmp/whisper_aloud_clipboard.txt".to_string(),
            extra: Map::new(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            save_audio: false,
            audio_archive_path: None,
            audio_format: "wav".to_string(),
            deduplicate_audio: true,
            auto_cleanup_enabled: true,
            auto_cleanup_days: 90,
            max_entries: 10_000,
            save_empty: false,
            extra: Map::new(),
        }
    }
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            toggle_recording: "<Super>space".to_string(),
            extra: Map::new(),
        }
    }
}

/// Valid model names (must stay in sync with the model catalog).
const VALID_MODELS: &[&str] = &[
    "tiny", "tiny.en", "base", "base.en", "small", "small.en", "medium", "medium.en", "large-v3",
    "large-v3-turbo",
];

const VALID_DEVICES: &[&str] = &["auto", "cpu", "gpu"];
const VALID_COMPUTE_TYPES: &[&str] = &["int8", "float16", "float32"];
const VALID_TASKS: &[&str] = &["transcribe", "translate"];

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// Missing fields use default values. Invalid JSON is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config =
            serde_json::from_str(&contents).map_err(|e| WhisperAloudError::ConfigParse {
                message: e.to_string(),
            })?;
        Ok(config)
    }

    /// Load configuration from a file, falling back to defaults if the file
    /// doesn't exist. Invalid JSON is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(WhisperAloudError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Save configuration to a JSON file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self).map_err(|e| {
            WhisperAloudError::ConfigParse {
                message: e.to_string(),
            }
        })?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path
    /// (`~/.config/whisper_aloud/config.json`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("whisper_aloud")
            .join("config.json")
    }

    /// Apply environment variable overrides.
    ///
    /// Any scalar may be overridden by `WHISPER_ALOUD_<GROUP>_<KEY>`
    /// (e.g. `WHISPER_ALOUD_MODEL_NAME`, `WHISPER_ALOUD_AUDIO_SAMPLE_RATE`).
    /// Values are parsed according to the current type of the key.
    pub fn with_env_overrides(self) -> Result<Self> {
        let mut root = serde_json::to_value(&self).map_err(|e| WhisperAloudError::ConfigParse {
            message: e.to_string(),
        })?;

        let groups: Vec<String> = root
            .as_object()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default();

        for group in groups {
            let Some(fields) = root.get(&group).and_then(Value::as_object) else {
                continue;
            };
            let keys: Vec<String> = fields.keys().cloned().collect();
            for key in keys {
                let var = format!(
                    "WHISPER_ALOUD_{}_{}",
                    group.to_uppercase(),
                    key.to_uppercase()
                );
                let Ok(raw) = std::env::var(&var) else {
                    continue;
                };
                if raw.is_empty() {
                    continue;
                }
                let current = &root[&group][&key];
                let parsed = parse_env_value(&raw, current).ok_or_else(|| {
                    WhisperAloudError::ConfigInvalid {
                        key: format!("{}.{}", group, key),
                        message: format!("cannot parse environment override '{}'", raw),
                    }
                })?;
                root[&group][&key] = parsed;
            }
        }

        serde_json::from_value(root).map_err(|e| WhisperAloudError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: impl Into<String>) -> WhisperAloudError {
            WhisperAloudError::ConfigInvalid {
                key: key.to_string(),
                message: message.into(),
            }
        }

        if !VALID_MODELS.contains(&self.model.name.as_str()) {
            return Err(invalid(
                "model.name",
                format!("valid options: {}", VALID_MODELS.join(", ")),
            ));
        }
        if !VALID_DEVICES.contains(&self.model.device.as_str()) {
            return Err(invalid(
                "model.device",
                format!("valid options: {}", VALID_DEVICES.join(", ")),
            ));
        }
        if !VALID_COMPUTE_TYPES.contains(&self.model.compute_type.as_str()) {
            return Err(invalid(
                "model.compute_type",
                format!("valid options: {}", VALID_COMPUTE_TYPES.join(", ")),
            ));
        }
        if self.transcription.language.len() < 2 {
            return Err(invalid(
                "transcription.language",
                "must be a language code or 'auto'",
            ));
        }
        if !(1..=10).contains(&self.transcription.beam_size) {
            return Err(invalid("transcription.beam_size", "must be between 1 and 10"));
        }
        if !VALID_TASKS.contains(&self.transcription.task.as_str()) {
            return Err(invalid(
                "transcription.task",
                format!("valid options: {}", VALID_TASKS.join(", ")),
            ));
        }
        if !(8000..=48000).contains(&self.audio.sample_rate) {
            return Err(invalid(
                "audio.sample_rate",
                "must be between 8000 and 48000 Hz",
            ));
        }
        if !matches!(self.audio.channels, 1 | 2) {
            return Err(invalid("audio.channels", "must be 1 (mono) or 2 (stereo)"));
        }
        if !(0.0..1.0).contains(&self.audio.vad_threshold) || self.audio.vad_threshold == 0.0 {
            return Err(invalid(
                "audio.vad_threshold",
                "must be between 0.0 and 1.0 exclusive",
            ));
        }
        if !(0.01..=1.0).contains(&self.audio.chunk_duration) {
            return Err(invalid(
                "audio.chunk_duration",
                "must be between 0.01 and 1.0 seconds",
            ));
        }
        if self.audio.max_recording_duration <= 0.0 {
            return Err(invalid(
                "audio.max_recording_duration",
                "must be greater than 0",
            ));
        }
        let proc = &self.audio_processing;
        if !(0.0..=1.0).contains(&proc.denoising_strength) {
            return Err(invalid(
                "audio_processing.denoising_strength",
                "must be between 0.0 and 1.0",
            ));
        }
        if proc.limiter_ceiling_db > 0.0 {
            return Err(invalid(
                "audio_processing.limiter_ceiling_db",
                "must be 0 dBFS or below",
            ));
        }
        if proc.agc_min_gain_db >= proc.agc_max_gain_db {
            return Err(invalid(
                "audio_processing.agc_min_gain_db",
                "must be below agc_max_gain_db",
            ));
        }
        if self.clipboard.timeout_seconds <= 0.0 {
            return Err(invalid("clipboard.timeout_seconds", "must be greater than 0"));
        }
        if self.persistence.auto_cleanup_days == 0 {
            return Err(invalid(
                "persistence.auto_cleanup_days",
                "must be at least 1",
            ));
        }
        if self.persistence.max_entries == 0 {
            return Err(invalid("persistence.max_entries", "must be at least 1"));
        }
        Ok(())
    }

    /// Flatten the groups into `"group.key" -> Value` pairs.
    ///
    /// Used by the control surface for `GetConfig`. Preserved unknown keys
    /// flatten alongside the recognized ones.
    pub fn flatten(&self) -> Map<String, Value> {
        let mut flat = Map::new();
        let Ok(Value::Object(root)) = serde_json::to_value(self) else {
            return flat;
        };
        for (group, fields) in &root {
            let Value::Object(fields) = fields else {
                continue;
            };
            for (key, value) in fields {
                flat.insert(format!("{}.{}", group, key), value.clone());
            }
        }
        flat
    }

    /// Apply flat `"group.key" -> Value` changes, returning the merged and
    /// validated configuration. The original is untouched on error.
    pub fn apply_changes(&self, changes: &Map<String, Value>) -> Result<Config> {
        let mut root = serde_json::to_value(self).map_err(|e| WhisperAloudError::ConfigParse {
            message: e.to_string(),
        })?;

        for (flat_key, value) in changes {
            let Some((group, key)) = flat_key.split_once('.') else {
                return Err(WhisperAloudError::ConfigInvalid {
                    key: flat_key.clone(),
                    message: "expected 'group.key' form".to_string(),
                });
            };
            let known = root
                .get(group)
                .and_then(Value::as_object)
                .is_some_and(|fields| fields.contains_key(key));
            if !known {
                return Err(WhisperAloudError::ConfigInvalid {
                    key: flat_key.clone(),
                    message: "unknown configuration key".to_string(),
                });
            }
            root[group][key] = value.clone();
        }

        let merged: Config =
            serde_json::from_value(root).map_err(|e| WhisperAloudError::ConfigInvalid {
                key: "config".to_string(),
                message: e.to_string(),
            })?;
        merged.validate()?;
        Ok(merged)
    }

    /// Flat keys whose values differ between `self` and `other`.
    pub fn changed_keys(&self, other: &Config) -> Vec<String> {
        let a = self.flatten();
        let b = other.flatten();
        let mut keys: Vec<String> = a
            .iter()
            .filter(|(k, v)| b.get(*k) != Some(v))
            .map(|(k, _)| k.clone())
            .collect();
        for k in b.keys() {
            if !a.contains_key(k) {
                keys.push(k.clone());
            }
        }
        keys.sort();
        keys
    }

    /// Resolved history database path.
    pub fn db_path(&self) -> PathBuf {
        self.persistence.db_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from(".local/share"))
                .join("whisper_aloud")
                .join("history.db")
        })
    }

    /// Resolved audio archive root.
    pub fn archive_path(&self) -> PathBuf {
        self.persistence.audio_archive_path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from(".local/share"))
                .join("whisper_aloud")
                .join("audio")
        })
    }
}

/// Parse an environment override string according to the current JSON type.
fn parse_env_value(raw: &str, current: &Value) -> Option<Value> {
    match current {
        Value::Bool(_) => match raw.to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(Value::Bool(true)),
            "false" | "0" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        Value::Number(n) => {
            if n.is_u64() || n.is_i64() {
                raw.parse::<i64>().map(Value::from).ok()
            } else {
                raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64).map(Value::Number)
            }
        }
        // Optional strings/paths are null when unset; treat as string
        Value::String(_) | Value::Null => Some(Value::String(raw.to_string())),
        _ => None,
    }
}

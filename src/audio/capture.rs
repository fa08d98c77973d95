//! Real audio capture using CPAL (Cross-Platform Audio Library).
//!
//! Capture delivers fixed-duration chunks of f32 mono samples at the engine
//! rate to a bounded channel. Conversion from the device's native format
//! (channel mixing, resampling) happens here, at the capture boundary.

use crate::audio::{downmix_to_mono, resample};
use crate::config::AudioConfig;
use crate::defaults;
use crate::error::{Result, WhisperAloudError};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::Sender;
use std::sync::{Arc, Mutex};

/// Events delivered by a capture source on its audio path.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// A chunk of mono f32 samples at the engine rate. A zero-length chunk
    /// is valid (e.g. the final flush of a stopped stream).
    Chunk(Vec<f32>),
    /// A chunk contained non-finite values and was replaced by silence.
    NonFinite,
    /// The configured maximum recording duration was reached.
    MaxDurationReached,
    /// The stream failed mid-session (e.g. device disconnect).
    Error(String),
}

/// Capture parameters derived from the audio configuration.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub channels: u16,
    pub chunk_duration: f64,
    pub max_duration: f64,
}

impl From<&AudioConfig> for CaptureConfig {
    fn from(audio: &AudioConfig) -> Self {
        Self {
            device: audio.device.clone(),
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            chunk_duration: audio.chunk_duration,
            max_duration: audio.max_recording_duration,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from(&AudioConfig::default())
    }
}

/// Trait for audio capture sources.
///
/// This trait allows swapping implementations (real CPAL vs mock).
pub trait CaptureSource: Send {
    /// Start the stream.
    ///
    /// # Arguments
    /// * `events` - Bounded channel receiving chunks and capture events.
    ///   The sending side must never block; chunks are dropped when the
    ///   consumer falls behind.
    ///
    /// # Errors
    /// `NoMicrophone`, `DeviceBusy` or `DeviceFormatUnsupported` when the
    /// device cannot be opened in a usable configuration.
    fn start(&mut self, events: Sender<CaptureEvent>) -> Result<()>;

    /// Stop the stream and flush any pending partial chunk.
    fn stop(&mut self) -> Result<()>;

    /// Human-readable device identity.
    fn device_name(&self) -> String;
}

/// Factory used by the session controller to open capture per session.
pub type CaptureFactory =
    Box<dyn Fn(&CaptureConfig) -> Result<Box<dyn CaptureSource>> + Send + Sync>;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when probing audio backends. The messages are harmless but confusing to users.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Suppress noisy JACK/ALSA error messages that occur during audio backend probing.
///
/// # Safety
/// This modifies environment variables which is safe when called before spawning threads.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for GNOME/PipeWire environments.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns to filter out (not useful for voice input).
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// List all available audio input devices with filtering and recommendations.
///
/// # Returns
/// A vector of device names, with preferred devices marked with
/// "\[recommended\]". Obviously unusable devices (surround channels, HDMI,
/// etc.) are filtered out.
///
/// # Errors
/// Returns `AudioCapture` if device enumeration fails.
pub fn list_devices() -> Result<Vec<String>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.input_devices();
        (host, devices)
    });
    let _ = host; // keep host alive while iterating devices
    let devices = devices.map_err(|e| WhisperAloudError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;

    let mut device_names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }

            if is_preferred_device(&name) {
                device_names.push(format!("{} [recommended]", name));
            } else {
                device_names.push(name);
            }
        }
    }

    Ok(device_names)
}

/// Get the best default input device, preferring PipeWire/PulseAudio.
///
/// This ensures we respect the desktop's audio device selection.
fn get_best_default_device() -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        host.default_input_device()
            .ok_or(WhisperAloudError::NoMicrophone)
    })
}

/// Assembles incoming sample runs into fixed-size chunks and enforces the
/// recording duration cap. Shared between the CPAL callback and `stop()`.
struct ChunkAssembler {
    pending: Vec<f32>,
    chunk_samples: usize,
    max_samples: u64,
    total_samples: u64,
    max_reported: bool,
    events: Sender<CaptureEvent>,
}

impl ChunkAssembler {
    fn new(chunk_samples: usize, max_samples: u64, events: Sender<CaptureEvent>) -> Self {
        Self {
            pending: Vec::with_capacity(chunk_samples * 2),
            chunk_samples,
            max_samples,
            total_samples: 0,
            max_reported: false,
            events,
        }
    }

    /// Append samples and emit any completed chunks. Never blocks; chunks
    /// are dropped if the channel is full.
    fn push(&mut self, samples: &[f32]) {
        if self.max_reported {
            return;
        }
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.chunk_samples {
            let rest = self.pending.split_off(self.chunk_samples);
            let chunk = std::mem::replace(&mut self.pending, rest);
            self.emit(chunk);
            if self.max_reported {
                return;
            }
        }
    }

    /// Flush the trailing partial chunk (on stop).
    fn flush(&mut self) {
        if self.max_reported {
            return;
        }
        let chunk = std::mem::take(&mut self.pending);
        self.emit(chunk);
    }

    fn emit(&mut self, chunk: Vec<f32>) {
        let chunk = if chunk.iter().any(|s| !s.is_finite()) {
            let _ = self.events.try_send(CaptureEvent::NonFinite);
            vec![0.0; chunk.len()]
        } else {
            chunk
        };

        self.total_samples += chunk.len() as u64;
        let _ = self.events.try_send(CaptureEvent::Chunk(chunk));

        if self.total_samples >= self.max_samples {
            let _ = self.events.try_send(CaptureEvent::MaxDurationReached);
            self.max_reported = true;
        }
    }
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: We ensure that the stream is only accessed from a single thread at
/// a time through the Mutex wrapper in CpalCaptureSource. The stream methods
/// are called synchronously and don't cross thread boundaries unsafely.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Real audio capture implementation using CPAL.
///
/// Captures f32 mono at the engine rate. Tries the preferred format first
/// (f32/16kHz/mono), then i16/16kHz/mono, then falls back to the device's
/// default config with software conversion (channel mixing + resampling).
pub struct CpalCaptureSource {
    device: cpal::Device,
    config: CaptureConfig,
    stream: Arc<Mutex<Option<SendableStream>>>,
    assembler: Arc<Mutex<Option<ChunkAssembler>>>,
    callback_count: Arc<std::sync::atomic::AtomicU64>,
}

impl CpalCaptureSource {
    /// Open the configured input device.
    ///
    /// # Arguments
    /// * `config` - Capture parameters; `device` selects an input by name,
    ///   None picks the best default (preferring PipeWire/PulseAudio)
    ///
    /// # Returns
    /// A capture source ready to [`start`](CaptureSource::start).
    ///
    /// # Errors
    /// Returns `NoMicrophone` if no device is available or the named device
    /// does not exist, `AudioCapture` if enumeration fails.
    pub fn open(config: &CaptureConfig) -> Result<Self> {
        let device = with_suppressed_stderr(|| {
            let host = cpal::default_host();

            if let Some(name) = config.device.as_deref() {
                let devices = host
                    .input_devices()
                    .map_err(|e| WhisperAloudError::AudioCapture {
                        message: format!("Failed to enumerate devices: {}", e),
                    })?;

                for dev in devices {
                    if let Ok(dev_name) = dev.name()
                        && dev_name == name
                    {
                        return Ok(dev);
                    }
                }

                Err(WhisperAloudError::NoMicrophone)
            } else {
                get_best_default_device()
            }
        })?;

        Ok(Self {
            device,
            config: config.clone(),
            stream: Arc::new(Mutex::new(None)),
            assembler: Arc::new(Mutex::new(None)),
            callback_count: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        })
    }

    fn chunk_samples(&self) -> usize {
        ((defaults::SAMPLE_RATE as f64) * self.config.chunk_duration).round() as usize
    }

    fn max_samples(&self) -> u64 {
        ((defaults::SAMPLE_RATE as f64) * self.config.max_duration).round() as u64
    }

    /// Build the audio stream with the configured format.
    ///
    /// Tries in order:
    /// 1. f32/16kHz/mono — preferred, no conversion needed
    /// 2. i16/16kHz/mono — for devices that only expose integer formats
    /// 3. Device default config — native rate/channels with software conversion
    ///
    /// Step 3 handles PipeWire setups where the ALSA compatibility layer accepts
    /// non-native configs but never fires the data callback.
    fn build_stream(&self) -> Result<cpal::Stream> {
        use std::sync::atomic::Ordering;

        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(defaults::SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_events = self.current_event_sender();
        let err_callback = move |err: cpal::StreamError| {
            if let Some(tx) = &err_events {
                let _ = tx.try_send(CaptureEvent::Error(err.to_string()));
            }
        };

        // Try f32/16kHz/mono — works with PipeWire/PulseAudio which convert transparently
        let assembler = Arc::clone(&self.assembler);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut guard) = assembler.lock()
                    && let Some(asm) = guard.as_mut()
                {
                    asm.push(data);
                }
            },
            err_callback.clone(),
            None,
        ) {
            return Ok(stream);
        }

        // Try i16/16kHz/mono — for devices that only expose integer formats
        let assembler = Arc::clone(&self.assembler);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                let converted: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                if let Ok(mut guard) = assembler.lock()
                    && let Some(asm) = guard.as_mut()
                {
                    asm.push(&converted);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        // Fallback: capture at device's native config, convert in software.
        self.build_stream_native()
    }

    /// Build a stream using the device's default/native config, with software
    /// channel mixing and resampling to the engine rate.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;
        use std::sync::atomic::Ordering;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| WhisperAloudError::DeviceFormatUnsupported {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::debug!(
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "using native audio format, converting in software"
        );

        let err_events = self.current_event_sender();
        let err_callback = move |err: cpal::StreamError| {
            if let Some(tx) = &err_events {
                let _ = tx.try_send(CaptureEvent::Error(err.to_string()));
            }
        };

        let assembler = Arc::clone(&self.assembler);
        let counter = Arc::clone(&self.callback_count);

        match default_config.sample_format() {
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let converted = convert_to_engine_format(data, native_channels, native_rate);
                        if let Ok(mut guard) = assembler.lock()
                            && let Some(asm) = guard.as_mut()
                        {
                            asm.push(&converted);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| map_build_error(e, &self.device)),
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let f32_data: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                        let converted =
                            convert_to_engine_format(&f32_data, native_channels, native_rate);
                        if let Ok(mut guard) = assembler.lock()
                            && let Some(asm) = guard.as_mut()
                        {
                            asm.push(&converted);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| map_build_error(e, &self.device)),
            fmt => Err(WhisperAloudError::DeviceFormatUnsupported {
                message: format!("Unsupported native sample format: {:?}", fmt),
            }),
        }
    }

    fn current_event_sender(&self) -> Option<Sender<CaptureEvent>> {
        self.assembler
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|asm| asm.events.clone()))
    }
}

/// Mix to mono and resample to the engine rate.
fn convert_to_engine_format(samples: &[f32], channels: usize, source_rate: u32) -> Vec<f32> {
    let mono = downmix_to_mono(samples, channels);
    resample(&mono, source_rate, defaults::SAMPLE_RATE)
}

fn map_build_error(e: cpal::BuildStreamError, device: &cpal::Device) -> WhisperAloudError {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => WhisperAloudError::DeviceBusy {
            device: device.name().unwrap_or_else(|_| "unknown".to_string()),
        },
        cpal::BuildStreamError::StreamConfigNotSupported => {
            WhisperAloudError::DeviceFormatUnsupported {
                message: "requested stream config not supported".to_string(),
            }
        }
        other => WhisperAloudError::AudioCapture {
            message: format!("Failed to build input stream: {}", other),
        },
    }
}

impl CaptureSource for CpalCaptureSource {
    fn start(&mut self, events: Sender<CaptureEvent>) -> Result<()> {
        use std::sync::atomic::Ordering;

        {
            let stream_guard = self
                .stream
                .lock()
                .map_err(|e| WhisperAloudError::AudioCapture {
                    message: format!("Failed to lock stream: {}", e),
                })?;
            if stream_guard.is_some() {
                return Ok(()); // Already started
            }
        }

        {
            let mut guard = self
                .assembler
                .lock()
                .map_err(|e| WhisperAloudError::AudioCapture {
                    message: format!("Failed to lock chunk assembler: {}", e),
                })?;
            *guard = Some(ChunkAssembler::new(
                self.chunk_samples(),
                self.max_samples(),
                events,
            ));
        }

        let stream = self.build_stream()?;
        stream
            .play()
            .map_err(|e| match e {
                cpal::PlayStreamError::DeviceNotAvailable => WhisperAloudError::DeviceBusy {
                    device: self.device_name(),
                },
                other => WhisperAloudError::AudioCapture {
                    message: format!("Failed to start audio stream: {}", other),
                },
            })?;

        // Wait briefly to check if the CPAL callback actually fires.
        // Some PipeWire-ALSA setups accept non-native configs but never deliver data.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let final_stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);

            let native_stream = self.build_stream_native()?;
            native_stream
                .play()
                .map_err(|e| WhisperAloudError::AudioCapture {
                    message: format!("Failed to start native audio stream: {}", e),
                })?;
            native_stream
        } else {
            stream
        };

        let mut stream_guard = self
            .stream
            .lock()
            .map_err(|e| WhisperAloudError::AudioCapture {
                message: format!("Failed to lock stream: {}", e),
            })?;
        *stream_guard = Some(SendableStream(final_stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        {
            let mut stream_guard =
                self.stream
                    .lock()
                    .map_err(|e| WhisperAloudError::AudioCapture {
                        message: format!("Failed to lock stream: {}", e),
                    })?;
            if let Some(sendable_stream) = stream_guard.take() {
                let _ = sendable_stream.0.pause();
            }
        }

        if let Ok(mut guard) = self.assembler.lock()
            && let Some(asm) = guard.as_mut()
        {
            asm.flush();
        }
        Ok(())
    }

    fn device_name(&self) -> String {
        self.device
            .name()
            .unwrap_or_else(|_| "default".to_string())
    }
}

/// Failure mode for the mock capture source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MockFailure {
    None,
    NoMicrophone,
    DeviceBusy,
}

/// Mock capture source for testing.
///
/// Feeds preconfigured samples through the same chunk assembler as the real
/// source, so duration caps and non-finite substitution are exercised.
pub struct MockCaptureSource {
    samples: Vec<f32>,
    config: CaptureConfig,
    failure: MockFailure,
    assembler: Option<ChunkAssembler>,
}

impl MockCaptureSource {
    pub fn new(config: &CaptureConfig) -> Self {
        Self {
            samples: Vec::new(),
            config: config.clone(),
            failure: MockFailure::None,
            assembler: None,
        }
    }

    /// Samples to feed when the stream starts.
    pub fn with_samples(mut self, samples: Vec<f32>) -> Self {
        self.samples = samples;
        self
    }

    /// Configure the mock to fail on start.
    pub fn with_failure(mut self, failure: MockFailure) -> Self {
        self.failure = failure;
        self
    }
}

impl CaptureSource for MockCaptureSource {
    fn start(&mut self, events: Sender<CaptureEvent>) -> Result<()> {
        match self.failure {
            MockFailure::NoMicrophone => return Err(WhisperAloudError::NoMicrophone),
            MockFailure::DeviceBusy => {
                return Err(WhisperAloudError::DeviceBusy {
                    device: "mock".to_string(),
                });
            }
            MockFailure::None => {}
        }

        let chunk_samples =
            ((defaults::SAMPLE_RATE as f64) * self.config.chunk_duration).round() as usize;
        let max_samples = ((defaults::SAMPLE_RATE as f64) * self.config.max_duration).round() as u64;

        let mut assembler = ChunkAssembler::new(chunk_samples, max_samples, events);
        assembler.push(&std::mem::take(&mut self.samples));
        self.assembler = Some(assembler);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(asm) = self.assembler.as_mut() {
            asm.flush();
        }
        Ok(())
    }

    fn device_name(&self) -> String {
        "mock".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn test_config() -> CaptureConfig {
        CaptureConfig::default()
    }

    fn drain(rx: &crossbeam_channel::Receiver<CaptureEvent>) -> Vec<CaptureEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("HDMI Output"));
        assert!(should_filter_device("Digital Output S/PDIF"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("pipewire"));
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("pulse"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    #[test]
    fn assembler_emits_fixed_size_chunks() {
        let (tx, rx) = bounded(64);
        let mut asm = ChunkAssembler::new(1600, u64::MAX, tx);
        asm.push(&vec![0.1; 4000]);

        let events = drain(&rx);
        assert_eq!(events.len(), 2);
        for ev in &events {
            match ev {
                CaptureEvent::Chunk(chunk) => assert_eq!(chunk.len(), 1600),
                other => panic!("unexpected event {:?}", other),
            }
        }
    }

    #[test]
    fn assembler_flush_emits_partial_chunk() {
        let (tx, rx) = bounded(64);
        let mut asm = ChunkAssembler::new(1600, u64::MAX, tx);
        asm.push(&vec![0.1; 2000]);
        asm.flush();

        let events = drain(&rx);
        assert_eq!(events.len(), 2);
        match &events[1] {
            CaptureEvent::Chunk(chunk) => assert_eq!(chunk.len(), 400),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn assembler_zero_length_flush_is_valid() {
        let (tx, rx) = bounded(64);
        let mut asm = ChunkAssembler::new(1600, u64::MAX, tx);
        asm.flush();

        let events = drain(&rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], CaptureEvent::Chunk(Vec::new()));
    }

    #[test]
    fn assembler_replaces_non_finite_with_silence() {
        let (tx, rx) = bounded(64);
        let mut asm = ChunkAssembler::new(4, u64::MAX, tx);
        asm.push(&[0.1, f32::NAN, 0.2, f32::INFINITY]);

        let events = drain(&rx);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], CaptureEvent::NonFinite);
        assert_eq!(events[1], CaptureEvent::Chunk(vec![0.0; 4]));
    }

    #[test]
    fn assembler_reports_max_duration_once() {
        let (tx, rx) = bounded(64);
        // Cap at 8 samples, chunk size 4
        let mut asm = ChunkAssembler::new(4, 8, tx);
        asm.push(&vec![0.1; 20]);

        let events = drain(&rx);
        let chunks = events
            .iter()
            .filter(|e| matches!(e, CaptureEvent::Chunk(_)))
            .count();
        let max_events = events
            .iter()
            .filter(|e| matches!(e, CaptureEvent::MaxDurationReached))
            .count();
        assert_eq!(chunks, 2, "no chunks delivered past the cap");
        assert_eq!(max_events, 1);
    }

    #[test]
    fn mock_source_feeds_samples_as_chunks() {
        let (tx, rx) = bounded(64);
        let mut source = MockCaptureSource::new(&test_config()).with_samples(vec![0.3; 3200]);
        source.start(tx).unwrap();
        source.stop().unwrap();

        let events = drain(&rx);
        let total: usize = events
            .iter()
            .filter_map(|e| match e {
                CaptureEvent::Chunk(c) => Some(c.len()),
                _ => None,
            })
            .sum();
        assert_eq!(total, 3200);
    }

    #[test]
    fn mock_source_failure_modes() {
        let (tx, _rx) = bounded::<CaptureEvent>(4);
        let mut source =
            MockCaptureSource::new(&test_config()).with_failure(MockFailure::NoMicrophone);
        assert!(matches!(
            source.start(tx.clone()),
            Err(WhisperAloudError::NoMicrophone)
        ));

        let mut source =
            MockCaptureSource::new(&test_config()).with_failure(MockFailure::DeviceBusy);
        assert!(matches!(
            source.start(tx),
            Err(WhisperAloudError::DeviceBusy { .. })
        ));
    }

    #[test]
    fn capture_config_from_audio_config() {
        let audio = AudioConfig::default();
        let config = CaptureConfig::from(&audio);
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.channels, 1);
        assert!((config.chunk_duration - 0.1).abs() < f64::EPSILON);
        assert!((config.max_duration - 300.0).abs() < f64::EPSILON);
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_devices_returns_at_least_one_device() {
        let devices = list_devices();
        assert!(devices.is_ok());
        assert!(!devices.unwrap().is_empty());
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_open_with_default_device() {
        let source = CpalCaptureSource::open(&test_config());
        assert!(source.is_ok());
    }

    #[test]
    fn test_open_with_invalid_device_name() {
        let mut config = test_config();
        config.device = Some("NonExistentDevice12345".to_string());
        let source = CpalCaptureSource::open(&config);
        // No such device (or no audio subsystem at all in CI)
        assert!(source.is_err());
    }
}

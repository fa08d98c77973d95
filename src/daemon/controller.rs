//! Session controller: the single-threaded dispatcher owning the
//! record -> process -> transcribe -> deliver state machine.
//!
//! All external requests and internal events (capture chunks' levels,
//! max-duration, transcription completion) arrive on one channel and are
//! processed in arrival order, so the state machine is never observed
//! mid-transition. Audio flows on a dedicated OS thread; transcription runs
//! on the blocking pool with a generation counter so a cancelled session's
//! result is dropped instead of delivered.

use crate::audio::capture::{CaptureConfig, CaptureEvent, CaptureFactory, CaptureSource};
use crate::audio::level_meter::LevelMeter;
use crate::clipboard::Clipboard;
use crate::config::{AudioConfig, AudioProcessingConfig, Config};
use crate::defaults;
use crate::dsp::DspPipeline;
use crate::error::{Result, WhisperAloudError};
use crate::history::{HistoryEntry, HistoryStore, SearchFilters};
use crate::stt::{TranscribeOptions, Transcriber, TranscriptionResult};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Builds a transcriber for the given configuration. Loading stays lazy, so
/// construction never blocks.
pub type TranscriberFactory = Box<dyn Fn(&Config) -> Arc<dyn Transcriber> + Send + Sync>;

/// Engine states visible to external observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Recording,
    Transcribing,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Transcribing => "transcribing",
        }
    }
}

/// Metadata attached to `TranscriptionReady`.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionMeta {
    pub duration: f64,
    pub language: String,
    pub confidence: f64,
    /// History entry id, or -1 when no entry was written.
    pub entry_id: i64,
}

/// Events published to in-process subscribers and bridged to bus signals.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    RecordingStarted,
    RecordingStopped,
    TranscriptionReady { text: String, meta: TranscriptionMeta },
    LevelUpdate { level: f32 },
    StatusChanged { state: String },
    ConfigChanged { keys: Vec<String> },
    Error { code: String, message: String },
}

/// Read-only status snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub state: String,
    pub uptime_secs: f64,
    pub version: String,
    pub model: String,
    pub device: String,
    pub language: String,
    pub model_loaded: bool,
    pub audio_device: String,
}

/// External control requests.
pub enum Command {
    Start {
        reply: oneshot::Sender<Result<()>>,
    },
    /// With `wait`, the reply is deferred until transcription completes and
    /// carries the text; otherwise it resolves immediately.
    Stop {
        wait: bool,
        reply: oneshot::Sender<Result<String>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<()>>,
    },
    Toggle {
        reply: oneshot::Sender<Result<String>>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
    GetConfig {
        reply: oneshot::Sender<Config>,
    },
    SetConfig {
        changes: Map<String, Value>,
        reply: oneshot::Sender<Result<()>>,
    },
    ReloadConfig {
        reply: oneshot::Sender<Result<()>>,
    },
    GetHistory {
        limit: u32,
        reply: oneshot::Sender<Result<Vec<HistoryEntry>>>,
    },
    SearchHistory {
        query: String,
        limit: u32,
        reply: oneshot::Sender<Result<Vec<HistoryEntry>>>,
    },
    GetFavorites {
        limit: u32,
        reply: oneshot::Sender<Result<Vec<HistoryEntry>>>,
    },
    ToggleFavorite {
        id: i64,
        reply: oneshot::Sender<Result<bool>>,
    },
    DeleteEntry {
        id: i64,
        reply: oneshot::Sender<Result<bool>>,
    },
    Quit {
        reply: oneshot::Sender<()>,
    },
}

/// Events posted back to the dispatcher by worker threads.
enum Internal {
    Level { generation: u64, peak: f32 },
    MaxDuration { generation: u64 },
    CaptureError { generation: u64, message: String },
    TranscriptionDone {
        generation: u64,
        result: Result<TranscriptionResult>,
        audio: Vec<f32>,
    },
}

/// Everything the dispatcher consumes.
pub enum Msg {
    Command(Command),
    Internal(Internal),
}

impl Msg {
    fn internal(event: Internal) -> Self {
        Self::Internal(event)
    }
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Quit,
}

/// Cloneable handle for driving the controller from other tasks.
#[derive(Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<Msg>,
    events: broadcast::Sender<EngineEvent>,
}

impl ControllerHandle {
    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(Msg::Command(command))
            .await
            .map_err(|_| dispatcher_gone())
    }

    pub async fn start(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Start { reply: tx }).await?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    /// Stop recording and wait for the transcription.
    ///
    /// # Returns
    /// The transcribed text once the model call and the history write have
    /// completed, or the failure that ended the session.
    pub async fn stop(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stop {
            wait: true,
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    /// Stop without waiting; clients follow `TranscriptionReady`.
    pub async fn stop_nowait(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stop {
            wait: false,
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    pub async fn cancel(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Cancel { reply: tx }).await?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    pub async fn toggle(&self) -> Result<String> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Toggle { reply: tx }).await?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Status { reply: tx }).await?;
        rx.await.map_err(|_| dispatcher_gone())
    }

    pub async fn get_config(&self) -> Result<Config> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::GetConfig { reply: tx }).await?;
        rx.await.map_err(|_| dispatcher_gone())
    }

    pub async fn set_config(&self, changes: Map<String, Value>) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SetConfig { changes, reply: tx }).await?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    pub async fn reload_config(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ReloadConfig { reply: tx }).await?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    pub async fn get_history(&self, limit: u32) -> Result<Vec<HistoryEntry>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::GetHistory { limit, reply: tx }).await?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    pub async fn search_history(&self, query: String, limit: u32) -> Result<Vec<HistoryEntry>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SearchHistory {
            query,
            limit,
            reply: tx,
        })
        .await?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    pub async fn get_favorites(&self, limit: u32) -> Result<Vec<HistoryEntry>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::GetFavorites { limit, reply: tx }).await?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    pub async fn toggle_favorite(&self, id: i64) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ToggleFavorite { id, reply: tx }).await?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    pub async fn delete_entry(&self, id: i64) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::DeleteEntry { id, reply: tx }).await?;
        rx.await.map_err(|_| dispatcher_gone())?
    }

    pub async fn quit(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Quit { reply: tx }).await?;
        rx.await.map_err(|_| dispatcher_gone())
    }
}

fn dispatcher_gone() -> WhisperAloudError {
    WhisperAloudError::Other("dispatcher stopped".to_string())
}

/// One active recording session.
struct Session {
    device: String,
    capture: Box<dyn CaptureSource>,
    worker: std::thread::JoinHandle<Vec<f32>>,
}

pub struct Controller {
    config: Config,
    config_path: PathBuf,
    store: Arc<HistoryStore>,
    clipboard: Arc<dyn Clipboard>,
    capture_factory: CaptureFactory,
    transcriber_factory: TranscriberFactory,
    transcriber: Arc<dyn Transcriber>,
    events: broadcast::Sender<EngineEvent>,
    inbox_tx: mpsc::Sender<Msg>,

    state: EngineState,
    session: Option<Session>,
    session_id: String,
    /// Bumped for every new session and every cancel; stale internal events
    /// carry an older generation and are dropped.
    generation: u64,
    pending_stop: Option<oneshot::Sender<Result<String>>>,
    peak_level: f32,
    level_dirty: bool,
    started_at: Instant,
    boot_id: u64,
}

impl Controller {
    /// Create a controller and its communication endpoints.
    ///
    /// # Arguments
    /// * `config` - Validated configuration snapshot the engine starts with
    /// * `config_path` - File the snapshot was loaded from (reload/save target)
    /// * `store` - Opened history store (shared with maintenance tasks)
    /// * `clipboard` - Delivery backend for finished transcriptions
    /// * `capture_factory` - Opens a capture source per session
    /// * `transcriber_factory` - Builds a (lazy) transcriber for a config
    ///
    /// # Returns
    /// The controller itself, a cloneable handle for driving it, and the
    /// inbox receiver to pass to [`Controller::run`].
    pub fn new(
        config: Config,
        config_path: PathBuf,
        store: Arc<HistoryStore>,
        clipboard: Arc<dyn Clipboard>,
        capture_factory: CaptureFactory,
        transcriber_factory: TranscriberFactory,
    ) -> (Self, ControllerHandle, mpsc::Receiver<Msg>) {
        let (tx, rx) = mpsc::channel(256);
        let (events, _) = broadcast::channel(256);
        let transcriber = transcriber_factory(&config);
        let boot_id = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let handle = ControllerHandle {
            tx: tx.clone(),
            events: events.clone(),
        };

        let controller = Self {
            config,
            config_path,
            store,
            clipboard,
            capture_factory,
            transcriber_factory,
            transcriber,
            events,
            inbox_tx: tx,
            state: EngineState::Idle,
            session: None,
            session_id: String::new(),
            generation: 0,
            pending_stop: None,
            peak_level: 0.0,
            level_dirty: false,
            started_at: Instant::now(),
            boot_id,
        };

        (controller, handle, rx)
    }

    /// Run the dispatcher until `Quit`.
    pub async fn run(mut self, mut inbox: mpsc::Receiver<Msg>) {
        let mut level_interval = tokio::time::interval(std::time::Duration::from_millis(
            defaults::LEVEL_EMIT_INTERVAL_MS,
        ));
        level_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = inbox.recv() => {
                    match msg {
                        Some(msg) => {
                            if self.handle_msg(msg).await == Flow::Quit {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = level_interval.tick() => self.emit_level(),
            }
        }

        self.transcriber.unload();
        tracing::info!("dispatcher stopped");
    }

    fn publish(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_status(&self, state: &str) {
        self.publish(EngineEvent::StatusChanged {
            state: state.to_string(),
        });
    }

    /// Publish `Error` for user-visible failures (state violations are
    /// returned to the caller only).
    fn publish_error(&self, error: &WhisperAloudError) {
        if error.is_user_visible() {
            self.publish(EngineEvent::Error {
                code: error.code().to_string(),
                message: error.to_string(),
            });
        }
    }

    /// Throttled level emission: at most one `LevelUpdate` per interval,
    /// carrying the aggregated peak of all chunks since the last one.
    fn emit_level(&mut self) {
        if self.state == EngineState::Recording && self.level_dirty {
            let level = self.peak_level.clamp(0.0, 1.0);
            self.peak_level = 0.0;
            self.level_dirty = false;
            self.publish(EngineEvent::LevelUpdate { level });
        }
    }

    async fn handle_msg(&mut self, msg: Msg) -> Flow {
        match msg {
            Msg::Command(command) => self.handle_command(command).await,
            Msg::Internal(event) => {
                self.handle_internal(event).await;
                Flow::Continue
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Start { reply } => {
                let result = self.handle_start();
                if let Err(e) = &result {
                    self.publish_error(e);
                }
                let _ = reply.send(result);
            }
            Command::Stop { wait, reply } => self.handle_stop(wait, reply),
            Command::Cancel { reply } => {
                self.handle_cancel();
                let _ = reply.send(Ok(()));
            }
            Command::Toggle { reply } => self.handle_toggle(reply),
            Command::Status { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::GetConfig { reply } => {
                let _ = reply.send(self.config.clone());
            }
            Command::SetConfig { changes, reply } => {
                let result = self.handle_set_config(&changes);
                if let Err(e) = &result {
                    self.publish_error(e);
                }
                let _ = reply.send(result);
            }
            Command::ReloadConfig { reply } => {
                let result = self.handle_reload_config();
                if let Err(e) = &result {
                    self.publish_error(e);
                }
                let _ = reply.send(result);
            }
            Command::GetHistory { limit, reply } => {
                let _ = reply.send(self.store.list_recent(limit).await);
            }
            Command::SearchHistory {
                query,
                limit,
                reply,
            } => {
                let _ = reply.send(
                    self.store
                        .search(&query, &SearchFilters::default(), limit, 0)
                        .await,
                );
            }
            Command::GetFavorites { limit, reply } => {
                let filters = SearchFilters {
                    favorites_only: true,
                    ..Default::default()
                };
                let _ = reply.send(self.store.search("", &filters, limit, 0).await);
            }
            Command::ToggleFavorite { id, reply } => {
                let _ = reply.send(self.store.toggle_favorite(id).await);
            }
            Command::DeleteEntry { id, reply } => {
                let _ = reply.send(self.store.delete(id).await);
            }
            Command::Quit { reply } => {
                self.handle_quit().await;
                let _ = reply.send(());
                return Flow::Quit;
            }
        }
        Flow::Continue
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Level { generation, peak } => {
                if generation == self.generation && self.state == EngineState::Recording {
                    self.peak_level = self.peak_level.max(peak);
                    self.level_dirty = true;
                }
            }
            Internal::MaxDuration { generation } => {
                if generation == self.generation && self.state == EngineState::Recording {
                    tracing::info!("max recording duration reached, stopping");
                    self.initiate_stop();
                }
            }
            Internal::CaptureError {
                generation,
                message,
            } => {
                if generation != self.generation || self.state != EngineState::Recording {
                    return;
                }
                tracing::warn!(error = %message, "capture failed mid-session");
                self.publish(EngineEvent::Error {
                    code: "no_microphone".to_string(),
                    message,
                });
                // Salvage what was captured so far
                self.initiate_stop();
            }
            Internal::TranscriptionDone {
                generation,
                result,
                audio,
            } => {
                if generation != self.generation || self.state != EngineState::Transcribing {
                    // Cancelled session; drop the result without emitting
                    tracing::debug!("dropping stale transcription result");
                    return;
                }
                self.finish_transcription(result, audio).await;
            }
        }
    }

    /// Open capture and begin a new session.
    ///
    /// # Returns
    /// Ok once the stream is running and `RecordingStarted` has been
    /// published.
    ///
    /// # Errors
    /// `RecordingInProgress` outside idle; device errors (`NoMicrophone`,
    /// `DeviceBusy`, ...) from the capture factory, with no partial session
    /// left behind.
    fn handle_start(&mut self) -> Result<()> {
        if self.state != EngineState::Idle {
            return Err(WhisperAloudError::RecordingInProgress);
        }

        let capture_config = CaptureConfig::from(&self.config.audio);
        let mut capture = (self.capture_factory)(&capture_config)?;

        let (chunk_tx, chunk_rx) = crossbeam_channel::bounded::<CaptureEvent>(256);
        capture.start(chunk_tx)?;
        let device = capture.device_name();

        self.generation += 1;
        let generation = self.generation;
        self.session_id = format!("{}-{}", self.boot_id, generation);

        let proc_config = self.config.audio_processing.clone();
        let inbox = self.inbox_tx.clone();
        let worker = std::thread::Builder::new()
            .name("wa-audio".to_string())
            .spawn(move || audio_thread(chunk_rx, proc_config, inbox, generation))
            .map_err(|e| WhisperAloudError::AudioCapture {
                message: format!("failed to spawn audio thread: {}", e),
            })?;

        self.session = Some(Session {
            device: device.clone(),
            capture,
            worker,
        });
        self.state = EngineState::Recording;
        self.peak_level = 0.0;
        self.level_dirty = false;

        tracing::info!(session = %self.session_id, device = %device, "recording started");
        self.publish(EngineEvent::RecordingStarted);
        self.publish_status("recording");
        Ok(())
    }

    fn handle_stop(&mut self, wait: bool, reply: oneshot::Sender<Result<String>>) {
        if self.state != EngineState::Recording {
            let _ = reply.send(Err(WhisperAloudError::NotRecording));
            return;
        }

        self.initiate_stop();

        if wait {
            self.pending_stop = Some(reply);
        } else {
            let _ = reply.send(Ok("transcribing".to_string()));
        }
    }

    /// Close capture, hand the buffer to the transcription worker and move
    /// to `transcribing`. Used by `stop`, max-duration and device failure.
    fn initiate_stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let Session {
            mut capture,
            worker,
            ..
        } = session;

        // Flush the partial chunk, then drop the source so the audio thread
        // drains the channel and exits
        let _ = capture.stop();
        drop(capture);

        self.state = EngineState::Transcribing;
        self.publish(EngineEvent::RecordingStopped);
        self.publish_status("transcribing");

        let generation = self.generation;
        let transcriber = Arc::clone(&self.transcriber);
        let options = TranscribeOptions::from_config(&self.config.transcription);
        let audio_config = self.config.audio.clone();
        let inbox = self.inbox_tx.clone();

        // Single-slot transcription worker on the blocking pool
        tokio::task::spawn_blocking(move || {
            let buffer = worker.join().unwrap_or_default();
            let buffer = finalize_buffer(buffer, &audio_config);
            let result = transcriber.transcribe(&buffer, &options);
            let _ = inbox.blocking_send(Msg::internal(Internal::TranscriptionDone {
                generation,
                result,
                audio: buffer,
            }));
        });
    }

    async fn finish_transcription(&mut self, result: Result<TranscriptionResult>, audio: Vec<f32>) {
        self.state = EngineState::Idle;

        match result {
            Ok(result) => {
                let text_empty = result.text.trim().is_empty();
                let mut entry_id = -1i64;

                if !text_empty || self.config.persistence.save_empty {
                    let keep_audio = self.config.persistence.save_audio && !audio.is_empty();
                    let audio_ref = keep_audio.then_some(audio.as_slice());
                    match self
                        .store
                        .add(
                            &result,
                            &self.config.model.name,
                            audio_ref,
                            defaults::SAMPLE_RATE,
                            &self.session_id,
                        )
                        .await
                    {
                        Ok(entry) => entry_id = entry.id,
                        Err(e) => {
                            tracing::error!(error = %e, "failed to write history entry");
                            self.publish_error(&e);
                        }
                    }
                }

                if self.config.clipboard.auto_copy && !text_empty {
                    let clipboard = Arc::clone(&self.clipboard);
                    let text = result.text.clone();
                    let paste = self.config.clipboard.auto_paste;
                    tokio::task::spawn_blocking(move || {
                        if let Err(e) = clipboard.copy(&text) {
                            tracing::warn!(error = %e, "clipboard copy failed");
                        } else if paste
                            && let Err(e) = clipboard.paste()
                        {
                            tracing::warn!(error = %e, "paste simulation failed");
                        }
                    });
                }

                let meta = TranscriptionMeta {
                    duration: result.duration,
                    language: result.language.clone(),
                    confidence: result.confidence as f64,
                    entry_id,
                };

                tracing::info!(
                    session = %self.session_id,
                    duration = result.duration,
                    confidence = result.confidence,
                    "transcription complete"
                );

                self.publish_status("idle");
                self.publish(EngineEvent::TranscriptionReady {
                    text: result.text.clone(),
                    meta,
                });

                if let Some(reply) = self.pending_stop.take() {
                    let _ = reply.send(Ok(result.text));
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "transcription failed");
                self.publish_status("idle");
                self.publish_error(&e);
                if let Some(reply) = self.pending_stop.take() {
                    let _ = reply.send(Err(e));
                }
            }
        }
    }

    fn handle_cancel(&mut self) {
        match self.state {
            EngineState::Recording => {
                if let Some(session) = self.session.take() {
                    let Session { mut capture, .. } = session;
                    let _ = capture.stop();
                    // Dropping the capture disconnects the audio thread; its
                    // buffer is discarded with the detached join handle
                }
                self.generation += 1;
                self.state = EngineState::Idle;
                tracing::info!("recording cancelled");
                self.publish_status("idle");
            }
            EngineState::Transcribing => {
                // The in-flight model call may complete; its result is
                // dropped by the generation check
                self.generation += 1;
                if let Some(reply) = self.pending_stop.take() {
                    let _ = reply.send(Err(WhisperAloudError::Other(
                        "transcription cancelled".to_string(),
                    )));
                }
                self.state = EngineState::Idle;
                tracing::info!("transcription cancelled");
                self.publish_status("idle");
            }
            EngineState::Idle => {}
        }
    }

    fn handle_toggle(&mut self, reply: oneshot::Sender<Result<String>>) {
        match self.state {
            EngineState::Idle => {
                let result = self.handle_start();
                if let Err(e) = &result {
                    self.publish_error(e);
                }
                let _ = reply.send(result.map(|_| "recording".to_string()));
            }
            EngineState::Recording => self.handle_stop(false, reply),
            EngineState::Transcribing => {
                let _ = reply.send(Err(WhisperAloudError::NotRecording));
            }
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        let audio_device = self
            .session
            .as_ref()
            .map(|s| s.device.clone())
            .or_else(|| self.config.audio.device.clone())
            .unwrap_or_else(|| "default".to_string());

        StatusSnapshot {
            state: self.state.as_str().to_string(),
            uptime_secs: self.started_at.elapsed().as_secs_f64(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            model: self.config.model.name.clone(),
            device: self.config.model.device.clone(),
            language: self.config.transcription.language.clone(),
            model_loaded: self.transcriber.is_loaded(),
            audio_device,
        }
    }

    fn handle_set_config(&mut self, changes: &Map<String, Value>) -> Result<()> {
        if self.state != EngineState::Idle {
            return Err(WhisperAloudError::InvalidState {
                state: self.state.as_str().to_string(),
            });
        }

        let merged = self.config.apply_changes(changes)?;
        let keys = self.config.changed_keys(&merged);
        self.apply_config(merged, keys.clone());

        // Persist so the running state and the file agree
        if let Err(e) = self.config.save(&self.config_path) {
            tracing::warn!(error = %e, "failed to persist configuration");
        }
        Ok(())
    }

    fn handle_reload_config(&mut self) -> Result<()> {
        if self.state != EngineState::Idle {
            return Err(WhisperAloudError::InvalidState {
                state: self.state.as_str().to_string(),
            });
        }

        let reloaded = Config::load_or_default(&self.config_path)?.with_env_overrides()?;
        reloaded.validate()?;
        let keys = self.config.changed_keys(&reloaded);
        self.apply_config(reloaded, keys);
        Ok(())
    }

    /// Swap the configuration snapshot (idle boundary only) and rebuild the
    /// transcriber when the model group changed.
    fn apply_config(&mut self, merged: Config, keys: Vec<String>) {
        let model_changed = keys.iter().any(|k| k.starts_with("model."));
        self.config = merged;

        if model_changed {
            self.transcriber.unload();
            self.transcriber = (self.transcriber_factory)(&self.config);
            tracing::info!(model = %self.config.model.name, "transcriber rebuilt");
        }

        if !keys.is_empty() {
            tracing::info!(keys = ?keys, "configuration changed");
        }
        self.publish(EngineEvent::ConfigChanged { keys });
    }

    /// Graceful shutdown: close any active session; with `save_audio` the
    /// captured buffer is archived as a text-less entry so nothing is lost.
    async fn handle_quit(&mut self) {
        if self.state == EngineState::Recording
            && let Some(session) = self.session.take()
        {
            let Session {
                mut capture,
                worker,
                ..
            } = session;
            let _ = capture.stop();
            drop(capture);
            self.generation += 1;

            // Join on the blocking pool, like initiate_stop, so a slow audio
            // thread can't stall the dispatcher during shutdown
            let buffer = tokio::task::spawn_blocking(move || worker.join().unwrap_or_default())
                .await
                .unwrap_or_default();
            if self.config.persistence.save_audio && !buffer.is_empty() {
                let placeholder = TranscriptionResult {
                    duration: buffer.len() as f64 / defaults::SAMPLE_RATE as f64,
                    ..TranscriptionResult::empty()
                };
                match self
                    .store
                    .add(
                        &placeholder,
                        &self.config.model.name,
                        Some(&buffer),
                        defaults::SAMPLE_RATE,
                        &self.session_id,
                    )
                    .await
                {
                    Ok(entry) => {
                        let _ = self.store.set_notes(entry.id, "shutdown").await;
                        tracing::info!(entry = entry.id, "flushed recording to history on shutdown");
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to flush recording on shutdown"),
                }
            }
        }

        if self.state == EngineState::Transcribing {
            self.generation += 1;
            if let Some(reply) = self.pending_stop.take() {
                let _ = reply.send(Err(WhisperAloudError::Shutdown));
            }
        }

        self.state = EngineState::Idle;
        self.publish_status("shutdown");
        tracing::info!("shutdown requested");
    }
}

/// Audio thread: drains capture events, runs the DSP chain, accumulates the
/// post-pipeline buffer and reports levels. Exits (returning the buffer)
/// when the capture source is dropped.
fn audio_thread(
    rx: crossbeam_channel::Receiver<CaptureEvent>,
    config: AudioProcessingConfig,
    inbox: mpsc::Sender<Msg>,
    generation: u64,
) -> Vec<f32> {
    let mut pipeline = DspPipeline::new(&config, defaults::SAMPLE_RATE);
    let mut meter = LevelMeter::default();
    let mut buffer: Vec<f32> = Vec::new();

    while let Ok(event) = rx.recv() {
        match event {
            CaptureEvent::Chunk(mut chunk) => {
                pipeline.process(&mut chunk);
                let level = meter.calculate(&chunk);
                // Levels are droppable; never block the audio path for them
                let _ = inbox.try_send(Msg::internal(Internal::Level {
                    generation,
                    peak: level.peak,
                }));
                buffer.extend_from_slice(&chunk);
            }
            CaptureEvent::NonFinite => {
                tracing::warn!("non-finite capture chunk replaced with silence");
            }
            CaptureEvent::MaxDurationReached => {
                let _ = inbox.blocking_send(Msg::internal(Internal::MaxDuration { generation }));
            }
            CaptureEvent::Error(message) => {
                let _ = inbox.blocking_send(Msg::internal(Internal::CaptureError {
                    generation,
                    message,
                }));
            }
        }
    }

    buffer
}

/// Post-capture conditioning of the finalized buffer: optional silence trim
/// and peak normalization before the transcriber sees it.
fn finalize_buffer(mut buffer: Vec<f32>, config: &AudioConfig) -> Vec<f32> {
    if buffer.is_empty() {
        return buffer;
    }
    if config.vad_enabled {
        buffer = crate::audio::trim_silence(&buffer, defaults::SAMPLE_RATE, config.vad_threshold);
    }
    if config.normalize_audio {
        crate::audio::normalize(&mut buffer, 0.95);
    }
    buffer
}

//! Published `org.fede.whisperaloud.Control` interface.
//!
//! Methods forward to the session controller through its handle; engine
//! events are bridged to D-Bus signals by a forwarder task. Claiming the
//! well-known name doubles as the single-instance lock.

use crate::daemon::controller::{ControllerHandle, EngineEvent};
use crate::dbus::{BUS_NAME, OBJECT_PATH, entry_to_dict, json_to_variant, variant_to_json};
use crate::error::{Result, WhisperAloudError};
use crate::history::HistoryEntry;
use std::collections::HashMap;
use tokio::sync::broadcast;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::OwnedValue;
use zbus::{fdo, interface};

/// The served control interface.
pub struct Control {
    handle: ControllerHandle,
}

fn to_fdo(e: WhisperAloudError) -> fdo::Error {
    fdo::Error::Failed(format!("{}: {}", e.code(), e))
}

fn entries_to_dicts(entries: Vec<HistoryEntry>) -> Vec<HashMap<String, OwnedValue>> {
    entries.iter().map(entry_to_dict).collect()
}

#[interface(name = "org.fede.whisperaloud.Control")]
impl Control {
    async fn start_recording(&self) -> fdo::Result<bool> {
        self.handle.start().await.map(|_| true).map_err(to_fdo)
    }

    /// Blocks the caller until the transcription is ready and returns its
    /// text. Non-blocking clients use `ToggleRecording` and follow the
    /// `TranscriptionReady` signal instead.
    async fn stop_recording(&self) -> fdo::Result<String> {
        self.handle.stop().await.map_err(to_fdo)
    }

    async fn toggle_recording(&self) -> fdo::Result<String> {
        self.handle.toggle().await.map_err(to_fdo)
    }

    async fn cancel_recording(&self) -> fdo::Result<bool> {
        self.handle.cancel().await.map(|_| true).map_err(to_fdo)
    }

    async fn get_status(&self) -> fdo::Result<HashMap<String, OwnedValue>> {
        let status = self.handle.status().await.map_err(to_fdo)?;
        let mut dict = HashMap::new();
        dict.insert("state".to_string(), json_to_variant(&status.state.into()));
        dict.insert(
            "uptime".to_string(),
            json_to_variant(&status.uptime_secs.into()),
        );
        dict.insert(
            "version".to_string(),
            json_to_variant(&status.version.into()),
        );
        dict.insert("model".to_string(), json_to_variant(&status.model.into()));
        dict.insert("device".to_string(), json_to_variant(&status.device.into()));
        dict.insert(
            "language".to_string(),
            json_to_variant(&status.language.into()),
        );
        dict.insert(
            "model_loaded".to_string(),
            json_to_variant(&status.model_loaded.into()),
        );
        dict.insert(
            "audio_device".to_string(),
            json_to_variant(&status.audio_device.into()),
        );
        Ok(dict)
    }

    async fn get_history(&self, limit: u32) -> fdo::Result<Vec<HashMap<String, OwnedValue>>> {
        let entries = self
            .handle
            .get_history(limit.max(1))
            .await
            .map_err(to_fdo)?;
        Ok(entries_to_dicts(entries))
    }

    async fn search_history(
        &self,
        query: String,
        limit: u32,
    ) -> fdo::Result<Vec<HashMap<String, OwnedValue>>> {
        let entries = self
            .handle
            .search_history(query, limit.max(1))
            .await
            .map_err(to_fdo)?;
        Ok(entries_to_dicts(entries))
    }

    async fn get_favorite_history(
        &self,
        limit: u32,
    ) -> fdo::Result<Vec<HashMap<String, OwnedValue>>> {
        let entries = self
            .handle
            .get_favorites(limit.max(1))
            .await
            .map_err(to_fdo)?;
        Ok(entries_to_dicts(entries))
    }

    async fn toggle_history_favorite(&self, entry_id: i32) -> fdo::Result<bool> {
        self.handle
            .toggle_favorite(entry_id as i64)
            .await
            .map_err(to_fdo)
    }

    async fn delete_history_entry(&self, entry_id: i32) -> fdo::Result<bool> {
        self.handle
            .delete_entry(entry_id as i64)
            .await
            .map_err(to_fdo)
    }

    async fn get_config(&self) -> fdo::Result<HashMap<String, OwnedValue>> {
        let config = self.handle.get_config().await.map_err(to_fdo)?;
        Ok(config
            .flatten()
            .iter()
            .map(|(key, value)| (key.clone(), json_to_variant(value)))
            .collect())
    }

    async fn set_config(&self, changes: HashMap<String, OwnedValue>) -> fdo::Result<bool> {
        let changes = changes
            .iter()
            .map(|(key, value)| (key.clone(), variant_to_json(value)))
            .collect();
        self.handle.set_config(changes).await.map(|_| true).map_err(to_fdo)
    }

    async fn reload_config(&self) -> fdo::Result<bool> {
        self.handle.reload_config().await.map(|_| true).map_err(to_fdo)
    }

    async fn quit(&self) -> fdo::Result<bool> {
        self.handle.quit().await.map(|_| true).map_err(to_fdo)
    }

    #[zbus(signal)]
    async fn recording_started(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn recording_stopped(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn transcription_ready(
        emitter: &SignalEmitter<'_>,
        text: &str,
        meta: HashMap<String, OwnedValue>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn level_update(emitter: &SignalEmitter<'_>, level: f64) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn status_changed(emitter: &SignalEmitter<'_>, state: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn config_changed(
        emitter: &SignalEmitter<'_>,
        changes: HashMap<String, OwnedValue>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn error(emitter: &SignalEmitter<'_>, code: &str, message: &str) -> zbus::Result<()>;
}

/// Claim the bus name and serve the control interface.
///
/// Fails with `AlreadyRunning` when another daemon owns the name.
pub async fn serve(handle: ControllerHandle) -> Result<zbus::Connection> {
    let control = Control {
        handle: handle.clone(),
    };

    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, control)?
        .build()
        .await
        .map_err(|e| match e {
            zbus::Error::NameTaken => WhisperAloudError::AlreadyRunning,
            other => WhisperAloudError::Bus(other),
        })?;

    tokio::spawn(forward_events(connection.clone(), handle.subscribe()));

    tracing::info!(name = BUS_NAME, path = OBJECT_PATH, "control surface published");
    Ok(connection)
}

/// Bridge in-process engine events to D-Bus signals.
async fn forward_events(
    connection: zbus::Connection,
    mut events: broadcast::Receiver<EngineEvent>,
) {
    let emitter = match SignalEmitter::new(&connection, OBJECT_PATH) {
        Ok(emitter) => emitter,
        Err(e) => {
            tracing::error!(error = %e, "failed to create signal emitter");
            return;
        }
    };

    loop {
        match events.recv().await {
            Ok(event) => {
                if let Err(e) = emit(&emitter, event).await {
                    tracing::warn!(error = %e, "failed to emit signal");
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "signal forwarder lagged behind engine events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn emit(emitter: &SignalEmitter<'_>, event: EngineEvent) -> zbus::Result<()> {
    match event {
        EngineEvent::RecordingStarted => Control::recording_started(emitter).await,
        EngineEvent::RecordingStopped => Control::recording_stopped(emitter).await,
        EngineEvent::TranscriptionReady { text, meta } => {
            let mut dict = HashMap::new();
            dict.insert(
                "duration".to_string(),
                json_to_variant(&meta.duration.into()),
            );
            dict.insert(
                "language".to_string(),
                json_to_variant(&meta.language.into()),
            );
            dict.insert(
                "confidence".to_string(),
                json_to_variant(&meta.confidence.into()),
            );
            dict.insert(
                "entry_id".to_string(),
                json_to_variant(&meta.entry_id.into()),
            );
            Control::transcription_ready(emitter, &text, dict).await
        }
        EngineEvent::LevelUpdate { level } => {
            Control::level_update(emitter, level as f64).await
        }
        EngineEvent::StatusChanged { state } => Control::status_changed(emitter, &state).await,
        EngineEvent::ConfigChanged { keys } => {
            let dict = keys
                .into_iter()
                .map(|key| (key, json_to_variant(&true.into())))
                .collect();
            Control::config_changed(emitter, dict).await
        }
        EngineEvent::Error { code, message } => {
            Control::error(emitter, &code, &message).await
        }
    }
}

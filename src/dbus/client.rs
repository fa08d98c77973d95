//! Client proxy for the control interface, used by the CLI front-end.

use std::collections::HashMap;
use zbus::zvariant::OwnedValue;

/// Proxy over `org.fede.whisperaloud.Control`.
///
/// Method signatures and signal payload shapes are the compatibility
/// contract shared with the daemon and any other front-end.
#[zbus::proxy(
    interface = "org.fede.whisperaloud.Control",
    default_service = "org.fede.whisperaloud",
    default_path = "/org/fede/whisperaloud"
)]
pub trait Control {
    fn start_recording(&self) -> zbus::Result<bool>;

    fn stop_recording(&self) -> zbus::Result<String>;

    fn toggle_recording(&self) -> zbus::Result<String>;

    fn cancel_recording(&self) -> zbus::Result<bool>;

    fn get_status(&self) -> zbus::Result<HashMap<String, OwnedValue>>;

    fn get_history(&self, limit: u32) -> zbus::Result<Vec<HashMap<String, OwnedValue>>>;

    fn search_history(
        &self,
        query: &str,
        limit: u32,
    ) -> zbus::Result<Vec<HashMap<String, OwnedValue>>>;

    fn get_favorite_history(&self, limit: u32) -> zbus::Result<Vec<HashMap<String, OwnedValue>>>;

    fn toggle_history_favorite(&self, entry_id: i32) -> zbus::Result<bool>;

    fn delete_history_entry(&self, entry_id: i32) -> zbus::Result<bool>;

    fn get_config(&self) -> zbus::Result<HashMap<String, OwnedValue>>;

    fn set_config(&self, changes: HashMap<String, OwnedValue>) -> zbus::Result<bool>;

    fn reload_config(&self) -> zbus::Result<bool>;

    fn quit(&self) -> zbus::Result<bool>;

    #[zbus(signal)]
    fn recording_started(&self) -> zbus::Result<()>;

    #[zbus(signal)]
    fn recording_stopped(&self) -> zbus::Result<()>;

    #[zbus(signal)]
    fn transcription_ready(
        &self,
        text: String,
        meta: HashMap<String, OwnedValue>,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    fn level_update(&self, level: f64) -> zbus::Result<()>;

    #[zbus(signal)]
    fn status_changed(&self, state: String) -> zbus::Result<()>;

    #[zbus(signal)]
    fn config_changed(&self, changes: HashMap<String, OwnedValue>) -> zbus::Result<()>;

    #[zbus(signal)]
    fn error(&self, code: String, message: String) -> zbus::Result<()>;
}

/// Connect to a running daemon.
pub async fn connect() -> crate::error::Result<ControlProxy<'static>> {
    let connection = zbus::Connection::session().await?;
    let proxy = ControlProxy::new(&connection).await?;
    Ok(proxy)
}

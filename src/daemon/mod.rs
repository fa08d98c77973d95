//! Daemon mode: wires the core together and serves the control surface.

pub mod controller;

use crate::audio::capture::{CaptureFactory, CaptureSource, CpalCaptureSource, suppress_audio_warnings};
use crate::clipboard::{Clipboard, SystemClipboard};
use crate::config::Config;
use crate::daemon::controller::{Controller, TranscriberFactory};
use crate::error::{Result, WhisperAloudError};
use crate::history::HistoryStore;
use crate::models::download::{ensure_model, model_path};
use crate::stt::{Transcriber, WhisperConfig, WhisperTranscriber};
use std::path::PathBuf;
use std::sync::Arc;

/// Daemon startup options from the CLI.
#[derive(Debug, Default)]
pub struct DaemonOptions {
    pub config_path: Option<PathBuf>,
    pub quiet: bool,
    pub no_download: bool,
}

/// Run the daemon: load config, open the store, start the dispatcher,
/// claim the bus name and wait for shutdown.
///
/// # Arguments
/// * `options` - Startup options from the CLI (config path, quiet mode,
///   download policy)
///
/// # Returns
/// Ok(()) after a shutdown requested over the bus; `Interrupted` when the
/// shutdown was triggered by SIGINT/SIGTERM (so the process exits 130);
/// `AlreadyRunning` when another instance owns the bus name.
pub async fn run_daemon(options: DaemonOptions) -> Result<()> {
    init_tracing(options.quiet);

    // Suppress noisy JACK/ALSA warnings before any audio probing
    suppress_audio_warnings();

    let config_path = options.config_path.unwrap_or_else(Config::default_path);
    let config = Config::load_or_default(&config_path)?.with_env_overrides()?;
    config.validate()?;

    // Make sure the model is on disk. A failure here is not fatal: the
    // engine starts anyway and reports model_not_found on first use.
    match ensure_model(&config.model.name, options.no_download, !options.quiet).await {
        Ok(path) => {
            tracing::info!(model = %config.model.name, path = %path.display(), "model available");
        }
        Err(e) => {
            tracing::warn!(error = %e, "model unavailable, transcription will fail until installed");
            if !options.quiet {
                eprintln!("warning: {}", e);
            }
        }
    }

    let store = Arc::new(
        HistoryStore::open(
            &config.db_path(),
            &config.archive_path(),
            config.persistence.clone(),
        )
        .await?,
    );

    let clipboard: Arc<dyn Clipboard> =
        Arc::new(SystemClipboard::new(config.clipboard.clone()));

    let capture_factory: CaptureFactory = Box::new(|capture_config| {
        Ok(Box::new(CpalCaptureSource::open(capture_config)?) as Box<dyn CaptureSource>)
    });

    let transcriber_factory: TranscriberFactory = Box::new(|config: &Config| {
        let path = model_path(&config.model.name).unwrap_or_default();
        Arc::new(WhisperTranscriber::new(WhisperConfig {
            model: config.model.name.clone(),
            model_path: path,
            device: config.model.device.clone(),
            threads: None,
        })) as Arc<dyn Transcriber>
    });

    let auto_cleanup = config.persistence.auto_cleanup_enabled;
    let (controller, handle, inbox) = Controller::new(
        config,
        config_path,
        Arc::clone(&store),
        clipboard,
        capture_factory,
        transcriber_factory,
    );
    let mut controller_task = tokio::spawn(controller.run(inbox));

    // Claim org.fede.whisperaloud; a second instance fails here cleanly
    let connection = crate::dbus::serve(handle.clone()).await?;

    // Retention runs off the dispatcher on the general worker pool
    if auto_cleanup {
        let sweep_store = Arc::clone(&store);
        tokio::spawn(async move {
            if let Err(e) = sweep_store.retention_sweep().await {
                tracing::warn!(error = %e, "retention sweep failed");
            }
        });
    }

    if !options.quiet {
        eprintln!("Daemon ready.");
    }

    // A signal-triggered shutdown exits with the interrupt status (130);
    // a Quit arriving over the bus is a normal exit.
    let mut interrupted = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            if !options.quiet {
                eprintln!("\nReceived SIGINT, shutting down...");
            }
            let _ = handle.quit().await;
            interrupted = true;
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
            }
            if !options.quiet {
                eprintln!("\nReceived SIGTERM, shutting down...");
            }
            let _ = handle.quit().await;
            interrupted = true;
        }
        _ = &mut controller_task => {
            // Quit arrived over the bus
        }
    }

    if !controller_task.is_finished() {
        let _ = controller_task.await;
    }

    // Dropping the connection releases the bus name
    drop(connection);

    if !options.quiet {
        eprintln!("Daemon stopped.");
    }
    if interrupted {
        return Err(WhisperAloudError::Interrupted);
    }
    Ok(())
}

fn init_tracing(quiet: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Wait for SIGTERM (used by systemd).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // On non-Unix, just wait forever (Ctrl+C will still work)
    std::future::pending::<()>().await
}

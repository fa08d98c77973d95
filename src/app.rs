//! Application entry point: dispatches parsed CLI commands.
//!
//! The daemon subcommand runs the engine in-process; every other command is
//! a thin client that talks to the running daemon over the session bus,
//! except `transcribe`, `history export`, `devices` and `models`, which
//! work without a daemon.

use crate::cli::{Cli, Commands, HistoryAction, ModelsAction};
use crate::config::Config;
use crate::daemon::{DaemonOptions, run_daemon};
use crate::dbus::{client, variant_to_json};
use crate::error::{Result, WhisperAloudError};
use crate::history::{ExportFormat, HistoryStore, SearchFilters};
use crate::models;
use crate::stt::{TranscribeOptions, Transcriber, WhisperConfig, WhisperTranscriber};
use std::collections::HashMap;
use zbus::zvariant::OwnedValue;

/// Execute a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        eprintln!("whisper-aloud — offline voice dictation");
        eprintln!("Run with --help for usage, or start the service with: whisper-aloud daemon");
        return Ok(());
    };

    match command {
        Commands::Daemon { no_download } => {
            let result = run_daemon(DaemonOptions {
                config_path: cli.config,
                quiet: cli.quiet,
                no_download,
            })
            .await;
            // A second instance is not a failure; the incumbent keeps the name
            if let Err(WhisperAloudError::AlreadyRunning) = result {
                eprintln!("whisper-aloud daemon is already running");
                return Ok(());
            }
            result
        }
        Commands::Start => {
            let proxy = connect().await?;
            proxy.start_recording().await?;
            if !cli.quiet {
                eprintln!("Recording started.");
            }
            Ok(())
        }
        Commands::Stop => {
            let proxy = connect().await?;
            let text = proxy.stop_recording().await?;
            println!("{}", text);
            Ok(())
        }
        Commands::Toggle => {
            let proxy = connect().await?;
            let state = proxy.toggle_recording().await?;
            if !cli.quiet {
                eprintln!("{}", state);
            }
            Ok(())
        }
        Commands::Cancel => {
            let proxy = connect().await?;
            proxy.cancel_recording().await?;
            if !cli.quiet {
                eprintln!("Recording cancelled.");
            }
            Ok(())
        }
        Commands::Status => {
            let proxy = connect().await?;
            let status = proxy.get_status().await?;
            print_dict(&status);
            Ok(())
        }
        Commands::Reload => {
            let proxy = connect().await?;
            proxy.reload_config().await?;
            if !cli.quiet {
                eprintln!("Configuration reloaded.");
            }
            Ok(())
        }
        Commands::Quit => {
            let proxy = connect().await?;
            proxy.quit().await?;
            if !cli.quiet {
                eprintln!("Daemon stopped.");
            }
            Ok(())
        }
        Commands::Devices => {
            for device in crate::audio::capture::list_devices()? {
                println!("{}", device);
            }
            Ok(())
        }
        Commands::Transcribe {
            file,
            model,
            language,
            no_download,
        } => {
            // Mirror the daemonless mode's interrupt contract: Ctrl-C during
            // a long CPU transcription exits with status 130
            tokio::select! {
                result = transcribe_file(cli.config, file, model, language, no_download, cli.quiet) => result,
                _ = tokio::signal::ctrl_c() => {
                    if !cli.quiet {
                        eprintln!("\nInterrupted.");
                    }
                    Err(WhisperAloudError::Interrupted)
                }
            }
        }
        Commands::History { action } => run_history(cli.config, action).await,
        Commands::Models { action } => run_models(action).await,
    }
}

async fn connect() -> Result<client::ControlProxy<'static>> {
    client::connect().await.map_err(|_| {
        WhisperAloudError::Other(
            "daemon is not running (start it with: whisper-aloud daemon)".to_string(),
        )
    })
}

fn print_dict(dict: &HashMap<String, OwnedValue>) {
    let mut keys: Vec<&String> = dict.keys().collect();
    keys.sort();
    for key in keys {
        println!("{}: {}", key, variant_to_json(&dict[key]));
    }
}

fn print_entry_dicts(entries: &[HashMap<String, OwnedValue>]) {
    for entry in entries {
        let id = entry.get("id").map(variant_to_json).unwrap_or_default();
        let timestamp = entry
            .get("timestamp")
            .map(variant_to_json)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let favorite = entry
            .get("favorite")
            .map(variant_to_json)
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let text = entry
            .get("text")
            .map(variant_to_json)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let marker = if favorite { "*" } else { " " };
        let mut line = text.replace('\n', " ");
        if line.chars().count() > 80 {
            line = line.chars().take(79).collect::<String>() + "…";
        }
        println!("{}{:>5}  {}  {}", marker, id, timestamp, line);
    }
}

async fn transcribe_file(
    config_path: Option<std::path::PathBuf>,
    file: std::path::PathBuf,
    model: Option<String>,
    language: Option<String>,
    no_download: bool,
    quiet: bool,
) -> Result<()> {
    let config_path = config_path.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_default(&config_path)?.with_env_overrides()?;
    if let Some(model) = model {
        config.model.name = model;
    }
    if let Some(language) = language {
        config.transcription.language = language;
    }
    config.validate()?;

    let model_path = models::download::ensure_model(&config.model.name, no_download, !quiet).await?;

    let samples = crate::audio::wav::read_wav_file(&file)?;
    if !quiet {
        eprintln!(
            "Transcribing {} ({:.1}s of audio) with model '{}'...",
            file.display(),
            samples.len() as f64 / crate::defaults::SAMPLE_RATE as f64,
            config.model.name
        );
    }

    let transcriber = WhisperTranscriber::new(WhisperConfig {
        model: config.model.name.clone(),
        model_path,
        device: config.model.device.clone(),
        threads: None,
    });
    let options = TranscribeOptions::from_config(&config.transcription);

    // Inference runs on the blocking pool so the caller's Ctrl-C handler
    // stays responsive during a long model call
    let result = tokio::task::spawn_blocking(move || transcriber.transcribe(&samples, &options))
        .await
        .map_err(|e| WhisperAloudError::Other(format!("transcription task failed: {}", e)))??;

    println!("{}", result.text);
    if !quiet {
        eprintln!(
            "language={} confidence={:.2} processing_time={:.2}s",
            result.language, result.confidence, result.processing_time
        );
    }
    Ok(())
}

async fn run_history(config_path: Option<std::path::PathBuf>, action: HistoryAction) -> Result<()> {
    match action {
        HistoryAction::List { limit } => {
            let proxy = connect().await?;
            print_entry_dicts(&proxy.get_history(limit).await?);
            Ok(())
        }
        HistoryAction::Search { query, limit } => {
            let proxy = connect().await?;
            print_entry_dicts(&proxy.search_history(&query, limit).await?);
            Ok(())
        }
        HistoryAction::Favorites { limit } => {
            let proxy = connect().await?;
            print_entry_dicts(&proxy.get_favorite_history(limit).await?);
            Ok(())
        }
        HistoryAction::Favorite { id } => {
            let proxy = connect().await?;
            let favorite = proxy.toggle_history_favorite(id).await?;
            eprintln!(
                "Entry {} is {} a favorite.",
                id,
                if favorite { "now" } else { "no longer" }
            );
            Ok(())
        }
        HistoryAction::Delete { id } => {
            let proxy = connect().await?;
            if proxy.delete_history_entry(id).await? {
                eprintln!("Entry {} deleted.", id);
            } else {
                eprintln!("No entry with id {}.", id);
            }
            Ok(())
        }
        HistoryAction::Export { format, query } => {
            // Export reads the database directly so it works without the
            // daemon; the pool gives it a consistent snapshot
            let format: ExportFormat = format
                .parse()
                .map_err(|message: String| WhisperAloudError::Other(message))?;
            let config_path = config_path.unwrap_or_else(Config::default_path);
            let config = Config::load_or_default(&config_path)?.with_env_overrides()?;
            let store = HistoryStore::open(
                &config.db_path(),
                &config.archive_path(),
                config.persistence.clone(),
            )
            .await?;
            let output = store
                .export(format, query.as_deref().unwrap_or(""), &SearchFilters::default())
                .await?;
            println!("{}", output);
            Ok(())
        }
    }
}

async fn run_models(action: ModelsAction) -> Result<()> {
    match action {
        ModelsAction::List => {
            for model in models::catalog::list_models() {
                println!("{}", models::download::format_model_info(model));
            }
            Ok(())
        }
        ModelsAction::Install { name } => {
            let path = models::download::download_model(&name, true).await?;
            eprintln!("Installed {} at {}", name, path.display());
            Ok(())
        }
    }
}

//! Command-line interface for whisper-aloud
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Offline voice dictation with history and D-Bus control
#[derive(Parser, Debug)]
#[command(
    name = "whisper-aloud",
    version,
    about = "Offline voice dictation daemon with history and D-Bus control"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress output (quiet mode)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the background service (foreground process for systemd)
    Daemon {
        /// Prevent automatic model download if the configured model is missing
        #[arg(long)]
        no_download: bool,
    },

    /// Start recording
    Start,

    /// Stop recording and print the transcription
    Stop,

    /// Toggle recording on/off
    Toggle,

    /// Cancel the active recording without transcribing
    Cancel,

    /// Show daemon status
    Status,

    /// Reload the daemon configuration from disk
    Reload,

    /// Stop the daemon
    Quit,

    /// List available audio input devices
    Devices,

    /// Transcribe a WAV file directly (no daemon needed)
    Transcribe {
        /// Audio file to transcribe
        file: PathBuf,

        /// Whisper model override (default: from config)
        #[arg(long, value_name = "MODEL")]
        model: Option<String>,

        /// Language code override (default: from config). Examples: auto, en, es
        #[arg(long, value_name = "LANG")]
        language: Option<String>,

        /// Prevent automatic model download
        #[arg(long)]
        no_download: bool,
    },

    /// Browse stored transcriptions
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// Manage Whisper models
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
}

/// History subcommands
#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    /// Show the most recent entries
    List {
        /// Maximum number of entries
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Full-text search over stored transcriptions
    Search {
        /// Search query (FTS5 syntax)
        query: String,

        /// Maximum number of entries
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Show favorite entries
    Favorites {
        /// Maximum number of entries
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Toggle an entry's favorite flag
    Favorite {
        /// Entry id
        id: i32,
    },

    /// Delete an entry (and its archived audio if unreferenced)
    Delete {
        /// Entry id
        id: i32,
    },

    /// Export history to stdout
    Export {
        /// Output format: json, markdown, csv or text
        #[arg(long, default_value = "json")]
        format: String,

        /// Optional full-text filter
        #[arg(long)]
        query: Option<String>,
    },
}

/// Model management subcommands
#[derive(Subcommand, Debug)]
pub enum ModelsAction {
    /// List known models and their installation status
    List,

    /// Download and install a model
    Install {
        /// Model name (e.g. tiny, base.en, large-v3)
        name: String,
    },
}

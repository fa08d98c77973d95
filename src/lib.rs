//! whisper-aloud — offline voice dictation for the Linux desktop.
//!
//! Press a hotkey, speak, release: the engine records, conditions the audio
//! (noise gate, AGC, denoise, limiter), transcribes it with Whisper and
//! delivers the text to the clipboard and a searchable history. The daemon
//! is driven over the session bus; thin front-ends (CLI, tray, GUI) are
//! external clients of that surface.

pub mod app;
pub mod audio;
pub mod cli;
pub mod clipboard;
pub mod config;
pub mod daemon;
pub mod dbus;
pub mod defaults;
pub mod dsp;
pub mod error;
pub mod history;
pub mod models;
pub mod stt;

//! Clipboard delivery for finished transcriptions.
//!
//! The daemon hands text to the desktop through external tools: `wl-copy`
//! on Wayland with `xclip` as the X11 fallback, and `wtype`/`ydotool` for
//! paste simulation. When no clipboard tool works, the text can be written
//! to a fallback file so it is never lost.

use crate::config::ClipboardConfig;
use crate::error::{Result, WhisperAloudError};
use std::io::Write;
use std::process::{Command, Stdio};

/// Trait for clipboard delivery (production tools vs test double).
pub trait Clipboard: Send + Sync {
    /// Place text on the system clipboard.
    fn copy(&self, text: &str) -> Result<()>;

    /// Simulate a paste keystroke into the focused window.
    fn paste(&self) -> Result<()>;
}

/// Clipboard backed by Wayland/X11 command-line tools.
pub struct SystemClipboard {
    config: ClipboardConfig,
}

impl SystemClipboard {
    pub fn new(config: ClipboardConfig) -> Self {
        Self { config }
    }

    fn try_tool(command: &str, args: &[&str], input: &str) -> std::io::Result<bool> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(input.as_bytes())?;
        }
        Ok(child.wait()?.success())
    }

    fn write_fallback(&self, text: &str) -> Result<()> {
        std::fs::write(&self.config.fallback_path, text)?;
        tracing::info!(path = %self.config.fallback_path, "clipboard fallback file written");
        Ok(())
    }
}

impl Clipboard for SystemClipboard {
    fn copy(&self, text: &str) -> Result<()> {
        // Wayland first, then X11
        for (tool, args) in [
            ("wl-copy", &[][..]),
            ("xclip", &["-selection", "clipboard"][..]),
        ] {
            match Self::try_tool(tool, args, text) {
                Ok(true) => return Ok(()),
                Ok(false) => continue,
                Err(_) => continue, // tool not installed
            }
        }

        if self.config.fallback_to_file {
            self.write_fallback(text)?;
            return Ok(());
        }

        Err(WhisperAloudError::Clipboard {
            message: "no clipboard tool available (tried wl-copy, xclip)".to_string(),
        })
    }

    fn paste(&self) -> Result<()> {
        std::thread::sleep(std::time::Duration::from_millis(self.config.paste_delay_ms));

        let attempts: [(&str, &[&str]); 2] = [
            ("wtype", &["-M", "ctrl", "-k", "v", "-m", "ctrl"]),
            ("ydotool", &["key", "29:1", "47:1", "47:0", "29:0"]),
        ];
        for (tool, args) in attempts {
            let ok = Command::new(tool)
                .args(args)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false);
            if ok {
                return Ok(());
            }
        }

        Err(WhisperAloudError::Clipboard {
            message: "no paste tool available (tried wtype, ydotool)".to_string(),
        })
    }
}

/// Test double that records copied text.
#[derive(Default)]
pub struct MockClipboard {
    copied: std::sync::Mutex<Vec<String>>,
    pasted: std::sync::atomic::AtomicU32,
}

impl MockClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn copied(&self) -> Vec<String> {
        self.copied.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn paste_count(&self) -> u32 {
        self.pasted.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Clipboard for MockClipboard {
    fn copy(&self, text: &str) -> Result<()> {
        if let Ok(mut copied) = self.copied.lock() {
            copied.push(text.to_string());
        }
        Ok(())
    }

    fn paste(&self) -> Result<()> {
        self.pasted
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}

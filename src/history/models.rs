//! History data types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A stored transcription. Immutable after creation except for the
/// favorite flag, tags and notes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub language: String,
    pub model: String,
    pub confidence: f64,
    pub duration_secs: f64,
    pub processing_time_secs: f64,
    pub session_id: String,
    /// Content hash of the archived audio, if audio was retained.
    pub archive_hash: Option<String>,
    pub favorite: bool,
    pub tags: Vec<String>,
    pub notes: String,
}

/// Filters applied on top of full-text search.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub language: Option<String>,
    pub model: Option<String>,
    pub favorites_only: bool,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Export serialization formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Markdown,
    Csv,
    Text,
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            "csv" => Ok(Self::Csv),
            "text" | "txt" => Ok(Self::Text),
            other => Err(format!("unknown export format '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_format_parses_known_names() {
        assert_eq!("json".parse::<ExportFormat>(), Ok(ExportFormat::Json));
        assert_eq!("md".parse::<ExportFormat>(), Ok(ExportFormat::Markdown));
        assert_eq!("CSV".parse::<ExportFormat>(), Ok(ExportFormat::Csv));
        assert_eq!("txt".parse::<ExportFormat>(), Ok(ExportFormat::Text));
    }

    #[test]
    fn export_format_rejects_unknown() {
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}

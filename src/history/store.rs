//! SQLite history store with FTS5 full-text search and a content-addressed
//! audio archive.
//!
//! The store is the single writer; reads may run concurrently through the
//! connection pool. Entries, the FTS index and archive reference counts are
//! kept consistent by running every mutation in one transaction.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::path::{Path, PathBuf};

use crate::config::PersistenceConfig;
use crate::error::{Result, WhisperAloudError};
use crate::history::archive::{AudioArchive, hash_audio};
use crate::history::models::{ExportFormat, HistoryEntry, SearchFilters};
use crate::stt::TranscriptionResult;

/// Current schema version (PRAGMA user_version).
const SCHEMA_VERSION: i64 = 1;

pub struct HistoryStore {
    pool: SqlitePool,
    archive: AudioArchive,
    config: PersistenceConfig,
}

impl HistoryStore {
    /// Open (and migrate) the history database.
    pub async fn open(
        db_path: &Path,
        archive_root: &Path,
        config: PersistenceConfig,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .busy_timeout(std::time::Duration::from_secs(30))
            .foreign_keys(true)
            .pragma("journal_mode", "WAL")
            // NORMAL is safe with WAL mode and avoids an fsync per commit
            .pragma("synchronous", "NORMAL");

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            archive: AudioArchive::new(archive_root),
            config,
        };
        store.migrate().await?;

        tracing::info!(db = %db_path.display(), "history store opened");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;

        if version >= SCHEMA_VERSION {
            tracing::debug!(version, "history schema up to date");
            return Ok(());
        }

        if version == 0 {
            self.create_schema().await?;
            sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
                .execute(&self.pool)
                .await?;
            tracing::info!(version = SCHEMA_VERSION, "history schema created");
        }
        Ok(())
    }

    async fn create_schema(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS archive (
                hash TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                byte_size INTEGER NOT NULL,
                sample_rate INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                ref_count INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                text TEXT NOT NULL,
                language TEXT NOT NULL DEFAULT '',
                model TEXT NOT NULL DEFAULT '',
                confidence REAL NOT NULL DEFAULT 0,
                duration_secs REAL NOT NULL DEFAULT 0,
                processing_time_secs REAL NOT NULL DEFAULT 0,
                session_id TEXT NOT NULL DEFAULT '',
                archive_hash TEXT REFERENCES archive(hash),
                favorite INTEGER NOT NULL DEFAULT 0,
                tags TEXT NOT NULL DEFAULT '[]',
                notes TEXT NOT NULL DEFAULT ''
            )",
            "CREATE INDEX IF NOT EXISTS idx_entries_created_at ON entries(created_at DESC)",
            "CREATE INDEX IF NOT EXISTS idx_entries_favorite ON entries(favorite)",
            "CREATE INDEX IF NOT EXISTS idx_entries_language ON entries(language)",
            "CREATE INDEX IF NOT EXISTS idx_entries_session ON entries(session_id)",
            "CREATE INDEX IF NOT EXISTS idx_entries_archive_hash ON entries(archive_hash)",
            "CREATE VIRTUAL TABLE IF NOT EXISTS entries_fts USING fts5(
                text,
                tags,
                notes,
                content=entries,
                content_rowid=id
            )",
            "CREATE TRIGGER IF NOT EXISTS entries_ai AFTER INSERT ON entries BEGIN
                INSERT INTO entries_fts(rowid, text, tags, notes)
                VALUES (new.id, new.text, new.tags, new.notes);
            END",
            "CREATE TRIGGER IF NOT EXISTS entries_ad AFTER DELETE ON entries BEGIN
                INSERT INTO entries_fts(entries_fts, rowid, text, tags, notes)
                VALUES('delete', old.id, old.text, old.tags, old.notes);
            END",
            "CREATE TRIGGER IF NOT EXISTS entries_au AFTER UPDATE ON entries BEGIN
                INSERT INTO entries_fts(entries_fts, rowid, text, tags, notes)
                VALUES('delete', old.id, old.text, old.tags, old.notes);
                INSERT INTO entries_fts(rowid, text, tags, notes)
                VALUES (new.id, new.text, new.tags, new.notes);
            END",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Add a transcription to history.
    ///
    /// # Arguments
    /// * `result` - Finished transcription (text and metadata)
    /// * `model` - Model identity recorded with the entry
    /// * `audio` - Post-pipeline buffer to archive, or None to keep text only
    /// * `sample_rate` - Rate of `audio` in Hz
    /// * `session_id` - Session grouping id
    ///
    /// # Returns
    /// The freshly inserted entry.
    ///
    /// If `audio` is provided the buffer is archived under its SHA-256
    /// content hash with deduplication: an existing object gains a
    /// reference, a new object is written and inserted. The entry insert,
    /// FTS index update and archive upsert land in one transaction.
    pub async fn add(
        &self,
        result: &TranscriptionResult,
        model: &str,
        audio: Option<&[f32]>,
        sample_rate: u32,
        session_id: &str,
    ) -> Result<HistoryEntry> {
        let mut fresh_file: Option<PathBuf> = None;
        match self
            .add_inner(result, model, audio, sample_rate, session_id, &mut fresh_file)
            .await
        {
            Ok(entry) => Ok(entry),
            Err(e) => {
                // Roll back a freshly written audio object so no orphan
                // remains on disk
                if let Some(path) = fresh_file {
                    self.archive.delete(&path);
                }
                Err(e)
            }
        }
    }

    async fn add_inner(
        &self,
        result: &TranscriptionResult,
        model: &str,
        audio: Option<&[f32]>,
        sample_rate: u32,
        session_id: &str,
        fresh_file: &mut Option<PathBuf>,
    ) -> Result<HistoryEntry> {
        let created_at = Utc::now();
        let mut tx = self.pool.begin().await?;

        let archive_hash = if let Some(samples) = audio {
            let hash = hash_audio(samples);

            let existing: Option<String> =
                sqlx::query_scalar("SELECT path FROM archive WHERE hash = ?")
                    .bind(&hash)
                    .fetch_optional(&mut *tx)
                    .await?;

            if existing.is_some() {
                sqlx::query("UPDATE archive SET ref_count = ref_count + 1 WHERE hash = ?")
                    .bind(&hash)
                    .execute(&mut *tx)
                    .await?;
            } else {
                let path = self.archive.save(samples, sample_rate, &hash)?;
                let byte_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                *fresh_file = Some(path.clone());

                sqlx::query(
                    "INSERT INTO archive (hash, path, byte_size, sample_rate, created_at, ref_count)
                     VALUES (?, ?, ?, ?, ?, 1)",
                )
                .bind(&hash)
                .bind(path.to_string_lossy().to_string())
                .bind(byte_size as i64)
                .bind(sample_rate as i64)
                .bind(created_at.to_rfc3339())
                .execute(&mut *tx)
                .await?;
            }
            Some(hash)
        } else {
            None
        };

        let insert = sqlx::query(
            "INSERT INTO entries (
                created_at, text, language, model, confidence, duration_secs,
                processing_time_secs, session_id, archive_hash
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(created_at.to_rfc3339())
        .bind(&result.text)
        .bind(&result.language)
        .bind(model)
        .bind(result.confidence as f64)
        .bind(result.duration)
        .bind(result.processing_time)
        .bind(session_id)
        .bind(&archive_hash)
        .execute(&mut *tx)
        .await?;

        let id = insert.last_insert_rowid();
        tx.commit().await?;

        self.get(id).await?.ok_or_else(|| WhisperAloudError::History {
            message: format!("entry {} vanished after insert", id),
        })
    }

    /// Fetch one entry by id.
    pub async fn get(&self, id: i64) -> Result<Option<HistoryEntry>> {
        let row = sqlx::query("SELECT * FROM entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| row_to_entry(&r)).transpose()
    }

    /// Most recent entries, newest first.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query("SELECT * FROM entries ORDER BY id DESC LIMIT ?")
            .bind(limit.max(1) as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Full-text search with optional filters, newest first.
    ///
    /// # Arguments
    /// * `query` - FTS5 match expression; empty returns filtered entries
    ///   without an FTS match
    /// * `filters` - Language/model/date-range/favorite restrictions
    /// * `limit` - Maximum number of entries
    /// * `offset` - Entries to skip (pagination)
    ///
    /// # Returns
    /// Matching entries, newest first.
    pub async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<HistoryEntry>> {
        let query = query.trim();
        let mut sql = String::from("SELECT e.* FROM entries e");
        if !query.is_empty() {
            sql.push_str(" JOIN entries_fts f ON e.id = f.rowid WHERE entries_fts MATCH ?");
        } else {
            sql.push_str(" WHERE 1=1");
        }
        if filters.language.is_some() {
            sql.push_str(" AND e.language = ?");
        }
        if filters.model.is_some() {
            sql.push_str(" AND e.model = ?");
        }
        if filters.favorites_only {
            sql.push_str(" AND e.favorite = 1");
        }
        if filters.from.is_some() {
            sql.push_str(" AND e.created_at >= ?");
        }
        if filters.to.is_some() {
            sql.push_str(" AND e.created_at <= ?");
        }
        sql.push_str(" ORDER BY e.id DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query(&sql);
        if !query.is_empty() {
            q = q.bind(query);
        }
        if let Some(language) = &filters.language {
            q = q.bind(language);
        }
        if let Some(model) = &filters.model {
            q = q.bind(model);
        }
        if let Some(from) = &filters.from {
            q = q.bind(from.to_rfc3339());
        }
        if let Some(to) = &filters.to {
            q = q.bind(to.to_rfc3339());
        }
        q = q.bind(limit.max(1) as i64).bind(offset as i64);

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| WhisperAloudError::History {
                message: format!("search failed: {}", e),
            })?;
        rows.iter().map(row_to_entry).collect()
    }

    /// Delete one entry, cascading the archive reference count. The blob is
    /// removed from disk once no entry references it.
    pub async fn delete(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let removed = delete_entry_in_tx(&mut tx, id).await?;
        let Some(orphan) = removed else {
            tx.rollback().await?;
            return Ok(false);
        };
        tx.commit().await?;

        if let Some(path) = orphan {
            self.archive.delete(&path);
        }
        Ok(true)
    }

    /// Toggle the favorite flag; returns the new value.
    pub async fn toggle_favorite(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE entries SET favorite = NOT favorite WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WhisperAloudError::History {
                message: format!("no entry with id {}", id),
            });
        }
        let favorite: i64 = sqlx::query_scalar("SELECT favorite FROM entries WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(favorite != 0)
    }

    /// Replace the free-form tags of an entry.
    pub async fn set_tags(&self, id: i64, tags: &[String]) -> Result<()> {
        let json = serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string());
        let result = sqlx::query("UPDATE entries SET tags = ? WHERE id = ?")
            .bind(json)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WhisperAloudError::History {
                message: format!("no entry with id {}", id),
            });
        }
        Ok(())
    }

    /// Replace the notes of an entry.
    pub async fn set_notes(&self, id: i64, notes: &str) -> Result<()> {
        let result = sqlx::query("UPDATE entries SET notes = ? WHERE id = ?")
            .bind(notes)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(WhisperAloudError::History {
                message: format!("no entry with id {}", id),
            });
        }
        Ok(())
    }

    /// Delete entries past the retention policy: older than
    /// `auto_cleanup_days`, and oldest-first beyond `max_entries`. Archive
    /// reference counts cascade; orphaned blobs are removed from disk.
    ///
    /// Returns the number of entries deleted.
    pub async fn retention_sweep(&self) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(self.config.auto_cleanup_days as i64);

        let mut ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM entries WHERE created_at < ?")
            .bind(cutoff.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;

        // Entries beyond the cap, oldest first
        let overflow: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM entries ORDER BY id DESC LIMIT -1 OFFSET ?",
        )
        .bind(self.config.max_entries as i64)
        .fetch_all(&self.pool)
        .await?;
        for id in overflow {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut orphans = Vec::new();
        let mut deleted = 0u64;
        for id in ids {
            if let Some(orphan) = delete_entry_in_tx(&mut tx, id).await? {
                deleted += 1;
                if let Some(path) = orphan {
                    orphans.push(path);
                }
            }
        }
        tx.commit().await?;

        for path in orphans {
            self.archive.delete(&path);
        }

        tracing::info!(deleted, "retention sweep complete");
        Ok(deleted)
    }

    /// Serialize matching entries in the requested format.
    pub async fn export(
        &self,
        format: ExportFormat,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<String> {
        let entries = self.search(query, filters, u32::MAX, 0).await?;
        Ok(match format {
            ExportFormat::Json => serde_json::to_string_pretty(&entries).map_err(|e| {
                WhisperAloudError::History {
                    message: format!("export serialization failed: {}", e),
                }
            })?,
            ExportFormat::Markdown => export_markdown(&entries),
            ExportFormat::Csv => export_csv(&entries),
            ExportFormat::Text => export_text(&entries),
        })
    }

    /// Reference count and blob path for an archive hash, if present.
    pub async fn archive_object(&self, hash: &str) -> Result<Option<(i64, PathBuf)>> {
        let row = sqlx::query("SELECT ref_count, path FROM archive WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| {
            (
                r.get::<i64, _>("ref_count"),
                PathBuf::from(r.get::<String, _>("path")),
            )
        }))
    }

    /// Number of stored entries.
    pub async fn entry_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Check the deduplication invariant: for every archive hash, ref_count
    /// equals the number of entries referencing it, and every referenced
    /// hash exists.
    pub async fn verify_archive_integrity(&self) -> Result<bool> {
        let mismatches: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM archive a
             WHERE a.ref_count != (SELECT COUNT(*) FROM entries e WHERE e.archive_hash = a.hash)",
        )
        .fetch_one(&self.pool)
        .await?;

        let dangling: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM entries e
             WHERE e.archive_hash IS NOT NULL
               AND NOT EXISTS (SELECT 1 FROM archive a WHERE a.hash = e.archive_hash)",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(mismatches == 0 && dangling == 0)
    }
}

/// Delete one entry inside a transaction.
///
/// Returns `None` if the entry did not exist, `Some(None)` if it was deleted
/// without orphaning an archive object, `Some(Some(path))` if the last
/// reference to an object was dropped and the file at `path` should be
/// removed after commit.
async fn delete_entry_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    id: i64,
) -> Result<Option<Option<PathBuf>>> {
    let archive_hash: Option<Option<String>> =
        sqlx::query_scalar("SELECT archive_hash FROM entries WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;

    let Some(archive_hash) = archive_hash else {
        return Ok(None);
    };

    sqlx::query("DELETE FROM entries WHERE id = ?")
        .bind(id)
        .execute(&mut **tx)
        .await?;

    let Some(hash) = archive_hash else {
        return Ok(Some(None));
    };

    sqlx::query("UPDATE archive SET ref_count = ref_count - 1 WHERE hash = ?")
        .bind(&hash)
        .execute(&mut **tx)
        .await?;

    let row = sqlx::query("SELECT ref_count, path FROM archive WHERE hash = ?")
        .bind(&hash)
        .fetch_optional(&mut **tx)
        .await?;

    if let Some(row) = row {
        let ref_count: i64 = row.get("ref_count");
        if ref_count <= 0 {
            sqlx::query("DELETE FROM archive WHERE hash = ?")
                .bind(&hash)
                .execute(&mut **tx)
                .await?;
            return Ok(Some(Some(PathBuf::from(row.get::<String, _>("path")))));
        }
    }
    Ok(Some(None))
}

fn row_to_entry(row: &SqliteRow) -> Result<HistoryEntry> {
    let created_at_raw: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at_raw)
        .map_err(|e| WhisperAloudError::History {
            message: format!("invalid created_at '{}': {}", created_at_raw, e),
        })?
        .with_timezone(&Utc);

    let tags_raw: String = row.get("tags");
    let tags: Vec<String> = serde_json::from_str(&tags_raw).unwrap_or_default();

    Ok(HistoryEntry {
        id: row.get("id"),
        created_at,
        text: row.get("text"),
        language: row.get("language"),
        model: row.get("model"),
        confidence: row.get("confidence"),
        duration_secs: row.get("duration_secs"),
        processing_time_secs: row.get("processing_time_secs"),
        session_id: row.get("session_id"),
        archive_hash: row.get("archive_hash"),
        favorite: row.get::<i64, _>("favorite") != 0,
        tags,
        notes: row.get("notes"),
    })
}

fn export_markdown(entries: &[HistoryEntry]) -> String {
    let mut out = String::from("# Transcription History\n");
    for entry in entries {
        out.push_str(&format!(
            "\n## {} — {}\n\n{}\n",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            if entry.language.is_empty() {
                "unknown"
            } else {
                &entry.language
            },
            entry.text
        ));
        if !entry.tags.is_empty() {
            out.push_str(&format!("\nTags: {}\n", entry.tags.join(", ")));
        }
    }
    out
}

fn export_csv(entries: &[HistoryEntry]) -> String {
    fn escape(field: &str) -> String {
        if field.contains(',') || field.contains('"') || field.contains('\n') {
            format!("\"{}\"", field.replace('"', "\"\""))
        } else {
            field.to_string()
        }
    }

    let mut out =
        String::from("id,created_at,language,model,confidence,duration_secs,favorite,text\n");
    for entry in entries {
        out.push_str(&format!(
            "{},{},{},{},{:.4},{:.2},{},{}\n",
            entry.id,
            entry.created_at.to_rfc3339(),
            escape(&entry.language),
            escape(&entry.model),
            entry.confidence,
            entry.duration_secs,
            entry.favorite,
            escape(&entry.text)
        ));
    }
    out
}

fn export_text(entries: &[HistoryEntry]) -> String {
    entries
        .iter()
        .map(|e| {
            format!(
                "[{}] {}",
                e.created_at.format("%Y-%m-%d %H:%M:%S"),
                e.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sine;
    use tempfile::TempDir;

    async fn store() -> (TempDir, HistoryStore) {
        let dir = TempDir::new().unwrap();
        let store = HistoryStore::open(
            &dir.path().join("history.db"),
            &dir.path().join("audio"),
            PersistenceConfig::default(),
        )
        .await
        .unwrap();
        (dir, store)
    }

    fn result(text: &str) -> TranscriptionResult {
        TranscriptionResult {
            text: text.to_string(),
            language: "en".to_string(),
            language_probability: 0.98,
            segments: Vec::new(),
            confidence: 0.9,
            duration: 2.5,
            processing_time: 0.4,
        }
    }

    #[tokio::test]
    async fn add_and_get_roundtrip() {
        let (_dir, store) = store().await;
        let entry = store
            .add(&result("hello world"), "base", None, 16000, "session-1")
            .await
            .unwrap();

        assert!(entry.id > 0);
        assert_eq!(entry.text, "hello world");
        assert_eq!(entry.language, "en");
        assert_eq!(entry.model, "base");
        assert_eq!(entry.session_id, "session-1");
        assert!(entry.archive_hash.is_none());
        assert!(!entry.favorite);
        assert!(entry.tags.is_empty());

        let fetched = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(fetched, entry);
    }

    #[tokio::test]
    async fn entry_ids_are_monotonic() {
        let (_dir, store) = store().await;
        let first = store
            .add(&result("one"), "base", None, 16000, "s")
            .await
            .unwrap();
        let second = store
            .add(&result("two"), "base", None, 16000, "s")
            .await
            .unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn add_with_audio_archives_blob() {
        let (_dir, store) = store().await;
        let audio = sine(440.0, 0.3, 0.5);

        let entry = store
            .add(&result("with audio"), "base", Some(&audio), 16000, "s")
            .await
            .unwrap();

        let hash = entry.archive_hash.clone().unwrap();
        let (ref_count, path) = store.archive_object(&hash).await.unwrap().unwrap();
        assert_eq!(ref_count, 1);
        assert!(path.exists());
        assert!(store.verify_archive_integrity().await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_audio_shares_one_blob() {
        // R2: same buffer twice -> one blob, ref_count 2; deletes cascade
        let (_dir, store) = store().await;
        let audio = sine(440.0, 0.3, 0.5);

        let first = store
            .add(&result("first"), "base", Some(&audio), 16000, "s")
            .await
            .unwrap();
        let second = store
            .add(&result("second"), "base", Some(&audio), 16000, "s")
            .await
            .unwrap();

        let hash = first.archive_hash.clone().unwrap();
        assert_eq!(second.archive_hash.as_deref(), Some(hash.as_str()));

        let (ref_count, path) = store.archive_object(&hash).await.unwrap().unwrap();
        assert_eq!(ref_count, 2);

        assert!(store.delete(first.id).await.unwrap());
        let (ref_count, _) = store.archive_object(&hash).await.unwrap().unwrap();
        assert_eq!(ref_count, 1);
        assert!(path.exists());

        assert!(store.delete(second.id).await.unwrap());
        assert!(store.archive_object(&hash).await.unwrap().is_none());
        assert!(!path.exists());

        assert!(store.verify_archive_integrity().await.unwrap());
    }

    #[tokio::test]
    async fn delete_missing_entry_returns_false() {
        let (_dir, store) = store().await;
        assert!(!store.delete(12345).await.unwrap());
    }

    #[tokio::test]
    async fn list_recent_is_newest_first() {
        let (_dir, store) = store().await;
        for text in ["alpha", "beta", "gamma"] {
            store.add(&result(text), "base", None, 16000, "s").await.unwrap();
        }

        let entries = store.list_recent(2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "gamma");
        assert_eq!(entries[1].text, "beta");
    }

    #[tokio::test]
    async fn fts_search_matches_text() {
        let (_dir, store) = store().await;
        store
            .add(&result("the quick brown fox"), "base", None, 16000, "s")
            .await
            .unwrap();
        store
            .add(&result("lazy dogs sleep"), "base", None, 16000, "s")
            .await
            .unwrap();

        let hits = store
            .search("fox", &SearchFilters::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "the quick brown fox");

        let misses = store
            .search("elephant", &SearchFilters::default(), 10, 0)
            .await
            .unwrap();
        assert!(misses.is_empty());
    }

    #[tokio::test]
    async fn search_respects_language_filter() {
        let (_dir, store) = store().await;
        let mut spanish = result("hola mundo");
        spanish.language = "es".to_string();
        store.add(&spanish, "base", None, 16000, "s").await.unwrap();
        store
            .add(&result("hello world"), "base", None, 16000, "s")
            .await
            .unwrap();

        let filters = SearchFilters {
            language: Some("es".to_string()),
            ..Default::default()
        };
        let hits = store.search("", &filters, 10, 0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].language, "es");
    }

    #[tokio::test]
    async fn search_respects_favorite_filter() {
        let (_dir, store) = store().await;
        let entry = store
            .add(&result("starred"), "base", None, 16000, "s")
            .await
            .unwrap();
        store
            .add(&result("plain"), "base", None, 16000, "s")
            .await
            .unwrap();

        assert!(store.toggle_favorite(entry.id).await.unwrap());

        let filters = SearchFilters {
            favorites_only: true,
            ..Default::default()
        };
        let hits = store.search("", &filters, 10, 0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "starred");
    }

    #[tokio::test]
    async fn toggle_favorite_flips_and_returns_new_value() {
        let (_dir, store) = store().await;
        let entry = store
            .add(&result("fav"), "base", None, 16000, "s")
            .await
            .unwrap();

        assert!(store.toggle_favorite(entry.id).await.unwrap());
        assert!(!store.toggle_favorite(entry.id).await.unwrap());
    }

    #[tokio::test]
    async fn set_tags_updates_and_searches() {
        let (_dir, store) = store().await;
        let entry = store
            .add(&result("tagged entry"), "base", None, 16000, "s")
            .await
            .unwrap();

        store
            .set_tags(entry.id, &["work".to_string(), "meeting".to_string()])
            .await
            .unwrap();

        let fetched = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(fetched.tags, vec!["work", "meeting"]);

        // Tags are in the FTS index
        let hits = store
            .search("meeting", &SearchFilters::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn retention_sweep_enforces_max_entries() {
        let dir = TempDir::new().unwrap();
        let config = PersistenceConfig {
            max_entries: 2,
            ..Default::default()
        };
        let store = HistoryStore::open(
            &dir.path().join("history.db"),
            &dir.path().join("audio"),
            config,
        )
        .await
        .unwrap();

        for text in ["one", "two", "three", "four"] {
            store.add(&result(text), "base", None, 16000, "s").await.unwrap();
        }

        let deleted = store.retention_sweep().await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.entry_count().await.unwrap(), 2);

        let remaining = store.list_recent(10).await.unwrap();
        assert_eq!(remaining[0].text, "four");
        assert_eq!(remaining[1].text, "three");
    }

    #[tokio::test]
    async fn retention_sweep_cascades_archive_refcounts() {
        let dir = TempDir::new().unwrap();
        let config = PersistenceConfig {
            max_entries: 1,
            ..Default::default()
        };
        let store = HistoryStore::open(
            &dir.path().join("history.db"),
            &dir.path().join("audio"),
            config,
        )
        .await
        .unwrap();

        let audio = sine(440.0, 0.3, 0.2);
        let first = store
            .add(&result("old"), "base", Some(&audio), 16000, "s")
            .await
            .unwrap();
        store
            .add(&result("new"), "base", None, 16000, "s")
            .await
            .unwrap();

        let hash = first.archive_hash.unwrap();
        let (_, path) = store.archive_object(&hash).await.unwrap().unwrap();

        let deleted = store.retention_sweep().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.archive_object(&hash).await.unwrap().is_none());
        assert!(!path.exists());
        assert!(store.verify_archive_integrity().await.unwrap());
    }

    #[tokio::test]
    async fn export_json_contains_entries() {
        let (_dir, store) = store().await;
        store
            .add(&result("export me"), "base", None, 16000, "s")
            .await
            .unwrap();

        let json = store
            .export(ExportFormat::Json, "", &SearchFilters::default())
            .await
            .unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["text"], "export me");
    }

    #[tokio::test]
    async fn export_csv_escapes_commas() {
        let (_dir, store) = store().await;
        store
            .add(&result("hello, world"), "base", None, 16000, "s")
            .await
            .unwrap();

        let csv = store
            .export(ExportFormat::Csv, "", &SearchFilters::default())
            .await
            .unwrap();
        assert!(csv.starts_with("id,created_at"));
        assert!(csv.contains("\"hello, world\""));
    }

    #[tokio::test]
    async fn export_markdown_and_text() {
        let (_dir, store) = store().await;
        store
            .add(&result("notable quote"), "base", None, 16000, "s")
            .await
            .unwrap();

        let md = store
            .export(ExportFormat::Markdown, "", &SearchFilters::default())
            .await
            .unwrap();
        assert!(md.starts_with("# Transcription History"));
        assert!(md.contains("notable quote"));

        let text = store
            .export(ExportFormat::Text, "", &SearchFilters::default())
            .await
            .unwrap();
        assert!(text.contains("notable quote"));
    }

    #[tokio::test]
    async fn reopening_database_preserves_entries() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("history.db");
        let archive_root = dir.path().join("audio");

        {
            let store = HistoryStore::open(&db_path, &archive_root, PersistenceConfig::default())
                .await
                .unwrap();
            store
                .add(&result("persistent"), "base", None, 16000, "s")
                .await
                .unwrap();
        }

        let store = HistoryStore::open(&db_path, &archive_root, PersistenceConfig::default())
            .await
            .unwrap();
        assert_eq!(store.entry_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn deleted_archive_directory_degrades_gracefully() {
        let (dir, store) = store().await;
        let audio = sine(440.0, 0.3, 0.2);
        let entry = store
            .add(&result("audio gone"), "base", Some(&audio), 16000, "s")
            .await
            .unwrap();

        // Simulate the user deleting the audio directory
        std::fs::remove_dir_all(dir.path().join("audio")).unwrap();

        // The entry keeps its text; deleting it does not error
        let fetched = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(fetched.text, "audio gone");
        assert!(store.delete(entry.id).await.unwrap());
    }
}

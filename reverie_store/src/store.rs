// SQLite-backed embedding store.
//
// One row per finished generation in `generations`: the encoded parameter
// vector as a little-endian f64 BLOB, the genre, JSON metadata, an optional
// rating, and the insertion time in unix microseconds. Rating history lives
// in `feedback`. Ids come from SQLite's AUTOINCREMENT and are never reused.
//
// All access goes through one `Mutex<Connection>`, so writers are serialized
// and every read sees whole rows. Similarity search is a linear cosine scan
// over the (optionally genre-filtered) rows; each row decodes on its own.

use crate::error::StoreError;
use crate::record::{
    EmbeddingRecord, FeedbackEntry, RecordId, RecordMetadata, SimilarMatch, StoreStats,
};
use crate::vector::{GenerationParameters, ParameterVector};
use chrono::{DateTime, Utc};
use reverie_music::{Fingerprint, Genre};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS generations (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    genre       TEXT NOT NULL,
    vector      BLOB NOT NULL,
    metadata    TEXT NOT NULL,
    rating      REAL,
    created_at  INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_generations_genre_time
    ON generations (genre, created_at);
CREATE TABLE IF NOT EXISTS feedback (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    generation_id  INTEGER NOT NULL REFERENCES generations (id),
    rating         REAL NOT NULL,
    comment        TEXT,
    created_at     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_feedback_generation
    ON feedback (generation_id);
";

const RECORD_COLUMNS: &str = "id, genre, vector, metadata, rating, created_at";

pub struct EmbeddingStore {
    connection: Mutex<Connection>,
}

/// Columns of one `generations` row before decoding.
struct RawRecord {
    id: RecordId,
    genre: String,
    vector: Vec<u8>,
    metadata: String,
    rating: Option<f64>,
    created_at: i64,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            genre: row.get(1)?,
            vector: row.get(2)?,
            metadata: row.get(3)?,
            rating: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn decode(self) -> Result<EmbeddingRecord, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::Corrupt { id, reason };
        let genre: Genre = self.genre.parse().map_err(|e| corrupt(format!("{e}")))?;
        let vector = decode_vector(id, &self.vector)?;
        let metadata: RecordMetadata = serde_json::from_str(&self.metadata)
            .map_err(|e| corrupt(format!("metadata: {e}")))?;
        Ok(EmbeddingRecord {
            id,
            genre,
            vector,
            metadata,
            rating: self.rating,
            created_at: decode_time(id, self.created_at)?,
        })
    }
}

fn decode_vector(id: RecordId, blob: &[u8]) -> Result<ParameterVector, StoreError> {
    ParameterVector::from_blob(blob).ok_or_else(|| StoreError::Corrupt {
        id,
        reason: format!("vector blob of {} bytes", blob.len()),
    })
}

fn decode_time(id: RecordId, micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| StoreError::Corrupt {
        id,
        reason: format!("timestamp {micros} out of range"),
    })
}

impl EmbeddingStore {
    /// Open (creating if needed) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let connection = Connection::open(path)?;
        connection.pragma_update(None, "journal_mode", "WAL")?;
        connection.busy_timeout(Duration::from_secs(5))?;
        let store = Self::init(connection)?;
        tracing::debug!(path = %path.display(), "embedding store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(connection: Connection) -> Result<Self, StoreError> {
        connection.pragma_update(None, "foreign_keys", "ON")?;
        connection.execute_batch(SCHEMA)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Normalize and persist one finished generation.
    pub fn record(
        &self,
        parameters: &GenerationParameters,
        metadata: &RecordMetadata,
    ) -> Result<RecordId, StoreError> {
        self.record_vector(parameters.genre, &parameters.to_vector(), metadata)
    }

    /// Persist an already encoded vector.
    pub fn record_vector(
        &self,
        genre: Genre,
        vector: &ParameterVector,
        metadata: &RecordMetadata,
    ) -> Result<RecordId, StoreError> {
        self.insert(genre, vector, metadata, Utc::now())
    }

    pub(crate) fn insert(
        &self,
        genre: Genre,
        vector: &ParameterVector,
        metadata: &RecordMetadata,
        created_at: DateTime<Utc>,
    ) -> Result<RecordId, StoreError> {
        let vector = ParameterVector::new(vector.0)?;
        let metadata = serde_json::to_string(metadata)
            .map_err(|e| StoreError::InvalidVector(format!("metadata not serializable: {e}")))?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO generations (genre, vector, metadata, rating, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![
                genre.as_str(),
                vector.to_blob(),
                metadata,
                created_at.timestamp_micros()
            ],
        )?;
        let id = conn.last_insert_rowid();
        tracing::debug!(id, %genre, "generation recorded");
        Ok(id)
    }

    pub fn get(&self, id: RecordId) -> Result<EmbeddingRecord, StoreError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM generations WHERE id = ?1"),
                params![id],
                RawRecord::from_row,
            )
            .optional()?
            .ok_or(StoreError::UnknownRecord(id))?;
        raw.decode()
    }

    pub fn rate(&self, id: RecordId, rating: f64) -> Result<(), StoreError> {
        self.rate_with_comment(id, rating, None)
    }

    /// Set the record's current rating and append it to the feedback
    /// history. The stored vector is never touched.
    pub fn rate_with_comment(
        &self,
        id: RecordId,
        rating: f64,
        comment: Option<&str>,
    ) -> Result<(), StoreError> {
        if !rating.is_finite() {
            return Err(StoreError::InvalidRating(rating));
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE generations SET rating = ?1 WHERE id = ?2",
            params![rating, id],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownRecord(id));
        }
        tx.execute(
            "INSERT INTO feedback (generation_id, rating, comment, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, rating, comment, Utc::now().timestamp_micros()],
        )?;
        tx.commit()?;
        tracing::debug!(id, rating, "generation rated");
        Ok(())
    }

    /// Delete a record together with its feedback history.
    pub fn remove(&self, id: RecordId) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM feedback WHERE generation_id = ?1", params![id])?;
        let removed = tx.execute("DELETE FROM generations WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(StoreError::UnknownRecord(id));
        }
        tx.commit()?;
        tracing::debug!(id, "generation removed");
        Ok(())
    }

    pub fn feedback(&self, id: RecordId) -> Result<Vec<FeedbackEntry>, StoreError> {
        let conn = self.lock()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM generations WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::UnknownRecord(id));
        }
        let mut stmt = conn.prepare_cached(
            "SELECT rating, comment, created_at FROM feedback
             WHERE generation_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, f64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut entries = Vec::new();
        for row in rows {
            let (rating, comment, created_at) = row?;
            entries.push(FeedbackEntry {
                rating,
                comment,
                created_at: decode_time(id, created_at)?,
            });
        }
        Ok(entries)
    }

    /// The `k` records most cosine-similar to `query`, best first. Ties go
    /// to the most recent record, then the higher id.
    pub fn similar(
        &self,
        query: &ParameterVector,
        k: usize,
        genre: Option<Genre>,
    ) -> Result<Vec<SimilarMatch>, StoreError> {
        let query = ParameterVector::new(query.0)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, vector, created_at FROM generations
             WHERE ?1 IS NULL OR genre = ?1",
        )?;
        let rows = stmt.query_map(params![genre.map(Genre::as_str)], |row| {
            Ok((
                row.get::<_, RecordId>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut scored: Vec<(f64, i64, RecordId)> = Vec::new();
        for row in rows {
            let (id, blob, created_at) = row?;
            let vector = decode_vector(id, &blob)?;
            scored.push((query.cosine(&vector), created_at, id));
        }
        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then(b.2.cmp(&a.2))
        });
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(score, _, id)| SimilarMatch { id, score })
            .collect())
    }

    /// The `k` highest-rated records of `genre`. Unrated records are never
    /// returned.
    pub fn recommend(&self, genre: Genre, k: usize) -> Result<Vec<EmbeddingRecord>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {RECORD_COLUMNS} FROM generations
             WHERE genre = ?1 AND rating IS NOT NULL
             ORDER BY rating DESC, created_at DESC, id DESC
             LIMIT ?2"
        ))?;
        let limit = i64::try_from(k).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![genre.as_str(), limit], RawRecord::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.decode()?);
        }
        Ok(records)
    }

    /// Fingerprints saved with the most recent `limit` records of `genre`,
    /// newest first. Records without a fingerprint are skipped.
    pub fn recent_fingerprints(
        &self,
        genre: Genre,
        limit: usize,
    ) -> Result<Vec<Fingerprint>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id, metadata FROM generations WHERE genre = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![genre.as_str(), limit], |row| {
            Ok((row.get::<_, RecordId>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, json) = row?;
            let metadata: RecordMetadata =
                serde_json::from_str(&json).map_err(|e| StoreError::Corrupt {
                    id,
                    reason: format!("metadata: {e}"),
                })?;
            out.extend(metadata.fingerprint);
        }
        Ok(out)
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let conn = self.lock()?;
        let (total, rated, mean): (i64, i64, Option<f64>) = conn.query_row(
            "SELECT COUNT(*), COUNT(rating), AVG(rating) FROM generations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let mut stats = StoreStats {
            total_records: total.max(0) as usize,
            rated_records: rated.max(0) as usize,
            mean_rating: mean,
            ..StoreStats::default()
        };
        let mut stmt =
            conn.prepare_cached("SELECT genre, COUNT(*) FROM generations GROUP BY genre")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (name, count) = row?;
            match name.parse::<Genre>() {
                Ok(genre) => {
                    stats.per_genre.insert(genre, count.max(0) as usize);
                }
                Err(_) => tracing::warn!(genre = %name, "unknown genre in store"),
            }
        }
        Ok(stats)
    }
}

//! SQLite cache store for the orchestrator.
//!
//! One logical collection per project id, all stored in a single
//! database. Entry ids are deterministic functions of their defining
//! fields, so storing identical content twice overwrites in place.
//! Nearest-neighbor queries are a brute-force cosine scan over the
//! project's rows; acceptable for a per-project local cache at moderate
//! scale.

use chrono::{DateTime, Utc};
use reflex_core::{EntryKind, StoredEntry};
use sha2::{Digest, Sha256};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use thiserror::Error;

use crate::embedding;

/// Explicit column list for entries table queries.
/// Using explicit columns instead of SELECT * ensures correct mapping
/// regardless of column order in the database.
const ENTRIES_COLUMNS: &str =
    "id, kind, source, text, embedding, metadata_json, skill_name, input_hash, ttl_sec, created_at";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// A new entry to store in a project collection.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub text: String,
    pub kind: EntryKind,
    /// Origin tag (file path, skill name, component name).
    pub source: String,
    pub metadata: serde_json::Value,
    pub ttl_sec: Option<u64>,
}

/// Options for a semantic query.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub limit: usize,
    /// Restrict results to one entry kind.
    pub kind: Option<EntryKind>,
    /// Exact-match metadata filters (`key` → expected string value).
    pub filter: Vec<(String, String)>,
    /// Drop results scoring below this similarity.
    pub min_similarity: Option<f32>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: 5,
            kind: None,
            filter: Vec::new(),
            min_similarity: None,
        }
    }
}

/// A query result with its similarity score (nearest first).
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub entry: StoredEntry,
    pub similarity: f32,
}

/// A cache hit returned by [`CacheStore::check_cache`].
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub payload: serde_json::Value,
    pub stored_at: DateTime<Utc>,
}

/// Per-project entry counts.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub contexts: u64,
    pub caches: u64,
    pub documents: u64,
}

/// Deterministic id for a content entry: sha-256 of (kind, source, text).
pub fn entry_id(kind: EntryKind, source: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(source.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic id for a skill cache entry: sha-256 of (skill, input hash).
pub fn cache_entry_id(skill: &str, input_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"cache");
    hasher.update([0u8]);
    hasher.update(skill.as_bytes());
    hasher.update([0u8]);
    hasher.update(input_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable hash of (skill name, canonicalized input).
///
/// Inputs are canonicalized (RFC 8785 JCS) before hashing so that
/// key-order differences in otherwise identical JSON do not defeat the
/// cache.
pub fn skill_input_hash(skill: &str, input: &serde_json::Value) -> String {
    let canonical = serde_json_canonicalizer::to_string(input)
        .or_else(|_| serde_json::to_string(input))
        .unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(skill.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Persistent, project-partitioned vector store.
pub struct CacheStore {
    pool: Pool<Sqlite>,
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore").finish_non_exhaustive()
    }
}

impl CacheStore {
    /// Create a new store with the given database path.
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        // Enable WAL mode
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&pool)
            .await?;

        Ok(Self { pool })
    }

    /// Run embedded migrations (idempotent).
    pub async fn migrate_embedded(&self) -> Result<()> {
        let migrations = [include_str!("../../../migrations/0001_init.sql")];

        for migration_sql in migrations {
            // Remove comment lines before splitting.
            let cleaned: String = migration_sql
                .lines()
                .filter(|line| !line.trim().starts_with("--"))
                .collect::<Vec<_>>()
                .join("\n");

            for statement in cleaned.split(';') {
                let trimmed = statement.trim();
                if !trimmed.is_empty() {
                    match sqlx::query(trimmed).execute(&self.pool).await {
                        Ok(_) => {}
                        Err(e) => {
                            let msg = e.to_string();
                            // Ignore expected idempotent errors.
                            if !msg.contains("duplicate column") && !msg.contains("already exists")
                            {
                                return Err(e.into());
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // --- Entry operations ---

    /// Store an entry in a project collection, returning its id.
    ///
    /// The id derives from (kind, source, text); identical content
    /// overwrites the same row rather than duplicating it.
    pub async fn store(&self, project_id: &str, entry: &NewEntry) -> Result<String> {
        let id = entry_id(entry.kind, &entry.source, &entry.text);
        let blob = embedding::to_blob(&embedding::embed(&entry.text));
        let metadata_json = serde_json::to_string(&entry.metadata)?;
        let created_at = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO entries
                (project_id, id, kind, source, text, embedding, metadata_json,
                 skill_name, input_hash, ttl_sec, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, ?8, ?9)
            "#,
        )
        .bind(project_id)
        .bind(&id)
        .bind(entry.kind.as_str())
        .bind(&entry.source)
        .bind(&entry.text)
        .bind(&blob)
        .bind(&metadata_json)
        .bind(entry.ttl_sec.map(|t| t as i64))
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Fetch a single entry by id.
    pub async fn get_entry(&self, project_id: &str, id: &str) -> Result<Option<StoredEntry>> {
        let query = format!(
            "SELECT {} FROM entries WHERE project_id = ?1 AND id = ?2",
            ENTRIES_COLUMNS
        );
        let row = sqlx::query_as::<_, EntryRow>(&query)
            .bind(project_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(EntryRow::into_stored))
    }

    /// Semantic nearest-neighbor query over a project collection.
    ///
    /// Embeds `text`, scans candidate rows (optionally restricted by
    /// kind and exact-match metadata filters), scores each by cosine
    /// similarity, and returns the top `limit` unexpired results,
    /// nearest first. Expired entries are skipped, not trusted.
    pub async fn query(
        &self,
        project_id: &str,
        text: &str,
        opts: &QueryOptions,
    ) -> Result<Vec<QueryMatch>> {
        let mut sql = format!(
            "SELECT {} FROM entries WHERE project_id = ?1",
            ENTRIES_COLUMNS
        );
        if opts.kind.is_some() {
            sql.push_str(" AND kind = ?2");
        }
        for _ in &opts.filter {
            sql.push_str(" AND json_extract(metadata_json, ?) = ?");
        }

        let mut query = sqlx::query_as::<_, EntryRow>(&sql).bind(project_id);
        if let Some(kind) = opts.kind {
            query = query.bind(kind.as_str());
        }
        for (key, value) in &opts.filter {
            query = query.bind(format!("$.{key}")).bind(value);
        }

        let rows = query.fetch_all(&self.pool).await?;

        let query_vector = embedding::embed(text);
        let now = Utc::now();
        let mut matches: Vec<QueryMatch> = Vec::with_capacity(rows.len());
        for row in rows {
            let vector = embedding::from_blob(&row.embedding);
            let similarity = embedding::cosine_similarity(&query_vector, &vector);
            let entry = row.into_stored();
            if entry.is_expired_at(now) {
                continue;
            }
            if let Some(min) = opts.min_similarity {
                if similarity < min {
                    continue;
                }
            }
            matches.push(QueryMatch { entry, similarity });
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(opts.limit);
        Ok(matches)
    }

    // --- Skill cache operations ---

    /// Store a skill result under the hash of its input.
    pub async fn cache_result(
        &self,
        project_id: &str,
        skill: &str,
        input: &serde_json::Value,
        result: &serde_json::Value,
        ttl_sec: Option<u64>,
    ) -> Result<String> {
        let input_hash = skill_input_hash(skill, input);
        self.cache_result_hashed(project_id, skill, &input_hash, result, ttl_sec)
            .await
    }

    /// Store a skill result under an already-computed input hash.
    pub async fn cache_result_hashed(
        &self,
        project_id: &str,
        skill: &str,
        input_hash: &str,
        result: &serde_json::Value,
        ttl_sec: Option<u64>,
    ) -> Result<String> {
        let id = cache_entry_id(skill, input_hash);
        let text = serde_json::to_string(result)?;
        let blob = embedding::to_blob(&embedding::embed(&text));
        let metadata = serde_json::json!({
            "type": "cache",
            "skill": skill,
            "input_hash": input_hash,
        });
        let created_at = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO entries
                (project_id, id, kind, source, text, embedding, metadata_json,
                 skill_name, input_hash, ttl_sec, created_at)
            VALUES (?1, ?2, 'cache', ?3, ?4, ?5, ?6, ?3, ?7, ?8, ?9)
            "#,
        )
        .bind(project_id)
        .bind(&id)
        .bind(skill)
        .bind(&text)
        .bind(&blob)
        .bind(metadata.to_string())
        .bind(input_hash)
        .bind(ttl_sec.map(|t| t as i64))
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Exact cache lookup for a skill invocation.
    ///
    /// Verifies TTL at read time; an expired entry is deleted and
    /// reported as a miss.
    pub async fn check_cache(
        &self,
        project_id: &str,
        skill: &str,
        input_hash: &str,
    ) -> Result<Option<CacheHit>> {
        self.check_cache_at(project_id, skill, input_hash, Utc::now())
            .await
    }

    /// TTL check against an explicit `now`, so tests can simulate time.
    pub async fn check_cache_at(
        &self,
        project_id: &str,
        skill: &str,
        input_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CacheHit>> {
        let query = format!(
            "SELECT {} FROM entries \
             WHERE project_id = ?1 AND kind = 'cache' AND skill_name = ?2 AND input_hash = ?3",
            ENTRIES_COLUMNS
        );
        let row = sqlx::query_as::<_, EntryRow>(&query)
            .bind(project_id)
            .bind(skill)
            .bind(input_hash)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let entry = row.into_stored();
        if entry.is_expired_at(now) {
            sqlx::query("DELETE FROM entries WHERE project_id = ?1 AND id = ?2")
                .bind(project_id)
                .bind(&entry.id)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }

        let payload = serde_json::from_str(&entry.text)?;
        Ok(Some(CacheHit {
            payload,
            stored_at: entry.created_at,
        }))
    }

    // --- Maintenance operations ---

    /// Delete all expired entries in a project collection.
    ///
    /// Full scan by design; returns the number removed.
    pub async fn sweep_expired(&self, project_id: &str) -> Result<u64> {
        self.sweep_expired_at(project_id, Utc::now()).await
    }

    /// Sweep against an explicit `now`, so tests can simulate time.
    pub async fn sweep_expired_at(&self, project_id: &str, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM entries \
             WHERE project_id = ?1 AND ttl_sec IS NOT NULL \
               AND created_at + ttl_sec * 1000 < ?2",
        )
        .bind(project_id)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Destroy a project's entire collection.
    pub async fn delete_project(&self, project_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM entries WHERE project_id = ?1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Entry counts for a project collection.
    pub async fn stats(&self, project_id: &str) -> Result<StoreStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT kind, COUNT(*) FROM entries WHERE project_id = ?1 GROUP BY kind",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = StoreStats::default();
        for (kind, count) in rows {
            let count = count as u64;
            stats.total += count;
            match kind.as_str() {
                "context" => stats.contexts = count,
                "cache" => stats.caches = count,
                "document" => stats.documents = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Total entry count for a project collection.
    pub async fn count_entries(&self, project_id: &str) -> Result<u64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM entries WHERE project_id = ?1")
                .bind(project_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0 as u64)
    }
}

// --- Row types for SQLx ---

#[derive(sqlx::FromRow)]
struct EntryRow {
    id: String,
    kind: String,
    source: String,
    text: String,
    embedding: Vec<u8>,
    metadata_json: String,
    #[allow(dead_code)]
    skill_name: Option<String>,
    #[allow(dead_code)]
    input_hash: Option<String>,
    ttl_sec: Option<i64>,
    created_at: i64,
}

impl EntryRow {
    fn into_stored(self) -> StoredEntry {
        StoredEntry {
            id: self.id,
            kind: EntryKind::from_str_lossy(&self.kind),
            source: self.source,
            metadata: serde_json::from_str(&self.metadata_json)
                .unwrap_or(serde_json::Value::Null),
            text: self.text,
            created_at: DateTime::from_timestamp_millis(self.created_at).unwrap_or_default(),
            ttl_sec: self.ttl_sec.map(|t| t as u64),
        }
    }
}

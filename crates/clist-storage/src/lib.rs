//! HTTP fetch, document archive and cause-record storage for the ingester.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clist_core::{CauseEntry, RunLogEntry, RunStatus};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{PgConnection, Postgres, QueryBuilder, Row};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "clist-storage";

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Immutable, hash-addressed archive of downloaded cause-list documents.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn artifact_relative_path(
        &self,
        hearing_date: NaiveDate,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let ext = extension.trim_start_matches('.').trim();
        let ext = if ext.is_empty() { "bin" } else { ext };
        PathBuf::from(hearing_date.format("%Y-%m-%d").to_string())
            .join(format!("{content_hash}.{ext}"))
    }

    /// Store a document under its hearing date using a temp file + atomic rename.
    /// Re-storing identical bytes is a no-op reported as `deduplicated`.
    pub async fn store_document(
        &self,
        hearing_date: NaiveDate,
        extension: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.artifact_relative_path(hearing_date, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .with_context(|| format!("artifact path {} has no parent", absolute_path.display()))?;

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating artifact directory {}", parent.display()))?;

        let artifact = |deduplicated| StoredArtifact {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking artifact path {}", absolute_path.display()))?
        {
            return Ok(artifact(true));
        }

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp artifact file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp artifact file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp artifact file {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(artifact(false)),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(artifact(true))
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming temp artifact {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// The cause-list host serves a certificate chain that fails validation.
    /// Only enable this for that endpoint.
    pub accept_invalid_certs: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            accept_invalid_certs: false,
        }
    }
}

/// Typed outcome of a single failed fetch attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("not found: http {status} for {url}")]
    NotFound { url: String, status: u16 },
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
    #[error("server unavailable: http {status} for {url}")]
    Server { url: String, status: u16 },
}

impl FetchError {
    /// Timeouts, transport failures and server-side outages say the source
    /// is unreachable; a missing document says nothing about reachability.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout { .. } | FetchError::Network { .. } | FetchError::Server { .. }
        )
    }

    pub fn url(&self) -> &str {
        match self {
            FetchError::NotFound { url, .. }
            | FetchError::Timeout { url }
            | FetchError::Network { url, .. }
            | FetchError::Server { url, .. } => url,
        }
    }

    pub fn from_reqwest(url: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }

    /// 5xx and 429 mean the server is up but not serving; any other
    /// non-success status is treated as a missing resource.
    pub fn from_status(url: &str, status: StatusCode) -> Self {
        let url = url.to_string();
        let status = status.as_u16();
        if status >= 500 || status == StatusCode::TOO_MANY_REQUESTS.as_u16() {
            FetchError::Server { url, status }
        } else {
            FetchError::NotFound { url, status }
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

/// Single-attempt HTTP client. Callers decide what a failure means; nothing
/// here retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        let span = tracing::info_span!("http_fetch", url);
        async {
            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|err| FetchError::from_reqwest(url, &err))?;

            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::from_status(&final_url, status));
            }

            let body = resp
                .bytes()
                .await
                .map_err(|err| FetchError::from_reqwest(url, &err))?
                .to_vec();
            debug!(status = status.as_u16(), bytes = body.len(), "fetched");
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Persistence contract for cause records and run audit logs.
#[async_trait]
pub trait CauseStore: Send + Sync {
    async fn insert_batch(&self, entries: &[CauseEntry]) -> Result<u64, StoreError>;

    async fn delete_by_date(&self, hearing_date: NaiveDate) -> Result<u64, StoreError>;

    /// Delete every record for `hearing_date` and insert `entries` as one
    /// atomic unit. Readers see either the old snapshot or the new one.
    async fn replace_date(
        &self,
        hearing_date: NaiveDate,
        entries: &[CauseEntry],
    ) -> Result<u64, StoreError>;

    async fn entries_for_date(&self, hearing_date: NaiveDate)
        -> Result<Vec<CauseEntry>, StoreError>;

    async fn count_all(&self) -> Result<u64, StoreError>;

    async fn insert_run_log(&self, entry: &RunLogEntry) -> Result<(), StoreError>;

    /// Most recent first.
    async fn recent_logs(&self, limit: usize) -> Result<Vec<RunLogEntry>, StoreError>;
}

#[derive(Debug, Clone)]
struct StoredCause {
    id: Uuid,
    entry: CauseEntry,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<StoredCause>,
    logs: Vec<RunLogEntry>,
}

/// In-process store. Each operation runs under a single lock acquisition.
#[derive(Debug, Default)]
pub struct MemoryCauseStore {
    state: Mutex<MemoryState>,
}

impl MemoryCauseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn row_ids_for_date(&self, hearing_date: NaiveDate) -> Vec<Uuid> {
        let state = self.state.lock().await;
        state
            .rows
            .iter()
            .filter(|row| row.entry.hearing_date == hearing_date)
            .map(|row| row.id)
            .collect()
    }
}

fn stored(entries: &[CauseEntry]) -> impl Iterator<Item = StoredCause> + '_ {
    entries.iter().map(|entry| StoredCause {
        id: Uuid::new_v4(),
        entry: entry.clone(),
    })
}

#[async_trait]
impl CauseStore for MemoryCauseStore {
    async fn insert_batch(&self, entries: &[CauseEntry]) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.rows.extend(stored(entries));
        Ok(entries.len() as u64)
    }

    async fn delete_by_date(&self, hearing_date: NaiveDate) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.rows.len();
        state.rows.retain(|row| row.entry.hearing_date != hearing_date);
        Ok((before - state.rows.len()) as u64)
    }

    async fn replace_date(
        &self,
        hearing_date: NaiveDate,
        entries: &[CauseEntry],
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        state.rows.retain(|row| row.entry.hearing_date != hearing_date);
        state.rows.extend(stored(entries));
        Ok(entries.len() as u64)
    }

    async fn entries_for_date(
        &self,
        hearing_date: NaiveDate,
    ) -> Result<Vec<CauseEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .filter(|row| row.entry.hearing_date == hearing_date)
            .map(|row| row.entry.clone())
            .collect())
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        Ok(self.state.lock().await.rows.len() as u64)
    }

    async fn insert_run_log(&self, entry: &RunLogEntry) -> Result<(), StoreError> {
        self.state.lock().await.logs.push(entry.clone());
        Ok(())
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<RunLogEntry>, StoreError> {
        let state = self.state.lock().await;
        // Later inserts win ties on created_at.
        let mut logs: Vec<RunLogEntry> = state.logs.iter().rev().cloned().collect();
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        logs.truncate(limit);
        Ok(logs)
    }
}

/// Postgres binds are capped at 65535 per statement; 12 columns per row.
const INSERT_CHUNK_ROWS: usize = 1000;

/// PostgreSQL-backed store. Schema lives in the workspace `migrations/`.
#[derive(Debug, Clone)]
pub struct PgCauseStore {
    pool: PgPool,
}

impl PgCauseStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("cause store migrations applied");
        Ok(())
    }
}

async fn insert_rows(conn: &mut PgConnection, entries: &[CauseEntry]) -> Result<u64, sqlx::Error> {
    let mut inserted = 0u64;
    for chunk in entries.chunks(INSERT_CHUNK_ROWS) {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO causes (id, serial_no, court_no, case_no, petitioner, respondent, \
             advocate, case_type, hearing_date, hearing_time, raw_text, is_flagged) ",
        );
        builder.push_values(chunk, |mut row, entry| {
            row.push_bind(Uuid::new_v4())
                .push_bind(entry.serial_no.as_str())
                .push_bind(entry.court_no.as_str())
                .push_bind(entry.case_no.as_str())
                .push_bind(entry.petitioner.as_str())
                .push_bind(entry.respondent.as_str())
                .push_bind(entry.advocate.as_str())
                .push_bind(entry.case_type.as_str())
                .push_bind(entry.hearing_date)
                .push_bind(entry.hearing_time)
                .push_bind(entry.raw_text.as_str())
                .push_bind(entry.is_flagged);
        });
        inserted += builder.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

fn cause_from_row(row: &PgRow) -> Result<CauseEntry, sqlx::Error> {
    Ok(CauseEntry {
        serial_no: row.try_get("serial_no")?,
        court_no: row.try_get("court_no")?,
        case_no: row.try_get("case_no")?,
        petitioner: row.try_get("petitioner")?,
        respondent: row.try_get("respondent")?,
        advocate: row.try_get("advocate")?,
        case_type: row.try_get("case_type")?,
        hearing_date: row.try_get::<NaiveDate, _>("hearing_date")?,
        hearing_time: row.try_get::<Option<NaiveTime>, _>("hearing_time")?,
        raw_text: row.try_get("raw_text")?,
        is_flagged: row.try_get("is_flagged")?,
    })
}

fn run_log_from_row(row: &PgRow) -> Result<RunLogEntry, StoreError> {
    let status: String = row.try_get("status")?;
    let status = RunStatus::from_db_str(&status)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown run status {status:?}")))?;
    let records: i64 = row.try_get("records_extracted")?;
    Ok(RunLogEntry {
        id: row.try_get("id")?,
        status,
        records_extracted: records.max(0) as u64,
        notes: row.try_get("notes")?,
        run_date: row.try_get("run_date")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

#[async_trait]
impl CauseStore for PgCauseStore {
    async fn insert_batch(&self, entries: &[CauseEntry]) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let inserted = insert_rows(&mut tx, entries).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn delete_by_date(&self, hearing_date: NaiveDate) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM causes WHERE hearing_date = $1")
            .bind(hearing_date)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn replace_date(
        &self,
        hearing_date: NaiveDate,
        entries: &[CauseEntry],
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query("DELETE FROM causes WHERE hearing_date = $1")
            .bind(hearing_date)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let inserted = insert_rows(&mut tx, entries).await?;
        tx.commit().await?;
        debug!(%hearing_date, deleted, inserted, "replaced date snapshot");
        Ok(inserted)
    }

    async fn entries_for_date(
        &self,
        hearing_date: NaiveDate,
    ) -> Result<Vec<CauseEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT serial_no, court_no, case_no, petitioner, respondent, advocate,
                   case_type, hearing_date, hearing_time, raw_text, is_flagged
              FROM causes
             WHERE hearing_date = $1
             ORDER BY seq
            "#,
        )
        .bind(hearing_date)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(cause_from_row(row)?);
        }
        Ok(out)
    }

    async fn count_all(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM causes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn insert_run_log(&self, entry: &RunLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO run_logs (id, status, records_extracted, notes, run_date, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.status.as_str())
        .bind(i64::try_from(entry.records_extracted).unwrap_or(i64::MAX))
        .bind(entry.notes.as_deref())
        .bind(entry.run_date)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn recent_logs(&self, limit: usize) -> Result<Vec<RunLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, status, records_extracted, notes, run_date, created_at
              FROM run_logs
             ORDER BY created_at DESC
             LIMIT $1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(run_log_from_row).collect()
    }
}

//! Job Record Store: rusqlite-backed persistence for the six core entities.
//!
//! Mirrors the teacher's `FactoryDb`/`DbHandle` shape: a synchronous
//! connection wrapper with migrations run via `execute_batch`, intermediate
//! row structs that parse stringly-typed enum columns, and a thin
//! `Arc<Mutex<_>>` handle that moves blocking SQLite calls onto
//! `spawn_blocking` so async callers never block the runtime.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::domain::*;
use crate::errors::StoreError;

/// Synchronous SQLite access. Not `Send`-shared directly; always accessed
/// through `DbHandle`.
pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.run_migrations()
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS videos (
                id TEXT PRIMARY KEY,
                blob_path TEXT NOT NULL,
                original_name TEXT NOT NULL,
                byte_size INTEGER NOT NULL,
                duration_sec REAL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS analysis_jobs (
                id TEXT PRIMARY KEY,
                video_id TEXT NOT NULL REFERENCES videos(id),
                status TEXT NOT NULL,
                purpose TEXT NOT NULL,
                platform TEXT NOT NULL,
                target_audience TEXT NOT NULL,
                overall_score REAL,
                risk_level TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE TABLE IF NOT EXISTS risk_items (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL REFERENCES analysis_jobs(id) ON DELETE CASCADE,
                start_sec REAL NOT NULL,
                end_sec REAL NOT NULL,
                category TEXT NOT NULL,
                subcategory TEXT NOT NULL,
                score REAL NOT NULL,
                level TEXT NOT NULL,
                rationale TEXT NOT NULL,
                source TEXT NOT NULL,
                evidence TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS edit_sessions (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL UNIQUE REFERENCES analysis_jobs(id),
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS edit_actions (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES edit_sessions(id) ON DELETE CASCADE,
                action_type TEXT NOT NULL,
                start_sec REAL NOT NULL,
                end_sec REAL NOT NULL,
                risk_item_id TEXT,
                options_json TEXT
            );

            CREATE TABLE IF NOT EXISTS export_jobs (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES edit_sessions(id),
                status TEXT NOT NULL,
                output_blob_path TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_video ON analysis_jobs(video_id);
            CREATE INDEX IF NOT EXISTS idx_risk_items_job ON risk_items(job_id);
            CREATE INDEX IF NOT EXISTS idx_edit_actions_session ON edit_actions(session_id);
            CREATE INDEX IF NOT EXISTS idx_export_jobs_session ON export_jobs(session_id);
            ",
        )?;
        Ok(())
    }

    // ── Videos ──────────────────────────────────────────────────────

    pub fn create_video(&self, blob_path: &str, original_name: &str, byte_size: i64) -> Result<Video> {
        let id = Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO videos (id, blob_path, original_name, byte_size, duration_sec, created_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![id, blob_path, original_name, byte_size, created_at],
        )?;
        Ok(Video {
            id,
            blob_path: blob_path.to_string(),
            original_name: original_name.to_string(),
            byte_size,
            duration_sec: None,
            created_at,
        })
    }

    pub fn get_video(&self, id: &str) -> Result<Option<Video>> {
        self.conn
            .query_row(
                "SELECT id, blob_path, original_name, byte_size, duration_sec, created_at
                 FROM videos WHERE id = ?1",
                params![id],
                |row| {
                    Ok(VideoRow {
                        id: row.get(0)?,
                        blob_path: row.get(1)?,
                        original_name: row.get(2)?,
                        byte_size: row.get(3)?,
                        duration_sec: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                },
            )
            .optional()?
            .map(|r| Ok(r.into_video()))
            .transpose()
    }

    // ── Analysis jobs ───────────────────────────────────────────────

    pub fn create_analysis_job(&self, video_id: &str, metadata: &JobMetadata) -> Result<AnalysisJob> {
        let id = Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO analysis_jobs
             (id, video_id, status, purpose, platform, target_audience, overall_score, risk_level, error, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, NULL, ?7, NULL)",
            params![
                id,
                video_id,
                JobStatus::Pending.as_str(),
                metadata.purpose,
                metadata.platform,
                metadata.target_audience,
                created_at,
            ],
        )?;
        Ok(AnalysisJob {
            id,
            video_id: video_id.to_string(),
            status: JobStatus::Pending,
            metadata: metadata.clone(),
            overall_score: None,
            risk_level: None,
            error: None,
            created_at,
            completed_at: None,
        })
    }

    pub fn get_job(&self, id: &str) -> Result<Option<AnalysisJob>> {
        self.conn
            .query_row(
                "SELECT id, video_id, status, purpose, platform, target_audience,
                        overall_score, risk_level, error, created_at, completed_at
                 FROM analysis_jobs WHERE id = ?1",
                params![id],
                job_row_from_row,
            )
            .optional()?
            .map(|r| r.into_job())
            .transpose()
    }

    pub fn list_jobs(&self) -> Result<Vec<AnalysisJob>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, video_id, status, purpose, platform, target_audience,
                    overall_score, risk_level, error, created_at, completed_at
             FROM analysis_jobs ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], job_row_from_row)?;
        let mut jobs = Vec::new();
        for row in rows {
            jobs.push(row?.into_job()?);
        }
        Ok(jobs)
    }

    /// Updates a single phase-less terminal transition: status, overall
    /// score, risk level, error and completed_at.
    pub fn finalize_job(
        &self,
        id: &str,
        status: JobStatus,
        overall_score: Option<f64>,
        risk_level: Option<RiskLevel>,
        error: Option<&str>,
    ) -> Result<AnalysisJob> {
        let completed_at = if status.is_terminal() {
            Some(chrono::Utc::now().to_rfc3339())
        } else {
            None
        };
        self.conn.execute(
            "UPDATE analysis_jobs
             SET status = ?1, overall_score = ?2, risk_level = ?3, error = ?4, completed_at = ?5
             WHERE id = ?6",
            params![
                status.as_str(),
                overall_score,
                risk_level.map(|l| l.as_str()),
                error,
                completed_at,
                id,
            ],
        )?;
        self.get_job(id)?
            .ok_or_else(|| StoreError::JobNotFound { id: id.to_string() }.into())
    }

    pub fn mark_job_processing(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE analysis_jobs SET status = ?1 WHERE id = ?2",
            params![JobStatus::Processing.as_str(), id],
        )?;
        Ok(())
    }

    // ── Risk items ───────────────────────────────────────────────────

    /// Deletes any existing risk items for the job then inserts the given
    /// set in one transaction — the idempotency strategy §9 recommends for
    /// retried risk-phase persistence.
    pub fn replace_risk_items(&mut self, job_id: &str, items: &[RiskItem]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM risk_items WHERE job_id = ?1", params![job_id])?;
        for item in items {
            tx.execute(
                "INSERT INTO risk_items
                 (id, job_id, start_sec, end_sec, category, subcategory, score, level, rationale, source, evidence)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    item.id,
                    job_id,
                    item.start_sec,
                    item.end_sec,
                    item.category.as_str(),
                    item.subcategory,
                    item.score,
                    item.level.as_str(),
                    item.rationale,
                    item.source.as_str(),
                    item.evidence,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn list_risk_items(&self, job_id: &str) -> Result<Vec<RiskItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_id, start_sec, end_sec, category, subcategory, score, level, rationale, source, evidence
             FROM risk_items WHERE job_id = ?1 ORDER BY start_sec ASC",
        )?;
        let rows = stmt.query_map(params![job_id], risk_item_row_from_row)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?.into_risk_item()?);
        }
        Ok(items)
    }

    // ── Edit sessions ────────────────────────────────────────────────

    pub fn get_or_create_session(&self, job_id: &str) -> Result<EditSession> {
        if let Some(session) = self.get_session_by_job(job_id)? {
            return Ok(session);
        }
        let id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO edit_sessions (id, job_id, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![id, job_id, EditSessionStatus::Active.as_str(), now],
        )?;
        Ok(EditSession {
            id,
            job_id: job_id.to_string(),
            status: EditSessionStatus::Active,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn get_session(&self, id: &str) -> Result<Option<EditSession>> {
        self.conn
            .query_row(
                "SELECT id, job_id, status, created_at, updated_at FROM edit_sessions WHERE id = ?1",
                params![id],
                session_row_from_row,
            )
            .optional()?
            .map(|r| r.into_session())
            .transpose()
    }

    pub fn get_session_by_job(&self, job_id: &str) -> Result<Option<EditSession>> {
        self.conn
            .query_row(
                "SELECT id, job_id, status, created_at, updated_at FROM edit_sessions WHERE job_id = ?1",
                params![job_id],
                session_row_from_row,
            )
            .optional()?
            .map(|r| r.into_session())
            .transpose()
    }

    pub fn set_session_status(&self, session_id: &str, status: EditSessionStatus) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "UPDATE edit_sessions SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now, session_id],
        )?;
        Ok(())
    }

    // ── Edit actions ─────────────────────────────────────────────────

    pub fn list_edit_actions(&self, session_id: &str) -> Result<Vec<EditAction>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, action_type, start_sec, end_sec, risk_item_id, options_json
             FROM edit_actions WHERE session_id = ?1 ORDER BY start_sec ASC",
        )?;
        let rows = stmt.query_map(params![session_id], edit_action_row_from_row)?;
        let mut actions = Vec::new();
        for row in rows {
            actions.push(row?.into_edit_action()?);
        }
        Ok(actions)
    }

    /// Replaces the action set per §4.4: update kept actions, insert new
    /// ones, delete dropped ones, all in one transaction.
    pub fn replace_edit_actions(
        &mut self,
        session_id: &str,
        kept: &[EditAction],
        new: &[EditAction],
        dropped_ids: &[String],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        for action in kept {
            let options_json = action
                .options
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "UPDATE edit_actions
                 SET action_type = ?1, start_sec = ?2, end_sec = ?3, risk_item_id = ?4, options_json = ?5
                 WHERE id = ?6 AND session_id = ?7",
                params![
                    action.action_type.as_str(),
                    action.start_sec,
                    action.end_sec,
                    action.risk_item_id,
                    options_json,
                    action.id,
                    session_id,
                ],
            )?;
        }
        for action in new {
            let options_json = action
                .options
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO edit_actions (id, session_id, action_type, start_sec, end_sec, risk_item_id, options_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    action.id,
                    session_id,
                    action.action_type.as_str(),
                    action.start_sec,
                    action.end_sec,
                    action.risk_item_id,
                    options_json,
                ],
            )?;
        }
        for id in dropped_ids {
            tx.execute(
                "DELETE FROM edit_actions WHERE id = ?1 AND session_id = ?2",
                params![id, session_id],
            )?;
        }
        tx.execute(
            "UPDATE edit_sessions SET updated_at = ?1 WHERE id = ?2",
            params![chrono::Utc::now().to_rfc3339(), session_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    // ── Export jobs ──────────────────────────────────────────────────

    pub fn create_export_job(&self, session_id: &str) -> Result<ExportJob> {
        let id = Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO export_jobs (id, session_id, status, output_blob_path, error, created_at, completed_at)
             VALUES (?1, ?2, ?3, NULL, NULL, ?4, NULL)",
            params![id, session_id, ExportStatus::Pending.as_str(), created_at],
        )?;
        Ok(ExportJob {
            id,
            session_id: session_id.to_string(),
            status: ExportStatus::Pending,
            output_blob_path: None,
            error: None,
            created_at,
            completed_at: None,
        })
    }

    pub fn latest_export_job(&self, session_id: &str) -> Result<Option<ExportJob>> {
        self.conn
            .query_row(
                "SELECT id, session_id, status, output_blob_path, error, created_at, completed_at
                 FROM export_jobs WHERE session_id = ?1 ORDER BY created_at DESC LIMIT 1",
                params![session_id],
                export_job_row_from_row,
            )
            .optional()?
            .map(|r| r.into_export_job())
            .transpose()
    }

    pub fn get_export_job(&self, id: &str) -> Result<Option<ExportJob>> {
        self.conn
            .query_row(
                "SELECT id, session_id, status, output_blob_path, error, created_at, completed_at
                 FROM export_jobs WHERE id = ?1",
                params![id],
                export_job_row_from_row,
            )
            .optional()?
            .map(|r| r.into_export_job())
            .transpose()
    }

    pub fn update_export_job(
        &self,
        id: &str,
        status: ExportStatus,
        output_blob_path: Option<&str>,
        error: Option<&str>,
    ) -> Result<ExportJob> {
        let completed_at = if matches!(status, ExportStatus::Completed | ExportStatus::Failed) {
            Some(chrono::Utc::now().to_rfc3339())
        } else {
            None
        };
        self.conn.execute(
            "UPDATE export_jobs SET status = ?1, output_blob_path = ?2, error = ?3, completed_at = ?4 WHERE id = ?5",
            params![status.as_str(), output_blob_path, error, completed_at, id],
        )?;
        self.get_export_job(id)?
            .ok_or_else(|| StoreError::ExportNotFound { id: id.to_string() }.into())
    }
}

// ── Row structs: convert raw SQL columns into typed domain structs ────

struct VideoRow {
    id: String,
    blob_path: String,
    original_name: String,
    byte_size: i64,
    duration_sec: Option<f64>,
    created_at: String,
}

impl VideoRow {
    fn into_video(self) -> Video {
        Video {
            id: self.id,
            blob_path: self.blob_path,
            original_name: self.original_name,
            byte_size: self.byte_size,
            duration_sec: self.duration_sec,
            created_at: self.created_at,
        }
    }
}

struct JobRow {
    id: String,
    video_id: String,
    status: String,
    purpose: String,
    platform: String,
    target_audience: String,
    overall_score: Option<f64>,
    risk_level: Option<String>,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

fn job_row_from_row(row: &rusqlite::Row) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        video_id: row.get(1)?,
        status: row.get(2)?,
        purpose: row.get(3)?,
        platform: row.get(4)?,
        target_audience: row.get(5)?,
        overall_score: row.get(6)?,
        risk_level: row.get(7)?,
        error: row.get(8)?,
        created_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

impl JobRow {
    fn into_job(self) -> Result<AnalysisJob> {
        Ok(AnalysisJob {
            id: self.id,
            video_id: self.video_id,
            status: JobStatus::from_str(&self.status).map_err(StoreError::Constraint)?,
            metadata: JobMetadata {
                purpose: self.purpose,
                platform: self.platform,
                target_audience: self.target_audience,
            },
            overall_score: self.overall_score,
            risk_level: self
                .risk_level
                .map(|s| RiskLevel::from_str(&s))
                .transpose()
                .map_err(StoreError::Constraint)?,
            error: self.error,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

struct RiskItemRow {
    id: String,
    job_id: String,
    start_sec: f64,
    end_sec: f64,
    category: String,
    subcategory: String,
    score: f64,
    level: String,
    rationale: String,
    source: String,
    evidence: String,
}

fn risk_item_row_from_row(row: &rusqlite::Row) -> rusqlite::Result<RiskItemRow> {
    Ok(RiskItemRow {
        id: row.get(0)?,
        job_id: row.get(1)?,
        start_sec: row.get(2)?,
        end_sec: row.get(3)?,
        category: row.get(4)?,
        subcategory: row.get(5)?,
        score: row.get(6)?,
        level: row.get(7)?,
        rationale: row.get(8)?,
        source: row.get(9)?,
        evidence: row.get(10)?,
    })
}

impl RiskItemRow {
    fn into_risk_item(self) -> Result<RiskItem> {
        Ok(RiskItem {
            id: self.id,
            job_id: self.job_id,
            start_sec: self.start_sec,
            end_sec: self.end_sec,
            category: RiskCategory::from_str(&self.category).map_err(StoreError::Constraint)?,
            subcategory: self.subcategory,
            score: self.score,
            level: RiskLevel::from_str(&self.level).map_err(StoreError::Constraint)?,
            rationale: self.rationale,
            source: RiskSource::from_str(&self.source).map_err(StoreError::Constraint)?,
            evidence: self.evidence,
        })
    }
}

struct SessionRow {
    id: String,
    job_id: String,
    status: String,
    created_at: String,
    updated_at: String,
}

fn session_row_from_row(row: &rusqlite::Row) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        job_id: row.get(1)?,
        status: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

impl SessionRow {
    fn into_session(self) -> Result<EditSession> {
        Ok(EditSession {
            id: self.id,
            job_id: self.job_id,
            status: EditSessionStatus::from_str(&self.status).map_err(StoreError::Constraint)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct EditActionRow {
    id: String,
    session_id: String,
    action_type: String,
    start_sec: f64,
    end_sec: f64,
    risk_item_id: Option<String>,
    options_json: Option<String>,
}

fn edit_action_row_from_row(row: &rusqlite::Row) -> rusqlite::Result<EditActionRow> {
    Ok(EditActionRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        action_type: row.get(2)?,
        start_sec: row.get(3)?,
        end_sec: row.get(4)?,
        risk_item_id: row.get(5)?,
        options_json: row.get(6)?,
    })
}

impl EditActionRow {
    fn into_edit_action(self) -> Result<EditAction> {
        let options = self
            .options_json
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .context("failed to parse edit action options")?;
        Ok(EditAction {
            id: self.id,
            session_id: self.session_id,
            action_type: EditActionType::from_str(&self.action_type).map_err(StoreError::Constraint)?,
            start_sec: self.start_sec,
            end_sec: self.end_sec,
            risk_item_id: self.risk_item_id,
            options,
        })
    }
}

struct ExportJobRow {
    id: String,
    session_id: String,
    status: String,
    output_blob_path: Option<String>,
    error: Option<String>,
    created_at: String,
    completed_at: Option<String>,
}

fn export_job_row_from_row(row: &rusqlite::Row) -> rusqlite::Result<ExportJobRow> {
    Ok(ExportJobRow {
        id: row.get(0)?,
        session_id: row.get(1)?,
        status: row.get(2)?,
        output_blob_path: row.get(3)?,
        error: row.get(4)?,
        created_at: row.get(5)?,
        completed_at: row.get(6)?,
    })
}

impl ExportJobRow {
    fn into_export_job(self) -> Result<ExportJob> {
        Ok(ExportJob {
            id: self.id,
            session_id: self.session_id,
            status: ExportStatus::from_str(&self.status).map_err(StoreError::Constraint)?,
            output_blob_path: self.output_blob_path,
            error: self.error,
            created_at: self.created_at,
            completed_at: self.completed_at,
        })
    }
}

/// Thin handle that moves blocking SQLite access onto `spawn_blocking`.
#[derive(Clone)]
pub struct DbHandle(Arc<Mutex<Db>>);

impl DbHandle {
    pub fn new(db: Db) -> Self {
        Self(Arc::new(Mutex::new(db)))
    }

    pub async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Db) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&mut guard)
        })
        .await
        .context("database task panicked")?
    }
}

/// Convenience wrapper exposing domain-level async operations over a
/// `DbHandle`. Handlers call through this rather than `DbHandle::call`
/// directly so the store's SQL vocabulary stays out of `src/api`.
#[derive(Clone)]
pub struct JobStore {
    pub handle: DbHandle,
}

impl JobStore {
    pub fn new(db: Db) -> Self {
        Self {
            handle: DbHandle::new(db),
        }
    }

    pub async fn create_video(&self, blob_path: String, original_name: String, byte_size: i64) -> Result<Video> {
        self.handle
            .call(move |db| db.create_video(&blob_path, &original_name, byte_size))
            .await
    }

    pub async fn get_video(&self, id: String) -> Result<Option<Video>> {
        self.handle.call(move |db| db.get_video(&id)).await
    }

    pub async fn create_analysis_job(&self, video_id: String, metadata: JobMetadata) -> Result<AnalysisJob> {
        self.handle
            .call(move |db| db.create_analysis_job(&video_id, &metadata))
            .await
    }

    pub async fn get_job(&self, id: String) -> Result<Option<AnalysisJob>> {
        self.handle.call(move |db| db.get_job(&id)).await
    }

    pub async fn list_jobs(&self) -> Result<Vec<AnalysisJob>> {
        self.handle.call(|db| db.list_jobs()).await
    }

    pub async fn mark_job_processing(&self, id: String) -> Result<()> {
        self.handle.call(move |db| db.mark_job_processing(&id)).await
    }

    pub async fn finalize_job(
        &self,
        id: String,
        status: JobStatus,
        overall_score: Option<f64>,
        risk_level: Option<RiskLevel>,
        error: Option<String>,
    ) -> Result<AnalysisJob> {
        self.handle
            .call(move |db| db.finalize_job(&id, status, overall_score, risk_level, error.as_deref()))
            .await
    }

    pub async fn replace_risk_items(&self, job_id: String, items: Vec<RiskItem>) -> Result<()> {
        self.handle
            .call(move |db| db.replace_risk_items(&job_id, &items))
            .await
    }

    pub async fn list_risk_items(&self, job_id: String) -> Result<Vec<RiskItem>> {
        self.handle.call(move |db| db.list_risk_items(&job_id)).await
    }

    pub async fn get_or_create_session(&self, job_id: String) -> Result<EditSession> {
        self.handle
            .call(move |db| db.get_or_create_session(&job_id))
            .await
    }

    pub async fn get_session(&self, id: String) -> Result<Option<EditSession>> {
        self.handle.call(move |db| db.get_session(&id)).await
    }

    pub async fn list_edit_actions(&self, session_id: String) -> Result<Vec<EditAction>> {
        self.handle
            .call(move |db| db.list_edit_actions(&session_id))
            .await
    }

    pub async fn replace_edit_actions(
        &self,
        session_id: String,
        kept: Vec<EditAction>,
        new: Vec<EditAction>,
        dropped_ids: Vec<String>,
    ) -> Result<()> {
        self.handle
            .call(move |db| db.replace_edit_actions(&session_id, &kept, &new, &dropped_ids))
            .await
    }

    pub async fn set_session_status(&self, session_id: String, status: EditSessionStatus) -> Result<()> {
        self.handle
            .call(move |db| db.set_session_status(&session_id, status))
            .await
    }

    pub async fn create_export_job(&self, session_id: String) -> Result<ExportJob> {
        self.handle
            .call(move |db| db.create_export_job(&session_id))
            .await
    }

    pub async fn latest_export_job(&self, session_id: String) -> Result<Option<ExportJob>> {
        self.handle
            .call(move |db| db.latest_export_job(&session_id))
            .await
    }

    pub async fn get_export_job(&self, id: String) -> Result<Option<ExportJob>> {
        self.handle.call(move |db| db.get_export_job(&id)).await
    }

    pub async fn update_export_job(
        &self,
        id: String,
        status: ExportStatus,
        output_blob_path: Option<String>,
        error: Option<String>,
    ) -> Result<ExportJob> {
        self.handle
            .call(move |db| db.update_export_job(&id, status, output_blob_path.as_deref(), error.as_deref()))
            .await
    }
}

//! Run Records
//!
//! Persists [`RunState`] snapshots keyed by run id so finished runs can be
//! inspected after the process exits. Opening a store never rewrites
//! records; [`RunStore::recover_interrupted`] fails active runs whose
//! driver stopped updating them.
//!
//! Terminal records are final: a later save of the same run is ignored.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::database::{Database, SharedDatabase};
use crate::types::{ReportError, Result, ResultExt};
use crate::workflow::run::{FailureKind, RunFailure, RunId, RunState, RunStatus, StageStatus};

const INTERRUPTED: &str = "interrupted";

const SELECT_COLUMNS: &str = "id, status, config, stages, document, error, warnings, outputs,
     sections_total, sections_completed, created_at, finished_at";

/// Columns of one `runs` row before JSON decoding
struct RunRow {
    id: String,
    status: String,
    config: String,
    stages: String,
    document: Option<String>,
    error: Option<String>,
    warnings: String,
    outputs: String,
    sections_total: i64,
    sections_completed: i64,
    created_at: String,
    finished_at: Option<String>,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            status: row.get(1)?,
            config: row.get(2)?,
            stages: row.get(3)?,
            document: row.get(4)?,
            error: row.get(5)?,
            warnings: row.get(6)?,
            outputs: row.get(7)?,
            sections_total: row.get(8)?,
            sections_completed: row.get(9)?,
            created_at: row.get(10)?,
            finished_at: row.get(11)?,
        })
    }

    fn decode(self) -> Result<RunState> {
        let id = self.id.parse::<RunId>().map_err(ReportError::Storage)?;
        let status = self.status.parse::<RunStatus>().map_err(ReportError::Storage)?;

        Ok(RunState {
            id,
            config: serde_json::from_str(&self.config)?,
            status,
            stages: serde_json::from_str(&self.stages)?,
            document: self.document.as_deref().map(serde_json::from_str).transpose()?,
            error: self.error.as_deref().map(serde_json::from_str).transpose()?,
            warnings: serde_json::from_str(&self.warnings)?,
            outputs: serde_json::from_str(&self.outputs)?,
            sections_total: self.sections_total.max(0) as usize,
            sections_completed: self.sections_completed.max(0) as usize,
            created_at: parse_timestamp(&self.created_at)?,
            finished_at: self.finished_at.as_deref().map(parse_timestamp).transpose()?,
        })
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .with_context_fn(|| format!("Invalid timestamp in run record: {}", value))
}

fn upsert(conn: &Connection, state: &RunState) -> Result<()> {
    let document = state.document.as_ref().map(serde_json::to_string).transpose()?;
    let error = state.error.as_ref().map(serde_json::to_string).transpose()?;

    conn.execute(
        "INSERT INTO runs (id, status, topic, config, stages, document, error, warnings,
                           outputs, sections_total, sections_completed, created_at,
                           finished_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(id) DO UPDATE SET
             status = excluded.status,
             stages = excluded.stages,
             document = excluded.document,
             error = excluded.error,
             warnings = excluded.warnings,
             outputs = excluded.outputs,
             sections_total = excluded.sections_total,
             sections_completed = excluded.sections_completed,
             finished_at = excluded.finished_at,
             updated_at = excluded.updated_at
         WHERE runs.status NOT IN ('succeeded', 'failed', 'cancelled')",
        params![
            state.id.to_string(),
            state.status.as_str(),
            state.config.topic,
            serde_json::to_string(&state.config)?,
            serde_json::to_string(&state.stages)?,
            document,
            error,
            serde_json::to_string(&state.warnings)?,
            serde_json::to_string(&state.outputs)?,
            state.sections_total as i64,
            state.sections_completed as i64,
            timestamp(state.created_at),
            state.finished_at.map(timestamp),
            timestamp(Utc::now()),
        ],
    )
    .with_context_fn(|| format!("Failed to save run {}", state.id))?;
    Ok(())
}

/// Mark a run the previous process left active as failed
fn mark_interrupted(state: &mut RunState) {
    let now = Utc::now();
    for stage in &mut state.stages {
        if stage.status == StageStatus::Running {
            stage.status = StageStatus::Failed;
            stage.error = Some(INTERRUPTED.to_string());
            stage.finished_at = Some(now);
        }
    }
    state.status = RunStatus::Failed;
    state.document = None;
    state.error = Some(RunFailure {
        stage: None,
        kind: FailureKind::Interrupted,
        message: INTERRUPTED.to_string(),
        attempts: 0,
    });
    state.finished_at = Some(now);
}

/// SQLite-backed store of run records
pub struct RunStore {
    db: SharedDatabase,
}

impl RunStore {
    /// Open (or create) the store
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Database::open(path)?;
        Self::with_database(Arc::new(db))
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_database(Arc::new(Database::open_in_memory()?))
    }

    pub fn with_database(db: SharedDatabase) -> Result<Self> {
        db.initialize()?;
        Ok(Self { db })
    }

    /// Insert or replace the record of a run
    pub fn save(&self, state: &RunState) -> Result<()> {
        let conn = self.db.connection()?;
        upsert(&conn, state)
    }

    pub fn load(&self, id: RunId) -> Result<Option<RunState>> {
        let conn = self.db.connection()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM runs WHERE id = ?1", SELECT_COLUMNS),
                params![id.to_string()],
                RunRow::from_row,
            )
            .optional()
            .with_context_fn(|| format!("Failed to load run {}", id))?;

        row.map(RunRow::decode).transpose()
    }

    /// Most recent runs first
    pub fn list(&self, limit: usize) -> Result<Vec<RunState>> {
        let conn = self.db.connection()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM runs ORDER BY created_at DESC LIMIT ?1",
                SELECT_COLUMNS
            ))
            .with_context("Failed to prepare run listing")?;

        let rows = stmt
            .query_map(params![limit as i64], RunRow::from_row)
            .with_context("Failed to list runs")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .with_context("Failed to read run rows")?;

        rows.into_iter().map(RunRow::decode).collect()
    }

    /// Delete a run record; returns whether one existed
    pub fn purge(&self, id: RunId) -> Result<bool> {
        let key = id.to_string();
        let deleted = self.db.execute("DELETE FROM runs WHERE id = ?1", &[&key])?;
        Ok(deleted > 0)
    }

    /// Fail runs recorded as pending or running that have not been updated
    /// for `stale_after`. Runs with a live driver keep writing and are left
    /// alone.
    pub fn recover_interrupted(&self, stale_after: Duration) -> Result<usize> {
        let Some(cutoff) = chrono::Duration::from_std(stale_after)
            .ok()
            .and_then(|window| Utc::now().checked_sub_signed(window))
        else {
            return Ok(0);
        };
        let cutoff = timestamp(cutoff);

        self.db.transaction(|conn| {
            let rows = {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {} FROM runs
                         WHERE status IN ('pending', 'running') AND updated_at <= ?1",
                        SELECT_COLUMNS
                    ))
                    .with_context("Failed to query active runs")?;
                stmt.query_map(params![cutoff], RunRow::from_row)
                    .with_context("Failed to query active runs")?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .with_context("Failed to read active runs")?
            };

            let count = rows.len();
            for row in rows {
                let mut state = row.decode()?;
                mark_interrupted(&mut state);
                upsert(conn, &state)?;
                info!(run = %state.id, "Run interrupted by previous process");
            }
            Ok(count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValidationConfig;
    use crate::workflow::run::{ReportRequest, StageName, StageState};
    use tempfile::TempDir;

    fn state(topic: &str) -> RunState {
        let config = ReportRequest::new(topic)
            .validate(&ValidationConfig::default())
            .unwrap();
        let stages = vec![
            StageState::new(StageName::Outline, true),
            StageState::new(StageName::Content, true),
        ];
        RunState::new(RunId::new(), config, stages)
    }

    #[test]
    fn test_save_and_load() {
        let store = RunStore::in_memory().unwrap();
        let mut run = state("分布式存储系统");
        run.transition(RunStatus::Running);
        run.sections_total = 6;
        run.sections_completed = 2;
        store.save(&run).unwrap();

        let loaded = store.load(run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.config, run.config);
        assert_eq!(loaded.stages, run.stages);
        assert_eq!(loaded.sections_completed, 2);
        assert_eq!(loaded.created_at, run.created_at);
    }

    #[test]
    fn test_save_overwrites() {
        let store = RunStore::in_memory().unwrap();
        let mut run = state("分布式存储系统");
        store.save(&run).unwrap();
        run.transition(RunStatus::Cancelled);
        store.save(&run).unwrap();

        let loaded = store.load(run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Cancelled);
        assert!(loaded.finished_at.is_some());
        assert_eq!(store.list(10).unwrap().len(), 1);
    }

    #[test]
    fn test_load_unknown_is_none() {
        let store = RunStore::in_memory().unwrap();
        assert!(store.load(RunId::new()).unwrap().is_none());
    }

    #[test]
    fn test_list_newest_first() {
        let store = RunStore::in_memory().unwrap();
        let mut older = state("第一份报告");
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        let newer = state("第二份报告");
        store.save(&older).unwrap();
        store.save(&newer).unwrap();

        let listed = store.list(10).unwrap();
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(listed[1].id, older.id);
        assert_eq!(store.list(1).unwrap().len(), 1);
    }

    #[test]
    fn test_purge() {
        let store = RunStore::in_memory().unwrap();
        let run = state("分布式存储系统");
        store.save(&run).unwrap();

        assert!(store.purge(run.id).unwrap());
        assert!(!store.purge(run.id).unwrap());
        assert!(store.load(run.id).unwrap().is_none());
    }

    #[test]
    fn test_terminal_record_is_final() {
        let store = RunStore::in_memory().unwrap();
        let mut run = state("分布式存储系统");
        run.transition(RunStatus::Running);
        let stale = run.clone();
        run.transition(RunStatus::Succeeded);
        store.save(&run).unwrap();
        store.save(&stale).unwrap();

        let loaded = store.load(run.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Succeeded);
    }

    #[test]
    fn test_second_open_leaves_live_runs_alone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.db");

        let owner = RunStore::open(&path).unwrap();
        let mut live = state("正在生成的报告");
        live.transition(RunStatus::Running);
        owner.save(&live).unwrap();

        let reader = RunStore::open(&path).unwrap();
        assert_eq!(reader.list(10).unwrap()[0].status, RunStatus::Running);
        assert_eq!(
            reader.recover_interrupted(Duration::from_secs(600)).unwrap(),
            0
        );

        let loaded = owner.load(live.id).unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert!(loaded.error.is_none());
    }

    #[test]
    fn test_recover_fails_abandoned_runs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.db");

        let (active, finished) = {
            let store = RunStore::open(&path).unwrap();
            let mut active = state("中断的报告");
            active.transition(RunStatus::Running);
            if let Some(stage) = active.stage_mut(StageName::Outline) {
                stage.status = StageStatus::Running;
                stage.attempt = 1;
            }
            let mut finished = state("完成的报告");
            finished.transition(RunStatus::Running);
            finished.transition(RunStatus::Succeeded);
            store.save(&active).unwrap();
            store.save(&finished).unwrap();
            (active.id, finished.id)
        };

        let store = RunStore::open(&path).unwrap();
        assert_eq!(store.load(active).unwrap().unwrap().status, RunStatus::Running);
        assert_eq!(store.recover_interrupted(Duration::ZERO).unwrap(), 1);

        let recovered = store.load(active).unwrap().unwrap();
        assert_eq!(recovered.status, RunStatus::Failed);
        let failure = recovered.error.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Interrupted);
        assert_eq!(failure.stage, None);
        let outline = recovered.stage(StageName::Outline).unwrap();
        assert_eq!(outline.status, StageStatus::Failed);
        assert_eq!(outline.error.as_deref(), Some("interrupted"));
        assert_eq!(
            recovered.stage(StageName::Content).unwrap().status,
            StageStatus::Idle
        );

        let untouched = store.load(finished).unwrap().unwrap();
        assert_eq!(untouched.status, RunStatus::Succeeded);
        assert_eq!(store.recover_interrupted(Duration::ZERO).unwrap(), 0);
    }
}

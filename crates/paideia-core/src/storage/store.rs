use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use rusqlite::{params, params_from_iter, Connection};

use crate::model::{FactorKey, ResultRow, RunRecord, RunScope, RunStatus, ScoringMethod};

#[derive(Clone)]
pub struct Store {
    pub conn: Arc<Mutex<Connection>>,
}

/// A persisted result together with its row id. The id is what re-judgment
/// records in `rejudged_from`.
#[derive(Debug, Clone)]
pub struct StoredResult {
    pub id: i64,
    pub row: ResultRow,
}

#[derive(Debug, Clone, Default)]
pub struct ResultFilter {
    pub profile: Option<String>,
    pub scenario: Option<String>,
    /// Substring match against the judge model column.
    pub judge_model: Option<String>,
    pub scored_only: bool,
    /// When false (the default), rows that a later re-judgment replaced are
    /// left out, so aggregates see only the latest judgment of each slot.
    pub include_superseded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreColumn {
    Overall,
    Base,
    Recognition,
}

impl ScoreColumn {
    pub fn column(&self) -> &'static str {
        match self {
            ScoreColumn::Overall => "overall_score",
            ScoreColumn::Base => "base_score",
            ScoreColumn::Recognition => "recognition_score",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "overall" => Some(ScoreColumn::Overall),
            "base" => Some(ScoreColumn::Base),
            "recognition" => Some(ScoreColumn::Recognition),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub total: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub scored: u32,
    pub mean_overall: Option<f64>,
    pub mean_base: Option<f64>,
    pub mean_recognition: Option<f64>,
    pub mean_latency_ms: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ScenarioStats {
    pub scenario_id: String,
    pub scenario_name: String,
    pub total: u32,
    pub succeeded: u32,
    pub scored: u32,
    pub mean_overall: Option<f64>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path).context("failed to open sqlite db")?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(crate::storage::schema::DDL)?;

        migrate_judgment_history(&conn)?;

        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_results_run ON results(run_id)",
            [],
        );
        let _ = conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_results_slot ON results(run_id, profile_name, scenario_id)",
            [],
        );

        Ok(())
    }

    // --- runs ---

    pub fn create_run(&self, run: &RunRecord) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO runs(id, description, status, scenario_count, profile_count, total_tests, scope_json, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.id,
                run.description,
                run.status.as_str(),
                run.scenario_count,
                run.profile_count,
                run.total_tests,
                run.scope
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                run.started_at,
                run.completed_at
            ],
        )?;
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> anyhow::Result<Option<RunRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, description, status, scenario_count, profile_count, total_tests, scope_json, started_at, completed_at
             FROM runs WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![run_id])?;
        if let Some(row) = rows.next()? {
            Ok(Some(map_run_record(row)?))
        } else {
            Ok(None)
        }
    }

    pub fn list_runs(&self, limit: u32) -> anyhow::Result<Vec<RunRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, description, status, scenario_count, profile_count, total_tests, scope_json, started_at, completed_at
             FROM runs ORDER BY started_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], map_run_record)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn finalize_run(&self, run_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET status = ?1, completed_at = ?2 WHERE id = ?3",
            params!["completed", now_rfc3339(), run_id],
        )?;
        Ok(())
    }

    pub fn mark_run_running(&self, run_id: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE runs SET status = 'running', completed_at = NULL WHERE id = ?1",
            params![run_id],
        )?;
        Ok(())
    }

    /// Rewrites the owner pid inside the stored scope. Used by resume to
    /// take over a run.
    pub fn set_run_owner(&self, run_id: &str, pid: u32) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        let scope_json: Option<String> = conn
            .query_row(
                "SELECT scope_json FROM runs WHERE id = ?1",
                params![run_id],
                |r| r.get::<_, Option<String>>(0),
            )
            .ok()
            .flatten();
        let mut scope: RunScope = scope_json
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        scope.owner_pid = Some(pid);
        conn.execute(
            "UPDATE runs SET scope_json = ?1 WHERE id = ?2",
            params![serde_json::to_string(&scope)?, run_id],
        )?;
        Ok(())
    }

    // --- results ---

    pub fn insert_result(&self, run_id: &str, row: &ResultRow) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO results(
                run_id, scenario_id, scenario_name, profile_name, provider, model,
                ego_model, superego_model, recognition, multi_agent_tutor, multi_agent_learner,
                repetition, success, latency_ms, input_tokens, output_tokens,
                overall_score, base_score, recognition_score, scoring_method,
                passes_required, passes_forbidden, turn_count, all_turns_passed,
                error, judge_model, suggestions_json, details_json, rejudged_from, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                     ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30)",
            params![
                run_id,
                row.scenario_id,
                row.scenario_name,
                row.profile_name,
                row.provider,
                row.model,
                row.ego_model,
                row.superego_model,
                row.recognition,
                row.multi_agent_tutor,
                row.multi_agent_learner,
                row.repetition,
                row.success,
                row.latency_ms.map(|v| v as i64),
                row.input_tokens.map(|v| v as i64),
                row.output_tokens.map(|v| v as i64),
                row.overall_score,
                row.base_score,
                row.recognition_score,
                row.scoring_method.as_str(),
                row.passes_required,
                row.passes_forbidden,
                row.turn_count,
                row.all_turns_passed,
                row.error,
                row.judge_model,
                serde_json::to_string(&row.suggestions)?,
                serde_json::to_string(&row.details)?,
                row.rejudged_from,
                now_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_results(
        &self,
        run_id: &str,
        filter: &ResultFilter,
    ) -> anyhow::Result<Vec<StoredResult>> {
        let (conds, params) = build_filter(run_id, filter);
        let sql = format!(
            "SELECT id, scenario_id, scenario_name, profile_name, provider, model,
                    ego_model, superego_model, recognition, multi_agent_tutor, multi_agent_learner,
                    repetition, success, latency_ms, input_tokens, output_tokens,
                    overall_score, base_score, recognition_score, scoring_method,
                    passes_required, passes_forbidden, turn_count, all_turns_passed,
                    error, judge_model, suggestions_json, details_json, rejudged_from
             FROM results WHERE {conds} ORDER BY id ASC"
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), map_stored_result)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Successful repetition indices per (profile, scenario). This is the
    /// resume accounting: failures do not count as done, and a repetition is
    /// done only if that exact index has a successful row. A failed rep 0
    /// next to a succeeded rep 1 must leave index 0 (and only index 0)
    /// outstanding, or resume would redo finished work forever.
    pub fn successful_repetitions(
        &self,
        run_id: &str,
    ) -> anyhow::Result<BTreeMap<(String, String), BTreeSet<u32>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT profile_name, scenario_id, repetition
             FROM results WHERE run_id = ?1 AND success = 1",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((
                (row.get::<_, String>(0)?, row.get::<_, String>(1)?),
                row.get::<_, u32>(2)?,
            ))
        })?;
        let mut out: BTreeMap<(String, String), BTreeSet<u32>> = BTreeMap::new();
        for r in rows {
            let (k, rep) = r?;
            out.entry(k).or_default().insert(rep);
        }
        Ok(out)
    }

    pub fn run_stats(&self, run_id: &str, filter: &ResultFilter) -> anyhow::Result<RunStats> {
        let (conds, params) = build_filter(run_id, filter);
        let sql = format!(
            "SELECT COUNT(*),
                    COALESCE(SUM(success), 0),
                    COUNT(overall_score),
                    AVG(overall_score),
                    AVG(base_score),
                    AVG(recognition_score),
                    AVG(latency_ms)
             FROM results WHERE {conds}"
        );
        let conn = self.conn.lock().unwrap();
        let row = conn.query_row(&sql, params_from_iter(params.iter()), |row| {
            Ok(RunStats {
                total: row.get(0)?,
                succeeded: row.get(1)?,
                failed: 0,
                scored: row.get(2)?,
                mean_overall: row.get(3)?,
                mean_base: row.get(4)?,
                mean_recognition: row.get(5)?,
                mean_latency_ms: row.get(6)?,
            })
        })?;
        Ok(RunStats {
            failed: row.total - row.succeeded,
            ..row
        })
    }

    pub fn scenario_stats(
        &self,
        run_id: &str,
        filter: &ResultFilter,
    ) -> anyhow::Result<Vec<ScenarioStats>> {
        let (conds, params) = build_filter(run_id, filter);
        let sql = format!(
            "SELECT scenario_id, scenario_name, COUNT(*),
                    COALESCE(SUM(success), 0), COUNT(overall_score), AVG(overall_score)
             FROM results WHERE {conds}
             GROUP BY scenario_id, scenario_name
             ORDER BY scenario_id",
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok(ScenarioStats {
                scenario_id: row.get(0)?,
                scenario_name: row.get(1)?,
                total: row.get(2)?,
                succeeded: row.get(3)?,
                scored: row.get(4)?,
                mean_overall: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Scores grouped into the eight design cells, null scores excluded.
    pub fn factorial_cells(
        &self,
        run_id: &str,
        score: ScoreColumn,
        filter: &ResultFilter,
    ) -> anyhow::Result<BTreeMap<FactorKey, Vec<f64>>> {
        let (conds, params) = build_filter(run_id, filter);
        let col = score.column();
        let sql = format!(
            "SELECT recognition, multi_agent_tutor, multi_agent_learner, {col}
             FROM results WHERE {conds} AND {col} IS NOT NULL
             ORDER BY id ASC"
        );
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
            Ok((
                FactorKey {
                    recognition: row.get(0)?,
                    tutor: row.get(1)?,
                    learner: row.get(2)?,
                },
                row.get::<_, f64>(3)?,
            ))
        })?;
        let mut cells: BTreeMap<FactorKey, Vec<f64>> = BTreeMap::new();
        for r in rows {
            let (key, score) = r?;
            cells.entry(key).or_default().push(score);
        }
        Ok(cells)
    }
}

fn build_filter(run_id: &str, filter: &ResultFilter) -> (String, Vec<String>) {
    let mut conds = vec!["run_id = ?".to_string()];
    let mut params = vec![run_id.to_string()];
    if let Some(p) = &filter.profile {
        conds.push("profile_name = ?".into());
        params.push(p.clone());
    }
    if let Some(s) = &filter.scenario {
        conds.push("scenario_id = ?".into());
        params.push(s.clone());
    }
    if let Some(j) = &filter.judge_model {
        conds.push("judge_model LIKE ?".into());
        params.push(format!("%{}%", j));
    }
    if filter.scored_only {
        conds.push("overall_score IS NOT NULL".into());
    }
    if !filter.include_superseded {
        conds.push(
            "id NOT IN (SELECT rejudged_from FROM results WHERE run_id = ? AND rejudged_from IS NOT NULL)"
                .into(),
        );
        params.push(run_id.to_string());
    }
    (conds.join(" AND "), params)
}

fn map_run_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    let scope_json: Option<String> = row.get(6)?;
    let scope = scope_json
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());
    Ok(RunRecord {
        id: row.get(0)?,
        description: row.get(1)?,
        status: RunStatus::parse(&row.get::<_, String>(2)?),
        scenario_count: row.get(3)?,
        profile_count: row.get(4)?,
        total_tests: row.get(5)?,
        scope,
        started_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn map_stored_result(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredResult> {
    let suggestions: serde_json::Value = row
        .get::<_, Option<String>>(26)?
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null);
    let details: serde_json::Value = row
        .get::<_, Option<String>>(27)?
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or(serde_json::Value::Null);
    Ok(StoredResult {
        id: row.get(0)?,
        row: ResultRow {
            scenario_id: row.get(1)?,
            scenario_name: row.get(2)?,
            profile_name: row.get(3)?,
            provider: row.get(4)?,
            model: row.get(5)?,
            ego_model: row.get(6)?,
            superego_model: row.get(7)?,
            recognition: row.get(8)?,
            multi_agent_tutor: row.get(9)?,
            multi_agent_learner: row.get(10)?,
            repetition: row.get(11)?,
            success: row.get(12)?,
            latency_ms: row.get::<_, Option<i64>>(13)?.map(|v| v as u64),
            input_tokens: row.get::<_, Option<i64>>(14)?.map(|v| v as u64),
            output_tokens: row.get::<_, Option<i64>>(15)?.map(|v| v as u64),
            overall_score: row.get(16)?,
            base_score: row.get(17)?,
            recognition_score: row.get(18)?,
            scoring_method: ScoringMethod::parse(&row.get::<_, String>(19)?),
            passes_required: row.get(20)?,
            passes_forbidden: row.get(21)?,
            turn_count: row.get(22)?,
            all_turns_passed: row.get(23)?,
            error: row.get(24)?,
            judge_model: row.get(25)?,
            suggestions,
            details,
            rejudged_from: row.get(28)?,
        },
    })
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// `rejudged_from` and `judge_model` arrived after the first deployments;
/// older databases get them added in place.
fn migrate_judgment_history(conn: &Connection) -> anyhow::Result<()> {
    let cols = get_columns(conn, "results")?;
    add_column_if_missing(conn, &cols, "results", "judge_model", "TEXT")?;
    add_column_if_missing(conn, &cols, "results", "rejudged_from", "INTEGER")?;
    Ok(())
}

fn get_columns(
    conn: &Connection,
    table: &str,
) -> anyhow::Result<std::collections::HashSet<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut out = std::collections::HashSet::new();
    for r in rows {
        out.insert(r?);
    }
    Ok(out)
}

fn add_column_if_missing(
    conn: &Connection,
    cols: &std::collections::HashSet<String>,
    table: &str,
    col: &str,
    ty: &str,
) -> anyhow::Result<()> {
    if !cols.contains(col) {
        let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, col, ty);
        conn.execute(&sql, [])?;
    }
    Ok(())
}

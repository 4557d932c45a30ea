use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, InterruptHandle};

use crate::digest::{canonical_members, run_blueprint_id, test_blueprint_id, BlueprintId};
use crate::errors::StoreError;
use crate::model::{
    Pr, PrStatus, PrStatusCounts, RecentTestFlake, RecentTestRun, RunId, Source, TestRun,
};
use crate::result_spec;
use crate::storage::{column_err, fmt_ts, members_to_blob, parse_ts};

#[derive(Clone)]
pub struct Store {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

/// Row counts and the newest run's timestamp, each `None` when the query
/// failed (missing table on an uninitialized database, for instance).
#[derive(Debug, serde::Serialize)]
pub struct StoreStats {
    pub prs: Option<u64>,
    pub test_blueprints: Option<u64>,
    pub test_run_blueprints: Option<u64>,
    pub test_runs: Option<u64>,
    pub test_flakes: Option<u64>,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::configure(Connection::open(path)?)
    }

    /// SQLite in-memory DB, for tests.
    pub fn memory() -> Result<Self, StoreError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(crate::storage::schema::DDL)?;
        Ok(())
    }

    /// Handle for cancelling the statement currently running on this store's
    /// connection. The interrupted operation rolls back and surfaces
    /// [`StoreError::Cancelled`].
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.conn.lock().unwrap().get_interrupt_handle()
    }

    /// Ingests one run: upserts its test blueprints and its run blueprint,
    /// encodes the result spec, inserts the run row. All four tables commit
    /// atomically. Returns false when the run was already present.
    pub fn insert_test_run(&self, run: &TestRun) -> Result<bool, StoreError> {
        validate(run)?;

        let member_ids: Vec<BlueprintId> = run
            .results
            .iter()
            .map(|r| test_blueprint_id(&r.title))
            .collect();
        let blueprint_id = run_blueprint_id(&member_ids);
        let members_blob = members_to_blob(&canonical_members(&member_ids));

        let outcomes: Vec<(BlueprintId, bool)> = member_ids
            .iter()
            .zip(&run.results)
            .map(|(id, r)| (*id, r.passed))
            .collect();
        let spec = result_spec::encode(&outcomes);

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO test_blueprints(id, title) VALUES (?1, ?2)
                 ON CONFLICT(id) DO NOTHING",
            )?;
            for (id, result) in member_ids.iter().zip(&run.results) {
                stmt.execute(params![id.as_i64(), result.title])?;
            }
        }
        tx.execute(
            "INSERT INTO test_run_blueprints(id, test_blueprint_ids) VALUES (?1, ?2)
             ON CONFLICT(id) DO NOTHING",
            params![blueprint_id.as_i64(), members_blob],
        )?;
        let inserted = tx.execute(
            "INSERT INTO test_runs(source, ext_id, blueprint_id, timestamp, branch, commit_id, result_spec)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(source, ext_id) DO NOTHING",
            params![
                run.id.source.as_str(),
                run.id.ext_id,
                blueprint_id.as_i64(),
                fmt_ts(&run.timestamp),
                run.branch,
                run.commit_id,
                spec
            ],
        )?;
        tx.commit()?;

        tracing::debug!(
            event = "test_run_ingested",
            source = run.id.source.as_str(),
            ext_id = run.id.ext_id,
            tests = run.results.len(),
            inserted = inserted > 0,
        );
        Ok(inserted > 0)
    }

    /// Upserts a merged PR; merge metadata may be re-fetched with a newer
    /// status.
    pub fn insert_pr(&self, pr: &Pr) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO prs(number, merged_at, status) VALUES (?1, ?2, ?3)
             ON CONFLICT(number) DO UPDATE SET merged_at=excluded.merged_at, status=excluded.status",
            params![pr.number, fmt_ts(&pr.merged_at), pr.status.as_str()],
        )?;
        Ok(())
    }

    pub fn fetch_prs_by_merged_at_asc(&self) -> Result<Vec<Pr>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT number, merged_at, status FROM prs ORDER BY merged_at ASC, number ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let merged_at: String = row.get(1)?;
            let status: String = row.get(2)?;
            Ok(Pr {
                number: row.get(0)?,
                merged_at: parse_ts(&merged_at).map_err(|e| column_err(1, e.to_string()))?,
                status: PrStatus::parse(&status)
                    .ok_or_else(|| column_err(2, format!("unknown pr status {status:?}")))?,
            })
        })?;

        let mut prs = Vec::new();
        for pr in rows {
            prs.push(pr?);
        }
        Ok(prs)
    }

    /// Per-UTC-date PR status buckets.
    pub fn count_pr_statuses_by_date(
        &self,
    ) -> Result<BTreeMap<NaiveDate, PrStatusCounts>, StoreError> {
        let conn = self.conn.lock().unwrap();
        // merged_at is fixed-width RFC 3339 UTC, so the first ten bytes are
        // the date.
        let mut stmt = conn.prepare(
            "SELECT substr(merged_at, 1, 10), status, COUNT(*)
             FROM prs
             GROUP BY substr(merged_at, 1, 10), status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut buckets: BTreeMap<NaiveDate, PrStatusCounts> = BTreeMap::new();
        for row in rows {
            let (date, status, count) = row?;
            let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .map_err(|e| column_err(0, e.to_string()))?;
            let status = PrStatus::parse(&status)
                .ok_or_else(|| column_err(1, format!("unknown pr status {status:?}")))?;
            let counts = buckets.entry(date).or_default();
            match status {
                PrStatus::Success => counts.success += count as u64,
                PrStatus::Failure => counts.failure += count as u64,
                PrStatus::Neutral => counts.neutral += count as u64,
                PrStatus::Unknown => counts.unknown += count as u64,
            }
        }
        Ok(buckets)
    }

    /// Most recent runs, newest first. `since` bounds the window from below
    /// (exclusive).
    pub fn fetch_recent_test_runs(
        &self,
        count: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecentTestRun>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT source, ext_id, timestamp, commit_id, result_spec IS NULL
             FROM test_runs
             WHERE ?2 IS NULL OR timestamp > ?2
             ORDER BY timestamp DESC, ext_id DESC
             LIMIT ?1",
        )?;
        let since = since.map(|ts| fmt_ts(&ts));
        let rows = stmt.query_map(params![count, since], |row| {
            let source: String = row.get(0)?;
            let timestamp: String = row.get(2)?;
            Ok(RecentTestRun {
                id: RunId {
                    source: Source::parse(&source)
                        .ok_or_else(|| column_err(0, format!("unknown source {source:?}")))?,
                    ext_id: row.get(1)?,
                },
                timestamp: parse_ts(&timestamp).map_err(|e| column_err(2, e.to_string()))?,
                commit_id: row.get(3)?,
                succeeded: row.get(4)?,
            })
        })?;

        let mut runs = Vec::new();
        for run in rows {
            runs.push(run?);
        }
        Ok(runs)
    }

    /// Most recent flakes, newest run first, joined to the test title.
    pub fn fetch_recent_test_flakes(
        &self,
        count: u32,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecentTestFlake>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT f.test_run_source, f.test_run_ext_id, f.test_blueprint_id, b.title, r.timestamp
             FROM test_flakes f
             JOIN test_runs r ON r.source = f.test_run_source AND r.ext_id = f.test_run_ext_id
             JOIN test_blueprints b ON b.id = f.test_blueprint_id
             WHERE ?2 IS NULL OR r.timestamp > ?2
             ORDER BY r.timestamp DESC, f.test_run_ext_id DESC
             LIMIT ?1",
        )?;
        let since = since.map(|ts| fmt_ts(&ts));
        let rows = stmt.query_map(params![count, since], |row| {
            let source: String = row.get(0)?;
            let timestamp: String = row.get(4)?;
            Ok(RecentTestFlake {
                run: RunId {
                    source: Source::parse(&source)
                        .ok_or_else(|| column_err(0, format!("unknown source {source:?}")))?,
                    ext_id: row.get(1)?,
                },
                test_id: BlueprintId::from_i64(row.get(2)?),
                title: row.get(3)?,
                timestamp: parse_ts(&timestamp).map_err(|e| column_err(4, e.to_string()))?,
            })
        })?;

        let mut flakes = Vec::new();
        for flake in rows {
            flakes.push(flake?);
        }
        Ok(flakes)
    }

    pub fn stats_best_effort(&self) -> StoreStats {
        let conn = self.conn.lock().unwrap();

        let count = |table: &str| -> Option<u64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| {
                r.get::<_, i64>(0).map(|n| n as u64)
            })
            .ok()
        };

        let last_run_at = conn
            .query_row(
                "SELECT timestamp FROM test_runs ORDER BY timestamp DESC LIMIT 1",
                [],
                |r| r.get::<_, String>(0),
            )
            .ok()
            .and_then(|ts| parse_ts(&ts).ok());

        StoreStats {
            prs: count("prs"),
            test_blueprints: count("test_blueprints"),
            test_run_blueprints: count("test_run_blueprints"),
            test_runs: count("test_runs"),
            test_flakes: count("test_flakes"),
            last_run_at,
        }
    }

    pub fn count_rows(&self, table: &str) -> Result<i64, StoreError> {
        // Allowlist to keep the formatted table name honest.
        const TABLES: [&str; 5] = [
            "prs",
            "test_blueprints",
            "test_run_blueprints",
            "test_runs",
            "test_flakes",
        ];
        if !TABLES.contains(&table) {
            return Err(StoreError::ExternalInput(format!(
                "invalid table name for count_rows: {table}"
            )));
        }
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        let n: i64 = conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n)
    }
}

fn validate(run: &TestRun) -> Result<(), StoreError> {
    if run.results.is_empty() {
        return Err(StoreError::ExternalInput(format!(
            "run {} has no results",
            run.id
        )));
    }
    if run.commit_id.is_empty() {
        return Err(StoreError::ExternalInput(format!(
            "run {} has an empty commit id",
            run.id
        )));
    }
    if run.id.ext_id < 0 {
        return Err(StoreError::ExternalInput(format!(
            "run {} has a negative external id",
            run.id
        )));
    }
    Ok(())
}

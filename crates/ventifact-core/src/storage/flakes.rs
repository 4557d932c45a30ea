use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::digest::BlueprintId;
use crate::errors::StoreError;
use crate::model::Source;
use crate::result_spec::{self, DecodeError};
use crate::storage::store::Store;
use crate::storage::{column_err, fmt_ts, members_from_blob, parse_ts};

struct RunRow {
    source: Source,
    ext_id: i64,
    blueprint_id: i64,
    commit_id: Vec<u8>,
    timestamp: String,
    result_spec: Option<Vec<u8>>,
}

impl RunRow {
    fn same_partition(&self, other: &RunRow) -> bool {
        self.blueprint_id == other.blueprint_id && self.commit_id == other.commit_id
    }
}

impl Store {
    /// Timestamp of the latest recorded flake's run, or `fallback` when no
    /// flake exists. The result is the watermark to feed into
    /// [`Store::mark_flakes_since`].
    pub fn flake_watermark(&self, fallback: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let latest: Option<DateTime<Utc>> = conn.query_row(
            "SELECT MAX(r.timestamp)
             FROM test_flakes f
             JOIN test_runs r ON r.source = f.test_run_source AND r.ext_id = f.test_run_ext_id",
            [],
            |row| {
                let ts: Option<String> = row.get(0)?;
                ts.map(|s| parse_ts(&s).map_err(|e| column_err(0, e.to_string())))
                    .transpose()
            },
        )?;
        Ok(latest.unwrap_or(fallback))
    }

    /// Scans reruns (runs sharing `(blueprint_id, commit_id)`, ordered by
    /// timestamp with `ext_id` as tie-break) and records a flake for every
    /// test whose outcome flipped versus the immediately-previous run,
    /// attributed to the run in which the test failed. Only reruns strictly
    /// after `watermark` are considered. Idempotent: flake identity is
    /// `(source, ext_id, test_id)` and inserts are conflict-safe. Returns the
    /// number of newly recorded flakes.
    pub fn mark_flakes_since(&self, watermark: DateTime<Utc>) -> Result<u64, StoreError> {
        let watermark = fmt_ts(&watermark);
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let mut members_cache: HashMap<i64, Vec<BlueprintId>> = HashMap::new();
        let mut inserted: u64 = 0;
        {
            let mut scan = tx.prepare(
                "SELECT source, ext_id, blueprint_id, commit_id, timestamp, result_spec
                 FROM test_runs
                 ORDER BY blueprint_id, commit_id, timestamp, ext_id, source",
            )?;
            let mut insert = tx.prepare(
                "INSERT INTO test_flakes(test_run_source, test_run_ext_id, test_blueprint_id)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT DO NOTHING",
            )?;
            let mut members_stmt =
                tx.prepare("SELECT test_blueprint_ids FROM test_run_blueprints WHERE id = ?1")?;

            let mut rows = scan.query([])?;
            let mut prev: Option<RunRow> = None;
            while let Some(row) = rows.next()? {
                let source: String = row.get(0)?;
                let cur = RunRow {
                    source: Source::parse(&source)
                        .ok_or_else(|| column_err(0, format!("unknown source {source:?}")))?,
                    ext_id: row.get(1)?,
                    blueprint_id: row.get(2)?,
                    commit_id: row.get(3)?,
                    timestamp: row.get(4)?,
                    result_spec: row.get(5)?,
                };

                if let Some(prev) = &prev {
                    // Timestamps are fixed-width, so string order is time
                    // order; byte-equal specs cannot hide a flipped outcome.
                    let relevant = prev.same_partition(&cur)
                        && cur.timestamp.as_str() > watermark.as_str()
                        && cur.result_spec != prev.result_spec;
                    if relevant {
                        let members = match members_cache.entry(cur.blueprint_id) {
                            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                            std::collections::hash_map::Entry::Vacant(e) => {
                                let blob: Vec<u8> = members_stmt
                                    .query_row(params![cur.blueprint_id], |row| row.get(0))?;
                                let members = members_from_blob(&blob).ok_or(
                                    StoreError::CorruptMembers {
                                        blueprint_id: BlueprintId::from_i64(cur.blueprint_id),
                                        len: blob.len(),
                                    },
                                )?;
                                e.insert(members)
                            }
                        };

                        let before = decode_outcomes(prev, members)?;
                        let after = decode_outcomes(&cur, members)?;
                        for (i, test_id) in members.iter().enumerate() {
                            if before[i] != after[i] {
                                // Record against the failing side.
                                let failing = if after[i] { prev } else { &cur };
                                let n = insert.execute(params![
                                    failing.source.as_str(),
                                    failing.ext_id,
                                    test_id.as_i64()
                                ])?;
                                inserted += n as u64;
                            }
                        }
                    }
                }
                prev = Some(cur);
            }
        }
        tx.commit()?;

        tracing::info!(event = "flakes_marked", watermark = %watermark, inserted);
        Ok(inserted)
    }
}

fn decode_outcomes(run: &RunRow, members: &[BlueprintId]) -> Result<Vec<bool>, StoreError> {
    result_spec::decode(run.result_spec.as_deref(), members).map_err(|cause| {
        tracing::error!(
            event = "result_spec_corrupt",
            source = run.source.as_str(),
            ext_id = run.ext_id,
            error = %cause,
        );
        match cause {
            DecodeError::ForeignMember(test_id) => StoreError::MemberMismatch {
                src: run.source,
                ext_id: run.ext_id,
                blueprint_id: BlueprintId::from_i64(run.blueprint_id),
                test_id,
            },
            other => StoreError::CorruptPayload {
                src: run.source,
                ext_id: run.ext_id,
                cause: other,
            },
        }
    })
}

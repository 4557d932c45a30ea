use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::digest::BlueprintId;
use crate::errors::StoreError;
use crate::storage::store::Store;
use crate::storage::{fmt_ts, members_from_blob};

/// Upper bound on ids per `IN (...)` delete, well under SQLite's host
/// parameter limit.
const DELETE_CHUNK: usize = 500;

impl Store {
    /// Deletes every run older than `cutoff` and garbage-collects blueprints
    /// that lose their last reference. One transaction; re-running on an
    /// unchanged database is a no-op. Returns the number of deleted runs.
    pub fn purge_runs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let cutoff = fmt_ts(&cutoff);
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        // Run blueprints whose every referencing run is expired. Deleting the
        // runs orphans exactly these.
        let mut candidates: Vec<(BlueprintId, Vec<u8>)> = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT b.id, b.test_blueprint_ids
                 FROM test_run_blueprints b
                 WHERE NOT EXISTS (
                     SELECT 1 FROM test_runs r
                     WHERE r.blueprint_id = b.id AND r.timestamp >= ?1
                 )",
            )?;
            let rows = stmt.query_map(params![cutoff], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            for row in rows {
                let (id, blob) = row?;
                candidates.push((BlueprintId::from_i64(id), blob));
            }
        }

        let candidate_ids: HashSet<i64> =
            candidates.iter().map(|(id, _)| id.as_i64()).collect();
        let mut orphaned_tests: HashSet<BlueprintId> = HashSet::new();
        for (id, blob) in &candidates {
            let members = members_from_blob(blob).ok_or(StoreError::CorruptMembers {
                blueprint_id: *id,
                len: blob.len(),
            })?;
            orphaned_tests.extend(members);
        }

        // Flakes first, then runs: both hold FKs into the blueprint tables.
        let flakes_deleted = tx.execute(
            "DELETE FROM test_flakes WHERE EXISTS (
                 SELECT 1 FROM test_runs r
                 WHERE r.source = test_flakes.test_run_source
                   AND r.ext_id = test_flakes.test_run_ext_id
                   AND r.timestamp < ?1
             )",
            params![cutoff],
        )?;
        let runs_deleted = tx.execute(
            "DELETE FROM test_runs WHERE timestamp < ?1",
            params![cutoff],
        )? as u64;

        // A test blueprint survives if any surviving run blueprint still
        // lists it. Stream the survivors and stop as soon as nothing is left
        // to delete.
        if !orphaned_tests.is_empty() {
            let mut stmt = tx.prepare("SELECT id, test_blueprint_ids FROM test_run_blueprints")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let id: i64 = row.get(0)?;
                if candidate_ids.contains(&id) {
                    continue;
                }
                let blob: Vec<u8> = row.get(1)?;
                let members = members_from_blob(&blob).ok_or(StoreError::CorruptMembers {
                    blueprint_id: BlueprintId::from_i64(id),
                    len: blob.len(),
                })?;
                for member in members {
                    orphaned_tests.remove(&member);
                }
                if orphaned_tests.is_empty() {
                    break;
                }
            }
        }

        let tests_deleted = orphaned_tests.len();
        delete_by_ids(
            &tx,
            "test_blueprints",
            orphaned_tests.iter().map(|id| id.as_i64()),
        )?;
        delete_by_ids(
            &tx,
            "test_run_blueprints",
            candidates.iter().map(|(id, _)| id.as_i64()),
        )?;

        tx.commit()?;

        tracing::info!(
            event = "runs_purged",
            cutoff = %cutoff,
            runs_deleted,
            flakes_deleted,
            run_blueprints_deleted = candidates.len(),
            test_blueprints_deleted = tests_deleted,
        );
        Ok(runs_deleted)
    }

    /// Deletes merged PRs older than `cutoff`. PRs sit outside the dedup
    /// graph, so this is a plain windowed delete.
    pub fn purge_merged_prs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM prs WHERE merged_at < ?1",
            params![fmt_ts(&cutoff)],
        )? as u64;
        tracing::info!(event = "prs_purged", deleted);
        Ok(deleted)
    }
}

fn delete_by_ids(
    tx: &rusqlite::Transaction<'_>,
    table: &str,
    ids: impl Iterator<Item = i64>,
) -> Result<(), StoreError> {
    let ids: Vec<i64> = ids.collect();
    for chunk in ids.chunks(DELETE_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(",");
        let sql = format!("DELETE FROM {table} WHERE id IN ({placeholders})");
        tx.execute(&sql, rusqlite::params_from_iter(chunk.iter()))?;
    }
    Ok(())
}

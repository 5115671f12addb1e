//! StateStore — redb-backed state persistence for BurstGrid.
//!
//! Provides typed operations over jobs, pool capacity, and execution
//! checkpoints. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.open_table(EXECUTIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put_value<T: Serialize>(&self, table_def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get_value<T: DeserializeOwned>(&self, table_def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Scan a table, keeping the values `keep` accepts.
    fn scan_values<T: DeserializeOwned>(
        &self,
        table_def: JsonTable,
        keep: impl Fn(&T) -> bool,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(table_def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let value: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if keep(&value) {
                results.push(value);
            }
        }
        Ok(results)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Insert or overwrite a job.
    pub fn put_job(&self, job: &Job) -> StateResult<()> {
        self.put_value(JOBS, &job.id, job)?;
        debug!(job_id = %job.id, status = %job.status, "job stored");
        Ok(())
    }

    /// Get a job by id.
    pub fn get_job(&self, id: &str) -> StateResult<Option<Job>> {
        self.get_value(JOBS, id)
    }

    /// Merge `update` into an existing job and stamp `updated_at`.
    ///
    /// Does not check the job lifecycle; use [`transition_job`] for status
    /// changes that must follow it.
    ///
    /// [`transition_job`]: StateStore::transition_job
    pub fn update_job(&self, id: &str, update: JobUpdate) -> StateResult<Job> {
        self.modify_job(id, |job| {
            update.apply(job, epoch_secs());
            Ok(())
        })
    }

    /// Atomically move a job to `next`, merging `update` in the same write.
    ///
    /// Fails with `Conflict` if the job's current status has no lifecycle
    /// edge to `next`, which is what keeps two triggers (or a late result)
    /// from both winning.
    pub fn transition_job(&self, id: &str, next: JobStatus, mut update: JobUpdate) -> StateResult<Job> {
        update.status = Some(next);
        let job = self.modify_job(id, |job| {
            if !job.status.can_transition_to(next) {
                return Err(StateError::Conflict {
                    id: job.id.clone(),
                    actual: job.status,
                });
            }
            update.apply(job, epoch_secs());
            Ok(())
        })?;
        debug!(job_id = %id, status = %next, "job transitioned");
        Ok(job)
    }

    /// Read-modify-write a job inside one write transaction.
    fn modify_job(
        &self,
        id: &str,
        f: impl FnOnce(&mut Job) -> StateResult<()>,
    ) -> StateResult<Job> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let job = {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let mut job: Job = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("job {id}"))),
            };
            f(&mut job)?;
            let value = serde_json::to_vec(&job).map_err(map_err!(Serialize))?;
            table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
            job
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(job)
    }

    /// List all jobs.
    pub fn list_jobs(&self) -> StateResult<Vec<Job>> {
        self.scan_values(JOBS, |_: &Job| true)
    }

    /// List jobs currently in `status`.
    pub fn query_jobs_by_status(&self, status: JobStatus) -> StateResult<Vec<Job>> {
        self.scan_values(JOBS, |job: &Job| job.status == status)
    }

    // ── Pools ──────────────────────────────────────────────────────

    /// Get the capacity record for a pool.
    pub fn get_pool(&self, pool_id: &str) -> StateResult<Option<PoolCapacity>> {
        self.get_value(POOLS, pool_id)
    }

    /// Insert or overwrite a pool capacity record.
    pub fn put_pool(&self, pool: &PoolCapacity) -> StateResult<()> {
        self.put_value(POOLS, &pool.pool_id, pool)
    }

    /// List all pool capacity records.
    pub fn list_pools(&self) -> StateResult<Vec<PoolCapacity>> {
        self.scan_values(POOLS, |_: &PoolCapacity| true)
    }

    /// Record `target` as the pool's requested target.
    ///
    /// Returns `false` (and writes nothing) when `target` is already the
    /// requested target, so a repeated request never resets the
    /// provisioning clock.
    pub fn request_pool_target(&self, pool_id: &str, target: CapacityTarget) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let changed = {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            let mut pool: PoolCapacity = match table.get(pool_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => PoolCapacity::idle(pool_id),
            };
            if pool.requested == target && pool.requested_at_ms != 0 {
                false
            } else {
                pool.requested = target;
                pool.requested_at_ms = epoch_millis();
                let value = serde_json::to_vec(&pool).map_err(map_err!(Serialize))?;
                table.insert(pool_id, value.as_slice()).map_err(map_err!(Write))?;
                true
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(pool = %pool_id, %target, changed, "pool target requested");
        Ok(changed)
    }

    /// Promote the pool's requested target to applied, provided it was
    /// requested at or before `requested_before_ms`.
    ///
    /// Returns the newly applied target, or `None` if there was nothing to
    /// apply yet.
    pub fn apply_pool_target(
        &self,
        pool_id: &str,
        requested_before_ms: u64,
    ) -> StateResult<Option<CapacityTarget>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let applied = {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            let pool: Option<PoolCapacity> = match table.get(pool_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    Some(serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?)
                }
                None => None,
            };
            match pool {
                Some(mut pool)
                    if !pool.is_converged() && pool.requested_at_ms <= requested_before_ms =>
                {
                    pool.applied = pool.requested;
                    pool.applied_at_ms = epoch_millis();
                    let value = serde_json::to_vec(&pool).map_err(map_err!(Serialize))?;
                    table.insert(pool_id, value.as_slice()).map_err(map_err!(Write))?;
                    Some(pool.applied)
                }
                _ => None,
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(applied)
    }

    // ── Executions ─────────────────────────────────────────────────

    /// Insert or overwrite an execution checkpoint.
    pub fn put_execution(&self, record: &ExecutionRecord) -> StateResult<()> {
        self.put_value(EXECUTIONS, &record.id, record)?;
        debug!(execution_id = %record.id, phase = ?record.phase, "execution checkpointed");
        Ok(())
    }

    /// Get an execution by id.
    pub fn get_execution(&self, id: &str) -> StateResult<Option<ExecutionRecord>> {
        self.get_value(EXECUTIONS, id)
    }

    /// List every execution recorded for a job.
    pub fn list_executions_for_job(&self, job_id: &str) -> StateResult<Vec<ExecutionRecord>> {
        self.scan_values(EXECUTIONS, |record: &ExecutionRecord| record.job_id == job_id)
    }
}

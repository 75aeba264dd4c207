//! SQLite storage layer.
//!
//! Single table of job rows; the source of truth for what work exists and its
//! last checkpoint. Not thread safe on its own: `JobDb` serializes every call
//! behind one lock.

use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;

use crate::error::{Error, Result};
use crate::model::*;

/// Columns in `row_to_job` order.
const JOB_COLUMNS: &str = "id, in_queue, item_id, job_type, init_data, start_value, end_value";

/// Storage backend. Owns the SQLite connection.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| Error::StoreConnection(format!("{}: {e}", path.display())))?;
        let storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::StoreConnection(format!(":memory:: {e}")))?;
        let storage = Self { conn };
        storage.init()?;
        Ok(storage)
    }

    /// Close the connection, surfacing any error SQLite reports.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| Error::StoreOperation(e))
    }

    fn init(&self) -> Result<()> {
        // WAL so a second handle on the same file can read while we write.
        let _mode: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS jobs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                in_queue    INTEGER NOT NULL DEFAULT 1,
                item_id     TEXT NOT NULL,
                job_type    TEXT NOT NULL,
                init_data   INTEGER,
                start_value TEXT,
                end_value   TEXT,
                CONSTRAINT jobs_item_job_init_uni UNIQUE (item_id, job_type, init_data)
            );

            CREATE INDEX IF NOT EXISTS jobs_item_id_idx ON jobs(item_id);
            ",
        )?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    /// `(init_data, started)` for every row sharing `(item_id, job_type)`.
    pub fn find_matching(&self, item_id: &str, job_type: &str) -> Result<Vec<(Option<i64>, bool)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT init_data, start_value FROM jobs WHERE item_id = ?1 AND job_type = ?2")?;

        let rows = stmt
            .query_map(params![item_id, job_type], |row| {
                let init_data: Option<i64> = row.get(0)?;
                let start_value: Option<String> = row.get(1)?;
                Ok((init_data, start_value.is_some()))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Insert a new job row (`in_queue` defaults to 1). Returns its id.
    pub fn insert_job(&self, new: &NewJob) -> Result<JobId> {
        self.conn.execute(
            "INSERT INTO jobs (item_id, job_type, init_data) VALUES (?1, ?2, ?3)",
            params![new.item_id, new.job_type, new.init_data],
        )?;
        Ok(JobId(self.conn.last_insert_rowid()))
    }

    /// Set `start_value`; set `end_value` only when one is given.
    /// Returns the number of rows changed.
    pub fn update_job(
        &self,
        id: JobId,
        start_value: Option<&str>,
        end_value: Option<&EndValue>,
    ) -> Result<usize> {
        let end = end_value.map(serde_json::to_string).transpose()?;
        let changed = self.conn.execute(
            "UPDATE jobs SET start_value = ?1, end_value = COALESCE(?2, end_value) WHERE id = ?3",
            params![start_value, end, id.0],
        )?;
        Ok(changed)
    }

    /// Clear `in_queue` and fill in whichever checkpoint fields are given.
    pub fn fail_job(
        &self,
        id: JobId,
        start_value: Option<&str>,
        end_value: Option<&EndValue>,
    ) -> Result<usize> {
        let end = end_value.map(serde_json::to_string).transpose()?;
        let changed = self.conn.execute(
            "UPDATE jobs SET in_queue = 0,
                start_value = COALESCE(?1, start_value),
                end_value = COALESCE(?2, end_value)
             WHERE id = ?3",
            params![start_value, end, id.0],
        )?;
        Ok(changed)
    }

    /// Delete rows. Missing ids are ignored. Returns rows deleted.
    pub fn delete_jobs(&mut self, ids: &[JobId]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare_cached("DELETE FROM jobs WHERE id = ?1")?;
            for id in ids {
                deleted += stmt.execute(params![id.0])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Get a job by ID.
    pub fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let job = self
            .conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.0],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Up to `limit` rows with id greater than `after`, ascending.
    pub fn jobs_after(&self, after: i64, limit: usize) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id > ?1 ORDER BY id ASC LIMIT ?2"
        ))?;
        let jobs = stmt
            .query_map(params![after, limit as i64], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// List jobs, optionally filtered by type, oldest first.
    pub fn list_jobs(&self, job_type: Option<&str>, limit: usize) -> Result<Vec<Job>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE (?1 IS NULL OR job_type = ?1)
             ORDER BY id ASC LIMIT ?2"
        ))?;
        let jobs = stmt
            .query_map(params![job_type, limit as i64], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    pub fn count_jobs(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(id) FROM jobs", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }

    // -----------------------------------------------------------------------
    // Queue bookkeeping
    // -----------------------------------------------------------------------

    /// Mark every row as not queued. Used by the recovery sweep.
    pub fn reset_in_queue(&self) -> Result<usize> {
        Ok(self.conn.execute("UPDATE jobs SET in_queue = 0", [])?)
    }

    /// `(rows not in a queue, total rows)`.
    pub fn queue_counts(&self) -> Result<(u64, u64)> {
        let (out, total): (i64, i64) = self.conn.query_row(
            "SELECT COALESCE(SUM(CASE WHEN in_queue = 0 THEN 1 ELSE 0 END), 0), COUNT(id) FROM jobs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((out as u64, total as u64))
    }

    pub fn distinct_job_types(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT DISTINCT job_type FROM jobs ORDER BY job_type")?;
        let types = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(types)
    }

    /// Rows of `job_type` not in a queue, at most `limit` of them.
    ///
    /// FIFO picks the lowest ids, LIFO the highest. Either way the result is
    /// returned ascending so admission order matches insertion order.
    pub fn select_not_in_queue(
        &self,
        job_type: &str,
        policy: QueuePolicy,
        limit: Option<usize>,
    ) -> Result<Vec<Job>> {
        let order = match policy {
            QueuePolicy::Fifo => "ASC",
            QueuePolicy::Lifo => "DESC",
        };
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT * FROM (
                SELECT {JOB_COLUMNS} FROM jobs
                WHERE in_queue = 0 AND job_type = ?1
                ORDER BY id {order} LIMIT ?2
             ) ORDER BY id ASC"
        ))?;
        // SQLite treats a negative LIMIT as no limit.
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let jobs = stmt
            .query_map(params![job_type, limit], row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Set `in_queue = 1` for `admitted` and `in_queue = 0` for `evicted`,
    /// in one transaction.
    pub fn set_in_queue(&mut self, admitted: &[JobId], evicted: &[JobId]) -> Result<usize> {
        if admitted.is_empty() && evicted.is_empty() {
            return Ok(0);
        }
        let tx = self.conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare_cached("UPDATE jobs SET in_queue = ?1 WHERE id = ?2")?;
            for id in admitted {
                changed += stmt.execute(params![1, id.0])?;
            }
            for id in evicted {
                changed += stmt.execute(params![0, id.0])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }
}

// ---------------------------------------------------------------------------
// Row parsing helpers
// ---------------------------------------------------------------------------

fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
    let in_queue: i64 = row.get(1)?;
    let end_raw: Option<String> = row.get(6)?;

    Ok(Job {
        id: JobId(row.get(0)?),
        in_queue: in_queue != 0,
        item_id: row.get(2)?,
        job_type: row.get(3)?,
        init_data: row.get(4)?,
        start_value: row.get(5)?,
        end_value: end_raw.map(|raw| parse_end_value(&raw)),
    })
}

/// Text that is not an encoded `EndValue` is taken as a plain bound.
fn parse_end_value(raw: &str) -> EndValue {
    serde_json::from_str(raw).unwrap_or_else(|_| EndValue::Bound(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_store_has_jobs_table() {
        let storage = Storage::in_memory().unwrap();
        let tables = storage.table_names().unwrap();
        assert!(tables.contains(&"jobs".to_string()), "tables: {tables:?}");
    }

    #[test]
    fn unique_constraint_rejects_same_init_data() {
        let storage = Storage::in_memory().unwrap();
        let new = NewJob::new("1", "main").init_data(3);
        storage.insert_job(&new).unwrap();
        let err = storage.insert_job(&new).unwrap_err();
        assert!(matches!(err, Error::StoreOperation(_)), "got {err:?}");
    }

    #[test]
    fn raw_end_value_text_reads_as_bound() {
        let storage = Storage::in_memory().unwrap();
        let id = storage.insert_job(&NewJob::new("1", "main")).unwrap();
        storage
            .conn
            .execute(
                "UPDATE jobs SET end_value = ?1 WHERE id = ?2",
                params!["123456789", id.0],
            )
            .unwrap();

        let job = storage.get_job(id).unwrap().unwrap();
        assert_eq!(job.end_value, Some(EndValue::bound("123456789")));
    }

    #[test]
    fn select_not_in_queue_orders_by_policy_then_ascending() {
        let mut storage = Storage::in_memory().unwrap();
        let ids: Vec<JobId> = (0..5)
            .map(|i| storage.insert_job(&NewJob::new(i.to_string(), "main")).unwrap())
            .collect();
        storage.set_in_queue(&[], &ids).unwrap();

        let fifo = storage
            .select_not_in_queue("main", QueuePolicy::Fifo, Some(2))
            .unwrap();
        assert_eq!(fifo.iter().map(|j| j.id).collect::<Vec<_>>(), ids[..2]);

        let lifo = storage
            .select_not_in_queue("main", QueuePolicy::Lifo, Some(2))
            .unwrap();
        assert_eq!(lifo.iter().map(|j| j.id).collect::<Vec<_>>(), ids[3..]);

        let all = storage
            .select_not_in_queue("main", QueuePolicy::Fifo, None)
            .unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn queue_counts_track_in_queue_flag() {
        let mut storage = Storage::in_memory().unwrap();
        let a = storage.insert_job(&NewJob::new("a", "main")).unwrap();
        storage.insert_job(&NewJob::new("b", "main")).unwrap();
        assert_eq!(storage.queue_counts().unwrap(), (0, 2));

        storage.set_in_queue(&[], &[a]).unwrap();
        assert_eq!(storage.queue_counts().unwrap(), (1, 2));

        storage.reset_in_queue().unwrap();
        assert_eq!(storage.queue_counts().unwrap(), (2, 2));
    }
}

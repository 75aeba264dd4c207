//! Core engine. The public API for adding, dispatching and finalizing jobs.
//!
//! `JobDb` owns the store and the in-memory queue set. Two locks: one
//! serializes every store call, the other serializes queue push/pop. When both
//! are needed the store lock is always taken first.
//!
//! Store failures are caught here, logged, and turned into `false` / `None` /
//! empty results so one bad statement never takes the engine down. Anything
//! left inconsistent is repaired by the next recovery sweep.

pub mod pool;
pub mod worker;

pub use pool::WorkerPool;
pub use worker::{
    Checkpoint, JobHandler, QueueClient, Worker, WorkerConfig, WorkerHandle, WorkerState,
    WorkerStats,
};

use opentelemetry::KeyValue;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

use crate::error::{Error, QueueExhausted, Result};
use crate::model::*;
use crate::queue::{Admission, QueueSet, WakeSignal};
use crate::storage::Storage;
use crate::telemetry::metrics;

/// Rows fetched per step by [`JobIter`].
const ITER_PAGE_SIZE: usize = 256;

/// Queue settings shared by every job type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum resident jobs per job type. `None` = unbounded.
    pub capacity: Option<usize>,
    #[serde(default)]
    pub policy: QueuePolicy,
}

impl QueueConfig {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn bounded(capacity: usize, policy: QueuePolicy) -> Self {
        Self {
            capacity: Some(capacity),
            policy,
        }
    }
}

/// Counters and sizes for a summary line.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DbStats {
    pub jobs_added: u64,
    pub jobs_updated: u64,
    pub jobs_removed: u64,
    pub populate_calls: u64,
    pub job_count: Option<u64>,
    pub queue_lengths: Vec<(String, usize)>,
}

#[derive(Default)]
struct Counters {
    added: AtomicU64,
    updated: AtomicU64,
    removed: AtomicU64,
    populate: AtomicU64,
}

enum AddOutcome {
    Added(JobId),
    /// An unstarted job for the same item already covers the request.
    Unstarted,
    /// `init_data` is not newer than what the store already holds.
    Superseded,
}

/// The job database. Owns all state and enforces all invariants.
pub struct JobDb {
    store: Mutex<Storage>,
    queues: QueueSet,
    wake: WakeSignal,
    path: Option<PathBuf>,
    counters: Counters,
}

impl JobDb {
    fn from_storage(storage: Storage, config: QueueConfig, path: Option<PathBuf>) -> Self {
        Self {
            store: Mutex::new(storage),
            queues: QueueSet::new(config.capacity, config.policy),
            wake: WakeSignal::new(),
            path,
            counters: Counters::default(),
        }
    }

    /// Create a job database with in-memory storage (for testing).
    pub fn in_memory(config: QueueConfig) -> Result<Self> {
        let storage = Storage::in_memory().inspect_err(|e| error!("opening in-memory store failed: {e}"))?;
        Ok(Self::from_storage(storage, config, None))
    }

    /// Open the store at `path`, creating it if missing.
    ///
    /// An existing store gets a recovery sweep: nothing in memory survived
    /// the previous process, so every row becomes eligible for queueing again.
    /// Only the process that owns the store may do this.
    pub fn open(path: impl AsRef<Path>, config: QueueConfig) -> Result<Self> {
        Self::open_with(path.as_ref(), config, true)
    }

    /// Open the store at `path`, creating it if missing, without the
    /// recovery sweep. `in_queue` flags are left exactly as found, so this is
    /// safe against a store another process is working from.
    pub fn open_without_recovery(path: impl AsRef<Path>, config: QueueConfig) -> Result<Self> {
        Self::open_with(path.as_ref(), config, false)
    }

    /// Open a store that must already exist.
    pub fn open_existing(path: impl AsRef<Path>, config: QueueConfig) -> Result<Self> {
        let path = path.as_ref();
        Self::require_existing(path)?;
        Self::open(path, config)
    }

    /// Like [`JobDb::open_existing`], without the recovery sweep.
    pub fn open_existing_without_recovery(path: impl AsRef<Path>, config: QueueConfig) -> Result<Self> {
        let path = path.as_ref();
        Self::require_existing(path)?;
        Self::open_without_recovery(path, config)
    }

    fn require_existing(path: &Path) -> Result<()> {
        if path.exists() {
            return Ok(());
        }
        warn!(path = %path.display(), "store does not exist and creation was not requested");
        Err(Error::StoreConnection(format!("{} does not exist", path.display())))
    }

    fn open_with(path: &Path, config: QueueConfig, recover: bool) -> Result<Self> {
        let existed = path.exists();
        let storage = Storage::open(path).inspect_err(|e| error!("opening store failed: {e}"))?;
        let db = Self::from_storage(storage, config, Some(path.to_path_buf()));

        match (existed, recover) {
            (false, _) => info!(path = %path.display(), "database created"),
            (true, true) => {
                info!(path = %path.display(), "database opened");
                db.populate_queues(None, true);
            }
            (true, false) => info!(path = %path.display(), "database opened without recovery"),
        }
        Ok(db)
    }

    /// Create a new store. Never overwrites an existing file.
    pub fn create(path: impl AsRef<Path>, config: QueueConfig) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(Error::AlreadyExists(path.display().to_string()));
        }
        Self::open(path, config)
    }

    /// Close the store. Queued snapshots are dropped; rows survive on disk.
    pub fn close(self) -> Result<()> {
        self.log_summary();
        self.store.into_inner().close()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.queues.capacity(),
            policy: self.queues.policy(),
        }
    }

    pub fn wake_signal(&self) -> &WakeSignal {
        &self.wake
    }

    // -----------------------------------------------------------------------
    // Adding jobs
    // -----------------------------------------------------------------------

    /// Add one job. Returns its id, or `None` if it was deduplicated or failed.
    pub fn add_job(&self, new: impl Into<NewJob>) -> Option<JobId> {
        self.add_jobs(std::iter::once(new)).into_iter().next()
    }

    /// Add jobs, deduplicating against existing rows for the same
    /// `(item_id, job_type)`:
    ///
    /// - any unstarted match already covers the request, so nothing is added;
    /// - otherwise a row is added when `init_data` is `None` or strictly
    ///   greater than every existing `init_data`.
    ///
    /// New rows are admitted into their job type's queue immediately. Returns
    /// the ids inserted; failures are logged and skipped.
    pub fn add_jobs<I>(&self, items: I) -> Vec<JobId>
    where
        I: IntoIterator,
        I::Item: Into<NewJob>,
    {
        let mut store = self.store.lock();
        let mut added = Vec::new();
        let mut attempts = 0usize;
        let mut unstarted = 0usize;

        for item in items {
            attempts += 1;
            let new: NewJob = item.into();
            match self.add_one(&mut store, &new) {
                Ok(AddOutcome::Added(id)) => {
                    metrics::jobs_added().add(1, &[KeyValue::new("job_type", new.job_type.clone())]);
                    added.push(id);
                }
                Ok(AddOutcome::Unstarted) => unstarted += 1,
                Ok(AddOutcome::Superseded) => {
                    debug!(item_id = %new.item_id, job_type = %new.job_type, "no need to add job, init_data is not newer");
                }
                Err(e) => {
                    warn!(item_id = %new.item_id, job_type = %new.job_type, init_data = ?new.init_data, "adding job failed: {e}");
                }
            }
        }

        if unstarted > 0 {
            warn!(count = unstarted, "tried to add jobs again, but the earlier job hasn't started yet");
        }
        self.counters.added.fetch_add(added.len() as u64, Ordering::Relaxed);
        debug!("{} / {} jobs added", added.len(), attempts);
        added
    }

    fn add_one(&self, store: &mut Storage, new: &NewJob) -> Result<AddOutcome> {
        let matches = store.find_matching(&new.item_id, &new.job_type)?;
        if matches.iter().any(|(_, started)| !started) {
            return Ok(AddOutcome::Unstarted);
        }

        // None sorts below every Some, so a null init_data never wins.
        let max_init_data = matches.iter().map(|(init, _)| *init).max().flatten();
        if new.init_data.is_some() && new.init_data <= max_init_data {
            return Ok(AddOutcome::Superseded);
        }

        let id = store.insert_job(new)?;
        let job = Job {
            id,
            item_id: new.item_id.clone(),
            job_type: new.job_type.clone(),
            init_data: new.init_data,
            start_value: None,
            end_value: None,
            in_queue: true,
        };

        let admission = self.queues.put_in_queue(&new.job_type, job, &self.wake);
        self.record_admission(&new.job_type, &admission);
        let out = admission.not_in_queue();
        if !out.is_empty() {
            store.set_in_queue(&[], &out)?;
        }
        Ok(AddOutcome::Added(id))
    }

    // -----------------------------------------------------------------------
    // Checkpoints and removal
    // -----------------------------------------------------------------------

    /// Persist a checkpoint. `start_value` is always written; `end_value`
    /// only when given, so a `None` keeps the stored bound.
    /// Returns whether a row changed.
    pub fn update_job(&self, id: JobId, start_value: Option<&str>, end_value: Option<&EndValue>) -> bool {
        let store = self.store.lock();
        match store.update_job(id, start_value, end_value) {
            Ok(changed) => {
                self.counters.updated.fetch_add(1, Ordering::Relaxed);
                metrics::jobs_updated().add(1, &[]);
                debug!(job_id = %id, start_value = ?start_value, "job checkpoint written");
                changed > 0
            }
            Err(e) => {
                warn!(job_id = %id, "updating job failed: {e}");
                false
            }
        }
    }

    /// Delete a finished job. Removing an absent id is a no-op.
    pub fn remove_job(&self, id: JobId) -> bool {
        self.remove_jobs(&[id])
    }

    /// Delete finished jobs. Returns whether anything was deleted.
    pub fn remove_jobs(&self, ids: &[JobId]) -> bool {
        let mut store = self.store.lock();
        match store.delete_jobs(ids) {
            Ok(removed) => {
                debug!("{} / {} jobs removed", removed, ids.len());
                self.counters.removed.fetch_add(removed as u64, Ordering::Relaxed);
                metrics::jobs_removed().add(removed as u64, &[]);
                removed > 0
            }
            Err(e) => {
                warn!("removing jobs failed: {e}");
                false
            }
        }
    }

    /// Park a job outside every queue, keeping its row and filling in any
    /// checkpoint fields given. The next repopulation may pick it up again.
    pub fn failed_job(&self, id: JobId, start_value: Option<&str>, end_value: Option<&EndValue>) -> bool {
        let store = self.store.lock();
        match store.fail_job(id, start_value, end_value) {
            Ok(changed) => {
                if changed > 0 {
                    info!(job_id = %id, "job parked");
                }
                changed > 0
            }
            Err(e) => {
                warn!(job_id = %id, "failing job failed: {e}");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn get_job(&self, id: JobId) -> Option<Job> {
        let store = self.store.lock();
        store
            .get_job(id)
            .inspect_err(|e| warn!(job_id = %id, "reading job failed: {e}"))
            .ok()
            .flatten()
    }

    /// Number of rows in the store, or `None` if the query failed.
    pub fn get_job_count(&self) -> Option<u64> {
        let store = self.store.lock();
        store
            .count_jobs()
            .inspect_err(|e| warn!("counting jobs failed: {e}"))
            .ok()
    }

    /// Table names in the store, or `None` if the query failed.
    pub fn get_tables(&self) -> Option<Vec<String>> {
        let store = self.store.lock();
        store
            .table_names()
            .inspect_err(|e| warn!("listing tables failed: {e}"))
            .ok()
    }

    pub fn list_jobs(&self, job_type: Option<&str>, limit: usize) -> Vec<Job> {
        let store = self.store.lock();
        store
            .list_jobs(job_type, limit)
            .inspect_err(|e| warn!("listing jobs failed: {e}"))
            .unwrap_or_default()
    }

    /// Iterate over every row, in id order.
    ///
    /// The iterator holds the store lock until it is dropped: every other
    /// store call blocks meanwhile, so drain it promptly.
    pub fn iter_jobs(&self) -> JobIter<'_> {
        JobIter {
            store: self.store.lock(),
            after: i64::MIN,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    // -----------------------------------------------------------------------
    // Queues
    // -----------------------------------------------------------------------

    /// Admit snapshots into `job_type`'s queue. The store is not touched;
    /// callers clear `in_queue` for whatever the admission reports as out.
    pub fn put_many_in_queue(&self, job_type: &str, items: impl IntoIterator<Item = Job>) -> Admission {
        let admission = self.queues.put_many_in_queue(job_type, items, &self.wake);
        self.record_admission(job_type, &admission);
        admission
    }

    pub fn put_in_queue(&self, job_type: &str, item: Job) -> Admission {
        self.put_many_in_queue(job_type, std::iter::once(item))
    }

    pub fn queue_len(&self, job_type: &str) -> usize {
        self.queues.len(job_type)
    }

    /// Ids resident in `job_type`'s queue, in retrieval order.
    pub fn queued_ids(&self, job_type: &str) -> Vec<JobId> {
        self.queues.snapshot(job_type)
    }

    pub fn get_next_job(&self, job_type: &str) -> std::result::Result<Job, QueueExhausted> {
        self.get_next_jobs(job_type, 1)?
            .into_iter()
            .next()
            .ok_or(QueueExhausted)
    }

    /// Pop up to `count` jobs from the front of `job_type`'s queue.
    ///
    /// On an empty queue with the wake signal set, the signal is cleared and
    /// the queue is repopulated from the store before retrying. With the
    /// signal already clear, collection stops. A partial batch is returned
    /// as is; `QueueExhausted` only when nothing was collected.
    pub fn get_next_jobs(&self, job_type: &str, count: usize) -> std::result::Result<Vec<Job>, QueueExhausted> {
        let mut jobs = Vec::with_capacity(count);
        let mut exhausted = false;
        let mut queues = self.queues.lock();

        while jobs.len() < count {
            if let Some(job) = queues.pop_front(job_type) {
                jobs.push(job);
                continue;
            }

            if !self.wake.is_set() {
                exhausted = true;
                break;
            }

            self.wake.clear();
            debug!(job_type, "no jobs in queue, repopulating");
            drop(queues);
            let refilled = self.populate_queues(Some(job_type), false);
            queues = self.queues.lock();
            if !refilled {
                exhausted = true;
                break;
            }
        }

        if exhausted && jobs.is_empty() {
            Err(QueueExhausted)
        } else {
            Ok(jobs)
        }
    }

    /// Pull rows with `in_queue = 0` into their queues, up to each queue's
    /// remaining capacity, and sync `in_queue` with the admission result.
    ///
    /// `first_call` is the recovery sweep: the in-memory queues are emptied
    /// and every row is reset to `in_queue = 0`, so anything that was in
    /// flight when the previous process died is delivered again.
    ///
    /// Returns whether any of the examined queues ended up non-empty.
    pub fn populate_queues(&self, job_type: Option<&str>, first_call: bool) -> bool {
        self.counters.populate.fetch_add(1, Ordering::Relaxed);
        metrics::populate_calls().add(1, &[KeyValue::new("first_call", first_call)]);

        let mut store = self.store.lock();
        match self.populate_locked(&mut store, job_type, first_call) {
            Ok(resident) => resident,
            Err(e) => {
                warn!("populating queues failed: {e}");
                false
            }
        }
    }

    fn populate_locked(&self, store: &mut Storage, job_type: Option<&str>, first_call: bool) -> Result<bool> {
        if first_call {
            let dropped = self.queues.lock().clear();
            let reset = store.reset_in_queue()?;
            info!(reset, dropped, "recovery sweep: all jobs eligible for queueing");
        }

        let (out_of_queue, total) = store.queue_counts()?;
        debug!(out_of_queue, total, "populating queues");

        let job_types = match job_type {
            Some(t) => vec![t.to_string()],
            None => store.distinct_job_types()?,
        };

        if out_of_queue == 0 {
            let queues = self.queues.lock();
            return Ok(job_types.iter().any(|t| !queues.is_empty(t)));
        }

        let mut resident = false;
        for job_type in &job_types {
            let mut queues = self.queues.lock();
            let remaining = queues.remaining(job_type);

            if remaining != Some(0) {
                let rows = store.select_not_in_queue(job_type, self.queues.policy(), remaining)?;
                if !rows.is_empty() {
                    let admission = queues.put_many(job_type, rows, &self.wake);
                    self.record_admission(job_type, &admission);
                    let out = admission.not_in_queue();
                    if !out.is_empty() {
                        warn!(job_type = %job_type, count = out.len(), "populate pushed jobs out of the queue");
                    }
                    store.set_in_queue(&admission.admitted, &out)?;
                    debug!(job_type = %job_type, admitted = admission.admitted.len(), "queue repopulated");
                }
            }

            resident |= !queues.is_empty(job_type);
        }

        Ok(resident)
    }

    fn record_admission(&self, job_type: &str, admission: &Admission) {
        let outcomes = [
            ("admitted", admission.admitted.len()),
            ("rejected", admission.rejected.len()),
            ("evicted", admission.evicted.len()),
        ];
        for (outcome, n) in outcomes {
            if n > 0 {
                metrics::queue_admissions().add(
                    n as u64,
                    &[
                        KeyValue::new("job_type", job_type.to_string()),
                        KeyValue::new("outcome", outcome),
                    ],
                );
            }
        }
        if !admission.evicted.is_empty() {
            debug!(job_type, evicted = ?admission.evicted, "evicted from queue");
        }
        if !admission.rejected.is_empty() {
            debug!(job_type, rejected = admission.rejected.len(), "queue full, jobs not admitted");
        }
    }

    // -----------------------------------------------------------------------
    // Summary
    // -----------------------------------------------------------------------

    pub fn stats(&self) -> DbStats {
        DbStats {
            jobs_added: self.counters.added.load(Ordering::Relaxed),
            jobs_updated: self.counters.updated.load(Ordering::Relaxed),
            jobs_removed: self.counters.removed.load(Ordering::Relaxed),
            populate_calls: self.counters.populate.load(Ordering::Relaxed),
            job_count: self.get_job_count(),
            queue_lengths: self.queues.lengths(),
        }
    }

    pub fn log_summary(&self) {
        let stats = self.stats();
        info!(
            jobs_added = stats.jobs_added,
            jobs_updated = stats.jobs_updated,
            jobs_removed = stats.jobs_removed,
            populate_calls = stats.populate_calls,
            job_count = ?stats.job_count,
            queues = ?stats.queue_lengths,
            "job database summary"
        );
    }
}

// ---------------------------------------------------------------------------
// Iteration
// ---------------------------------------------------------------------------

/// Finite, single-pass iterator over every job row.
///
/// Holds the store lock for its whole lifetime. Rows are read lazily in pages
/// by id; a read error is logged and ends the iteration.
pub struct JobIter<'a> {
    store: MutexGuard<'a, Storage>,
    after: i64,
    buffer: VecDeque<Job>,
    done: bool,
}

impl Iterator for JobIter<'_> {
    type Item = Job;

    fn next(&mut self) -> Option<Job> {
        if self.buffer.is_empty() && !self.done {
            match self.store.jobs_after(self.after, ITER_PAGE_SIZE) {
                Ok(page) => {
                    self.done = page.len() < ITER_PAGE_SIZE;
                    if let Some(last) = page.last() {
                        self.after = last.id.0;
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    warn!("iterating jobs failed: {e}");
                    self.done = true;
                }
            }
        }
        self.buffer.pop_front()
    }
}

impl std::iter::FusedIterator for JobIter<'_> {}

//! Worker threads: fetch batches for one job type, run the handler on each
//! job, and checkpoint or finalize against the store.
//!
//! State machine: `Init -> Running -> Draining -> Stopped`. Inside `Running`
//! the loop is fetch, then either wait-or-stop on an empty queue or process
//! every job in the batch.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::JobDb;
use crate::error::{Error, QueueExhausted, Result};
use crate::model::*;
use crate::queue::WakeSignal;
use crate::telemetry::job::{record_checkpoint, record_outcome, start_job_span};
use crate::telemetry::metrics;

static WORKER_SEQ: AtomicUsize = AtomicUsize::new(0);

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// What a worker needs from the job database.
pub trait QueueClient: Send + Sync {
    fn get_next_jobs(&self, job_type: &str, count: usize) -> std::result::Result<Vec<Job>, QueueExhausted>;

    fn update_job(&self, id: JobId, start_value: Option<&str>, end_value: Option<&EndValue>) -> bool;

    fn remove_job(&self, id: JobId) -> bool;

    /// Pull un-queued rows of `job_type` into its queue. Returns whether the
    /// queue is non-empty afterwards.
    fn populate(&self, job_type: &str) -> bool;

    fn wake_signal(&self) -> &WakeSignal;
}

impl QueueClient for JobDb {
    fn get_next_jobs(&self, job_type: &str, count: usize) -> std::result::Result<Vec<Job>, QueueExhausted> {
        JobDb::get_next_jobs(self, job_type, count)
    }

    fn update_job(&self, id: JobId, start_value: Option<&str>, end_value: Option<&EndValue>) -> bool {
        JobDb::update_job(self, id, start_value, end_value)
    }

    fn remove_job(&self, id: JobId) -> bool {
        JobDb::remove_job(self, id)
    }

    fn populate(&self, job_type: &str) -> bool {
        self.populate_queues(Some(job_type), false)
    }

    fn wake_signal(&self) -> &WakeSignal {
        JobDb::wake_signal(self)
    }
}

/// User-supplied processing logic for one job type.
///
/// Only `process` is required. Errors from any hook are not swallowed: they
/// stop the worker and come back from [`WorkerHandle::join`].
pub trait JobHandler: Send + 'static {
    /// Runs once on the worker thread before the first fetch.
    fn before_looping(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Resolve the end value of a job whose `end_value` is unset.
    fn find_end_value(&mut self, _job: &Job) -> anyhow::Result<EndValueResolution> {
        Ok(EndValueResolution::NoRelookupNeeded)
    }

    /// Process one job. Report progress through `checkpoint`, passing
    /// `self` so the write can flush first, and return `completed = false`
    /// promptly once it reports an interrupt.
    ///
    /// Call [`Checkpoint::save`] before anything that may fail: an error
    /// returned here loses whatever was not yet written.
    fn process(&mut self, job: &Job, checkpoint: &mut Checkpoint<'_>) -> anyhow::Result<ProcessOutcome>;

    /// Flush buffered side effects (output files, exports). Runs before
    /// every checkpoint write and before a finished job is removed, so the
    /// stored `start_value` never gets ahead of what was flushed.
    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once on the worker thread after the loop exits.
    fn after_looping(&mut self) {}
}

// ---------------------------------------------------------------------------
// Configuration and state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Jobs fetched per `get_next_jobs` call.
    pub batch_size: usize,
    /// Minimum time between throttled checkpoint writes.
    pub update_interval: Duration,
    /// Longest a worker sleeps on the wake signal before polling the store.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            update_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Init,
    Running,
    Draining,
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Init => "init",
            WorkerState::Running => "running",
            WorkerState::Draining => "draining",
            WorkerState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}

/// Flags shared between a worker thread and its handle.
struct Control {
    continue_looping: AtomicBool,
    continue_waiting: AtomicBool,
    interrupt: AtomicBool,
    state: Mutex<WorkerState>,
}

impl Control {
    fn new() -> Self {
        Self {
            continue_looping: AtomicBool::new(true),
            continue_waiting: AtomicBool::new(true),
            interrupt: AtomicBool::new(false),
            state: Mutex::new(WorkerState::Init),
        }
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
    }

    fn begin_draining(&self) {
        let mut state = self.state.lock();
        if *state == WorkerState::Running {
            *state = WorkerState::Draining;
        }
    }
}

/// Totals reported when a worker stops.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub worker: String,
    pub job_type: String,
    pub jobs_completed: u64,
    /// Jobs that returned incomplete and were left in the store.
    pub jobs_parked: u64,
    pub records_processed: u64,
    pub last_start_value: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkerStats {
    fn new(worker: &str, job_type: &str) -> Self {
        Self {
            worker: worker.to_string(),
            job_type: job_type.to_string(),
            jobs_completed: 0,
            jobs_parked: 0,
            records_processed: 0,
            last_start_value: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint
// ---------------------------------------------------------------------------

/// Progress hook handed to [`JobHandler::process`] for one job.
///
/// Holds the job's in-flight `start_value` and any newly resolved end value.
/// Throttled writes happen at most once per `update_interval`; interrupts and
/// explicit saves write unconditionally. Every write takes the handler and
/// flushes it first; a failed flush skips the write and returns the error.
pub struct Checkpoint<'a> {
    client: &'a dyn QueueClient,
    job_id: JobId,
    start_value: Option<String>,
    pending_end: Option<EndValue>,
    interval: Duration,
    last_write: Instant,
    interrupted: &'a AtomicBool,
    span: &'a tracing::Span,
}

impl<'a> Checkpoint<'a> {
    fn new(
        client: &'a dyn QueueClient,
        job: &Job,
        pending_end: Option<EndValue>,
        interval: Duration,
        interrupted: &'a AtomicBool,
        span: &'a tracing::Span,
    ) -> Self {
        Self {
            client,
            job_id: job.id,
            start_value: job.start_value.clone(),
            pending_end,
            interval,
            last_write: Instant::now(),
            interrupted,
            span,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn start_value(&self) -> Option<&str> {
        self.start_value.as_deref()
    }

    /// Record new progress, write it if the interval has elapsed, and
    /// report whether the worker was asked to interrupt. An interrupt forces
    /// the write.
    pub fn checkpoint<H>(&mut self, handler: &mut H, start_value: impl Into<String>) -> anyhow::Result<bool>
    where
        H: JobHandler + ?Sized,
    {
        self.set_start_value(start_value);
        if self.check_for_interrupt(handler)? {
            return Ok(true);
        }
        self.update_if_needed(handler)?;
        Ok(false)
    }

    /// Record progress without writing.
    pub fn set_start_value(&mut self, start_value: impl Into<String>) {
        self.start_value = Some(start_value.into());
    }

    /// Replace the end value; written with the next checkpoint.
    pub fn set_end_value(&mut self, end_value: EndValue) {
        self.pending_end = Some(end_value);
    }

    /// Whether an interrupt was requested. Never writes.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// If interrupted, save and return true.
    pub fn check_for_interrupt<H>(&mut self, handler: &mut H) -> anyhow::Result<bool>
    where
        H: JobHandler + ?Sized,
    {
        if self.is_interrupted() {
            warn!(job_id = %self.job_id, "interrupted, saving progress");
            self.save(handler)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Write if at least `update_interval` passed since the last write.
    pub fn update_if_needed<H>(&mut self, handler: &mut H) -> anyhow::Result<bool>
    where
        H: JobHandler + ?Sized,
    {
        if self.last_write.elapsed() >= self.interval {
            self.save(handler)
        } else {
            Ok(false)
        }
    }

    /// Flush the handler, then write the checkpoint. Returns whether the
    /// store row changed.
    pub fn save<H>(&mut self, handler: &mut H) -> anyhow::Result<bool>
    where
        H: JobHandler + ?Sized,
    {
        handler.flush()?;
        let written = self
            .client
            .update_job(self.job_id, self.start_value.as_deref(), self.pending_end.as_ref());
        if written {
            self.pending_end = None;
        }
        self.last_write = Instant::now();
        record_checkpoint(self.span, self.start_value.as_deref());
        info!(job_id = %self.job_id, start_value = ?self.start_value, "job checkpointed");
        Ok(written)
    }

    /// Call before sleeping inside `process`. The first wait of a stretch
    /// saves, so a long sleep never holds unwritten progress.
    pub fn before_waiting<H>(&mut self, handler: &mut H, first_time_waiting: bool) -> anyhow::Result<()>
    where
        H: JobHandler + ?Sized,
    {
        if first_time_waiting {
            self.save(handler)?;
        }
        Ok(())
    }

    /// Call after sleeping so the wait does not count towards the next
    /// throttled write.
    pub fn after_waiting(&mut self) {
        self.last_write = Instant::now();
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// A worker bound to one job type, not yet started.
pub struct Worker<H: JobHandler> {
    name: String,
    job_type: String,
    config: WorkerConfig,
    client: Arc<dyn QueueClient>,
    handler: H,
}

impl<H: JobHandler> Worker<H> {
    pub fn new(job_type: impl Into<String>, client: Arc<dyn QueueClient>, handler: H) -> Self {
        let job_type = job_type.into();
        let seq = WORKER_SEQ.fetch_add(1, Ordering::Relaxed);
        Self {
            name: format!("{job_type}-{seq}"),
            job_type,
            config: WorkerConfig::default(),
            client,
            handler,
        }
    }

    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = WorkerConfig {
            batch_size: config.batch_size.max(1),
            ..config
        };
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.config.batch_size = batch_size.max(1);
        self
    }

    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.config.update_interval = interval;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Spawn the worker thread.
    pub fn start(self) -> Result<WorkerHandle> {
        let control = Arc::new(Control::new());
        let name = self.name.clone();
        let job_type = self.job_type.clone();
        let client = Arc::clone(&self.client);

        let thread_control = Arc::clone(&control);
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run(&thread_control))?;

        Ok(WorkerHandle {
            name,
            job_type,
            control,
            client,
            thread,
        })
    }

    fn run(mut self, control: &Control) -> Result<WorkerStats> {
        let mut stats = WorkerStats::new(&self.name, &self.job_type);
        control.set_state(WorkerState::Running);
        info!(worker = %self.name, job_type = %self.job_type, "worker started");

        let result = self.run_loop(control, &mut stats);

        control.set_state(WorkerState::Draining);
        self.handler.after_looping();
        stats.finished_at = Some(Utc::now());
        control.set_state(WorkerState::Stopped);

        match &result {
            Ok(()) => info!(
                worker = %self.name,
                jobs_completed = stats.jobs_completed,
                jobs_parked = stats.jobs_parked,
                records_processed = stats.records_processed,
                last_start_value = ?stats.last_start_value,
                "worker stopped"
            ),
            Err(e) => warn!(worker = %self.name, "worker stopped on error: {e}"),
        }
        result.map(|()| stats)
    }

    fn run_loop(&mut self, control: &Control, stats: &mut WorkerStats) -> Result<()> {
        self.handler.before_looping().map_err(Error::Handler)?;

        while control.continue_looping.load(Ordering::Acquire) {
            let jobs = match self.client.get_next_jobs(&self.job_type, self.config.batch_size) {
                Ok(jobs) => jobs,
                Err(QueueExhausted) => {
                    if control.continue_waiting.load(Ordering::Acquire) {
                        let woke = self.client.wake_signal().wait(self.config.poll_interval);
                        if !woke {
                            // Poll fallback: a wakeup may have been consumed
                            // by a worker of another job type.
                            self.client.populate(&self.job_type);
                        }
                        continue;
                    }
                    // One last look at the store before draining out.
                    if self.client.populate(&self.job_type) {
                        continue;
                    }
                    debug!(worker = %self.name, "queue is empty and not waiting");
                    break;
                }
            };

            for job in jobs {
                if control.interrupt.load(Ordering::Acquire) {
                    warn!(worker = %self.name, job_id = %job.id, "interrupted, leaving job for recovery");
                    break;
                }
                self.process_job(job, control, stats)?;
            }
        }

        Ok(())
    }

    fn process_job(&mut self, mut job: Job, control: &Control, stats: &mut WorkerStats) -> Result<()> {
        let span = start_job_span(&self.job_type, job.id);
        let _entered = span.enter();
        let started = Instant::now();
        debug!(job_id = %job.id, item_id = %job.item_id, "starting job");

        let mut pending_end = None;
        if job.end_value.is_none() {
            match self.handler.find_end_value(&job).map_err(Error::Handler)? {
                EndValueResolution::AlreadyComplete => {
                    debug!(job_id = %job.id, "job already complete, not processing");
                    return self.complete_job(&job, 0, started, &span, stats);
                }
                resolution => {
                    job.end_value = resolution.into();
                    pending_end = job.end_value.clone();
                }
            }
        }

        let outcome = {
            let mut checkpoint = Checkpoint::new(
                self.client.as_ref(),
                &job,
                pending_end,
                self.config.update_interval,
                &control.interrupt,
                &span,
            );
            let outcome = self
                .handler
                .process(&job, &mut checkpoint)
                .map_err(Error::Handler)?;
            if !outcome.completed {
                checkpoint.save(&mut self.handler).map_err(Error::Handler)?;
            }
            stats.last_start_value = checkpoint.start_value.clone();
            outcome
        };

        stats.records_processed += outcome.records_processed;
        metrics::records_processed().add(
            outcome.records_processed,
            &[KeyValue::new("job_type", self.job_type.clone())],
        );

        if outcome.completed {
            self.complete_job(&job, outcome.records_processed, started, &span, stats)
        } else {
            stats.jobs_parked += 1;
            metrics::jobs_parked().add(1, &[KeyValue::new("job_type", self.job_type.clone())]);
            record_outcome(&span, "parked");
            debug!(
                job_id = %job.id,
                records = outcome.records_processed,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "job incomplete, left in store"
            );
            Ok(())
        }
    }

    fn complete_job(
        &mut self,
        job: &Job,
        records: u64,
        started: Instant,
        span: &tracing::Span,
        stats: &mut WorkerStats,
    ) -> Result<()> {
        self.handler.flush().map_err(Error::Handler)?;
        self.client.remove_job(job.id);
        stats.jobs_completed += 1;

        let elapsed = started.elapsed();
        let labels = [KeyValue::new("job_type", self.job_type.clone())];
        metrics::jobs_completed().add(1, &labels);
        metrics::job_duration_ms().record(elapsed.as_secs_f64() * 1000.0, &labels);
        record_outcome(span, "completed");
        debug!(
            job_id = %job.id,
            records,
            elapsed_ms = elapsed.as_millis() as u64,
            "job completed"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Control side of a running worker.
pub struct WorkerHandle {
    name: String,
    job_type: String,
    control: Arc<Control>,
    client: Arc<dyn QueueClient>,
    thread: JoinHandle<Result<WorkerStats>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job_type(&self) -> &str {
        &self.job_type
    }

    pub fn state(&self) -> WorkerState {
        *self.control.state.lock()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stop the worker. With `wait_for_empty_queue` it keeps working until
    /// its queue is observed empty; otherwise it is interrupted, which takes
    /// effect at the handler's next checkpoint.
    pub fn stop(&self, wait_for_empty_queue: bool) {
        if wait_for_empty_queue {
            self.control.continue_waiting.store(false, Ordering::Release);
            self.control.begin_draining();
            self.client.wake_signal().set();
        } else {
            self.interrupt();
        }
    }

    /// Stop once the current batch is done.
    pub fn stop_after_job(&self) {
        self.control.continue_looping.store(false, Ordering::Release);
        self.control.begin_draining();
        self.client.wake_signal().set();
    }

    /// Stop as soon as the handler checks in.
    pub fn interrupt(&self) {
        self.control.continue_looping.store(false, Ordering::Release);
        self.control.interrupt.store(true, Ordering::Release);
        self.control.begin_draining();
        self.client.wake_signal().set();
    }

    /// Wait for the thread. Returns its stats, or the handler error that
    /// stopped it.
    pub fn join(self) -> Result<WorkerStats> {
        self.thread
            .join()
            .map_err(|_| Error::WorkerPanicked(self.name.clone()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every checkpoint write, and how many flushes preceded it.
    #[derive(Default)]
    struct RecordingClient {
        writes: Mutex<Vec<(JobId, Option<String>, Option<EndValue>)>>,
        flushes: Arc<AtomicUsize>,
        flushes_at_write: Mutex<Vec<usize>>,
        wake: WakeSignal,
    }

    impl QueueClient for RecordingClient {
        fn get_next_jobs(&self, _: &str, _: usize) -> std::result::Result<Vec<Job>, QueueExhausted> {
            Err(QueueExhausted)
        }

        fn update_job(&self, id: JobId, start_value: Option<&str>, end_value: Option<&EndValue>) -> bool {
            self.flushes_at_write
                .lock()
                .push(self.flushes.load(Ordering::SeqCst));
            self.writes
                .lock()
                .push((id, start_value.map(str::to_string), end_value.cloned()));
            true
        }

        fn remove_job(&self, _: JobId) -> bool {
            true
        }

        fn populate(&self, _: &str) -> bool {
            false
        }

        fn wake_signal(&self) -> &WakeSignal {
            &self.wake
        }
    }

    /// Counts flushes; optionally fails them.
    struct Flusher {
        flushes: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Flusher {
        fn new(client: &RecordingClient) -> Self {
            Self {
                flushes: Arc::clone(&client.flushes),
                fail: false,
            }
        }
    }

    impl JobHandler for Flusher {
        fn process(&mut self, _: &Job, _: &mut Checkpoint<'_>) -> anyhow::Result<ProcessOutcome> {
            Ok(ProcessOutcome::completed(0))
        }

        fn flush(&mut self) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn job() -> Job {
        Job {
            id: JobId(7),
            item_id: "item".into(),
            job_type: "main".into(),
            init_data: None,
            start_value: Some("p0".into()),
            end_value: None,
            in_queue: true,
        }
    }

    #[test]
    fn checkpoint_is_throttled_by_interval() {
        let client = RecordingClient::default();
        let mut handler = Flusher::new(&client);
        let interrupted = AtomicBool::new(false);
        let span = tracing::Span::none();
        let job = job();
        let mut cp = Checkpoint::new(&client, &job, None, Duration::from_secs(3600), &interrupted, &span);

        assert_eq!(cp.start_value(), Some("p0"));
        assert!(!cp.checkpoint(&mut handler, "p1").unwrap());
        assert!(!cp.checkpoint(&mut handler, "p2").unwrap());
        assert!(client.writes.lock().is_empty());
        assert_eq!(client.flushes.load(Ordering::SeqCst), 0);

        assert!(cp.save(&mut handler).unwrap());
        let writes = client.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1.as_deref(), Some("p2"));
    }

    #[test]
    fn every_write_is_preceded_by_a_flush() {
        let client = RecordingClient::default();
        let mut handler = Flusher::new(&client);
        let interrupted = AtomicBool::new(false);
        let span = tracing::Span::none();
        let job = job();
        let mut cp = Checkpoint::new(&client, &job, None, Duration::ZERO, &interrupted, &span);

        cp.checkpoint(&mut handler, "a").unwrap();
        cp.checkpoint(&mut handler, "b").unwrap();
        cp.save(&mut handler).unwrap();
        assert_eq!(client.writes.lock().len(), 3);
        assert_eq!(*client.flushes_at_write.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn failed_flush_skips_the_write() {
        let client = RecordingClient::default();
        let mut handler = Flusher::new(&client);
        handler.fail = true;
        let interrupted = AtomicBool::new(false);
        let span = tracing::Span::none();
        let job = job();
        let mut cp = Checkpoint::new(&client, &job, None, Duration::ZERO, &interrupted, &span);

        let err = cp.checkpoint(&mut handler, "a").unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(client.writes.lock().is_empty());
    }

    #[test]
    fn interrupt_forces_write_and_reports() {
        let client = RecordingClient::default();
        let mut handler = Flusher::new(&client);
        let interrupted = AtomicBool::new(true);
        let span = tracing::Span::none();
        let job = job();
        let mut cp = Checkpoint::new(&client, &job, None, Duration::from_secs(3600), &interrupted, &span);

        assert!(cp.checkpoint(&mut handler, "p9").unwrap());
        let writes = client.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1.as_deref(), Some("p9"));
        assert_eq!(client.flushes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolved_end_value_is_written_once() {
        let client = RecordingClient::default();
        let mut handler = Flusher::new(&client);
        let interrupted = AtomicBool::new(false);
        let span = tracing::Span::none();
        let job = job();
        let mut cp = Checkpoint::new(
            &client,
            &job,
            Some(EndValue::bound("100")),
            Duration::ZERO,
            &interrupted,
            &span,
        );

        cp.checkpoint(&mut handler, "10").unwrap();
        cp.checkpoint(&mut handler, "20").unwrap();
        let writes = client.writes.lock();
        assert_eq!(writes[0].2, Some(EndValue::bound("100")));
        assert_eq!(writes[1].2, None);
    }

    #[test]
    fn waiting_resets_throttle_clock() {
        let client = RecordingClient::default();
        let mut handler = Flusher::new(&client);
        let interrupted = AtomicBool::new(false);
        let span = tracing::Span::none();
        let job = job();
        let mut cp = Checkpoint::new(&client, &job, None, Duration::from_millis(20), &interrupted, &span);

        cp.set_start_value("x");
        cp.before_waiting(&mut handler, true).unwrap();
        assert_eq!(client.writes.lock().len(), 1);
        std::thread::sleep(Duration::from_millis(30));
        cp.after_waiting();
        assert!(!cp.update_if_needed(&mut handler).unwrap());
        assert_eq!(client.writes.lock().len(), 1);
    }

    #[test]
    fn zero_batch_size_is_raised_to_one() {
        let client: Arc<dyn QueueClient> = Arc::new(RecordingClient::default());
        let worker = Worker::new("main", client, Flusher {
            flushes: Arc::default(),
            fail: false,
        })
        .config(WorkerConfig {
            batch_size: 0,
            ..WorkerConfig::default()
        });
        assert_eq!(worker.config.batch_size, 1);
    }
}

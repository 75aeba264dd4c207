//! Many threads sharing one `JobDb`: every job is owned by one thread at a
//! time and every job is finished exactly once.

use jobq::engine::{Checkpoint, JobDb, JobHandler, QueueConfig, WorkerConfig, WorkerPool};
use jobq::model::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const THREADS: usize = 10;
const JOBS: usize = 1000;

#[derive(Default)]
struct Ownership {
    in_flight: Mutex<HashSet<JobId>>,
    finished: Mutex<HashSet<JobId>>,
    double_owned: AtomicUsize,
    double_finished: AtomicUsize,
}

impl Ownership {
    fn acquire(&self, id: JobId) {
        if !self.in_flight.lock().insert(id) {
            self.double_owned.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn release(&self, id: JobId) {
        self.in_flight.lock().remove(&id);
        if !self.finished.lock().insert(id) {
            self.double_finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn assert_clean(&self, expected: usize) {
        assert_eq!(self.double_owned.load(Ordering::SeqCst), 0);
        assert_eq!(self.double_finished.load(Ordering::SeqCst), 0);
        assert!(self.in_flight.lock().is_empty());
        assert_eq!(self.finished.lock().len(), expected);
    }
}

fn add_jobs(db: &JobDb) {
    let ids = db.add_jobs((0..JOBS).map(|i| (format!("item-{i}"), "main")));
    assert_eq!(ids.len(), JOBS);
}

#[test]
fn raw_threads_never_share_a_job() {
    let db = Arc::new(JobDb::in_memory(QueueConfig::bounded(50, QueuePolicy::Fifo)).unwrap());
    add_jobs(&db);
    let ownership = Arc::new(Ownership::default());

    let threads: Vec<_> = (0..THREADS)
        .map(|_| {
            let db = Arc::clone(&db);
            let ownership = Arc::clone(&ownership);
            std::thread::spawn(move || {
                loop {
                    let batch = match db.get_next_jobs("main", 3) {
                        Ok(batch) => batch,
                        Err(_) => {
                            if db.populate_queues(Some("main"), false) {
                                continue;
                            }
                            break;
                        }
                    };
                    for job in batch {
                        ownership.acquire(job.id);
                        db.update_job(job.id, Some("working"), None);
                        std::thread::yield_now();
                        ownership.release(job.id);
                        assert!(db.remove_job(job.id));
                    }
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }

    ownership.assert_clean(JOBS);
    assert_eq!(db.get_job_count(), Some(0));
}

struct Tracked {
    ownership: Arc<Ownership>,
}

impl JobHandler for Tracked {
    fn process(&mut self, job: &Job, checkpoint: &mut Checkpoint<'_>) -> anyhow::Result<ProcessOutcome> {
        self.ownership.acquire(job.id);
        checkpoint.checkpoint(self, "half")?;
        std::thread::yield_now();
        self.ownership.release(job.id);
        Ok(ProcessOutcome::completed(1))
    }
}

#[test]
fn worker_pool_finishes_every_job_once() {
    let db = Arc::new(JobDb::in_memory(QueueConfig::bounded(64, QueuePolicy::Lifo)).unwrap());
    add_jobs(&db);
    let ownership = Arc::new(Ownership::default());

    let config = WorkerConfig {
        batch_size: 4,
        update_interval: Duration::ZERO,
        poll_interval: Duration::from_millis(20),
    };
    let mut pool = WorkerPool::new(db.clone(), config);
    pool.spawn("main", THREADS, || Tracked {
        ownership: Arc::clone(&ownership),
    })
    .unwrap();
    pool.stop(true);
    let stats = pool.join().unwrap();

    let completed: u64 = stats.iter().map(|s| s.jobs_completed).sum();
    assert_eq!(completed, JOBS as u64);
    ownership.assert_clean(JOBS);
    assert_eq!(db.get_job_count(), Some(0));
}

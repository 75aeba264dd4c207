//! Integration tests for the durable store behind `JobDb`.

use jobq::engine::{JobDb, QueueConfig};
use jobq::error::Error;
use jobq::model::*;
use tempfile::TempDir;

fn test_db() -> JobDb {
    JobDb::in_memory(QueueConfig::unbounded()).expect("failed to create in-memory db")
}

// ---------------------------------------------------------------------------
// Dedup
// ---------------------------------------------------------------------------

#[test]
fn adding_unstarted_job_twice_inserts_one_row() {
    let db = test_db();

    let first = db.add_jobs([("1", "main")]);
    assert_eq!(first.len(), 1);

    let second = db.add_jobs([("1", "main")]);
    assert!(second.is_empty());
    assert_eq!(db.get_job_count(), Some(1));
}

#[test]
fn started_job_allows_newer_init_data() {
    let db = test_db();
    let id = db.add_job(NewJob::new("1", "main").init_data(5)).unwrap();

    // Unstarted: nothing else is added, whatever the init_data.
    assert_eq!(db.add_job(NewJob::new("1", "main").init_data(9)), None);

    assert!(db.update_job(id, Some("p1"), None));

    // Started: only strictly newer init_data gets a new row.
    assert_eq!(db.add_job(NewJob::new("1", "main").init_data(5)), None);
    assert_eq!(db.add_job(NewJob::new("1", "main").init_data(4)), None);
    assert!(db.add_job(NewJob::new("1", "main").init_data(6)).is_some());
    assert_eq!(db.get_job_count(), Some(2));
}

#[test]
fn started_job_allows_null_init_data() {
    let db = test_db();
    let id = db.add_job(("1", "main")).unwrap();
    db.update_job(id, Some("p1"), None);

    assert!(db.add_job(("1", "main")).is_some());
    assert_eq!(db.get_job_count(), Some(2));
}

#[test]
fn same_item_different_job_type_is_independent() {
    let db = test_db();
    let ids = db.add_jobs([("1", "main"), ("1", "other")]);
    assert_eq!(ids.len(), 2);
    assert_eq!(db.queue_len("main"), 1);
    assert_eq!(db.queue_len("other"), 1);
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

#[test]
fn update_without_end_value_keeps_stored_bound() {
    let db = test_db();
    let id = db.add_job(("1", "main")).unwrap();

    assert!(db.update_job(id, Some("a"), Some(&EndValue::bound("b"))));
    assert!(db.update_job(id, Some("c"), None));

    let job = db.get_job(id).unwrap();
    assert_eq!(job.start_value.as_deref(), Some("c"));
    assert_eq!(job.end_value, Some(EndValue::bound("b")));
    assert_eq!(job.end_bound(), Some("b"));
}

#[test]
fn unbounded_end_value_survives_as_its_own_variant() {
    let db = test_db();
    let id = db.add_job(("1", "main")).unwrap();

    db.update_job(id, Some("0"), Some(&EndValue::Unbounded));
    let job = db.get_job(id).unwrap();
    assert_eq!(job.end_value, Some(EndValue::Unbounded));
    assert_eq!(job.end_bound(), None);
}

#[test]
fn updating_missing_job_reports_no_change() {
    let db = test_db();
    assert!(!db.update_job(JobId(404), Some("x"), None));
}

// ---------------------------------------------------------------------------
// Removal and parking
// ---------------------------------------------------------------------------

#[test]
fn remove_is_idempotent() {
    let db = test_db();
    let id = db.add_job(("1", "main")).unwrap();

    assert!(db.remove_job(id));
    assert!(!db.remove_job(id));
    assert_eq!(db.get_job(id), None);
    assert_eq!(db.get_job_count(), Some(0));
}

#[test]
fn remove_jobs_deletes_batch() {
    let db = test_db();
    let ids = db.add_jobs((0..5).map(|i| (i.to_string(), "main")));
    assert!(db.remove_jobs(&ids[..3]));
    assert_eq!(db.get_job_count(), Some(2));
}

#[test]
fn failed_job_parks_row_with_checkpoint() {
    let db = test_db();
    let id = db.add_job(("1", "main")).unwrap();
    db.update_job(id, Some("p1"), Some(&EndValue::bound("p9")));

    assert!(db.failed_job(id, Some("p2"), None));

    let job = db.get_job(id).unwrap();
    assert!(!job.in_queue);
    assert_eq!(job.start_value.as_deref(), Some("p2"));
    assert_eq!(job.end_value, Some(EndValue::bound("p9")));
    assert!(!db.failed_job(JobId(404), None, None));
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

#[test]
fn iter_jobs_yields_every_row_in_id_order() {
    let db = test_db();
    let ids = db.add_jobs((0..600).map(|i| (i.to_string(), "main")));
    assert_eq!(ids.len(), 600);

    let seen: Vec<JobId> = db.iter_jobs().map(|j| j.id).collect();
    assert_eq!(seen, ids);

    // The lock is released once the iterator is dropped.
    assert_eq!(db.get_job_count(), Some(600));
}

#[test]
fn list_jobs_filters_by_type() {
    let db = test_db();
    db.add_jobs([("1", "main"), ("2", "main"), ("3", "other")]);

    assert_eq!(db.list_jobs(Some("main"), 10).len(), 2);
    assert_eq!(db.list_jobs(None, 10).len(), 3);
    assert_eq!(db.list_jobs(None, 1).len(), 1);
}

#[test]
fn tables_include_jobs() {
    let db = test_db();
    let tables = db.get_tables().unwrap();
    assert!(tables.iter().any(|t| t == "jobs"));
}

#[test]
fn stats_count_operations() {
    let db = test_db();
    let ids = db.add_jobs([("1", "main"), ("2", "main")]);
    db.update_job(ids[0], Some("x"), None);
    db.remove_job(ids[1]);

    let stats = db.stats();
    assert_eq!(stats.jobs_added, 2);
    assert_eq!(stats.jobs_updated, 1);
    assert_eq!(stats.jobs_removed, 1);
    assert_eq!(stats.job_count, Some(1));
    assert_eq!(stats.queue_lengths, vec![("main".to_string(), 2)]);
}

// ---------------------------------------------------------------------------
// Lifecycle and recovery
// ---------------------------------------------------------------------------

#[test]
fn open_existing_requires_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing.db");

    let err = JobDb::open_existing(&path, QueueConfig::unbounded()).err().unwrap();
    assert!(matches!(err, Error::StoreConnection(_)));
    assert!(!path.exists());
}

#[test]
fn create_refuses_existing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.db");

    let db = JobDb::create(&path, QueueConfig::unbounded()).unwrap();
    assert_eq!(db.path(), Some(path.as_path()));
    db.close().unwrap();

    let err = JobDb::create(&path, QueueConfig::unbounded()).err().unwrap();
    assert!(matches!(err, Error::AlreadyExists(_)));
}

#[test]
fn reopen_redelivers_in_flight_job_with_checkpoint() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.db");

    {
        let db = JobDb::open(&path, QueueConfig::unbounded()).unwrap();
        db.add_job(("1", "main")).unwrap();

        // A worker picks the job up and checkpoints, then the process dies.
        let job = db.get_next_job("main").unwrap();
        db.update_job(job.id, Some("p1"), Some(&EndValue::bound("p9")));
        assert_eq!(db.get_job(job.id).map(|j| j.in_queue), Some(true));
        db.close().unwrap();
    }

    let db = JobDb::open_existing(&path, QueueConfig::unbounded()).unwrap();
    let job = db.get_next_job("main").unwrap();
    assert_eq!(job.item_id, "1");
    assert_eq!(job.start_value.as_deref(), Some("p1"));
    assert_eq!(job.end_value, Some(EndValue::bound("p9")));
}

#[test]
fn explicit_recovery_sweep_requeues_everything_once() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.db");
    let db = JobDb::open(&path, QueueConfig::unbounded()).unwrap();
    db.add_jobs((0..3).map(|i| (i.to_string(), "main")));

    // Drain the queue without finishing anything.
    let taken = db.get_next_jobs("main", 3).unwrap();
    assert_eq!(taken.len(), 3);
    assert_eq!(db.queue_len("main"), 0);

    assert!(db.populate_queues(None, true));
    assert_eq!(db.queue_len("main"), 3);

    // A second ordinary populate finds nothing new.
    db.populate_queues(None, false);
    assert_eq!(db.queue_len("main"), 3);
}

#[test]
fn second_handle_without_recovery_leaves_owner_bookkeeping_alone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.db");

    let owner = JobDb::open(&path, QueueConfig::bounded(1, QueuePolicy::Fifo)).unwrap();
    let ids = owner.add_jobs([("1", "main"), ("2", "main")]);
    let taken = owner.get_next_job("main").unwrap();
    assert_eq!(taken.id, ids[0]);

    let reader = JobDb::open_existing_without_recovery(&path, QueueConfig::unbounded()).unwrap();
    assert_eq!(reader.get_job_count(), Some(2));
    assert_eq!(reader.queue_len("main"), 0);
    assert_eq!(reader.get_job(ids[0]).map(|j| j.in_queue), Some(true));
    assert_eq!(reader.get_job(ids[1]).map(|j| j.in_queue), Some(false));
    reader.close().unwrap();

    // The in-flight job is not handed out a second time.
    assert!(owner.populate_queues(Some("main"), false));
    assert_eq!(owner.queued_ids("main"), vec![ids[1]]);
}

#[test]
fn open_without_recovery_creates_missing_store() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.db");

    let err = JobDb::open_existing_without_recovery(&path, QueueConfig::unbounded())
        .err()
        .unwrap();
    assert!(matches!(err, Error::StoreConnection(_)));

    let db = JobDb::open_without_recovery(&path, QueueConfig::unbounded()).unwrap();
    assert!(path.exists());
    assert_eq!(db.get_job_count(), Some(0));
}

#[test]
fn reopen_without_recovery_does_not_requeue() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("jobs.db");

    let db = JobDb::open(&path, QueueConfig::unbounded()).unwrap();
    let id = db.add_job(("1", "main")).unwrap();
    db.close().unwrap();

    let db = JobDb::open_without_recovery(&path, QueueConfig::unbounded()).unwrap();
    assert_eq!(db.queue_len("main"), 0);
    assert_eq!(db.get_job(id).map(|j| j.in_queue), Some(true));
}

//! In-memory queue set and wake signal.
//!
//! One ordered queue per job type, created lazily on first admission. Queues
//! hold snapshots of job rows; the store row stays the source of truth.
//! Retrieval always pops from the front; the admission side is where FIFO and
//! LIFO differ.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use crate::model::{Job, JobId, QueuePolicy};

// ---------------------------------------------------------------------------
// Wake signal
// ---------------------------------------------------------------------------

/// Shared, level-triggered event: set whenever any queue gains inventory.
///
/// One signal serves every job type, so a worker can wake for another type's
/// inventory, find its own queue still empty, and go back to waiting.
#[derive(Debug, Default)]
pub struct WakeSignal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal and wake every waiter.
    pub fn set(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        *self.flag.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock()
    }

    /// Block until the signal is set or `timeout` elapses.
    /// Returns whether the signal is set.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut flag = self.flag.lock();
        if !*flag {
            let _ = self.cond.wait_for(&mut flag, timeout);
        }
        *flag
    }
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Result of admitting items into one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Admission {
    /// Ids now resident in the queue.
    pub admitted: Vec<JobId>,
    /// Incoming ids refused by a full FIFO queue.
    pub rejected: Vec<JobId>,
    /// Ids pushed out of a full LIFO queue, including incoming ones that
    /// were displaced within the same call.
    pub evicted: Vec<JobId>,
}

impl Admission {
    /// Ids whose store row must now read `in_queue = 0`.
    pub fn not_in_queue(&self) -> Vec<JobId> {
        self.rejected
            .iter()
            .chain(self.evicted.iter())
            .copied()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Queue set
// ---------------------------------------------------------------------------

/// Per-job-type queues sharing one capacity and one admission policy.
pub struct QueueSet {
    queues: Mutex<HashMap<String, VecDeque<Job>>>,
    capacity: Option<usize>,
    policy: QueuePolicy,
}

/// Exclusive access to the queue set. Held across "measure remaining
/// capacity, query the store, admit" during repopulation.
pub struct QueueGuard<'a> {
    queues: MutexGuard<'a, HashMap<String, VecDeque<Job>>>,
    capacity: Option<usize>,
    policy: QueuePolicy,
}

impl QueueSet {
    /// `capacity` of `None` (or zero) means unbounded.
    pub fn new(capacity: Option<usize>, policy: QueuePolicy) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            capacity: capacity.filter(|&c| c > 0),
            policy,
        }
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub fn lock(&self) -> QueueGuard<'_> {
        QueueGuard {
            queues: self.queues.lock(),
            capacity: self.capacity,
            policy: self.policy,
        }
    }

    /// Thread-safe admission. Sets `wake` when the queue ends up non-empty.
    pub fn put_many_in_queue(
        &self,
        job_type: &str,
        items: impl IntoIterator<Item = Job>,
        wake: &WakeSignal,
    ) -> Admission {
        self.lock().put_many(job_type, items, wake)
    }

    pub fn put_in_queue(&self, job_type: &str, item: Job, wake: &WakeSignal) -> Admission {
        self.put_many_in_queue(job_type, std::iter::once(item), wake)
    }

    pub fn len(&self, job_type: &str) -> usize {
        self.lock().len(job_type)
    }

    /// `(job_type, length)` for every queue created so far.
    pub fn lengths(&self) -> Vec<(String, usize)> {
        let guard = self.lock();
        let mut lengths: Vec<_> = guard
            .queues
            .iter()
            .map(|(k, q)| (k.clone(), q.len()))
            .collect();
        lengths.sort();
        lengths
    }

    /// Ids currently resident for `job_type`, front first.
    pub fn snapshot(&self, job_type: &str) -> Vec<JobId> {
        self.lock()
            .queues
            .get(job_type)
            .map(|q| q.iter().map(|j| j.id).collect())
            .unwrap_or_default()
    }
}

impl QueueGuard<'_> {
    pub fn len(&self, job_type: &str) -> usize {
        self.queues.get(job_type).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self, job_type: &str) -> bool {
        self.len(job_type) == 0
    }

    /// How many more items the queue can take; `None` when unbounded.
    pub fn remaining(&self, job_type: &str) -> Option<usize> {
        self.capacity
            .map(|cap| cap.saturating_sub(self.len(job_type)))
    }

    /// Drop every resident snapshot. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        self.queues.values_mut().map(|q| q.drain(..).count()).sum()
    }

    pub fn pop_front(&mut self, job_type: &str) -> Option<Job> {
        self.queues.get_mut(job_type)?.pop_front()
    }

    pub fn put_many(
        &mut self,
        job_type: &str,
        items: impl IntoIterator<Item = Job>,
        wake: &WakeSignal,
    ) -> Admission {
        let capacity = self.capacity;
        let policy = self.policy;
        let queue = self.queues.entry(job_type.to_string()).or_default();
        let mut admission = Admission::default();

        match (capacity, policy) {
            (None, _) => {
                for item in items {
                    admission.admitted.push(item.id);
                    queue.push_back(item);
                }
            }
            (Some(cap), QueuePolicy::Fifo) => {
                for item in items {
                    if queue.len() < cap {
                        admission.admitted.push(item.id);
                        queue.push_back(item);
                    } else {
                        admission.rejected.push(item.id);
                    }
                }
            }
            (Some(cap), QueuePolicy::Lifo) => {
                for item in items {
                    if queue.len() >= cap {
                        if let Some(old) = queue.pop_back() {
                            admission.evicted.push(old.id);
                        }
                    }
                    admission.admitted.push(item.id);
                    queue.push_front(item);
                }
                // An incoming item evicted later in this call is not resident.
                if !admission.evicted.is_empty() {
                    let evicted = &admission.evicted;
                    admission.admitted.retain(|id| !evicted.contains(id));
                }
            }
        }

        if !queue.is_empty() {
            wake.set();
        }

        admission
    }
}

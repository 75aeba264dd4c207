//! Worker pool: a fixed set of worker threads, each bound to one job type.

use std::sync::Arc;
use tracing::{info, warn};

use super::worker::{JobHandler, QueueClient, Worker, WorkerConfig, WorkerHandle, WorkerStats};
use crate::error::Result;

pub struct WorkerPool {
    client: Arc<dyn QueueClient>,
    config: WorkerConfig,
    handles: Vec<WorkerHandle>,
}

impl WorkerPool {
    pub fn new(client: Arc<dyn QueueClient>, config: WorkerConfig) -> Self {
        Self {
            client,
            config,
            handles: Vec::new(),
        }
    }

    /// Start `count` workers for `job_type`, each with a handler from `factory`.
    pub fn spawn<H, F>(&mut self, job_type: &str, count: usize, mut factory: F) -> Result<()>
    where
        H: JobHandler,
        F: FnMut() -> H,
    {
        for _ in 0..count {
            let handle = Worker::new(job_type, Arc::clone(&self.client), factory())
                .config(self.config)
                .start()?;
            self.handles.push(handle);
        }
        info!(job_type, count, total = self.handles.len(), "workers started");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[WorkerHandle] {
        &self.handles
    }

    /// Ask every worker to stop. See [`WorkerHandle::stop`].
    pub fn stop(&self, wait_for_empty_queue: bool) {
        for handle in &self.handles {
            handle.stop(wait_for_empty_queue);
        }
    }

    pub fn interrupt(&self) {
        self.stop(false);
    }

    /// Join every worker. All threads are joined even if some failed; the
    /// first failure is returned.
    pub fn join(self) -> Result<Vec<WorkerStats>> {
        let mut stats = Vec::with_capacity(self.handles.len());
        let mut first_err = None;

        for handle in self.handles {
            let name = handle.name().to_string();
            match handle.join() {
                Ok(s) => stats.push(s),
                Err(e) => {
                    warn!(worker = %name, "worker failed: {e}");
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(stats),
        }
    }
}

//! Fixed-size pool of threads pulling connections from the job queue.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use renderq_config::POLL_INTERVAL;

use crate::job::JobExecutor;
use crate::lifecycle::ShutdownToken;
use crate::queue::JobQueue;

pub(crate) const WORKER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::worker");

const JOIN_POLL: Duration = Duration::from_millis(20);

/// Running worker threads.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `count` workers. Each loops until `token` is cancelled, taking
    /// one job at a time.
    pub(crate) fn start(
        count: usize,
        queue: &Arc<JobQueue>,
        executor: &JobExecutor,
        token: &ShutdownToken,
    ) -> std::io::Result<Self> {
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let queue = Arc::clone(queue);
            let executor = executor.clone();
            let token = token.clone();
            let handle = thread::Builder::new()
                .name(format!("renderqd-worker-{index}"))
                .spawn(move || run_worker(index, &queue, &executor, &token))?;
            handles.push(handle);
        }
        info!(target: WORKER_TARGET, workers = count, "worker pool started");
        Ok(Self { handles })
    }

    /// Waits up to `timeout` for every worker to exit. Returns the number of
    /// workers still running when the budget ran out; those are detached.
    pub(crate) fn join(self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut pending = self.handles;
        while !pending.is_empty() && Instant::now() < deadline {
            let (finished, running): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(JoinHandle::is_finished);
            for handle in finished {
                if handle.join().is_err() {
                    error!(target: WORKER_TARGET, "worker thread panicked");
                }
            }
            pending = running;
            if !pending.is_empty() {
                thread::sleep(JOIN_POLL);
            }
        }
        pending.len()
    }
}

fn run_worker(index: usize, queue: &JobQueue, executor: &JobExecutor, token: &ShutdownToken) {
    debug!(target: WORKER_TARGET, worker = index, "worker started");
    while !token.is_cancelled() {
        let Some(connection) = queue.pop_timeout(POLL_INTERVAL) else {
            continue;
        };
        let peer = connection.peer;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| executor.execute(connection)));
        if outcome.is_err() {
            error!(target: WORKER_TARGET, worker = index, %peer, "job panicked; worker continues");
        }
    }
    debug!(target: WORKER_TARGET, worker = index, "worker stopped");
}

//! Event pump worker pool.
//!
//! A fixed set of worker tasks started at transport initialization when the
//! configured pool size is nonzero. Each worker waits on the registry's
//! release signal, then performs one non-blocking drain pass over every
//! registered client and server connection. The producer side of the
//! signal is explicit: connection readers and registry mutations call
//! `Registry::wake_workers`, and a bounded idle tick backstops any wakeup
//! lost between the check and the wait.

use crate::transport::registry::Registry;
use crate::transport::TransportInner;
use crate::utils::timeout::SHUTDOWN_TIMEOUT;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Upper bound on the wait between drain passes when no wakeup arrives
const IDLE_TICK: Duration = Duration::from_millis(50);

/// Fixed-size pool of event pump workers.
pub(crate) struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    active: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn `size` workers draining `inner`. Must run inside a tokio
    /// runtime.
    pub fn start(size: usize, inner: Arc<TransportInner>) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let mut workers = Vec::with_capacity(size);
        for worker_id in 0..size {
            let inner = Arc::clone(&inner);
            let active = Arc::clone(&active);
            workers.push(tokio::spawn(async move {
                debug!(worker_id, "transport worker started");
                loop {
                    {
                        let wake = inner.registry.wake_notify();
                        tokio::select! {
                            _ = wake.notified() => {}
                            _ = tokio::time::sleep(IDLE_TICK) => {}
                        }
                    }
                    if !active.load(Ordering::Acquire) {
                        break;
                    }
                    inner.drain_pass().await;
                }
                debug!(worker_id, "transport worker stopped");
            }));
        }
        Self { workers, active }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Clear every worker's active flag, broadcast the release signal, and
    /// join them all. No worker outlives this call: a worker that misses
    /// the join window is aborted.
    pub async fn shutdown(mut self, registry: &Registry) {
        self.active.store(false, Ordering::Release);
        registry.wake_workers();
        for mut handle in self.workers.drain(..) {
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                warn!("worker missed the shutdown window, aborting");
                handle.abort();
            }
        }
    }
}

//! Single background worker executing every forwarded request.
//!
//! Jobs from all targets share one bounded queue and are executed one at a
//! time, which caps the proxy at a single in-flight forwarded call.

use crate::metrics::ProxyMetrics;
use crate::snapshot::StatusSnapshot;
use crate::target::TargetClient;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Default queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// A forwarding job
struct ProxyJob {
    target: Arc<TargetClient>,
    reply: oneshot::Sender<Arc<StatusSnapshot>>,
}

/// Handle used to submit jobs to the worker
#[derive(Clone)]
pub struct WorkerHandle {
    jobs: mpsc::Sender<ProxyJob>,
    metrics: Option<Arc<ProxyMetrics>>,
}

impl WorkerHandle {
    /// Queue a fetch for `target` and wait for its snapshot.
    ///
    /// Returns `None` if the worker has stopped. Dropping the returned future
    /// abandons the wait but not the job.
    pub async fn submit(&self, target: Arc<TargetClient>) -> Option<Arc<StatusSnapshot>> {
        let (reply, response) = oneshot::channel();

        // Counted between reserve and send so the worker never dequeues an
        // uncounted job, and an abandoned wait for capacity counts nothing
        let permit = self.jobs.reserve().await.ok()?;
        if let Some(ref m) = self.metrics {
            m.job_enqueued();
        }
        permit.send(ProxyJob { target, reply });

        response.await.ok()
    }
}

/// The worker task
pub struct ProxyWorker {
    jobs: mpsc::Receiver<ProxyJob>,
    metrics: Option<Arc<ProxyMetrics>>,
}

impl ProxyWorker {
    /// Create a worker and the handle feeding it
    pub fn new(capacity: usize, metrics: Option<Arc<ProxyMetrics>>) -> (Self, WorkerHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = WorkerHandle {
            jobs: tx,
            metrics: metrics.clone(),
        };
        (Self { jobs: rx, metrics }, handle)
    }

    /// Spawn the worker on the current tokio runtime
    pub fn spawn(capacity: usize, metrics: Option<Arc<ProxyMetrics>>) -> WorkerHandle {
        let (worker, handle) = Self::new(capacity, metrics);
        tokio::spawn(worker.run());
        handle
    }

    /// Run until every handle is dropped
    pub async fn run(mut self) {
        info!("Health check proxy worker started");

        while let Some(job) = self.jobs.recv().await {
            if let Some(ref m) = self.metrics {
                m.job_started();
            }

            let port = job.target.port();
            let snapshot = job.target.fetch().await;

            if job.reply.send(snapshot).is_err() {
                debug!(port, "Caller gave up before the forwarded request completed");
            }
        }

        info!("Health check proxy worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::TlsPolicy;
    use crate::types::TargetDescriptor;
    use std::time::Duration;

    fn closed_target() -> Arc<TargetClient> {
        let target = TargetClient::new(
            TargetDescriptor {
                port: 1,
                timeout: Duration::from_millis(100),
                cache_expiry: Duration::from_secs(60),
                proxy_protocol: false,
            },
            TlsPolicy::TrustAll,
            None,
        );
        target.close();
        Arc::new(target)
    }

    #[tokio::test]
    async fn test_submit_returns_snapshot() {
        let handle = ProxyWorker::spawn(4, None);
        let snapshot = handle.submit(closed_target()).await.unwrap();
        assert_eq!(snapshot.status(), http::StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_submit_after_worker_stopped() {
        let (worker, handle) = ProxyWorker::new(4, None);
        drop(worker);
        assert!(handle.submit(closed_target()).await.is_none());
    }

    #[tokio::test]
    async fn test_abandoned_job_still_updates_cache() {
        let (worker, handle) = ProxyWorker::new(4, None);
        let target = closed_target();

        // Enqueue, then abandon the wait before the worker runs
        let submit = handle.submit(Arc::clone(&target));
        let _ = tokio::time::timeout(Duration::from_millis(10), submit).await;
        assert!(target.cached().is_none());

        drop(handle);
        worker.run().await;
        assert!(target.cached().is_some());
    }

    #[tokio::test]
    async fn test_queue_depth_never_negative() {
        let metrics = Arc::new(ProxyMetrics::new());
        let (worker, handle) = ProxyWorker::new(4, Some(Arc::clone(&metrics)));
        let worker = tokio::spawn(worker.run());

        for _ in 0..8 {
            handle.submit(closed_target()).await.unwrap();
            assert!(metrics.queue_depth() >= 0);
        }
        assert_eq!(metrics.queue_depth(), 0);

        drop(handle);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_wait_for_capacity_leaves_queue_depth_unchanged() {
        let metrics = Arc::new(ProxyMetrics::new());
        let (_worker, handle) = ProxyWorker::new(1, Some(Arc::clone(&metrics)));

        // Fill the only slot, then give up waiting for a second one
        let first = handle.submit(closed_target());
        let _ = tokio::time::timeout(Duration::from_millis(10), first).await;
        assert_eq!(metrics.queue_depth(), 1);

        let second = handle.submit(closed_target());
        let _ = tokio::time::timeout(Duration::from_millis(10), second).await;
        assert_eq!(metrics.queue_depth(), 1);
    }

    #[tokio::test]
    async fn test_rejected_job_leaves_queue_depth_unchanged() {
        let metrics = Arc::new(ProxyMetrics::new());
        let (worker, handle) = ProxyWorker::new(4, Some(Arc::clone(&metrics)));
        drop(worker);

        assert!(handle.submit(closed_target()).await.is_none());
        assert_eq!(metrics.queue_depth(), 0);
    }
}

//! Run one async job per target with bounded concurrency and per-target
//! failure isolation.

use crate::error::{Error, Result};
use crate::ratelimiter::RateLimiter;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Default number of simultaneous jobs.
pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum jobs in flight. `1` runs strictly in input order.
    pub concurrency: usize,
    /// Optional cap on job launches per second.
    pub qps: Option<u32>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        BatchOptions { concurrency: DEFAULT_CONCURRENCY, qps: None }
    }
}

impl BatchOptions {
    pub fn sequential() -> Self {
        BatchOptions { concurrency: 1, qps: None }
    }

    pub fn with_concurrency(concurrency: usize) -> Self {
        BatchOptions { concurrency, ..Default::default() }
    }
}

type Slot<T> = (usize, String, T);

/// Results of a running batch, one per target.
///
/// Yields in completion order, which equals input order when the batch runs
/// with a concurrency of one.
pub struct BatchStream<T> {
    rx: mpsc::Receiver<Slot<T>>,
    total: usize,
}

impl<T> BatchStream<T> {
    pub async fn next(&mut self) -> Option<(String, T)> {
        self.rx.recv().await.map(|(_, target, value)| (target, value))
    }

    /// Number of targets in the batch.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Wait for every target and return the results in input order.
    pub async fn collect_ordered(mut self) -> Vec<(String, T)> {
        let mut slots: Vec<Option<(String, T)>> = std::iter::repeat_with(|| None).take(self.total).collect();
        while let Some((idx, target, value)) = self.rx.recv().await {
            slots[idx] = Some((target, value));
        }
        slots.into_iter().flatten().collect()
    }
}

/// Start `job` for every target and return a stream of results.
///
/// Fails with [`Error::EmptyTargets`] before launching anything when `targets`
/// is empty. A job that panics is turned into `on_failure(target, message)`
/// for that target only. Must be called from within a tokio runtime.
pub fn run_streamed<T, F, Fut, E>(targets: Vec<String>, opts: BatchOptions, job: F, on_failure: E) -> Result<BatchStream<T>>
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
    E: Fn(&str, String) -> T + Send + Sync + 'static,
{
    if targets.is_empty() {
        return Err(Error::EmptyTargets);
    }
    let total = targets.len();
    let (tx, rx) = mpsc::channel::<Slot<T>>(total);
    let job = Arc::new(job);
    let on_failure = Arc::new(on_failure);

    tokio::spawn(async move {
        let sem = Arc::new(Semaphore::new(opts.concurrency.max(1)));
        let pacer = opts.qps.filter(|q| *q > 0).map(RateLimiter::new);
        let mut handles = Vec::with_capacity(total);
        for (idx, target) in targets.into_iter().enumerate() {
            let permit = match sem.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            if tx.is_closed() {
                debug!("batch receiver dropped; not launching remaining targets");
                break;
            }
            if let Some(p) = &pacer {
                p.acquire().await;
            }
            let tx = tx.clone();
            let job = job.clone();
            let on_failure = on_failure.clone();
            handles.push(tokio::spawn(async move {
                debug!(host = %target, "job started");
                let value = match tokio::spawn(job(target.clone())).await {
                    Ok(v) => v,
                    Err(e) => {
                        let msg = panic_message(e);
                        warn!(host = %target, error = %msg, "job failed");
                        on_failure(&target, msg)
                    }
                };
                // Send before releasing the permit so sequential batches keep input order.
                let _ = tx.send((idx, target, value)).await;
                drop(permit);
            }));
        }
        drop(tx);
        for h in handles {
            let _ = h.await;
        }
        info!(targets = total, "batch finished");
    });

    Ok(BatchStream { rx, total })
}

/// Like [`run_streamed`], but waits for the whole batch and returns results in
/// input order.
pub async fn run_all<T, F, Fut, E>(targets: Vec<String>, opts: BatchOptions, job: F, on_failure: E) -> Result<Vec<(String, T)>>
where
    T: Send + 'static,
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
    E: Fn(&str, String) -> T + Send + Sync + 'static,
{
    Ok(run_streamed(targets, opts, job, on_failure)?.collect_ordered().await)
}

/// Text for a task that panicked or was cancelled, e.g. `Unexpected error: boom`.
pub fn panic_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("Unexpected error: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("Unexpected error: {}", s)
    } else {
        "Unexpected error".to_string()
    }
}

//! Fixed-size async worker pool.
//!
//! `size` worker tasks drain one FIFO queue. Submitting never blocks and never
//! drops work: when every worker is busy the job waits in the queue. Each job
//! runs in its own task so a panic is reported to the submitter instead of
//! killing the worker.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool {0} is closed")]
    Closed(String),

    #[error("task panicked in worker pool {0}")]
    Panicked(String),
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    pub running: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    running: AtomicU64,
}

/// Bounded pool of async workers.
///
/// Must be created inside a tokio runtime. `submit` itself is synchronous and
/// may be called from any thread.
#[derive(Debug)]
pub struct WorkerPool {
    name: Arc<str>,
    size: usize,
    tx: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Spawn `size` workers (at least one).
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let name: Arc<str> = Arc::from(name.into());
        let size = size.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(AsyncMutex::new(rx));
        let counters = Arc::new(Counters::default());

        let workers = (0..size)
            .map(|index| tokio::spawn(worker_loop(name.clone(), index, rx.clone(), counters.clone())))
            .collect();

        info!(pool = %name, size, "worker pool started");

        Self {
            name,
            size,
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            counters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            panicked: self.counters.panicked.load(Ordering::SeqCst),
            running: self.counters.running.load(Ordering::SeqCst),
        }
    }

    /// Queue `future` for execution; the handle resolves with its output.
    pub fn submit<F, T>(&self, future: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let handle = TaskHandle {
            pool: self.name.clone(),
            rx: done_rx,
        };

        let pool = self.name.clone();
        let counters = self.counters.clone();
        let job: Job = Box::pin(async move {
            let outcome = match tokio::spawn(future).await {
                Ok(value) => Ok(value),
                Err(e) if e.is_panic() => {
                    counters.panicked.fetch_add(1, Ordering::SeqCst);
                    error!(pool = %pool, "pool task panicked");
                    Err(PoolError::Panicked(pool.to_string()))
                }
                Err(_) => Err(PoolError::Closed(pool.to_string())),
            };
            // The submitter may have dropped its handle; that is fine.
            let _ = done_tx.send(outcome);
        });

        let sent = match self.tx.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|tx| tx.send(job).is_ok()),
            Err(_) => false,
        };
        if sent {
            self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        } else {
            debug!(pool = %self.name, "submit after shutdown");
        }
        // When the job was not queued its sender is gone, so the handle
        // resolves to `Closed`.
        handle
    }

    /// Stop accepting work, let queued jobs finish, and wait for the workers.
    pub async fn shutdown(&self) {
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        let workers = match self.workers.lock() {
            Ok(mut w) => std::mem::take(&mut *w),
            Err(_) => Vec::new(),
        };
        for worker in workers {
            let _ = worker.await;
        }
        info!(pool = %self.name, "worker pool stopped");
    }
}

async fn worker_loop(
    pool: Arc<str>,
    index: usize,
    rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Job>>>,
    counters: Arc<Counters>,
) {
    debug!(pool = %pool, worker = index, "worker started");
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else { break };

        counters.running.fetch_add(1, Ordering::SeqCst);
        job.await;
        counters.running.fetch_sub(1, Ordering::SeqCst);
        counters.completed.fetch_add(1, Ordering::SeqCst);
    }
    debug!(pool = %pool, worker = index, "worker stopped");
}

/// Completion handle for a pool job.
#[derive(Debug)]
pub struct TaskHandle<T> {
    pool: Arc<str>,
    rx: oneshot::Receiver<Result<T, PoolError>>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, PoolError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(PoolError::Closed(this.pool.to_string()))),
            Poll::Pending => Poll::Pending,
        }
    }
}

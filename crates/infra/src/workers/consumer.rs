use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use iotforge_events::Subscription;

/// How long a consumer blocks on its subscription before re-checking shutdown.
const TICK: Duration = Duration::from_millis(250);

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("failed to spawn consumer thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Handle to control and join a background consumer.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request graceful shutdown and wait for the consumer to stop.
    ///
    /// The subscription is dropped on exit, which hands this consumer's
    /// partitions to the remaining group members.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Generic subscription consumer loop.
///
/// - Owns one subscription on a dedicated thread
/// - Hands every message to `handler`; handler errors are logged, never fatal
/// - Stops on shutdown request or when the bus disconnects
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    /// Spawn a consumer thread draining `subscription`.
    ///
    /// `handler` must be idempotent: delivery is at-least-once.
    pub fn spawn<M, H, E>(
        name: impl Into<String>,
        subscription: Subscription<M>,
        mut handler: H,
    ) -> std::io::Result<WorkerHandle>
    where
        M: Send + 'static,
        H: FnMut(M) -> Result<(), E> + Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&thread_name, subscription, shutdown_rx, &mut handler))?;

        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<M, H, E>(
    name: &str,
    sub: Subscription<M>,
    shutdown_rx: mpsc::Receiver<()>,
    handler: &mut H,
) where
    H: FnMut(M) -> Result<(), E>,
    E: std::fmt::Display,
{
    debug!(worker = name, "consumer started");

    loop {
        // Shutdown check (non-blocking); a dropped handle also stops the loop.
        match shutdown_rx.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }

        match sub.recv_timeout(TICK) {
            Ok(msg) => {
                if let Err(err) = handler(msg) {
                    warn!(worker = name, error = %err, "consumer handler failed");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!(worker = name, "consumer stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    use super::*;

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn handles_messages_until_shutdown() {
        let (tx, rx) = mpsc::channel::<u32>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();

        let handle = ConsumerWorker::spawn("test-consumer", Subscription::new(rx), move |n| {
            seen_in.lock().unwrap().push(n);
            Ok::<(), String>(())
        })
        .unwrap();

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert!(wait_for(|| seen.lock().unwrap().len() == 2));

        handle.shutdown();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn handler_errors_do_not_stop_the_loop() {
        let (tx, rx) = mpsc::channel::<u32>();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();

        let handle = ConsumerWorker::spawn("flaky", Subscription::new(rx), move |n| {
            seen_in.lock().unwrap().push(n);
            if n == 1 { Err("boom".to_string()) } else { Ok(()) }
        })
        .unwrap();

        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert!(wait_for(|| seen.lock().unwrap().len() == 2));
        handle.shutdown();
    }

    #[test]
    fn stops_when_bus_disconnects() {
        let (tx, rx) = mpsc::channel::<u32>();
        let handle = ConsumerWorker::spawn("orphan", Subscription::new(rx), |_| Ok::<(), String>(())).unwrap();
        drop(tx);
        // Joins promptly because the loop already exited.
        handle.shutdown();
    }
}

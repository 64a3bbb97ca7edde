//! Background worker supervision
//!
//! Every long-running worker (WAL flusher, flush worker, compaction driver)
//! runs inside [`spawn_supervised`]: a restart loop that catches panics from
//! the worker body, logs them, waits a cooldown and starts the body again.
//! The loop ends when the body returns normally (shutdown) or when the
//! restart budget is spent.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

/// Restart policy for a supervised worker
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Pause between a panic and the restart
    pub cooldown: Duration,
    /// Panics tolerated before the worker is abandoned
    pub max_restarts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(1),
            max_restarts: 16,
        }
    }
}

/// Owner side of a shutdown signal. Dropping it (or calling
/// [`Shutdown::trigger`]) wakes every listener.
pub struct Shutdown {
    tx: Option<Sender<()>>,
    rx: Receiver<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = channel::bounded(0);
        Self { tx: Some(tx), rx }
    }

    pub fn listener(&self) -> ShutdownListener {
        ShutdownListener {
            rx: self.rx.clone(),
        }
    }

    pub fn trigger(&mut self) {
        self.tx.take();
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker side of a shutdown signal
#[derive(Clone)]
pub struct ShutdownListener {
    rx: Receiver<()>,
}

impl ShutdownListener {
    /// Sleep for up to `timeout`; returns `true` once shutdown was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    pub fn is_triggered(&self) -> bool {
        self.wait(Duration::ZERO)
    }

    /// Channel to include in a `select!` alongside the worker's own inputs
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// Spawn `body` on a named thread, restarting it after panics.
pub fn spawn_supervised<F>(
    name: &str,
    policy: RestartPolicy,
    shutdown: ShutdownListener,
    body: F,
) -> std::io::Result<JoinHandle<()>>
where
    F: Fn(&ShutdownListener) + Send + 'static,
{
    let worker = name.to_string();
    thread::Builder::new().name(worker.clone()).spawn(move || {
        let mut restarts = 0u32;
        loop {
            match panic::catch_unwind(AssertUnwindSafe(|| body(&shutdown))) {
                Ok(()) => {
                    tracing::debug!(worker = %worker, "worker stopped");
                    break;
                }
                Err(payload) => {
                    restarts += 1;
                    tracing::error!(
                        worker = %worker,
                        restarts,
                        panic_message = %panic_message(payload.as_ref()),
                        "worker panicked"
                    );
                    if restarts > policy.max_restarts {
                        tracing::error!(worker = %worker, "restart budget exhausted, worker abandoned");
                        break;
                    }
                    if shutdown.wait(policy.cooldown) {
                        break;
                    }
                    tracing::info!(worker = %worker, "restarting worker");
                }
            }
        }
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

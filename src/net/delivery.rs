//! Single-task delivery context
//!
//! Continuations and connectivity events are never run on the worker
//! or reconnect tasks. Everything is posted here and executed by one
//! dedicated task, in post order, so callers can mutate their own
//! state from continuations without extra locking.

use tokio::sync::mpsc;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable handle to the delivery task.
#[derive(Clone)]
pub struct Delivery {
    tx: mpsc::UnboundedSender<Job>,
}

impl Delivery {
    /// Spawn the delivery task and return a handle to it. The task
    /// runs until every handle has been dropped.
    pub fn start() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
            debug!("delivery context drained and closed");
        });

        Self { tx }
    }

    /// Enqueue a job from any task or thread. Jobs run strictly in
    /// post order. A job posted after the task has shut down is
    /// silently dropped.
    pub fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let _ = self.tx.send(Box::new(job));
    }
}

//! Background contexts and their serial work queue.

use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;
use tracing::{debug, error};

type Job = Box<dyn FnOnce(&Context) + Send>;

/// A context driven by its own worker thread.
///
/// Jobs run one at a time, in submission order, against the wrapped
/// context. Separate background contexts run in parallel with each other.
/// Dropping the handle finishes queued jobs and joins the worker.
pub struct BackgroundContext {
    context: Context,
    sender: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundContext {
    pub(crate) fn spawn(context: Context) -> CoreResult<Self> {
        let (sender, receiver) = mpsc::channel::<Job>();
        let worker_context = context.clone();
        let worker = std::thread::Builder::new()
            .name(format!("ledgerbridge-{}", context.id()))
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    job(&worker_context);
                }
                debug!(context = %worker_context.id(), "background queue drained");
            })?;

        Ok(Self {
            context,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queues `job` and returns immediately.
    ///
    /// # Errors
    ///
    /// Returns `ContextClosed` if the worker has stopped.
    pub fn perform<F>(&self, job: F) -> CoreResult<()>
    where
        F: FnOnce(&Context) + Send + 'static,
    {
        self.sender
            .as_ref()
            .ok_or_else(|| self.closed())?
            .send(Box::new(job))
            .map_err(|_| self.closed())
    }

    /// Queues `job` and blocks until it has run, returning its value.
    ///
    /// # Errors
    ///
    /// Returns `ContextClosed` if the worker stopped before running the job,
    /// including when the job itself panicked.
    pub fn perform_and_wait<F, R>(&self, job: F) -> CoreResult<R>
    where
        F: FnOnce(&Context) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply, result) = mpsc::sync_channel(1);
        self.perform(move |ctx| {
            // The waiter only disappears if it was itself torn down.
            let _ = reply.send(job(ctx));
        })?;
        result.recv().map_err(|_| self.closed())
    }

    /// Id of the wrapped context.
    #[must_use]
    pub fn id(&self) -> crate::types::ContextId {
        self.context.id()
    }

    fn closed(&self) -> CoreError {
        CoreError::ContextClosed {
            context: self.context.id().to_string(),
        }
    }
}

impl Drop for BackgroundContext {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(context = %self.context.id(), "background worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for BackgroundContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundContext")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

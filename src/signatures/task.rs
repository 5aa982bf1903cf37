//! Background execution of validation and signing.
//!
//! Work runs on a [`WorkerPool`]; its result comes back through a [`Task`],
//! a future backed by a one-shot channel. The value is sent once, after the
//! work and all its side effects have finished, and is observed wherever the
//! caller polls or waits on the task. Dropping a task does not stop the work.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::channel::oneshot;
use futures::executor::ThreadPool;

use crate::error::Result;

/// Threads running asynchronous validation and signing.
#[derive(Clone)]
pub struct WorkerPool {
    pool: ThreadPool,
    threads: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("threads", &self.threads).finish()
    }
}

impl WorkerPool {
    /// Create a pool of `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let pool = ThreadPool::builder()
            .pool_size(threads)
            .name_prefix("pdf-oxide-sign-")
            .create()?;
        log::debug!("Started signature worker pool with {} threads", threads);
        Ok(Self { pool, threads })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `body` on a worker. A panicking body completes the task with no value.
    pub fn spawn<T, F>(&self, body: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        self.pool.spawn_ok(async move {
            match catch_unwind(AssertUnwindSafe(body)) {
                Ok(value) => {
                    // The receiver may be gone; the work still ran to completion
                    let _ = sender.send(value);
                },
                Err(_) => log::error!("Signature worker task panicked"),
            }
        });
        Task { receiver }
    }
}

/// The pending result of background work.
///
/// Resolves to `None` only when the work panicked.
#[derive(Debug)]
#[must_use = "dropping a task discards its result, the work still runs"]
pub struct Task<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> Task<T> {
    /// A task that is already complete.
    pub fn ready(value: T) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(value);
        Self { receiver }
    }

    /// Block the calling thread until the result is available.
    pub fn wait(self) -> Option<T> {
        futures::executor::block_on(self.receiver).ok()
    }

    /// The result if it has arrived, without blocking.
    ///
    /// Returns `None` while the work is running, after the value was taken
    /// and when the work panicked.
    pub fn try_take(&mut self) -> Option<T> {
        self.receiver.try_recv().ok().flatten()
    }
}

impl<T> Future for Task<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|r| r.ok())
    }
}

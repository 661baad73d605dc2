//! Sync bridge between blocking callers and the link's context.
//!
//! A link owns one dedicated OS thread running a current-thread tokio
//! runtime. That thread is the link's only cooperative execution context:
//! the reader task, per-object appliers and every request future run
//! there.
//!
//! ```text
//! caller thread ── block_on(fut) ──► context thread (current-thread runtime)
//!       ▲                                   │
//!       └──────── sync_channel(1) ◄─────────┘
//! ```
//!
//! Blocking entry points are adapters: they spawn the suspending
//! implementation onto the context and wait for its result. Calling one
//! from the context thread itself would deadlock, so it is rejected with
//! [`LinkError::WrongContext`]. The reverse mistake (a suspending call
//! from some other thread) is rejected the same way.

use std::future::Future;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::LinkError;

/// The link's execution context.
pub(crate) struct Bridge {
    handle: Handle,
    thread_id: ThreadId,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    timeout: Option<Duration>,
}

impl Bridge {
    /// Start the context thread.
    pub(crate) fn start(name: &str, timeout: Option<Duration>) -> Result<Self, LinkError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LinkError::Connection(format!("failed to start link runtime: {e}")))?;
        let handle = runtime.handle().clone();
        let (shutdown, stop) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = stop.await;
                });
                debug!("link context stopped");
            })
            .map_err(|e| LinkError::Connection(format!("failed to start link thread: {e}")))?;

        Ok(Self {
            handle,
            thread_id: thread.thread().id(),
            shutdown: Some(shutdown),
            thread: Some(thread),
            timeout,
        })
    }

    /// Check whether the caller is running on the context thread.
    pub(crate) fn in_context(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Fail unless the caller is running on the context thread.
    pub(crate) fn ensure_in_context(&self) -> Result<(), LinkError> {
        if self.in_context() {
            Ok(())
        } else {
            Err(LinkError::WrongContext(
                "suspending call made outside the link context; use the blocking form",
            ))
        }
    }

    /// Spawn a task on the context.
    pub(crate) fn spawn<F>(&self, future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run an operation on the context and wait for it, honouring the
    /// configured call timeout.
    pub(crate) fn block_on<F, T>(&self, future: F) -> Result<T, LinkError>
    where
        F: Future<Output = Result<T, LinkError>> + Send + 'static,
        T: Send + 'static,
    {
        self.wait(future, self.timeout)?
    }

    /// Run any future on the context and wait for its output.
    pub(crate) fn wait<F>(&self, future: F, timeout: Option<Duration>) -> Result<F::Output, LinkError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if self.in_context() {
            return Err(LinkError::WrongContext(
                "blocking call made inside the link context; use the suspending form",
            ));
        }

        let (tx, rx) = mpsc::sync_channel(1);
        self.handle.spawn(async move {
            let _ = tx.send(future.await);
        });

        let stopped = || LinkError::Connection("link context stopped".into());
        match timeout {
            Some(limit) => rx.recv_timeout(limit).map_err(|e| match e {
                RecvTimeoutError::Timeout => LinkError::Timeout(limit),
                RecvTimeoutError::Disconnected => stopped(),
            }),
            None => rx.recv().map_err(|_| stopped()),
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            // The context cannot join itself; it exits once this task returns.
            if !self.in_context() {
                let _ = thread.join();
            }
        }
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("thread_id", &self.thread_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

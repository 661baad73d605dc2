//! Callback dispatch for object handles.
//!
//! Each handle carries two independent ordered lists: blocking callbacks
//! (plain functions, run on tokio's blocking pool so they may call the
//! `blocking_*` API) and cooperative callbacks (futures awaited on the
//! link context, free to use the suspending API).
//!
//! Dispatch runs the blocking list first and then the cooperative list,
//! each in list order, from a snapshot taken when dispatch starts. A
//! callback that returns an error or panics is logged and the remaining
//! callbacks still run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::warn;

use objlink_core::CallbackList;
use objlink_types::{Address, AgentId, ApiId};

use crate::link::Link;
use crate::object::ObjectHandle;

/// Error a callback may return. It is logged, never propagated.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Signature of a blocking update callback.
pub type BlockingFn = dyn Fn(&ObjectHandle) -> Result<(), CallbackError> + Send + Sync;

/// Signature of a cooperative update callback.
pub type AsyncFn =
    dyn Fn(ObjectHandle) -> BoxFuture<'static, Result<(), CallbackError>> + Send + Sync;

/// A registered blocking callback. Keep a clone to remove it later.
pub type BlockingCallback = Arc<BlockingFn>;

/// A registered cooperative callback. Keep a clone to remove it later.
pub type AsyncCallback = Arc<AsyncFn>;

/// Wrap a closure as a [`BlockingCallback`].
pub fn blocking_callback<F>(f: F) -> BlockingCallback
where
    F: Fn(&ObjectHandle) -> Result<(), CallbackError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap an async closure as an [`AsyncCallback`].
pub fn async_callback<F, Fut>(f: F) -> AsyncCallback
where
    F: Fn(ObjectHandle) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), CallbackError>> + Send + 'static,
{
    Arc::new(move |handle| f(handle).boxed())
}

/// The two callback lists of one handle.
#[derive(Default)]
pub(crate) struct Callbacks {
    pub(crate) blocking: CallbackList<BlockingFn>,
    pub(crate) cooperative: CallbackList<AsyncFn>,
}

impl Callbacks {
    pub(crate) fn clear(&mut self) {
        self.blocking.clear();
        self.cooperative.clear();
    }
}

/// Invoke both lists against `handle`.
pub(crate) async fn dispatch(
    handle: &ObjectHandle,
    blocking: Vec<BlockingCallback>,
    cooperative: Vec<AsyncCallback>,
) {
    let address = handle.raw_address();

    for (index, callback) in blocking.into_iter().enumerate() {
        let target = handle.clone();
        match tokio::task::spawn_blocking(move || callback(&target)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%address, index, error = %e, "blocking callback failed"),
            Err(e) => warn!(%address, index, error = %e, "blocking callback panicked"),
        }
    }

    for (index, callback) in cooperative.into_iter().enumerate() {
        let target = handle.clone();
        let run = AssertUnwindSafe(async move { callback(target).await });
        match run.catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(%address, index, error = %e, "async callback failed"),
            Err(_) => warn!(%address, index, "async callback panicked"),
        }
    }
}

/// A first-contact share delivered to a registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareNotice {
    /// Address of the shared object.
    pub address: Address,
    /// Schema the object declares.
    pub api_id: ApiId,
    /// Identity that shared it.
    pub author: AgentId,
}

/// Handler for first-contact shares of one `api_id`.
///
/// The handler receives the link so it can fetch the object without
/// capturing a link clone (which would keep the link alive forever).
#[derive(Clone)]
pub enum ShareHandler {
    /// Run on tokio's blocking pool; may use the `blocking_*` API.
    Blocking(Arc<dyn Fn(&Link, ShareNotice) -> Result<(), CallbackError> + Send + Sync>),
    /// Awaited on the link context; may use the suspending API.
    Cooperative(
        Arc<dyn Fn(Link, ShareNotice) -> BoxFuture<'static, Result<(), CallbackError>> + Send + Sync>,
    ),
}

impl ShareHandler {
    /// Wrap a blocking closure.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(&Link, ShareNotice) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        ShareHandler::Blocking(Arc::new(f))
    }

    /// Wrap an async closure.
    pub fn cooperative<F, Fut>(f: F) -> Self
    where
        F: Fn(Link, ShareNotice) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), CallbackError>> + Send + 'static,
    {
        ShareHandler::Cooperative(Arc::new(move |link, notice| f(link, notice).boxed()))
    }

    /// Invoke the handler, logging any failure.
    pub(crate) async fn invoke(self, link: Link, notice: ShareNotice) {
        let address = notice.address;
        let outcome = match self {
            ShareHandler::Blocking(f) => {
                // The last link reference must not drop on a blocking-pool
                // thread: stopping the context from there would wait on itself.
                let worker_link = link.clone();
                let joined = tokio::task::spawn_blocking(move || f(&worker_link, notice)).await;
                drop(link);
                match joined {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(%address, error = %e, "share handler panicked");
                        return;
                    }
                }
            }
            ShareHandler::Cooperative(f) => {
                let run = AssertUnwindSafe(async move { f(link, notice).await });
                match run.catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(%address, "share handler panicked");
                        return;
                    }
                }
            }
        };
        if let Err(e) = outcome {
            warn!(%address, error = %e, "share handler failed");
        }
    }
}

impl std::fmt::Debug for ShareHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShareHandler::Blocking(_) => f.write_str("ShareHandler::Blocking"),
            ShareHandler::Cooperative(_) => f.write_str("ShareHandler::Cooperative"),
        }
    }
}

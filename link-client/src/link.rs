//! Link - the session with the local service.
//!
//! This module provides [`Link`], the primary API for applications to
//! create, fetch and share synchronized objects.
//!
//! # Architecture
//!
//! One link owns one IPC connection, the application token, the API
//! registry and a non-owning routing index of live object handles. All of
//! it is driven from the link's context thread (see [`crate::bridge`]).
//!
//! ```text
//! Application → Link / ObjectHandle → Bridge → context thread → Transport → service
//!                                                   ↑
//!          reader task ← responses (by RequestId) ──┤
//!                      ← pushes (by address) → per-object forwarder
//!                                              → legroom queue → applier → callbacks
//! ```
//!
//! Every operation comes in two forms sharing one implementation:
//! `async fn x` must be awaited on the link context (inside
//! [`Link::run`], [`Link::spawn`], a callback or a share handler), and
//! `fn blocking_x` may be called from any other thread.
//!
//! # Example
//!
//! ```ignore
//! use objlink_client::{Link, LinkConfig, ObjectOptions};
//!
//! let link = Link::connect(LinkConfig::default())?;
//! link.blocking_new_token()?;
//! let obj = link.blocking_new_object(
//!     b"v1",
//!     ObjectOptions::new().with_api_id(api_id).with_dynamic(true),
//! )?;
//! obj.blocking_update(b"v2")?;
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use objlink_core::ApiRegistry;
use objlink_types::{
    Address, AgentId, ApiId, AppToken, Envelope, Message, Payload, Push, Reply, Request,
    RequestBody, RequestId, Response,
};

use crate::bridge::Bridge;
use crate::config::LinkConfig;
use crate::dispatch::{ShareHandler, ShareNotice};
use crate::error::LinkError;
use crate::object::{adopt, Notice, ObjectHandle, ObjectInner, ObjectOptions};
use crate::transport::{Transport, WebSocketTransport};

/// Lock a std mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn unexpected(reply: Reply) -> LinkError {
    LinkError::Protocol(format!("unexpected reply: {reply:?}"))
}

pub(crate) fn expect_ack(reply: Reply) -> Result<(), LinkError> {
    match reply {
        Reply::Ack => Ok(()),
        other => Err(unexpected(other)),
    }
}

/// Routing entry for one live handle.
pub(crate) struct Subscription {
    /// Feeds the handle's forwarder. Sending never waits.
    pub(crate) inbox: mpsc::UnboundedSender<Notice>,
    /// The handle's own queue, bounded by its legroom.
    pub(crate) queue: mpsc::Sender<Notice>,
    pub(crate) handle: Weak<ObjectInner>,
}

/// Shared state of a link.
pub(crate) struct LinkInner {
    pub(crate) config: LinkConfig,
    pub(crate) bridge: Bridge,
    transport: Arc<dyn Transport>,
    pending: DashMap<RequestId, oneshot::Sender<Response>>,
    next_id: AtomicU64,
    token: Mutex<Option<AppToken>>,
    identity: OnceLock<AgentId>,
    registry: Mutex<ApiRegistry<ShareHandler>>,
    pub(crate) objects: DashMap<Address, Subscription>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Removes a pending entry when its request finishes or is cancelled.
struct PendingGuard<'a> {
    pending: &'a DashMap<RequestId, oneshot::Sender<Response>>,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

impl LinkInner {
    /// The agent identity cached by the connect handshake.
    pub(crate) fn identity(&self) -> Result<AgentId, LinkError> {
        self.identity
            .get()
            .copied()
            .ok_or_else(|| LinkError::Connection("link handshake has not completed".into()))
    }

    pub(crate) fn token(&self) -> Option<AppToken> {
        *lock(&self.token)
    }

    fn require_token(&self, op: &str) -> Result<AppToken, LinkError> {
        self.token()
            .ok_or_else(|| LinkError::Auth(format!("{op} requires an application token")))
    }

    /// Bind a token, rejecting a differing one.
    fn bind_token(&self, token: AppToken) -> Result<(), LinkError> {
        let mut bound = lock(&self.token);
        match *bound {
            Some(existing) if existing == token => Ok(()),
            Some(existing) => Err(LinkError::Auth(format!(
                "token {existing} is already bound to this link"
            ))),
            None => {
                *bound = Some(token);
                Ok(())
            }
        }
    }

    fn next_id(&self) -> RequestId {
        RequestId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn encode(&self, id: RequestId, body: RequestBody) -> Result<Vec<u8>, LinkError> {
        let request = Request::new(self.token(), body);
        Ok(Envelope::new(id, Message::Request(request)).to_bytes()?)
    }

    /// Send a request and wait for its response.
    ///
    /// Dropping the returned future abandons the request client-side.
    pub(crate) async fn request(&self, body: RequestBody) -> Result<Reply, LinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::Connection("link is closed".into()));
        }

        let id = self.next_id();
        let op = body.op();
        let bytes = self.encode(id, body)?;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);
        let _pending = PendingGuard {
            pending: &self.pending,
            id,
        };

        debug!(%id, ?op, "sending request");
        self.transport.send(&bytes).await?;

        let response = rx
            .await
            .map_err(|_| LinkError::Connection("connection lost before response".into()))?;
        Ok(response?)
    }

    /// Send a request without waiting for its response.
    async fn notify(&self, body: RequestBody) {
        let id = self.next_id();
        let op = body.op();
        let sent = match self.encode(id, body) {
            Ok(bytes) => self.transport.send(&bytes).await.map_err(LinkError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(%id, ?op, error = %e, "failed to send notification");
        }
    }

    /// Look up a live handle in the routing index.
    pub(crate) fn live_handle(&self, address: &Address) -> Option<ObjectHandle> {
        let inner = self
            .objects
            .get(address)
            .and_then(|subscription| subscription.handle.upgrade());
        inner.map(ObjectHandle::from_inner)
    }

    fn connection_lost(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders fails every waiting request.
        self.pending.clear();
    }
}

/// Read frames until the connection ends or the link is dropped.
async fn read_loop(weak: Weak<LinkInner>, transport: Arc<dyn Transport>) {
    loop {
        let frame = transport.recv().await;
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let link = Link { inner };
        match frame {
            Ok(bytes) => link.route(&bytes).await,
            Err(e) => {
                if !link.inner.closed.load(Ordering::SeqCst) {
                    warn!(error = %e, "connection to service lost");
                }
                link.inner.connection_lost();
                return;
            }
        }
    }
}

/// A session with the local service.
///
/// Cloning is cheap; clones share one connection. The link shuts its
/// context thread down once every clone and every object handle is
/// dropped.
#[derive(Clone)]
pub struct Link {
    pub(crate) inner: Arc<LinkInner>,
}

impl Link {
    /// Connect to the service over WebSocket and perform the handshake.
    ///
    /// Blocking; call it from outside any link context.
    pub fn connect(config: LinkConfig) -> Result<Self, LinkError> {
        Self::connect_with_transport(config, Arc::new(WebSocketTransport::new()))
    }

    /// Connect using the given transport and perform the handshake.
    ///
    /// With `config.debug` set, a debug-level subscriber is installed
    /// unless one already exists.
    pub fn connect_with_transport(
        config: LinkConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, LinkError> {
        config.validate()?;
        if config.debug {
            // No-op when the application installed its own subscriber.
            crate::logging::init(true);
        }
        let bridge = Bridge::start(&config.thread_name, config.call_timeout())?;
        let link = Link {
            inner: Arc::new(LinkInner {
                config,
                bridge,
                transport,
                pending: DashMap::new(),
                next_id: AtomicU64::new(1),
                token: Mutex::new(None),
                identity: OnceLock::new(),
                registry: Mutex::new(ApiRegistry::new()),
                objects: DashMap::new(),
                reader: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        };

        let starting = link.clone();
        link.inner.bridge.block_on(async move { starting.start().await })?;
        let identity = link.inner.identity()?;
        info!(endpoint = %link.inner.config.endpoint, %identity, "link connected");
        Ok(link)
    }

    async fn start(&self) -> Result<(), LinkError> {
        let inner = &self.inner;
        inner.transport.connect(&inner.config.endpoint).await?;

        let reader = tokio::spawn(read_loop(Arc::downgrade(inner), inner.transport.clone()));
        *lock(&inner.reader) = Some(reader);

        let identity = self.whoami_inner().await?;
        let _ = inner.identity.set(identity);
        Ok(())
    }

    /// Run `op` on the context and wait for it from this thread.
    fn blocking<T, F, Fut>(&self, op: F) -> Result<T, LinkError>
    where
        F: FnOnce(Link) -> Fut,
        Fut: Future<Output = Result<T, LinkError>> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.bridge.block_on(op(self.clone()))
    }

    fn ensure_in_context(&self) -> Result<(), LinkError> {
        self.inner.bridge.ensure_in_context()
    }

    fn ensure_owns(&self, handle: &ObjectHandle) -> Result<(), LinkError> {
        if Arc::ptr_eq(handle.link_inner(), &self.inner) {
            Ok(())
        } else {
            Err(LinkError::InvalidRequest(
                "object handle belongs to a different link".into(),
            ))
        }
    }

    // ===========================================
    // Execution context
    // ===========================================

    /// Spawn a task on the link context.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.bridge.spawn(future)
    }

    /// Run a future on the link context and block until it completes.
    ///
    /// The suspending API is available inside `future`. No call timeout
    /// applies.
    pub fn run<F>(&self, future: F) -> Result<F::Output, LinkError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.bridge.wait(future, None)
    }

    /// Check whether the caller is on the link context.
    pub fn in_context(&self) -> bool {
        self.inner.bridge.in_context()
    }

    // ===========================================
    // Identity and token
    // ===========================================

    /// The agent identity reported at connect time.
    pub fn identity(&self) -> Result<AgentId, LinkError> {
        self.inner.identity()
    }

    /// The bound application token, if any.
    pub fn token(&self) -> Option<AppToken> {
        self.inner.token()
    }

    /// Check whether the connection is up.
    pub fn is_connected(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst) && self.inner.transport.is_connected()
    }

    /// Ask the service for the current agent identity.
    pub async fn whoami(&self) -> Result<AgentId, LinkError> {
        self.ensure_in_context()?;
        self.whoami_inner().await
    }

    /// Blocking form of [`Link::whoami`].
    pub fn blocking_whoami(&self) -> Result<AgentId, LinkError> {
        self.blocking(|link| async move { link.whoami_inner().await })
    }

    async fn whoami_inner(&self) -> Result<AgentId, LinkError> {
        match self.inner.request(RequestBody::Whoami).await? {
            Reply::Identity(identity) => Ok(identity),
            other => Err(unexpected(other)),
        }
    }

    /// Mint a new application token and bind it to this link.
    pub async fn new_token(&self) -> Result<AppToken, LinkError> {
        self.ensure_in_context()?;
        self.new_token_inner().await
    }

    /// Blocking form of [`Link::new_token`].
    pub fn blocking_new_token(&self) -> Result<AppToken, LinkError> {
        self.blocking(|link| async move { link.new_token_inner().await })
    }

    async fn new_token_inner(&self) -> Result<AppToken, LinkError> {
        if let Some(bound) = self.inner.token() {
            return Err(LinkError::Auth(format!(
                "token {bound} is already bound to this link"
            )));
        }
        match self.inner.request(RequestBody::NewToken).await? {
            Reply::Token(token) => {
                self.inner.bind_token(token)?;
                info!(%token, "application token minted");
                Ok(token)
            }
            other => Err(unexpected(other)),
        }
    }

    /// Bind an existing application token to this link.
    ///
    /// Binding the already-bound token again is a no-op; binding a
    /// different one fails with [`LinkError::Auth`].
    pub async fn set_token(&self, token: AppToken) -> Result<(), LinkError> {
        self.ensure_in_context()?;
        self.set_token_inner(token).await
    }

    /// Blocking form of [`Link::set_token`].
    pub fn blocking_set_token(&self, token: AppToken) -> Result<(), LinkError> {
        self.blocking(move |link| async move { link.set_token_inner(token).await })
    }

    async fn set_token_inner(&self, token: AppToken) -> Result<(), LinkError> {
        match self.inner.token() {
            Some(bound) if bound == token => return Ok(()),
            Some(bound) => {
                return Err(LinkError::Auth(format!(
                    "token {bound} is already bound to this link"
                )))
            }
            None => {}
        }
        expect_ack(self.inner.request(RequestBody::SetToken { token }).await?)?;
        self.inner.bind_token(token)
    }

    // ===========================================
    // API registry
    // ===========================================

    /// Register a handler for first-contact shares declaring `api_id`.
    ///
    /// Re-registering an `api_id` replaces its handler.
    pub async fn register_api(&self, api_id: ApiId, handler: ShareHandler) -> Result<(), LinkError> {
        self.ensure_in_context()?;
        self.register_api_inner(api_id, handler).await
    }

    /// Blocking form of [`Link::register_api`].
    pub fn blocking_register_api(&self, api_id: ApiId, handler: ShareHandler) -> Result<(), LinkError> {
        self.blocking(move |link| async move { link.register_api_inner(api_id, handler).await })
    }

    async fn register_api_inner(&self, api_id: ApiId, handler: ShareHandler) -> Result<(), LinkError> {
        self.inner.require_token("register_api")?;
        expect_ack(self.inner.request(RequestBody::RegisterApi { api_id }).await?)?;
        if lock(&self.inner.registry).register(api_id, handler).is_some() {
            debug!(%api_id, "replaced share handler");
        }
        Ok(())
    }

    /// Stop handling shares for `api_id`.
    pub async fn deregister_api(&self, api_id: ApiId) -> Result<(), LinkError> {
        self.ensure_in_context()?;
        self.deregister_api_inner(api_id).await
    }

    /// Blocking form of [`Link::deregister_api`].
    pub fn blocking_deregister_api(&self, api_id: ApiId) -> Result<(), LinkError> {
        self.blocking(move |link| async move { link.deregister_api_inner(api_id).await })
    }

    async fn deregister_api_inner(&self, api_id: ApiId) -> Result<(), LinkError> {
        self.inner.require_token("deregister_api")?;
        if !lock(&self.inner.registry).contains(&api_id) {
            return Err(LinkError::NotFound(format!("api {api_id} is not registered")));
        }
        expect_ack(self.inner.request(RequestBody::DeregisterApi { api_id }).await?)?;
        lock(&self.inner.registry).deregister(&api_id);
        Ok(())
    }

    // ===========================================
    // Objects
    // ===========================================

    /// Fetch an existing object.
    ///
    /// Returns the already-live handle when this link tracks the address.
    pub async fn get_object(&self, address: Address) -> Result<ObjectHandle, LinkError> {
        self.ensure_in_context()?;
        self.get_object_inner(address).await
    }

    /// Blocking form of [`Link::get_object`].
    pub fn blocking_get_object(&self, address: Address) -> Result<ObjectHandle, LinkError> {
        self.blocking(move |link| async move { link.get_object_inner(address).await })
    }

    pub(crate) async fn get_object_inner(&self, address: Address) -> Result<ObjectHandle, LinkError> {
        if let Some(live) = self.inner.live_handle(&address) {
            return Ok(live);
        }
        match self.inner.request(RequestBody::GetObject { address }).await? {
            Reply::Object(record) => adopt(&self.inner, record),
            other => Err(unexpected(other)),
        }
    }

    /// Create a new object.
    pub async fn new_object(
        &self,
        payload: impl Into<Payload>,
        options: ObjectOptions,
    ) -> Result<ObjectHandle, LinkError> {
        self.ensure_in_context()?;
        self.new_object_inner(payload.into(), options).await
    }

    /// Blocking form of [`Link::new_object`].
    pub fn blocking_new_object(
        &self,
        payload: impl Into<Payload>,
        options: ObjectOptions,
    ) -> Result<ObjectHandle, LinkError> {
        let payload = payload.into();
        self.blocking(move |link| async move { link.new_object_inner(payload, options).await })
    }

    async fn new_object_inner(
        &self,
        payload: Payload,
        options: ObjectOptions,
    ) -> Result<ObjectHandle, LinkError> {
        let legroom = options.validate(
            &payload,
            self.inner.token().is_some(),
            self.inner.config.legroom,
        )?;
        let body = RequestBody::NewObject {
            payload,
            api_id: options.api_id,
            private: options.private,
            dynamic: options.dynamic,
            legroom,
        };
        match self.inner.request(body).await? {
            Reply::Object(record) => adopt(&self.inner, record),
            other => Err(unexpected(other)),
        }
    }

    // ===========================================
    // Startup object
    // ===========================================

    /// Fetch the object registered as this application's startup object.
    pub async fn startup_object(&self) -> Result<Option<ObjectHandle>, LinkError> {
        self.ensure_in_context()?;
        self.startup_object_inner().await
    }

    /// Blocking form of [`Link::startup_object`].
    pub fn blocking_startup_object(&self) -> Result<Option<ObjectHandle>, LinkError> {
        self.blocking(|link| async move { link.startup_object_inner().await })
    }

    async fn startup_object_inner(&self) -> Result<Option<ObjectHandle>, LinkError> {
        self.inner.require_token("startup_object")?;
        match self.inner.request(RequestBody::GetStartup).await? {
            Reply::Startup(Some(address)) => self.get_object_inner(address).await.map(Some),
            Reply::Startup(None) => Ok(None),
            other => Err(unexpected(other)),
        }
    }

    /// Register `handle` as this application's startup object.
    pub async fn register_startup(&self, handle: &ObjectHandle) -> Result<(), LinkError> {
        self.ensure_in_context()?;
        self.register_startup_inner(handle.clone()).await
    }

    /// Blocking form of [`Link::register_startup`].
    pub fn blocking_register_startup(&self, handle: &ObjectHandle) -> Result<(), LinkError> {
        let handle = handle.clone();
        self.blocking(move |link| async move { link.register_startup_inner(handle).await })
    }

    async fn register_startup_inner(&self, handle: ObjectHandle) -> Result<(), LinkError> {
        self.ensure_owns(&handle)?;
        self.inner.require_token("register_startup")?;
        let address = handle.address()?;
        expect_ack(
            self.inner
                .request(RequestBody::RegisterStartup { address })
                .await?,
        )
    }

    /// Forget this application's startup object.
    pub async fn deregister_startup(&self) -> Result<(), LinkError> {
        self.ensure_in_context()?;
        self.deregister_startup_inner().await
    }

    /// Blocking form of [`Link::deregister_startup`].
    pub fn blocking_deregister_startup(&self) -> Result<(), LinkError> {
        self.blocking(|link| async move { link.deregister_startup_inner().await })
    }

    async fn deregister_startup_inner(&self) -> Result<(), LinkError> {
        self.inner.require_token("deregister_startup")?;
        expect_ack(self.inner.request(RequestBody::DeregisterStartup).await?)
    }

    // ===========================================
    // Forwarding wrappers
    // ===========================================

    /// Update `handle` through this link. See [`ObjectHandle::update`].
    pub async fn update(&self, handle: &ObjectHandle, payload: impl Into<Payload>) -> Result<(), LinkError> {
        self.ensure_owns(handle)?;
        handle.update(payload).await
    }

    /// Blocking form of [`Link::update`].
    pub fn blocking_update(&self, handle: &ObjectHandle, payload: impl Into<Payload>) -> Result<(), LinkError> {
        self.ensure_owns(handle)?;
        handle.blocking_update(payload)
    }

    /// Share `handle` through this link. See [`ObjectHandle::share`].
    pub async fn share(&self, handle: &ObjectHandle, recipient: AgentId) -> Result<(), LinkError> {
        self.ensure_owns(handle)?;
        handle.share(recipient).await
    }

    /// Blocking form of [`Link::share`].
    pub fn blocking_share(&self, handle: &ObjectHandle, recipient: AgentId) -> Result<(), LinkError> {
        self.ensure_owns(handle)?;
        handle.blocking_share(recipient)
    }

    /// Freeze `handle` through this link. See [`ObjectHandle::freeze`].
    pub async fn freeze(&self, handle: &ObjectHandle) -> Result<ObjectHandle, LinkError> {
        self.ensure_owns(handle)?;
        handle.freeze().await
    }

    /// Blocking form of [`Link::freeze`].
    pub fn blocking_freeze(&self, handle: &ObjectHandle) -> Result<ObjectHandle, LinkError> {
        self.ensure_owns(handle)?;
        handle.blocking_freeze()
    }

    /// Hold `handle` through this link. See [`ObjectHandle::hold`].
    pub async fn hold(&self, handle: &ObjectHandle) -> Result<(), LinkError> {
        self.ensure_owns(handle)?;
        handle.hold().await
    }

    /// Blocking form of [`Link::hold`].
    pub fn blocking_hold(&self, handle: &ObjectHandle) -> Result<(), LinkError> {
        self.ensure_owns(handle)?;
        handle.blocking_hold()
    }

    /// Discard `handle` through this link. See [`ObjectHandle::discard`].
    pub async fn discard(&self, handle: &ObjectHandle) -> Result<(), LinkError> {
        self.ensure_owns(handle)?;
        handle.discard().await
    }

    /// Blocking form of [`Link::discard`].
    pub fn blocking_discard(&self, handle: &ObjectHandle) -> Result<(), LinkError> {
        self.ensure_owns(handle)?;
        handle.blocking_discard()
    }

    /// Delete `handle` through this link. See [`ObjectHandle::delete`].
    pub async fn delete(&self, handle: &ObjectHandle) -> Result<(), LinkError> {
        self.ensure_owns(handle)?;
        handle.delete().await
    }

    /// Blocking form of [`Link::delete`].
    pub fn blocking_delete(&self, handle: &ObjectHandle) -> Result<(), LinkError> {
        self.ensure_owns(handle)?;
        handle.blocking_delete()
    }

    // ===========================================
    // Shutdown
    // ===========================================

    /// Close the connection. In-flight requests fail with
    /// [`LinkError::Connection`].
    pub async fn close(&self) -> Result<(), LinkError> {
        self.ensure_in_context()?;
        self.close_inner().await
    }

    /// Blocking form of [`Link::close`].
    pub fn blocking_close(&self) -> Result<(), LinkError> {
        self.blocking(|link| async move { link.close_inner().await })
    }

    async fn close_inner(&self) -> Result<(), LinkError> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let reader = lock(&self.inner.reader).take();
        if let Some(reader) = reader {
            reader.abort();
        }
        self.inner.pending.clear();
        self.inner.transport.close().await?;
        info!("link closed");
        Ok(())
    }

    // ===========================================
    // Inbound routing
    // ===========================================

    async fn route(&self, bytes: &[u8]) {
        let envelope = match Envelope::from_bytes(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping undecodable frame");
                return;
            }
        };

        match envelope.message {
            Message::Response(response) => match self.inner.pending.remove(&envelope.id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(response);
                }
                None => debug!(id = %envelope.id, "dropping response for abandoned request"),
            },
            Message::Push(push) => self.handle_push(push).await,
            Message::Request(request) => {
                warn!(op = ?request.op(), "ignoring request frame from service")
            }
        }
    }

    async fn handle_push(&self, push: Push) {
        match push {
            Push::ObjectUpdated { address, payload } => {
                self.deliver(address, Notice::Updated(payload)).await
            }
            Push::ObjectDeleted { address } => self.deliver(address, Notice::Deleted).await,
            Push::NewShare {
                address,
                api_id,
                author,
            } => {
                self.route_share(ShareNotice {
                    address,
                    api_id,
                    author,
                })
                .await
            }
            Push::ShareSucceeded { address, recipient } => {
                info!(%address, %recipient, "share delivered")
            }
            Push::ShareFailed { address, recipient } => {
                warn!(%address, %recipient, "share could not be delivered")
            }
        }
    }

    /// Hand a push to the handle at `address`.
    ///
    /// Never waits. A handle whose queue is full keeps the excess in its
    /// forwarder, so it only delays its own updates while responses and
    /// pushes for other objects keep flowing.
    async fn deliver(&self, address: Address, notice: Notice) {
        let route = self.inner.objects.get(&address).map(|subscription| {
            let live = subscription.handle.strong_count() > 0;
            if live && subscription.queue.capacity() == 0 {
                debug!(%address, "object handle is behind; holding pushes");
            }
            (subscription.inbox.clone(), live)
        });

        match route {
            Some((inbox, true)) => {
                if inbox.send(notice).is_err() {
                    debug!(%address, "object handle went away; dropping push");
                }
            }
            Some((_, false)) => {
                self.inner
                    .objects
                    .remove_if(&address, |_, subscription| subscription.handle.strong_count() == 0);
                self.release(address, notice).await;
            }
            None => self.release(address, notice).await,
        }
    }

    /// Handle a push for an address nobody holds.
    async fn release(&self, address: Address, notice: Notice) {
        match notice {
            Notice::Updated(_) => {
                debug!(%address, "update for untracked object; discarding subscription");
                self.inner.notify(RequestBody::Discard { address }).await;
            }
            Notice::Deleted => debug!(%address, "deletion of untracked object"),
        }
    }

    async fn route_share(&self, notice: ShareNotice) {
        let handler = lock(&self.inner.registry).get(&notice.api_id).cloned();
        match handler {
            Some(handler) => {
                debug!(address = %notice.address, api_id = %notice.api_id, "dispatching new share");
                self.inner.bridge.spawn(handler.invoke(self.clone(), notice));
            }
            None => {
                warn!(
                    address = %notice.address,
                    api_id = %notice.api_id,
                    "no handler registered for shared object; discarding"
                );
                self.inner
                    .notify(RequestBody::Discard {
                        address: notice.address,
                    })
                    .await;
            }
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("endpoint", &self.inner.config.endpoint)
            .field("identity", &self.inner.identity.get())
            .field("connected", &self.is_connected())
            .field("tracked_objects", &self.inner.objects.len())
            .finish()
    }
}

//! Object handles.
//!
//! An [`ObjectHandle`] is the local view of one object known to the
//! service. Its lifecycle is driven by [`ObjectStage`]; every operation
//! validates the transition locally, performs the round trip, and only
//! then applies the new stage and its actions. A failed request leaves the
//! handle untouched.
//!
//! Pushed updates reach the handle through a bounded queue (capacity =
//! legroom) drained by a per-handle applier task on the link context.
//! Operations and pushed updates on one handle are serialized by the
//! handle's op lock; callbacks run after the lock is released.

use std::future::Future;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tokio::sync::mpsc;
use tracing::debug;

use objlink_core::{ObjectStage, StageAction, StageError, StageEvent, StateHistory};
use objlink_types::{Address, AgentId, ApiId, ObjectRecord, Payload, Reply, RequestBody};

use crate::dispatch::{dispatch, AsyncCallback, BlockingCallback, Callbacks};
use crate::error::LinkError;
use crate::link::{expect_ack, lock, unexpected, Link, LinkInner, Subscription};

/// A pushed change routed to one handle.
#[derive(Debug)]
pub(crate) enum Notice {
    Updated(Payload),
    Deleted,
}

/// Options for [`Link::new_object`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectOptions {
    /// Schema the object declares. Required unless `private`.
    pub api_id: Option<ApiId>,
    /// Visible only to the creating application's token.
    pub private: bool,
    /// Mutable in place by its author.
    pub dynamic: bool,
    /// History depth; defaults to the link's configured legroom.
    pub legroom: Option<usize>,
}

impl ObjectOptions {
    /// Options for a public static object with no api_id yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the api_id.
    pub fn with_api_id(mut self, api_id: ApiId) -> Self {
        self.api_id = Some(api_id);
        self
    }

    /// Set privacy.
    pub fn with_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    /// Set dynamism.
    pub fn with_dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Set the history depth.
    pub fn with_legroom(mut self, legroom: usize) -> Self {
        self.legroom = Some(legroom);
        self
    }

    /// Validate against `payload` and resolve the wire legroom.
    pub(crate) fn validate(
        &self,
        payload: &Payload,
        has_token: bool,
        default_legroom: usize,
    ) -> Result<u16, LinkError> {
        if self.private && !has_token {
            return Err(LinkError::Auth(
                "private objects require an application token".into(),
            ));
        }
        if !self.private && self.api_id.is_none() {
            return Err(LinkError::InvalidRequest(
                "non-private objects must declare an api_id".into(),
            ));
        }
        if !self.dynamic && payload.is_link() {
            return Err(LinkError::InvalidRequest(
                "only dynamic objects can hold a link".into(),
            ));
        }
        let legroom = self.legroom.unwrap_or(default_legroom);
        match u16::try_from(legroom) {
            Ok(0) | Err(_) => Err(LinkError::InvalidRequest(format!(
                "legroom must be between 1 and {}, got {legroom}",
                u16::MAX
            ))),
            Ok(legroom) => Ok(legroom),
        }
    }
}

struct ObjectData {
    stage: ObjectStage,
    history: StateHistory,
}

pub(crate) struct ObjectInner {
    link: Arc<LinkInner>,
    address: Address,
    author: AgentId,
    api_id: Option<ApiId>,
    private: bool,
    dynamic: bool,
    data: RwLock<ObjectData>,
    op_lock: tokio::sync::Mutex<()>,
    callbacks: Mutex<Callbacks>,
}

impl Drop for ObjectInner {
    fn drop(&mut self) {
        let this: *const ObjectInner = self;
        self.link
            .objects
            .remove_if(&self.address, |_, subscription| {
                std::ptr::eq(subscription.handle.as_ptr(), this)
            });
    }
}

/// Build a handle from a service record and start routing pushes to it.
///
/// If another handle for the same address went live in the meantime, that
/// one is returned instead.
pub(crate) fn adopt(link: &Arc<LinkInner>, record: ObjectRecord) -> Result<ObjectHandle, LinkError> {
    let ObjectRecord {
        address,
        author,
        payload,
        api_id,
        private,
        dynamic,
        legroom,
    } = record;

    let (stage, _) = ObjectStage::new().on_event(StageEvent::Constructed { dynamic })?;
    let legroom = usize::from(legroom).max(1);
    let depth = if dynamic { legroom } else { 1 };

    let handle = ObjectHandle {
        inner: Arc::new(ObjectInner {
            link: link.clone(),
            address,
            author,
            api_id,
            private,
            dynamic,
            data: RwLock::new(ObjectData {
                stage,
                history: StateHistory::with_initial(depth, payload),
            }),
            op_lock: tokio::sync::Mutex::new(()),
            callbacks: Mutex::new(Callbacks::default()),
        }),
    };

    let (inbox, parked) = mpsc::unbounded_channel();
    let (queue, receiver) = mpsc::channel(legroom);
    let subscription = Subscription {
        inbox,
        queue: queue.clone(),
        handle: Arc::downgrade(&handle.inner),
    };
    let existing = match link.objects.entry(address) {
        dashmap::mapref::entry::Entry::Occupied(mut entry) => match entry.get().handle.upgrade() {
            Some(live) => Some(live),
            None => {
                entry.insert(subscription);
                None
            }
        },
        dashmap::mapref::entry::Entry::Vacant(entry) => {
            entry.insert(subscription);
            None
        }
    };

    match existing {
        // `handle` was never indexed; dropping it leaves the live entry alone.
        Some(live) => Ok(ObjectHandle { inner: live }),
        None => {
            debug!(%address, dynamic, "tracking object");
            link.bridge.spawn(forward_loop(parked, queue));
            link.bridge
                .spawn(apply_loop(Arc::downgrade(&handle.inner), receiver));
            Ok(handle)
        }
    }
}

/// Move pushes from a handle's inbox into its legroom-bounded queue,
/// waiting while the queue is full.
async fn forward_loop(mut inbox: mpsc::UnboundedReceiver<Notice>, queue: mpsc::Sender<Notice>) {
    while let Some(notice) = inbox.recv().await {
        if queue.send(notice).await.is_err() {
            break;
        }
    }
}

/// Drain pushed changes for one handle until it is dropped or unsubscribed.
async fn apply_loop(weak: Weak<ObjectInner>, mut notices: mpsc::Receiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        let Some(inner) = weak.upgrade() else {
            break;
        };
        ObjectHandle { inner }.apply(notice).await;
    }
}

/// Local handle to an object.
///
/// Clones share one underlying handle; [`Link::get_object`] returns the
/// same handle for an address while any clone is alive.
#[derive(Clone)]
pub struct ObjectHandle {
    inner: Arc<ObjectInner>,
}

impl PartialEq for ObjectHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for ObjectHandle {}

impl std::fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("address", &self.inner.address)
            .field("stage", &self.stage())
            .field("dynamic", &self.inner.dynamic)
            .field("private", &self.inner.private)
            .finish()
    }
}

impl ObjectHandle {
    pub(crate) fn from_inner(inner: Arc<ObjectInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn link_inner(&self) -> &Arc<LinkInner> {
        &self.inner.link
    }

    /// Address without the deleted check, for logging.
    pub(crate) fn raw_address(&self) -> Address {
        self.inner.address
    }

    /// Pushes waiting in this handle's legroom-bounded queue.
    #[cfg(test)]
    pub(crate) fn queued_notices(&self) -> usize {
        self.inner
            .link
            .objects
            .get(&self.inner.address)
            .map(|subscription| subscription.queue.max_capacity() - subscription.queue.capacity())
            .unwrap_or(0)
    }

    fn read(&self) -> RwLockReadGuard<'_, ObjectData> {
        self.inner
            .data
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, ObjectData> {
        self.inner
            .data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read from a handle that has not been deleted.
    fn live<T>(&self, f: impl FnOnce(&ObjectData) -> T) -> Result<T, LinkError> {
        let data = self.read();
        if data.stage.is_deleted() {
            return Err(StageError::Deleted.into());
        }
        Ok(f(&data))
    }

    fn check(&self, event: StageEvent) -> Result<(), LinkError> {
        Ok(self.read().stage.check(event)?)
    }

    fn ensure_in_context(&self) -> Result<(), LinkError> {
        self.inner.link.bridge.ensure_in_context()
    }

    fn blocking<T, F, Fut>(&self, op: F) -> Result<T, LinkError>
    where
        F: FnOnce(ObjectHandle) -> Fut,
        Fut: Future<Output = Result<T, LinkError>> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.link.bridge.block_on(op(self.clone()))
    }

    // ===========================================
    // Accessors
    // ===========================================

    /// The link this handle belongs to.
    pub fn link(&self) -> Link {
        Link {
            inner: self.inner.link.clone(),
        }
    }

    /// Current lifecycle stage. Readable even after deletion.
    pub fn stage(&self) -> ObjectStage {
        self.read().stage
    }

    /// Permanent address.
    pub fn address(&self) -> Result<Address, LinkError> {
        self.live(|_| self.inner.address)
    }

    /// Identity that created the object.
    pub fn author(&self) -> Result<AgentId, LinkError> {
        self.live(|_| self.inner.author)
    }

    /// Declared schema, absent for private objects created without one.
    pub fn api_id(&self) -> Result<Option<ApiId>, LinkError> {
        self.live(|_| self.inner.api_id)
    }

    /// Whether the object is private to one application token.
    pub fn is_private(&self) -> Result<bool, LinkError> {
        self.live(|_| self.inner.private)
    }

    /// Whether the object is dynamic.
    pub fn is_dynamic(&self) -> Result<bool, LinkError> {
        self.live(|_| self.inner.dynamic)
    }

    /// Current payload.
    pub fn payload(&self) -> Result<Payload, LinkError> {
        self.live(|data| data.history.current().cloned())?
            .ok_or_else(|| LinkError::InvalidState("object holds no state".into()))
    }

    /// Current payload as bytes. A link payload yields its target address.
    pub fn state(&self) -> Result<Vec<u8>, LinkError> {
        Ok(self.payload()?.to_bytes())
    }

    /// Retained payloads, newest first.
    pub fn history(&self) -> Result<Vec<Payload>, LinkError> {
        self.live(|data| data.history.iter().cloned().collect())
    }

    /// History depth.
    pub fn legroom(&self) -> Result<usize, LinkError> {
        self.live(|data| data.history.legroom())
    }

    /// Whether the current agent authored the object.
    pub fn is_owned(&self) -> Result<bool, LinkError> {
        self.live(|_| ())?;
        Ok(self.inner.author == self.inner.link.identity()?)
    }

    /// Whether the current agent may update the object.
    pub fn is_mutable(&self) -> Result<bool, LinkError> {
        Ok(self.inner.dynamic && self.is_owned()?)
    }

    /// For dynamic objects, whether the payload is a link. `None` for
    /// static objects.
    pub fn is_link(&self) -> Result<Option<bool>, LinkError> {
        self.live(|data| {
            self.inner
                .dynamic
                .then(|| data.history.current().is_some_and(Payload::is_link))
        })
    }

    /// Target of a dynamic object's link payload.
    pub fn link_address(&self) -> Result<Option<Address>, LinkError> {
        self.live(|data| {
            if self.inner.dynamic {
                data.history.current().and_then(Payload::link_target)
            } else {
                None
            }
        })
    }

    // ===========================================
    // Operations
    // ===========================================

    /// Replace the payload of an owned dynamic object.
    ///
    /// Fails with [`LinkError::InvalidState`] for static objects and
    /// [`LinkError::Permission`] when the current agent is not the author.
    /// Callbacks run after the update is applied.
    pub async fn update(&self, payload: impl Into<Payload>) -> Result<(), LinkError> {
        self.ensure_in_context()?;
        self.update_inner(payload.into()).await
    }

    /// Blocking form of [`ObjectHandle::update`].
    pub fn blocking_update(&self, payload: impl Into<Payload>) -> Result<(), LinkError> {
        let payload = payload.into();
        self.blocking(move |handle| async move { handle.update_inner(payload).await })
    }

    async fn update_inner(&self, payload: Payload) -> Result<(), LinkError> {
        let notify = {
            let _op = self.inner.op_lock.lock().await;
            self.check(StageEvent::Updated)?;
            if !self.is_mutable()? {
                return Err(LinkError::Permission(format!(
                    "{} is not owned by this agent",
                    self.inner.address
                )));
            }
            let body = RequestBody::Update {
                address: self.inner.address,
                payload: payload.clone(),
            };
            expect_ack(self.inner.link.request(body).await?)?;
            self.transition(StageEvent::Updated, Some(payload))?
        };
        if notify {
            self.notify_callbacks().await;
        }
        Ok(())
    }

    /// Force the service to push the current state.
    pub async fn sync(&self) -> Result<(), LinkError> {
        self.ensure_in_context()?;
        self.sync_inner().await
    }

    /// Blocking form of [`ObjectHandle::sync`].
    pub fn blocking_sync(&self) -> Result<(), LinkError> {
        self.blocking(|handle| async move { handle.sync_inner().await })
    }

    async fn sync_inner(&self) -> Result<(), LinkError> {
        let _op = self.inner.op_lock.lock().await;
        self.check(StageEvent::Synced)?;
        let body = RequestBody::Sync {
            address: self.inner.address,
        };
        expect_ack(self.inner.link.request(body).await?)?;
        self.transition(StageEvent::Synced, None)?;
        Ok(())
    }

    /// Share the object with another agent.
    pub async fn share(&self, recipient: AgentId) -> Result<(), LinkError> {
        self.ensure_in_context()?;
        self.share_inner(recipient).await
    }

    /// Blocking form of [`ObjectHandle::share`].
    pub fn blocking_share(&self, recipient: AgentId) -> Result<(), LinkError> {
        self.blocking(move |handle| async move { handle.share_inner(recipient).await })
    }

    async fn share_inner(&self, recipient: AgentId) -> Result<(), LinkError> {
        let _op = self.inner.op_lock.lock().await;
        self.check(StageEvent::Shared)?;
        let body = RequestBody::Share {
            address: self.inner.address,
            recipient,
        };
        expect_ack(self.inner.link.request(body).await?)?;
        self.transition(StageEvent::Shared, None)?;
        Ok(())
    }

    /// Snapshot a dynamic object into a new static one. The source is
    /// unchanged.
    pub async fn freeze(&self) -> Result<ObjectHandle, LinkError> {
        self.ensure_in_context()?;
        self.freeze_inner().await
    }

    /// Blocking form of [`ObjectHandle::freeze`].
    pub fn blocking_freeze(&self) -> Result<ObjectHandle, LinkError> {
        self.blocking(|handle| async move { handle.freeze_inner().await })
    }

    async fn freeze_inner(&self) -> Result<ObjectHandle, LinkError> {
        let record = {
            let _op = self.inner.op_lock.lock().await;
            self.check(StageEvent::Frozen)?;
            let snapshot = self.payload()?;
            let body = RequestBody::Freeze {
                address: self.inner.address,
            };
            let address = match self.inner.link.request(body).await? {
                Reply::Address(address) => address,
                other => return Err(unexpected(other)),
            };
            self.transition(StageEvent::Frozen, None)?;
            ObjectRecord {
                address,
                author: self.inner.author,
                payload: snapshot,
                api_id: self.inner.api_id,
                private: self.inner.private,
                dynamic: false,
                legroom: 1,
            }
        };
        adopt(&self.inner.link, record)
    }

    /// Prevent the service from garbage-collecting the object.
    pub async fn hold(&self) -> Result<(), LinkError> {
        self.ensure_in_context()?;
        self.hold_inner().await
    }

    /// Blocking form of [`ObjectHandle::hold`].
    pub fn blocking_hold(&self) -> Result<(), LinkError> {
        self.blocking(|handle| async move { handle.hold_inner().await })
    }

    async fn hold_inner(&self) -> Result<(), LinkError> {
        let _op = self.inner.op_lock.lock().await;
        self.check(StageEvent::Held)?;
        let body = RequestBody::Hold {
            address: self.inner.address,
        };
        expect_ack(self.inner.link.request(body).await?)?;
        self.transition(StageEvent::Held, None)?;
        Ok(())
    }

    /// Stop receiving updates. The object stays at the service and the
    /// local state remains readable. Discarding twice is a no-op.
    pub async fn discard(&self) -> Result<(), LinkError> {
        self.ensure_in_context()?;
        self.discard_inner().await
    }

    /// Blocking form of [`ObjectHandle::discard`].
    pub fn blocking_discard(&self) -> Result<(), LinkError> {
        self.blocking(|handle| async move { handle.discard_inner().await })
    }

    async fn discard_inner(&self) -> Result<(), LinkError> {
        let _op = self.inner.op_lock.lock().await;
        if self.stage().is_discarded() {
            return Ok(());
        }
        self.check(StageEvent::Discarded)?;
        let body = RequestBody::Discard {
            address: self.inner.address,
        };
        expect_ack(self.inner.link.request(body).await?)?;
        self.transition(StageEvent::Discarded, None)?;
        Ok(())
    }

    /// Delete the object at the service and make this handle inert.
    pub async fn delete(&self) -> Result<(), LinkError> {
        self.ensure_in_context()?;
        self.delete_inner().await
    }

    /// Blocking form of [`ObjectHandle::delete`].
    pub fn blocking_delete(&self) -> Result<(), LinkError> {
        self.blocking(|handle| async move { handle.delete_inner().await })
    }

    async fn delete_inner(&self) -> Result<(), LinkError> {
        let _op = self.inner.op_lock.lock().await;
        self.check(StageEvent::Deleted)?;
        let body = RequestBody::Delete {
            address: self.inner.address,
        };
        expect_ack(self.inner.link.request(body).await?)?;
        self.transition(StageEvent::Deleted, None)?;
        debug!(address = %self.inner.address, "object deleted");
        Ok(())
    }

    // ===========================================
    // Callbacks
    // ===========================================

    fn callbacks(&self) -> Result<std::sync::MutexGuard<'_, Callbacks>, LinkError> {
        if self.stage().is_deleted() {
            return Err(StageError::Deleted.into());
        }
        Ok(lock(&self.inner.callbacks))
    }

    /// Add a blocking callback at the end of the list.
    pub fn append_blocking_callback(&self, callback: BlockingCallback) -> Result<(), LinkError> {
        self.callbacks()?.blocking.append(callback);
        Ok(())
    }

    /// Add a blocking callback at the front of the list.
    pub fn prepend_blocking_callback(&self, callback: BlockingCallback) -> Result<(), LinkError> {
        self.callbacks()?.blocking.prepend(callback);
        Ok(())
    }

    /// Remove the first registration of a blocking callback.
    pub fn remove_blocking_callback(&self, callback: &BlockingCallback) -> Result<(), LinkError> {
        Ok(self.callbacks()?.blocking.remove(callback)?)
    }

    /// Remove every blocking callback.
    pub fn clear_blocking_callbacks(&self) {
        lock(&self.inner.callbacks).blocking.clear();
    }

    /// Add an async callback at the end of the list.
    pub fn append_async_callback(&self, callback: AsyncCallback) -> Result<(), LinkError> {
        self.callbacks()?.cooperative.append(callback);
        Ok(())
    }

    /// Add an async callback at the front of the list.
    pub fn prepend_async_callback(&self, callback: AsyncCallback) -> Result<(), LinkError> {
        self.callbacks()?.cooperative.prepend(callback);
        Ok(())
    }

    /// Remove the first registration of an async callback.
    pub fn remove_async_callback(&self, callback: &AsyncCallback) -> Result<(), LinkError> {
        Ok(self.callbacks()?.cooperative.remove(callback)?)
    }

    /// Remove every async callback.
    pub fn clear_async_callbacks(&self) {
        lock(&self.inner.callbacks).cooperative.clear();
    }

    // ===========================================
    // Transitions
    // ===========================================

    /// Apply a stage transition and its actions. Caller holds the op lock.
    ///
    /// Returns whether callbacks should run once the lock is released.
    fn transition(&self, event: StageEvent, payload: Option<Payload>) -> Result<bool, StageError> {
        let actions = {
            let mut data = self.write();
            let (stage, actions) = data.stage.on_event(event)?;
            data.stage = stage;
            if let Some(payload) = payload {
                data.history.push(payload);
            }
            actions
        };

        let mut notify = false;
        for action in actions {
            match action {
                StageAction::Unsubscribe => self.unsubscribe(),
                StageAction::ClearState => self.write().history.clear(),
                StageAction::ClearCallbacks => lock(&self.inner.callbacks).clear(),
                StageAction::NotifyCallbacks => notify = true,
            }
        }
        Ok(notify)
    }

    fn unsubscribe(&self) {
        let this = Arc::as_ptr(&self.inner);
        let removed = self
            .inner
            .link
            .objects
            .remove_if(&self.inner.address, |_, subscription| {
                std::ptr::eq(subscription.handle.as_ptr(), this)
            });
        drop(removed);
    }

    /// Apply one pushed change.
    async fn apply(&self, notice: Notice) {
        let (event, payload) = match notice {
            Notice::Updated(payload) => (StageEvent::RemoteUpdated, Some(payload)),
            Notice::Deleted => (StageEvent::RemoteDeleted, None),
        };
        let notify = {
            let _op = self.inner.op_lock.lock().await;
            match self.transition(event, payload) {
                Ok(notify) => notify,
                Err(e) => {
                    debug!(address = %self.inner.address, error = %e, "ignoring pushed change");
                    return;
                }
            }
        };
        if notify {
            self.notify_callbacks().await;
        }
    }

    async fn notify_callbacks(&self) {
        let (blocking, cooperative) = {
            let callbacks = lock(&self.inner.callbacks);
            (
                callbacks.blocking.snapshot(),
                callbacks.cooperative.snapshot(),
            )
        };
        dispatch(self, blocking, cooperative).await;
    }
}

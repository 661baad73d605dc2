//! Mock transport for testing.
//!
//! Embeds an in-process fake service that answers every request the way
//! the real service would (identity, tokens, objects, registrations,
//! startup objects, holds), records what was sent, and lets tests inject
//! failures and service-initiated pushes.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

use objlink_types::{
    Address, AgentId, ApiId, AppToken, Envelope, ErrorCode, Message, ObjectRecord, OpCode,
    Payload, Push, Reply, Request, RequestBody, RequestId, Response, ServiceError,
};

/// Mock transport for testing.
///
/// Clones share state, so a test can keep one clone for inspection and
/// hand another to the link.
#[derive(Debug, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    inbox: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>,
    outbox: mpsc::UnboundedSender<Vec<u8>>,
    closed: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_address: Option<String>,
    sent_requests: Vec<Request>,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_op: HashMap<OpCode, ErrorCode>,
    stalled_ops: HashSet<OpCode>,
    /// Requests left unanswered by a stall, in arrival order.
    held_requests: Vec<(RequestId, Request)>,
    service: FakeService,
}

#[derive(Debug)]
struct StoredObject {
    record: ObjectRecord,
    /// Token of the creating application, for private objects.
    owner: Option<AppToken>,
    held: bool,
}

/// The service side of the mock.
#[derive(Debug)]
struct FakeService {
    agent: AgentId,
    tokens: HashSet<AppToken>,
    apis: HashMap<AppToken, HashSet<ApiId>>,
    startup: HashMap<AppToken, Address>,
    objects: HashMap<Address, StoredObject>,
}

impl Default for FakeService {
    fn default() -> Self {
        Self {
            agent: AgentId::random(),
            tokens: HashSet::new(),
            apis: HashMap::new(),
            startup: HashMap::new(),
            objects: HashMap::new(),
        }
    }
}

fn err(code: ErrorCode, message: &str) -> Response {
    Err(ServiceError::new(code, message))
}

impl FakeService {
    fn require_token(token: Option<AppToken>) -> Result<AppToken, ServiceError> {
        token.ok_or_else(|| ServiceError::new(ErrorCode::Auth, "no application token"))
    }

    fn object(&self, address: &Address) -> Result<&StoredObject, ServiceError> {
        self.objects
            .get(address)
            .ok_or_else(|| ServiceError::new(ErrorCode::NotFound, "unknown address"))
    }

    /// Answer one request, returning the response and any pushes that follow it.
    fn handle(&mut self, request: Request) -> (Response, Vec<Push>) {
        let token = request.token;
        let mut pushes = Vec::new();
        let response = match request.body {
            RequestBody::Whoami => Ok(Reply::Identity(self.agent)),
            RequestBody::NewToken => {
                let token = AppToken::random();
                self.tokens.insert(token);
                Ok(Reply::Token(token))
            }
            RequestBody::SetToken { token } => {
                if self.tokens.contains(&token) {
                    Ok(Reply::Ack)
                } else {
                    err(ErrorCode::Auth, "unknown token")
                }
            }
            RequestBody::RegisterApi { api_id } => Self::require_token(token).map(|token| {
                self.apis.entry(token).or_default().insert(api_id);
                Reply::Ack
            }),
            RequestBody::DeregisterApi { api_id } => {
                Self::require_token(token).and_then(|token| {
                    let removed = self
                        .apis
                        .get_mut(&token)
                        .map(|apis| apis.remove(&api_id))
                        .unwrap_or(false);
                    if removed {
                        Ok(Reply::Ack)
                    } else {
                        Err(ServiceError::new(ErrorCode::NotFound, "api not registered"))
                    }
                })
            }
            RequestBody::GetStartup => Self::require_token(token)
                .map(|token| Reply::Startup(self.startup.get(&token).copied())),
            RequestBody::RegisterStartup { address } => Self::require_token(token)
                .and_then(|token| {
                    self.object(&address)?;
                    self.startup.insert(token, address);
                    Ok(Reply::Ack)
                }),
            RequestBody::DeregisterStartup => Self::require_token(token).map(|token| {
                self.startup.remove(&token);
                Reply::Ack
            }),
            RequestBody::GetObject { address } => self.object(&address).and_then(|stored| {
                if stored.record.private && stored.owner != token {
                    Err(ServiceError::new(ErrorCode::Permission, "private object"))
                } else {
                    Ok(Reply::Object(stored.record.clone()))
                }
            }),
            RequestBody::NewObject {
                payload,
                api_id,
                private,
                dynamic,
                legroom,
            } => {
                if private && token.is_none() {
                    err(ErrorCode::Auth, "private objects need a token")
                } else if !private && api_id.is_none() {
                    err(ErrorCode::Malformed, "api_id required")
                } else {
                    let address = if dynamic {
                        Address::random()
                    } else {
                        Address::from_content(&payload.to_bytes())
                    };
                    let record = ObjectRecord {
                        address,
                        author: self.agent,
                        payload,
                        api_id,
                        private,
                        dynamic,
                        legroom,
                    };
                    self.objects.insert(
                        address,
                        StoredObject {
                            record: record.clone(),
                            owner: if private { token } else { None },
                            held: false,
                        },
                    );
                    Ok(Reply::Object(record))
                }
            }
            RequestBody::Update { address, payload } => {
                let agent = self.agent;
                match self.objects.get_mut(&address) {
                    None => err(ErrorCode::NotFound, "unknown address"),
                    Some(stored) if !stored.record.dynamic => {
                        err(ErrorCode::InvalidState, "static object")
                    }
                    Some(stored) if stored.record.author != agent => {
                        err(ErrorCode::Permission, "not the author")
                    }
                    Some(stored) => {
                        stored.record.payload = payload;
                        Ok(Reply::Ack)
                    }
                }
            }
            RequestBody::Sync { address } => self.object(&address).map(|stored| {
                if stored.record.dynamic {
                    pushes.push(Push::ObjectUpdated {
                        address,
                        payload: stored.record.payload.clone(),
                    });
                }
                Reply::Ack
            }),
            RequestBody::Share { address, recipient } => self.object(&address).map(|_| {
                pushes.push(Push::ShareSucceeded { address, recipient });
                Reply::Ack
            }),
            RequestBody::Freeze { address } => self
                .object(&address)
                .and_then(|stored| {
                    if stored.record.dynamic {
                        Ok((stored.record.clone(), stored.owner))
                    } else {
                        Err(ServiceError::new(ErrorCode::InvalidState, "static object"))
                    }
                })
                .map(|(source, owner)| {
                    let frozen_address = Address::from_content(&source.payload.to_bytes());
                    let record = ObjectRecord {
                        address: frozen_address,
                        dynamic: false,
                        legroom: 1,
                        ..source
                    };
                    self.objects.insert(
                        frozen_address,
                        StoredObject {
                            record,
                            owner,
                            held: false,
                        },
                    );
                    Reply::Address(frozen_address)
                }),
            RequestBody::Hold { address } => match self.objects.get_mut(&address) {
                None => err(ErrorCode::NotFound, "unknown address"),
                Some(stored) => {
                    stored.held = true;
                    Ok(Reply::Ack)
                }
            },
            RequestBody::Discard { .. } => Ok(Reply::Ack),
            RequestBody::Delete { address } => {
                let agent = self.agent;
                self.object(&address)
                    .and_then(|stored| {
                        if stored.record.author == agent {
                            Ok(())
                        } else {
                            Err(ServiceError::new(ErrorCode::Permission, "not the author"))
                        }
                    })
                    .map(|()| {
                        self.objects.remove(&address);
                        Reply::Ack
                    })
            }
        };
        (response, pushes)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a new mock transport with an empty fake service.
    pub fn new() -> Self {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(true);
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
            inbox: Arc::new(tokio::sync::Mutex::new(inbox)),
            outbox,
            closed: Arc::new(closed),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver(&self, envelope: Envelope) {
        if let Ok(bytes) = envelope.to_bytes() {
            // The receiver lives as long as `self`.
            let _ = self.outbox.send(bytes);
        }
    }

    /// Identity the fake service reports for `WHOAMI`.
    pub fn agent(&self) -> AgentId {
        self.state().service.agent
    }

    /// Mint a token the fake service will accept for `SET_TOKEN`.
    pub fn issue_token(&self) -> AppToken {
        let token = AppToken::random();
        self.state().service.tokens.insert(token);
        token
    }

    /// Store an object directly in the fake service (e.g. one authored by
    /// another agent). Private objects belong to `owner`.
    pub fn seed_object(&self, record: ObjectRecord, owner: Option<AppToken>) {
        self.state().service.objects.insert(
            record.address,
            StoredObject {
                record,
                owner,
                held: false,
            },
        );
    }

    /// Current payload the fake service holds for an object.
    pub fn stored_payload(&self, address: &Address) -> Option<Payload> {
        self.state()
            .service
            .objects
            .get(address)
            .map(|stored| stored.record.payload.clone())
    }

    /// Whether the fake service has an object at this address.
    pub fn has_object(&self, address: &Address) -> bool {
        self.state().service.objects.contains_key(address)
    }

    /// Whether the object has been held.
    pub fn is_held(&self, address: &Address) -> bool {
        self.state()
            .service
            .objects
            .get(address)
            .map(|stored| stored.held)
            .unwrap_or(false)
    }

    /// Whether `api_id` is registered under `token`.
    pub fn is_api_registered(&self, token: &AppToken, api_id: &ApiId) -> bool {
        self.state()
            .service
            .apis
            .get(token)
            .map(|apis| apis.contains(api_id))
            .unwrap_or(false)
    }

    /// Push a new payload for an object, as another session would cause.
    pub fn push_update(&self, address: Address, payload: Payload) {
        if let Some(stored) = self.state().service.objects.get_mut(&address) {
            stored.record.payload = payload.clone();
        }
        self.deliver(Envelope::push(Push::ObjectUpdated { address, payload }));
    }

    /// Push a first-contact share.
    pub fn push_share(&self, address: Address, api_id: ApiId, author: AgentId) {
        self.deliver(Envelope::push(Push::NewShare {
            address,
            api_id,
            author,
        }));
    }

    /// Delete an object at the service and push the deletion.
    pub fn push_delete(&self, address: Address) {
        self.state().service.objects.remove(&address);
        self.deliver(Envelope::push(Push::ObjectDeleted { address }));
    }

    /// Deliver an arbitrary raw frame to the next `recv()`.
    pub fn queue_frame(&self, data: Vec<u8>) {
        let _ = self.outbox.send(data);
    }

    /// Get every request that was sent, in order.
    pub fn sent_requests(&self) -> Vec<Request> {
        self.state().sent_requests.clone()
    }

    /// Get the op codes of every request that was sent, in order.
    pub fn sent_ops(&self) -> Vec<OpCode> {
        self.state().sent_requests.iter().map(Request::op).collect()
    }

    /// Get the last request that was sent.
    pub fn last_request(&self) -> Option<Request> {
        self.state().sent_requests.last().cloned()
    }

    /// Count sent requests with this op code.
    pub fn count_op(&self, op: OpCode) -> usize {
        self.state()
            .sent_requests
            .iter()
            .filter(|r| r.op() == op)
            .count()
    }

    /// Get the endpoint that was connected to.
    pub fn connected_address(&self) -> Option<String> {
        self.state().connected_address.clone()
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.state().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.state().fail_next_send = Some(error.to_string());
    }

    /// Answer the next request with this op code with a service error.
    pub fn fail_next_op(&self, op: OpCode, code: ErrorCode) {
        self.state().fail_next_op.insert(op, code);
    }

    /// Never answer requests with this op code (until [`Self::unstall_op`]).
    pub fn stall_op(&self, op: OpCode) {
        self.state().stalled_ops.insert(op);
    }

    /// Resume answering requests with this op code, answering the held
    /// ones first.
    pub fn unstall_op(&self, op: OpCode) {
        let answered: Vec<_> = {
            let mut inner = self.state();
            inner.stalled_ops.remove(&op);
            let held = std::mem::take(&mut inner.held_requests);
            let (matching, rest): (Vec<_>, Vec<_>) =
                held.into_iter().partition(|(_, request)| request.op() == op);
            inner.held_requests = rest;
            matching
                .into_iter()
                .map(|(id, request)| {
                    let (response, pushes) = inner.service.handle(request);
                    (id, response, pushes)
                })
                .collect()
        };
        for (id, response, pushes) in answered {
            self.deliver(Envelope::new(id, Message::Response(response)));
            for push in pushes {
                self.deliver(Envelope::push(push));
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut inner = self.state();

        // Check for forced failure
        if let Some(error) = inner.fail_next_connect.take() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connected_address = Some(address.to_string());
        self.closed.send_replace(false);
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let (id, response, pushes) = {
            let mut inner = self.state();

            if !inner.connected {
                return Err(TransportError::NotConnected);
            }

            // Check for forced failure
            if let Some(error) = inner.fail_next_send.take() {
                return Err(TransportError::SendFailed(error));
            }

            let envelope = Envelope::from_bytes(data)
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
            let request = match envelope.message {
                Message::Request(request) => request,
                _ => return Err(TransportError::SendFailed("not a request".into())),
            };
            inner.sent_requests.push(request.clone());

            let op = request.op();
            if inner.stalled_ops.contains(&op) {
                inner.held_requests.push((envelope.id, request));
                return Ok(());
            }
            if let Some(code) = inner.fail_next_op.remove(&op) {
                (envelope.id, err(code, "injected failure"), Vec::new())
            } else {
                let (response, pushes) = inner.service.handle(request);
                (envelope.id, response, pushes)
            }
        };

        self.deliver(Envelope::new(id, Message::Response(response)));
        for push in pushes {
            self.deliver(Envelope::push(push));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut closed = self.closed.subscribe();
        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            frame = inbox.recv() => frame.ok_or(TransportError::ConnectionClosed),
            _ = closed.wait_for(|closed| *closed) => Err(TransportError::ConnectionClosed),
        }
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.state().connected = false;
        self.closed.send_replace(true);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u64, token: Option<AppToken>, body: RequestBody) -> Vec<u8> {
        Envelope::new(
            RequestId::new(id),
            Message::Request(Request::new(token, body)),
        )
        .to_bytes()
        .unwrap()
    }

    async fn reply(transport: &MockTransport) -> (RequestId, Message) {
        let env = Envelope::from_bytes(&transport.recv().await.unwrap()).unwrap();
        (env.id, env.message)
    }

    // ===========================================
    // MockTransport Basic Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_connects() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());

        transport.connect("ws://127.0.0.1:7772").await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(
            transport.connected_address(),
            Some("ws://127.0.0.1:7772".to_string())
        );
    }

    #[tokio::test]
    async fn mock_transport_answers_whoami() {
        let transport = MockTransport::new();
        transport.connect("mock").await.unwrap();

        transport.send(&frame(7, None, RequestBody::Whoami)).await.unwrap();

        let (id, message) = reply(&transport).await;
        assert_eq!(id, RequestId::new(7));
        assert_eq!(
            message,
            Message::Response(Ok(Reply::Identity(transport.agent())))
        );
        assert_eq!(transport.sent_ops(), vec![OpCode::Whoami]);
    }

    #[tokio::test]
    async fn mock_transport_records_requests() {
        let transport = MockTransport::new();
        transport.connect("mock").await.unwrap();

        transport.send(&frame(1, None, RequestBody::Whoami)).await.unwrap();
        transport.send(&frame(2, None, RequestBody::NewToken)).await.unwrap();

        assert_eq!(transport.sent_requests().len(), 2);
        assert_eq!(transport.last_request().unwrap().op(), OpCode::NewToken);
        assert_eq!(transport.count_op(OpCode::Whoami), 1);
    }

    #[tokio::test]
    async fn mock_transport_closes() {
        let transport = MockTransport::new();
        transport.connect("mock").await.unwrap();
        assert!(transport.is_connected());

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn close_wakes_pending_recv() {
        let transport = MockTransport::new();
        transport.connect("mock").await.unwrap();

        let reader = transport.clone();
        let pending = tokio::spawn(async move { reader.recv().await });
        tokio::task::yield_now().await;
        transport.close().await.unwrap();

        let result = pending.await.unwrap();
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    }

    // ===========================================
    // Fake Service Tests
    // ===========================================

    #[tokio::test]
    async fn static_objects_are_content_addressed() {
        let transport = MockTransport::new();
        transport.connect("mock").await.unwrap();
        let body = RequestBody::NewObject {
            payload: Payload::from(b"hello"),
            api_id: Some(ApiId::from_content(b"api")),
            private: false,
            dynamic: false,
            legroom: 3,
        };
        transport.send(&frame(1, None, body)).await.unwrap();

        let (_, message) = reply(&transport).await;
        let Message::Response(Ok(Reply::Object(record))) = message else {
            panic!("expected object record");
        };
        assert_eq!(record.address, Address::from_content(b"hello"));
        assert_eq!(record.author, transport.agent());
        assert!(transport.has_object(&record.address));
    }

    #[tokio::test]
    async fn private_object_requires_token() {
        let transport = MockTransport::new();
        transport.connect("mock").await.unwrap();
        let body = RequestBody::NewObject {
            payload: Payload::from(b"secret"),
            api_id: None,
            private: true,
            dynamic: false,
            legroom: 3,
        };
        transport.send(&frame(1, None, body)).await.unwrap();

        let (_, message) = reply(&transport).await;
        let Message::Response(Err(e)) = message else {
            panic!("expected error");
        };
        assert_eq!(e.code, ErrorCode::Auth);
    }

    #[tokio::test]
    async fn sync_pushes_current_state() {
        let transport = MockTransport::new();
        transport.connect("mock").await.unwrap();
        let address = Address::random();
        transport.seed_object(
            ObjectRecord {
                address,
                author: AgentId::random(),
                payload: Payload::from(b"now"),
                api_id: None,
                private: false,
                dynamic: true,
                legroom: 3,
            },
            None,
        );

        transport
            .send(&frame(4, None, RequestBody::Sync { address }))
            .await
            .unwrap();

        let (id, _) = reply(&transport).await;
        assert_eq!(id, RequestId::new(4));
        let (id, message) = reply(&transport).await;
        assert!(id.is_push());
        assert_eq!(
            message,
            Message::Push(Push::ObjectUpdated {
                address,
                payload: Payload::from(b"now"),
            })
        );
    }

    // ===========================================
    // Error Condition Tests
    // ===========================================

    #[tokio::test]
    async fn send_without_connect_fails() {
        let transport = MockTransport::new();

        let result = transport.send(&frame(1, None, RequestBody::Whoami)).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn recv_without_connect_fails() {
        let transport = MockTransport::new();

        let result = transport.recv().await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn forced_connect_failure() {
        let transport = MockTransport::new();
        transport.fail_next_connect("service not running");

        let result = transport.connect("mock").await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn forced_send_failure() {
        let transport = MockTransport::new();
        transport.connect("mock").await.unwrap();
        transport.fail_next_send("broken pipe");

        let result = transport.send(&frame(1, None, RequestBody::Whoami)).await;
        assert!(matches!(result, Err(TransportError::SendFailed(_))));

        // Next send should work
        transport.send(&frame(2, None, RequestBody::Whoami)).await.unwrap();
        assert_eq!(transport.sent_requests().len(), 1);
    }

    #[tokio::test]
    async fn forced_op_failure() {
        let transport = MockTransport::new();
        transport.connect("mock").await.unwrap();
        transport.fail_next_op(OpCode::NewToken, ErrorCode::Auth);

        transport.send(&frame(1, None, RequestBody::NewToken)).await.unwrap();
        let (_, message) = reply(&transport).await;
        assert!(matches!(message, Message::Response(Err(ref e)) if e.code == ErrorCode::Auth));

        transport.send(&frame(2, None, RequestBody::NewToken)).await.unwrap();
        let (_, message) = reply(&transport).await;
        assert!(matches!(message, Message::Response(Ok(Reply::Token(_)))));
    }

    #[tokio::test]
    async fn stalled_op_gets_no_reply() {
        let transport = MockTransport::new();
        transport.connect("mock").await.unwrap();
        transport.stall_op(OpCode::Hold);

        let address = Address::random();
        transport
            .send(&frame(1, None, RequestBody::Hold { address }))
            .await
            .unwrap();
        transport.send(&frame(2, None, RequestBody::Whoami)).await.unwrap();

        // Only the whoami is answered.
        let (id, _) = reply(&transport).await;
        assert_eq!(id, RequestId::new(2));

        // Resuming answers the held request.
        transport.unstall_op(OpCode::Hold);
        let (id, message) = reply(&transport).await;
        assert_eq!(id, RequestId::new(1));
        assert!(matches!(message, Message::Response(Err(ref e)) if e.code == ErrorCode::NotFound));
    }

    // ===========================================
    // Clone and Shared State Tests
    // ===========================================

    #[tokio::test]
    async fn mock_transport_clone_shares_state() {
        let transport1 = MockTransport::new();
        let transport2 = transport1.clone();

        transport1.connect("mock").await.unwrap();
        assert!(transport2.is_connected());
        assert_eq!(transport1.agent(), transport2.agent());

        transport2.push_delete(Address::random());
        let (id, _) = reply(&transport1).await;
        assert!(id.is_push());
    }
}

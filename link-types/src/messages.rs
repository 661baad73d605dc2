//! Protocol messages for objlink.
//!
//! These are the bodies carried inside an [`Envelope`](crate::Envelope).
//! Requests flow from the application to the background service,
//! responses flow back correlated by request id, and pushes are
//! initiated by the service.

use serde::{Deserialize, Serialize};

use crate::{Address, AgentId, ApiId, AppToken, ServiceError, WireError};

/// Operation code of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OpCode {
    /// Ask for the current agent identity
    Whoami = 1,
    /// Mint a fresh application token
    NewToken = 2,
    /// Bind an existing application token
    SetToken = 3,
    /// Declare support for an api_id
    RegisterApi = 4,
    /// Withdraw support for an api_id
    DeregisterApi = 5,
    /// Fetch the application's startup object address
    GetStartup = 6,
    /// Record the application's startup object
    RegisterStartup = 7,
    /// Forget the application's startup object
    DeregisterStartup = 8,
    /// Load an existing object
    GetObject = 9,
    /// Create a new object
    NewObject = 10,
    /// Replace a dynamic object's payload
    Update = 11,
    /// Ask the service to resend an object's current payload
    Sync = 12,
    /// Authorize a recipient to read an object
    Share = 13,
    /// Snapshot a dynamic object into a new static one
    Freeze = 14,
    /// Pin an object against deletion
    Hold = 15,
    /// Stop receiving updates for an object
    Discard = 16,
    /// Delete an object everywhere
    Delete = 17,
}

impl TryFrom<u8> for OpCode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OpCode::Whoami),
            2 => Ok(OpCode::NewToken),
            3 => Ok(OpCode::SetToken),
            4 => Ok(OpCode::RegisterApi),
            5 => Ok(OpCode::DeregisterApi),
            6 => Ok(OpCode::GetStartup),
            7 => Ok(OpCode::RegisterStartup),
            8 => Ok(OpCode::DeregisterStartup),
            9 => Ok(OpCode::GetObject),
            10 => Ok(OpCode::NewObject),
            11 => Ok(OpCode::Update),
            12 => Ok(OpCode::Sync),
            13 => Ok(OpCode::Share),
            14 => Ok(OpCode::Freeze),
            15 => Ok(OpCode::Hold),
            16 => Ok(OpCode::Discard),
            17 => Ok(OpCode::Delete),
            _ => Err(WireError::InvalidOpCode(value)),
        }
    }
}

/// An object's payload: raw bytes, or a link to another dynamic object.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    /// Opaque application bytes
    Data(Vec<u8>),
    /// Proxy to another dynamic object
    Link(Address),
}

impl Payload {
    /// The payload encoded as bytes. A link encodes as its target address.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Data(bytes) => bytes.clone(),
            Payload::Link(target) => target.as_bytes().to_vec(),
        }
    }

    /// The link target, if this payload is a link.
    pub fn link_target(&self) -> Option<Address> {
        match self {
            Payload::Link(target) => Some(*target),
            Payload::Data(_) => None,
        }
    }

    /// Whether this payload is a link.
    pub fn is_link(&self) -> bool {
        matches!(self, Payload::Link(_))
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Data(bytes) => write!(f, "Data([{} bytes])", bytes.len()),
            Payload::Link(target) => write!(f, "Link({:?})", target),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Data(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Data(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Payload {
    fn from(bytes: &[u8; N]) -> Self {
        Payload::Data(bytes.to_vec())
    }
}

impl From<Address> for Payload {
    fn from(target: Address) -> Self {
        Payload::Link(target)
    }
}

/// All frames exchanged over the IPC channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Application to service
    Request(Request),
    /// Service answer to a request (same correlation id)
    Response(Response),
    /// Service-initiated notification
    Push(Push),
}

/// A request from the application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Application token, when one is bound
    pub token: Option<AppToken>,
    /// Operation and its arguments
    pub body: RequestBody,
}

impl Request {
    /// Create a request.
    pub fn new(token: Option<AppToken>, body: RequestBody) -> Self {
        Self { token, body }
    }

    /// The operation code of this request.
    pub fn op(&self) -> OpCode {
        self.body.op()
    }
}

/// Operation-specific request arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestBody {
    /// Ask for the current agent identity
    Whoami,
    /// Mint a fresh application token
    NewToken,
    /// Bind an existing application token
    SetToken {
        /// The token to bind
        token: AppToken,
    },
    /// Declare support for an api_id
    RegisterApi {
        /// Schema identifier
        api_id: ApiId,
    },
    /// Withdraw support for an api_id
    DeregisterApi {
        /// Schema identifier
        api_id: ApiId,
    },
    /// Fetch the startup object address
    GetStartup,
    /// Record the startup object
    RegisterStartup {
        /// Address of the startup object
        address: Address,
    },
    /// Forget the startup object
    DeregisterStartup,
    /// Load an existing object
    GetObject {
        /// Object address
        address: Address,
    },
    /// Create a new object
    NewObject {
        /// Initial payload
        payload: Payload,
        /// Schema identifier (required unless private)
        api_id: Option<ApiId>,
        /// Only reachable with the creating application's token
        private: bool,
        /// Updatable in place
        dynamic: bool,
        /// History depth for dynamic objects
        legroom: u16,
    },
    /// Replace a dynamic object's payload
    Update {
        /// Object address
        address: Address,
        /// New payload
        payload: Payload,
    },
    /// Ask for the current payload to be resent
    Sync {
        /// Object address
        address: Address,
    },
    /// Authorize a recipient to read an object
    Share {
        /// Object address
        address: Address,
        /// Identity being authorized
        recipient: AgentId,
    },
    /// Snapshot a dynamic object
    Freeze {
        /// Address of the dynamic object
        address: Address,
    },
    /// Pin an object against deletion
    Hold {
        /// Object address
        address: Address,
    },
    /// Stop receiving updates for an object
    Discard {
        /// Object address
        address: Address,
    },
    /// Delete an object everywhere
    Delete {
        /// Object address
        address: Address,
    },
}

impl RequestBody {
    /// The operation code for this body.
    pub fn op(&self) -> OpCode {
        match self {
            RequestBody::Whoami => OpCode::Whoami,
            RequestBody::NewToken => OpCode::NewToken,
            RequestBody::SetToken { .. } => OpCode::SetToken,
            RequestBody::RegisterApi { .. } => OpCode::RegisterApi,
            RequestBody::DeregisterApi { .. } => OpCode::DeregisterApi,
            RequestBody::GetStartup => OpCode::GetStartup,
            RequestBody::RegisterStartup { .. } => OpCode::RegisterStartup,
            RequestBody::DeregisterStartup => OpCode::DeregisterStartup,
            RequestBody::GetObject { .. } => OpCode::GetObject,
            RequestBody::NewObject { .. } => OpCode::NewObject,
            RequestBody::Update { .. } => OpCode::Update,
            RequestBody::Sync { .. } => OpCode::Sync,
            RequestBody::Share { .. } => OpCode::Share,
            RequestBody::Freeze { .. } => OpCode::Freeze,
            RequestBody::Hold { .. } => OpCode::Hold,
            RequestBody::Discard { .. } => OpCode::Discard,
            RequestBody::Delete { .. } => OpCode::Delete,
        }
    }

    /// The object address this request targets, if any.
    pub fn address(&self) -> Option<Address> {
        match self {
            RequestBody::RegisterStartup { address }
            | RequestBody::GetObject { address }
            | RequestBody::Update { address, .. }
            | RequestBody::Sync { address }
            | RequestBody::Share { address, .. }
            | RequestBody::Freeze { address }
            | RequestBody::Hold { address }
            | RequestBody::Discard { address }
            | RequestBody::Delete { address } => Some(*address),
            _ => None,
        }
    }
}

/// Everything the service knows about one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Object address
    pub address: Address,
    /// Identity of the creator
    pub author: AgentId,
    /// Current payload
    pub payload: Payload,
    /// Schema identifier
    pub api_id: Option<ApiId>,
    /// Private to the creating application
    pub private: bool,
    /// Updatable in place
    pub dynamic: bool,
    /// History depth for dynamic objects
    pub legroom: u16,
}

/// Successful response bodies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    /// Operation accepted, nothing to return
    Ack,
    /// Current agent identity
    Identity(AgentId),
    /// A freshly minted token
    Token(AppToken),
    /// A full object record
    Object(ObjectRecord),
    /// Address of a created or frozen object
    Address(Address),
    /// Startup object address, if one is registered
    Startup(Option<Address>),
}

/// Response to a request: a reply or a service-reported error.
pub type Response = Result<Reply, ServiceError>;

/// Notifications initiated by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Push {
    /// An object was shared with the current agent
    NewShare {
        /// Object address
        address: Address,
        /// Declared schema identifier
        api_id: ApiId,
        /// Identity that shared it
        author: AgentId,
    },
    /// A subscribed dynamic object has a new payload
    ObjectUpdated {
        /// Object address
        address: Address,
        /// New payload
        payload: Payload,
    },
    /// An object was deleted by its owner
    ObjectDeleted {
        /// Object address
        address: Address,
    },
    /// A share reached its recipient
    ShareSucceeded {
        /// Object address
        address: Address,
        /// Identity the object was shared with
        recipient: AgentId,
    },
    /// A share could not be delivered
    ShareFailed {
        /// Object address
        address: Address,
        /// Identity the object was shared with
        recipient: AgentId,
    },
}

impl Push {
    /// The object address this push concerns.
    pub fn address(&self) -> Address {
        match self {
            Push::NewShare { address, .. }
            | Push::ObjectUpdated { address, .. }
            | Push::ObjectDeleted { address }
            | Push::ShareSucceeded { address, .. }
            | Push::ShareFailed { address, .. } => *address,
        }
    }
}

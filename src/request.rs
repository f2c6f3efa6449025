use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{code, BatchError};
use crate::jobs::hold::{HoldTypes, HOLD_ATTR_NAME};
use crate::jobs::job::Job;

/// Privilege bits of the requesting client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions(u8);

impl Permissions {
    pub const USER_READ: Permissions = Permissions(0x01);
    pub const USER_WRITE: Permissions = Permissions(0x02);
    pub const OPER_READ: Permissions = Permissions(0x04);
    pub const OPER_WRITE: Permissions = Permissions(0x08);
    pub const MGR_READ: Permissions = Permissions(0x10);
    pub const MGR_WRITE: Permissions = Permissions(0x20);

    /// Ordinary job owner.
    pub fn user() -> Self {
        Self::USER_READ | Self::USER_WRITE
    }

    pub fn operator() -> Self {
        Self::user() | Self::OPER_READ | Self::OPER_WRITE
    }

    pub fn manager() -> Self {
        Self::operator() | Self::MGR_READ | Self::MGR_WRITE
    }

    pub fn contains(self, other: Permissions) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Permissions) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for Permissions {
    type Output = Permissions;

    fn bitor(self, rhs: Permissions) -> Permissions {
        Permissions(self.0 | rhs.0)
    }
}

/// Check that a client may set or clear the given holds.
///
/// SYSTEM needs manager write, OTHER needs operator or manager write,
/// USER needs nothing beyond access to the job.
pub fn check_hold_privilege(holds: HoldTypes, perm: Permissions) -> Result<(), BatchError> {
    if holds.intersects(HoldTypes::SYSTEM) && !perm.contains(Permissions::MGR_WRITE) {
        return Err(BatchError::PermissionDenied);
    }
    if holds.intersects(HoldTypes::OTHER)
        && !perm.intersects(Permissions::MGR_WRITE | Permissions::OPER_WRITE)
    {
        return Err(BatchError::PermissionDenied);
    }
    Ok(())
}

/// May this client act on `job`: owner, operator or manager.
pub fn authorize_job_request(request: &BatchRequest, job: &Job) -> bool {
    if request
        .perm
        .intersects(Permissions::OPER_WRITE | Permissions::MGR_WRITE)
    {
        return true;
    }
    request.user == job.owner_user()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestKind {
    HoldJob,
    ReleaseJob,
    ReleaseArray,
    CheckpointJob,
    /// A worker asks for the node hierarchy; the object is the worker's name
    HierarchyRequest,
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestKind::HoldJob => write!(f, "hold"),
            RequestKind::ReleaseJob => write!(f, "release"),
            RequestKind::ReleaseArray => write!(f, "release-array"),
            RequestKind::CheckpointJob => write!(f, "checkpoint"),
            RequestKind::HierarchyRequest => write!(f, "hierarchy"),
        }
    }
}

/// Reply fields filled in from a worker's answer to a relayed request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub code: i32,
    /// Auxiliary code; for checkpoints, non-zero means the image can migrate
    pub aux: i32,
}

impl WorkerReply {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(code: i32) -> Self {
        Self { code, aux: 0 }
    }

    pub fn is_ok(&self) -> bool {
        self.code == code::NONE
    }
}

/// A decoded client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub kind: RequestKind,
    /// Target job id, array id or node name
    pub object: String,
    pub attrs: Vec<(String, String)>,
    pub perm: Permissions,
    pub user: String,
    pub host: String,
    pub extend: Option<String>,
    /// Connection replies are written to
    pub conn: ConnectionId,
    /// Client connection saved while the request is relayed
    pub orig_conn: Option<ConnectionId>,
    pub reply: WorkerReply,
}

impl BatchRequest {
    pub fn new(kind: RequestKind, object: impl Into<String>, user: &str, host: &str) -> Self {
        Self {
            kind,
            object: object.into(),
            attrs: Vec::new(),
            perm: Permissions::user(),
            user: user.to_string(),
            host: host.to_string(),
            extend: None,
            conn: ConnectionId(0),
            orig_conn: None,
            reply: WorkerReply::default(),
        }
    }

    pub fn hold(job_id: &str, holds: &str, user: &str, host: &str) -> Self {
        Self::new(RequestKind::HoldJob, job_id, user, host).with_attr(HOLD_ATTR_NAME, holds)
    }

    pub fn release(job_id: &str, holds: &str, user: &str, host: &str) -> Self {
        Self::new(RequestKind::ReleaseJob, job_id, user, host).with_attr(HOLD_ATTR_NAME, holds)
    }

    pub fn release_array(array_id: &str, holds: &str, user: &str, host: &str) -> Self {
        Self::new(RequestKind::ReleaseArray, array_id, user, host)
            .with_attr(HOLD_ATTR_NAME, holds)
    }

    pub fn checkpoint(job_id: &str, user: &str, host: &str) -> Self {
        Self::new(RequestKind::CheckpointJob, job_id, user, host)
    }

    /// A worker asking for the node hierarchy.
    pub fn hierarchy(node: &str) -> Self {
        Self::new(RequestKind::HierarchyRequest, node, "root", node)
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.push((name.to_string(), value.to_string()));
        self
    }

    pub fn with_perm(mut self, perm: Permissions) -> Self {
        self.perm = perm;
        self
    }

    pub fn with_extend(mut self, extend: &str) -> Self {
        self.extend = Some(extend.to_string());
        self
    }

    pub fn with_conn(mut self, conn: ConnectionId) -> Self {
        self.conn = conn;
        self
    }

    /// `user@host` of the requester.
    pub fn requester(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// Terminal response to a client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Reject { code: i32, message: Option<String> },
}

impl Reply {
    pub fn reject(err: &BatchError) -> Self {
        Reply::Reject {
            code: err.code(),
            message: Some(err.to_string()),
        }
    }

    pub fn reject_with(err: &BatchError, message: impl Into<String>) -> Self {
        Reply::Reject {
            code: err.code(),
            message: Some(message.into()),
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, Reply::Ack)
    }

    pub fn code(&self) -> i32 {
        match self {
            Reply::Ack => code::NONE,
            Reply::Reject { code, .. } => *code,
        }
    }
}

impl From<crate::error::Result<()>> for Reply {
    fn from(result: crate::error::Result<()>) -> Self {
        match result {
            Ok(()) => Reply::Ack,
            Err(e) => Reply::reject(&e),
        }
    }
}

/// The one-shot handle a request is answered through.
///
/// `send` consumes the responder, so a request cannot be answered twice.
/// A responder dropped unanswered sends a system error so the client is
/// never left waiting.
#[derive(Debug)]
pub struct Responder {
    conn: ConnectionId,
    tx: Option<oneshot::Sender<Reply>>,
}

impl Responder {
    pub fn new(conn: ConnectionId) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Self { conn, tx: Some(tx) }, rx)
    }

    pub fn send(mut self, reply: Reply) {
        self.deliver(reply);
    }

    pub fn ack(self) {
        self.send(Reply::Ack);
    }

    pub fn reject(self, err: &BatchError) {
        self.send(Reply::reject(err));
    }

    fn deliver(&mut self, reply: Reply) {
        if let Some(tx) = self.tx.take() {
            if tx.send(reply).is_err() {
                tracing::debug!(conn = %self.conn, "Client went away before reply");
            }
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!(conn = %self.conn, "Request dropped without a reply");
            self.deliver(Reply::Reject {
                code: code::SYSTEM,
                message: Some("request abandoned by server".to_string()),
            });
        }
    }
}

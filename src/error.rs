use thiserror::Error;

/// Numeric batch reply codes carried back to clients and returned by workers.
pub mod code {
    pub const NONE: i32 = 0;
    pub const UNKNOWN_JOB: i32 = 15001;
    pub const INVALID_REQUEST: i32 = 15004;
    pub const PERMISSION: i32 = 15007;
    pub const SYSTEM: i32 = 15010;
    pub const INTERNAL: i32 = 15011;
    pub const NO_SUPPORT: i32 = 15017;
    pub const NO_RELAY_NODE: i32 = 15021;
    pub const PROTOCOL: i32 = 15031;
}

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Unknown job id: {0}")]
    UnknownJob(String),

    #[error("Cannot find array: {0}")]
    UnknownArray(String),

    #[error("Relay to worker failed ({code}): {reason}")]
    RelaySubmission { code: i32, reason: String },

    #[error("Worker rejected request with code {0}")]
    WorkerRejected(i32),

    #[error("Job {0} is not checkpointable")]
    NotCheckpointable(String),

    #[error("Allocation failure: {0}")]
    Allocation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Hierarchy error: {0}")]
    Hierarchy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchError {
    /// Reply code sent to the client when a request ends in this error.
    pub fn code(&self) -> i32 {
        match self {
            BatchError::InvalidRequest(_)
            | BatchError::UnknownArray(_)
            | BatchError::NotCheckpointable(_) => code::INVALID_REQUEST,
            BatchError::PermissionDenied => code::PERMISSION,
            BatchError::UnknownJob(_) => code::UNKNOWN_JOB,
            BatchError::RelaySubmission { code, .. } => *code,
            BatchError::WorkerRejected(code) => *code,
            BatchError::Allocation(_)
            | BatchError::Persistence(_)
            | BatchError::Io(_)
            | BatchError::Json(_) => code::SYSTEM,
            BatchError::Hierarchy(_) | BatchError::Config(_) | BatchError::Internal(_) => {
                code::INTERNAL
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;

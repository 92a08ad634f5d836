use std::fmt::Display;

use thiserror::Error;

use crate::{Bucket, Object};

/// The operation a [StorageError] was raised from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Uploading an object
    Insert,
    /// Removing an object
    Delete,
    /// Producing a signed URL for an object
    SignUrl,
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Insert => write!(f, "insert"),
            Operation::Delete => write!(f, "delete"),
            Operation::SignUrl => write!(f, "sign-url"),
        }
    }
}

/// The reason an operation failed
#[derive(Error, Debug)]
pub enum ErrorKind {
    /// Malformed bucket or object name, out-of-range expiration or similar
    /// caller mistake
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The active credential is unable to produce signatures
    #[error("Unable to sign: {0}")]
    Signing(String),

    /// A bearer token could not be obtained from the credential provider
    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    /// The targeted object does not exist
    #[error("Object not found")]
    NotFound,

    /// The service rejected the request with a 4xx status
    #[error("Request rejected with status {code}: {message}")]
    Client {
        /// HTTP status code
        code: u16,
        /// Error message reported by the service
        message: String,
    },

    /// The service failed with a 5xx status
    #[error("Service failed with status {code}")]
    Server {
        /// HTTP status code
        code: u16,
    },

    /// The request never produced a response
    #[error("Transport failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// A local filesystem operation failed
    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The backend does not support the operation
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// The client has not been started, or has already been stopped
    #[error("Storage client is not running")]
    NotRunning,

    /// The call was aborted because the client was stopped
    #[error("Request was cancelled")]
    Cancelled,
}

/// The error type produced by every [crate::StorageBackend] operation.
///
/// Carries the operation, bucket and object it was raised for, so callers can
/// log it without re-deriving that context.
#[derive(Error, Debug)]
#[error("Failed to {operation} {bucket}/{object}: {kind}")]
pub struct StorageError {
    operation: Operation,
    bucket: String,
    object: String,
    #[source]
    kind: ErrorKind,
}

impl StorageError {
    /// Create a new error for the given operation and location
    pub fn new(operation: Operation, bucket: &Bucket, object: &Object, kind: ErrorKind) -> Self {
        Self {
            operation,
            bucket: bucket.name().to_string(),
            object: object.path().to_string(),
            kind,
        }
    }

    /// The operation that failed
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Name of the bucket the operation targeted
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Path of the object the operation targeted
    pub fn object(&self) -> &str {
        &self.object
    }

    /// The reason for the failure
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Consume the error, returning the reason for the failure
    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    /// True when the targeted object did not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, ErrorKind::NotFound)
    }

    /// True when repeating the same call may succeed. Retry policy itself is
    /// left to the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Server { .. } | ErrorKind::Transport(_))
    }
}

/// Errors reported by [crate::CredentialProvider] implementations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// A bearer token could not be produced
    #[error("Bearer token unavailable: {0}")]
    Unavailable(String),

    /// The credential has no private key, so it cannot sign
    #[error("Credential cannot sign: {0}")]
    SigningUnsupported(String),
}

impl From<CredentialError> for ErrorKind {
    fn from(error: CredentialError) -> Self {
        match error {
            CredentialError::Unavailable(reason) => ErrorKind::Credentials(reason),
            CredentialError::SigningUnsupported(reason) => ErrorKind::Signing(reason),
        }
    }
}

/// Errors raised by [crate::Storage::start] and [crate::Storage::stop]
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// `start` was called on a running client
    #[error("Storage client is already running")]
    AlreadyRunning,

    /// `start` was called after `stop`
    #[error("Storage client has been stopped and cannot be restarted")]
    Stopped,

    /// The HTTP transport could not be constructed
    #[error("Failed to build HTTP transport: {0}")]
    Transport(#[from] reqwest::Error),

    /// The background driver task panicked
    #[error("Driver task failed: {0}")]
    Driver(String),
}

use serde::Serialize;
use thiserror::Error;

/// Errors produced by the order/payment core.
///
/// `DuplicateKey` is raised by stores when a `client_token` is already taken.
/// The order service resolves it internally and never returns it to callers.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("webhook rejected: {0}")]
    SignatureInvalid(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

#[cfg(feature = "storage-rocksdb")]
impl From<rocksdb::Error> for LedgerError {
    fn from(e: rocksdb::Error) -> Self {
        LedgerError::Storage(e.into_string())
    }
}

/// Stable classification handed to the API layer, independent of transport status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Unauthorized,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::NotFound(_) => ErrorKind::NotFound,
            LedgerError::Conflict(_) => ErrorKind::Conflict,
            LedgerError::SignatureInvalid(_) => ErrorKind::Unauthorized,
            LedgerError::Storage(_)
            | LedgerError::DuplicateKey(_)
            | LedgerError::Serialization(_)
            | LedgerError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Whether the webhook retry loop should try the operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Storage(_))
    }

    /// Message safe to return to API callers. Driver and store detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "internal error".to_string(),
            ErrorKind::Unauthorized => "webhook signature rejected".to_string(),
            _ => self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

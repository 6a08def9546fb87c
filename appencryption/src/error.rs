use thiserror::Error;

/// Result type for appencryption operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the appencryption library.
///
/// Variants map directly onto the error-exit taxonomy surfaced across the
/// public interface: callers match on kind rather than inspecting message
/// text.
#[derive(Error, Debug)]
pub enum Error {
    /// A metastore lookup that was expected to succeed returned nothing.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// AEAD authentication failed while opening a ciphertext.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// A KMS operation failed on every configured region.
    #[error("KMS error: {0}")]
    KmsException(String),

    /// A metastore operation failed for a reason other than a duplicate key.
    #[error("metastore error: {0}")]
    MetastoreException(String),

    /// A record violated the envelope schema while being parsed.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A crypto policy or builder was given an invalid configuration.
    #[error("policy error: {0}")]
    PolicyException(String),

    /// The secret backing this operation has already been closed.
    #[error("secret closed")]
    SecretClosed,

    /// Secure memory could not be allocated or protected.
    #[error("allocation failed: {0}")]
    AllocationFailed(String),

    /// Errors related to invalid partition IDs.
    #[error("invalid partition: {0}")]
    InvalidPartition(String),

    /// General internal errors not covered by a more specific kind.
    #[error("internal error: {0}")]
    Internal(String),

    /// Errors related to secure memory operations, not already classified
    /// as `SecretClosed` or `AllocationFailed`.
    #[error("secure memory error: {0}")]
    SecureMemory(#[from] securememory::SecureMemoryError),

    /// Errors related to JSON serialization/deserialization.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors related to I/O operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classifies a `securememory` error into the closest core error kind.
    ///
    /// `SecureMemory` already carries the full underlying error via `#[from]`;
    /// this constructor is used at call sites that want to surface the more
    /// specific `SecretClosed` / `AllocationFailed` kinds instead.
    pub fn from_secure_memory(err: securememory::SecureMemoryError) -> Self {
        use securememory::SecureMemoryError as Sme;
        match err {
            Sme::SecretClosed => Error::SecretClosed,
            Sme::AllocationFailed(msg) | Sme::InvalidSize(msg) => Error::AllocationFailed(msg),
            other => Error::SecureMemory(other),
        }
    }

    /// A lossy, clonable summary of this error, used to propagate a single
    /// loader failure to every single-flight waiter without requiring the
    /// full error tree (some of whose leaves, like `serde_json::Error`, are
    /// not `Clone`) to be cloned.
    pub fn to_shared(&self) -> Error {
        match self {
            Error::KeyNotFound(s) => Error::KeyNotFound(s.clone()),
            Error::DecryptionFailed(s) => Error::DecryptionFailed(s.clone()),
            Error::KmsException(s) => Error::KmsException(s.clone()),
            Error::MetastoreException(s) => Error::MetastoreException(s.clone()),
            Error::MalformedRecord(s) => Error::MalformedRecord(s.clone()),
            Error::PolicyException(s) => Error::PolicyException(s.clone()),
            Error::SecretClosed => Error::SecretClosed,
            Error::AllocationFailed(s) => Error::AllocationFailed(s.clone()),
            Error::InvalidPartition(s) => Error::InvalidPartition(s.clone()),
            Error::Internal(s) => Error::Internal(s.clone()),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for Error {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Error::Internal(err.to_string())
    }
}

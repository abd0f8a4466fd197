//! Engine error types for `coffre-db`.
//!
//! Every pipeline stage returns one of these kinds; the service never
//! masks or recovers internally. Decrypt-side failures are deliberately
//! conflated: a wrong passphrase, a flipped ciphertext byte, a bad
//! padding block, and a checksum mismatch all surface as
//! [`DatabaseError::WrongKeyOrTampered`], so the public error kind
//! cannot be used as a cryptographic oracle.

use coffre_crypto_core::CryptoError;
use thiserror::Error;
use uuid::Uuid;

/// Errors produced by the database engine.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Unparseable container: bad magic, malformed header or record
    /// structure, broken compression stream.
    #[error("container format error: {0}")]
    Format(String),

    /// Recognized container whose version is newer than this build
    /// understands. The engine refuses rather than guessing a layout.
    #[error("unsupported container version: {version}")]
    UnsupportedVersion {
        /// The version found after the magic signature.
        version: u16,
    },

    /// Decryption or verification failed. Wrong credentials and
    /// tampering are indistinguishable by design.
    #[error("wrong credentials or tampered container")]
    WrongKeyOrTampered,

    /// The decrypted record stream is structurally invalid: duplicate
    /// identifier, dangling parent reference, missing root.
    #[error("corrupt record stream: {0}")]
    CorruptTree(String),

    /// Underlying read/write failure. See [`DatabaseError::is_retryable`]
    /// for the caller-side retry classification.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A long-running stage (key derivation, full-file crypt) was
    /// aborted through its cancel token.
    #[error("operation cancelled")]
    Cancelled,

    /// No group with this identifier exists in the open tree.
    #[error("group not found: {0}")]
    GroupNotFound(Uuid),

    /// No entry with this identifier exists in the open tree.
    #[error("entry not found: {0}")]
    EntryNotFound(Uuid),

    /// A structural mutation was rejected to keep the tree acyclic and
    /// rooted (moving a group under its own subtree, deleting the root).
    #[error("invalid tree operation: {0}")]
    InvalidOperation(String),

    /// The handle is closed or in the failed state.
    #[error("database is not open")]
    NotOpen,
}

impl DatabaseError {
    /// Whether the underlying failure is worth retrying by the caller.
    ///
    /// Only transient I/O conditions qualify. Crypto and format failures
    /// are never retryable — repeating them with the same inputs cannot
    /// succeed, and the engine itself never retries anything.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

impl From<CryptoError> for DatabaseError {
    fn from(err: CryptoError) -> Self {
        match err {
            // The conflation point: authentication, padding, and
            // wrong-key failures collapse into one public kind.
            CryptoError::Decryption => Self::WrongKeyOrTampered,
            // A header declared an algorithm this build does not have.
            CryptoError::UnknownAlgorithm(id) => {
                Self::Format(format!("unknown algorithm id {id}"))
            }
            other => Self::Format(format!("cryptographic failure: {other}")),
        }
    }
}

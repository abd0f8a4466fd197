//! Cryptographic error types for `coffre-crypto-core`.

use thiserror::Error;

/// Errors produced by cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed (parameter validation, memory allocation).
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Symmetric encryption failure (key setup, cipher invocation).
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Decryption failed — authentication tag mismatch, bad padding,
    /// wrong key. Carries no detail on purpose: the caller must not be
    /// able to tell which check rejected the input.
    #[error("decryption failed")]
    Decryption,

    /// An algorithm identifier read from a container header that this
    /// build does not implement.
    #[error("unknown algorithm id: {0}")]
    UnknownAlgorithm(u8),

    /// Invalid key material (wrong length, corrupted bytes).
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Secure memory allocation failure (CSPRNG, locked pages).
    #[error("secure memory error: {0}")]
    SecureMemory(String),
}

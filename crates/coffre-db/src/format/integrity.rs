//! Legacy plaintext verification — stream-start marker and checksum.
//!
//! Version 1 and 2 containers use a cipher with no intrinsic
//! authentication, so the decrypted stream carries its own proof:
//!
//! ```text
//! stream_start (32 B) | SHA-256(content) (32 B) | content
//! ```
//!
//! The stream-start bytes are random, stored again in the cleartext
//! header, and checked first: with a wrong key the CBC output is noise
//! and the marker mismatches immediately, before any parsing. The
//! checksum then covers the full content against corruption that
//! happens to preserve the marker.
//!
//! Both checks — and a too-short stream — report the same
//! [`DatabaseError::WrongKeyOrTampered`]; callers cannot tell which
//! test rejected the input. Version 3 never reaches this module: its
//! AEAD tag subsumes verification inside the cipher layer.

use sha2::{Digest, Sha256};

use crate::error::DatabaseError;

/// Length of the stream-start marker.
pub const STREAM_START_LEN: usize = 32;

/// Length of the SHA-256 content checksum.
pub const CHECKSUM_LEN: usize = 32;

/// Wrap `content` for a legacy container body.
#[must_use]
pub fn seal(stream_start: &[u8; STREAM_START_LEN], content: &[u8]) -> Vec<u8> {
    let checksum: [u8; CHECKSUM_LEN] = Sha256::digest(content).into();
    let mut out =
        Vec::with_capacity(STREAM_START_LEN.saturating_add(CHECKSUM_LEN).saturating_add(content.len()));
    out.extend_from_slice(stream_start);
    out.extend_from_slice(&checksum);
    out.extend_from_slice(content);
    out
}

/// Verify a decrypted legacy body and return its content slice.
///
/// # Errors
///
/// [`DatabaseError::WrongKeyOrTampered`] — for a short stream, a
/// marker mismatch, or a checksum mismatch, indistinguishably.
pub fn open<'a>(
    expected_start: &[u8; STREAM_START_LEN],
    plaintext: &'a [u8],
) -> Result<&'a [u8], DatabaseError> {
    let Some(marker) = plaintext.get(..STREAM_START_LEN) else {
        return Err(DatabaseError::WrongKeyOrTampered);
    };
    let Some(stored_checksum) =
        plaintext.get(STREAM_START_LEN..STREAM_START_LEN.saturating_add(CHECKSUM_LEN))
    else {
        return Err(DatabaseError::WrongKeyOrTampered);
    };
    let Some(content) = plaintext.get(STREAM_START_LEN.saturating_add(CHECKSUM_LEN)..) else {
        return Err(DatabaseError::WrongKeyOrTampered);
    };

    // Constant-time comparisons: neither check may leak a prefix length.
    if ring::constant_time::verify_slices_are_equal(marker, expected_start).is_err() {
        return Err(DatabaseError::WrongKeyOrTampered);
    }
    let computed: [u8; CHECKSUM_LEN] = Sha256::digest(content).into();
    if ring::constant_time::verify_slices_are_equal(stored_checksum, &computed).is_err() {
        return Err(DatabaseError::WrongKeyOrTampered);
    }
    Ok(content)
}

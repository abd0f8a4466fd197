//! Symmetric cipher layer — AEAD and the legacy CBC family.
//!
//! This module provides:
//! - [`CipherKind`] — closed algorithm set with stable wire ids
//! - [`encrypt`] — encrypt with a fresh random IV/nonce
//! - [`decrypt`] — decrypt, authenticating where the algorithm can
//!
//! Two families. AES-256-GCM and ChaCha20-Poly1305 are AEAD: tampering
//! and wrong keys are detected at decrypt time and reported as
//! [`CryptoError::Decryption`]. AES-256-CBC (legacy containers) has no
//! intrinsic authentication — the codec layers a plaintext checksum on
//! top of it — but a padding failure still surfaces as the same
//! [`CryptoError::Decryption`], so the two families reject bad input
//! indistinguishably.

use crate::error::CryptoError;
use crate::memory::SecretBuffer;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Symmetric key length in bytes (256 bits), for every algorithm.
pub const KEY_LEN: usize = 32;

/// AEAD authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// AEAD nonce length in bytes (96 bits).
pub const AEAD_NONCE_LEN: usize = 12;

/// CBC initialization vector length in bytes (one AES block).
pub const CBC_IV_LEN: usize = 16;

// ---------------------------------------------------------------------------
// Algorithm selection
// ---------------------------------------------------------------------------

/// Cipher algorithm — the closed set a container header may declare.
///
/// Wire ids are part of the on-disk format and never change meaning.
/// [`CipherKind::from_wire_id`] rejects anything else, so an unknown or
/// future algorithm id fails parsing instead of being guessed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherKind {
    /// AES-256 in CBC mode with PKCS#7 padding — legacy containers only.
    Aes256Cbc,
    /// AES-256-GCM — the default for current containers.
    Aes256Gcm,
    /// ChaCha20-Poly1305 — current-container alternative.
    ChaCha20Poly1305,
}

impl CipherKind {
    /// Stable wire id persisted in container headers.
    #[must_use]
    pub const fn wire_id(self) -> u8 {
        match self {
            Self::Aes256Cbc => 1,
            Self::Aes256Gcm => 2,
            Self::ChaCha20Poly1305 => 3,
        }
    }

    /// Resolve a wire id read from a header.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnknownAlgorithm`] for ids this build does
    /// not implement.
    pub const fn from_wire_id(id: u8) -> Result<Self, CryptoError> {
        match id {
            1 => Ok(Self::Aes256Cbc),
            2 => Ok(Self::Aes256Gcm),
            3 => Ok(Self::ChaCha20Poly1305),
            other => Err(CryptoError::UnknownAlgorithm(other)),
        }
    }

    /// Whether decryption authenticates intrinsically.
    #[must_use]
    pub const fn is_aead(self) -> bool {
        matches!(self, Self::Aes256Gcm | Self::ChaCha20Poly1305)
    }

    /// IV/nonce length this algorithm expects.
    #[must_use]
    pub const fn iv_len(self) -> usize {
        match self {
            Self::Aes256Cbc => CBC_IV_LEN,
            Self::Aes256Gcm | Self::ChaCha20Poly1305 => AEAD_NONCE_LEN,
        }
    }

    fn ring_algorithm(self) -> Option<&'static aead::Algorithm> {
        match self {
            Self::Aes256Gcm => Some(&aead::AES_256_GCM),
            Self::ChaCha20Poly1305 => Some(&aead::CHACHA20_POLY1305),
            Self::Aes256Cbc => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Encrypt `plaintext` under `key` with a fresh random IV/nonce.
///
/// Returns `(iv_or_nonce, ciphertext)`. For the AEAD algorithms the
/// 16-byte tag is appended to the ciphertext and `aad` is authenticated
/// alongside it. For CBC the output is padded ciphertext only and `aad`
/// is ignored — integrity for legacy containers lives in the codec's
/// checksum block.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the key is not [`KEY_LEN`]
/// bytes or the cipher invocation fails, [`CryptoError::SecureMemory`]
/// if the CSPRNG fails.
pub fn encrypt(
    kind: CipherKind,
    key: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let mut iv = vec![0u8; kind.iv_len()];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| CryptoError::SecureMemory(format!("CSPRNG fill failed: {e}")))?;

    let ciphertext = encrypt_with_iv(kind, key, &iv, plaintext, aad)?;
    Ok((iv, ciphertext))
}

/// Encrypt under a caller-chosen IV/nonce.
///
/// The container codec stores the IV in the header and binds the whole
/// header as AEAD associated data, so it must fix the IV before
/// encrypting. The IV must be fresh random for every encryption — reuse
/// under the same key breaks both families.
///
/// # Errors
///
/// As [`encrypt`], plus [`CryptoError::Encryption`] for an IV of the
/// wrong length.
pub fn encrypt_with_iv(
    kind: CipherKind,
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    check_key(key)?;
    if iv.len() != kind.iv_len() {
        return Err(CryptoError::Encryption(format!(
            "invalid IV length: {} bytes (expected {})",
            iv.len(),
            kind.iv_len()
        )));
    }

    match kind.ring_algorithm() {
        Some(algorithm) => seal_aead(algorithm, key, iv, plaintext, aad),
        None => {
            let enc = Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|_| CryptoError::Encryption("failed to initialize AES-256-CBC".into()))?;
            Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
        }
    }
}

fn seal_aead(
    algorithm: &'static aead::Algorithm,
    key: &[u8],
    nonce: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let unbound = aead::UnboundKey::new(algorithm, key)
        .map_err(|_| CryptoError::Encryption("failed to create AEAD key".into()))?;
    let sealing_key = aead::LessSafeKey::new(unbound);

    let nonce_arr: [u8; AEAD_NONCE_LEN] = nonce
        .try_into()
        .map_err(|_| CryptoError::Encryption("invalid nonce length".into()))?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_arr);

    // Encrypt in place; the tag is appended so ciphertext travels as one
    // `ct || tag` buffer.
    let mut in_out = plaintext.to_vec();
    let Ok(tag) = sealing_key.seal_in_place_separate_tag(nonce, aead::Aad::from(aad), &mut in_out)
    else {
        in_out.zeroize();
        return Err(CryptoError::Encryption("AEAD encryption failed".into()));
    };
    in_out.extend_from_slice(tag.as_ref());
    Ok(in_out)
}

// ---------------------------------------------------------------------------
// Decryption
// ---------------------------------------------------------------------------

/// Decrypt `ciphertext` under `key` and the IV/nonce from the header.
///
/// Returns the plaintext as a [`SecretBuffer`] (zeroed on drop). For the
/// AEAD algorithms `ciphertext` is `ct || tag` and `aad` must match what
/// was sealed. For CBC, PKCS#7 padding is stripped and `aad` is ignored.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] for a bad key or IV length, and
/// [`CryptoError::Decryption`] — with no further detail — when the tag
/// does not verify, the padding is invalid, or the key is wrong.
pub fn decrypt(
    kind: CipherKind,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<SecretBuffer, CryptoError> {
    check_key(key)?;
    if iv.len() != kind.iv_len() {
        return Err(CryptoError::Encryption(format!(
            "invalid IV length: {} bytes (expected {})",
            iv.len(),
            kind.iv_len()
        )));
    }

    match kind.ring_algorithm() {
        Some(algorithm) => open_aead(algorithm, key, iv, ciphertext, aad),
        None => {
            let dec = Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|_| CryptoError::Encryption("failed to initialize AES-256-CBC".into()))?;
            let plaintext = dec
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|_| CryptoError::Decryption)?;
            Ok(SecretBuffer::from_vec(plaintext))
        }
    }
}

fn open_aead(
    algorithm: &'static aead::Algorithm,
    key: &[u8],
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<SecretBuffer, CryptoError> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Decryption);
    }

    let unbound = aead::UnboundKey::new(algorithm, key)
        .map_err(|_| CryptoError::Encryption("failed to create AEAD key".into()))?;
    let opening_key = aead::LessSafeKey::new(unbound);

    let nonce_arr: [u8; AEAD_NONCE_LEN] = nonce
        .try_into()
        .map_err(|_| CryptoError::Encryption("invalid nonce length".into()))?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_arr);

    let mut in_out = ciphertext.to_vec();
    let plaintext_slice = opening_key
        .open_in_place(nonce, aead::Aad::from(aad), &mut in_out)
        .map_err(|_| CryptoError::Decryption)?;

    let result = SecretBuffer::new(plaintext_slice);
    in_out.zeroize();
    Ok(result)
}

fn check_key(key: &[u8]) -> Result<(), CryptoError> {
    if key.len() == KEY_LEN {
        Ok(())
    } else {
        Err(CryptoError::Encryption(format!(
            "invalid key length: {} bytes (expected {KEY_LEN})",
            key.len()
        )))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: [u8; KEY_LEN] = [0xAA; KEY_LEN];
    const WRONG_KEY: [u8; KEY_LEN] = [0xBB; KEY_LEN];

    const ALL_KINDS: [CipherKind; 3] = [
        CipherKind::Aes256Cbc,
        CipherKind::Aes256Gcm,
        CipherKind::ChaCha20Poly1305,
    ];

    #[test]
    fn roundtrip_every_algorithm() {
        for kind in ALL_KINDS {
            let (iv, ct) = encrypt(kind, &TEST_KEY, b"tree payload", &[]).expect("encrypt");
            let pt = decrypt(kind, &TEST_KEY, &iv, &ct, &[]).expect("decrypt");
            assert_eq!(pt.expose(), b"tree payload", "{kind:?}");
        }
    }

    #[test]
    fn iv_lengths_match_algorithm() {
        for kind in ALL_KINDS {
            let (iv, _) = encrypt(kind, &TEST_KEY, b"x", &[]).expect("encrypt");
            assert_eq!(iv.len(), kind.iv_len());
        }
    }

    #[test]
    fn aead_ciphertext_carries_tag() {
        let (_, ct) = encrypt(CipherKind::Aes256Gcm, &TEST_KEY, b"data", &[]).expect("encrypt");
        assert_eq!(ct.len(), 4 + TAG_LEN);
    }

    #[test]
    fn cbc_ciphertext_is_block_padded() {
        let (_, ct) = encrypt(CipherKind::Aes256Cbc, &TEST_KEY, b"data", &[]).expect("encrypt");
        assert_eq!(ct.len(), 16);
        let (_, ct_full_block) =
            encrypt(CipherKind::Aes256Cbc, &TEST_KEY, &[0u8; 16], &[]).expect("encrypt");
        assert_eq!(ct_full_block.len(), 32, "full block gains a padding block");
    }

    #[test]
    fn wrong_key_is_rejected_by_every_algorithm() {
        for kind in ALL_KINDS {
            let (iv, ct) = encrypt(kind, &TEST_KEY, b"secret", &[]).expect("encrypt");
            let result = decrypt(kind, &WRONG_KEY, &iv, &ct, &[]);
            // CBC with a wrong key *usually* fails padding; the checksum
            // layer above catches the remainder. AEAD always fails.
            if kind.is_aead() {
                assert!(matches!(result, Err(CryptoError::Decryption)), "{kind:?}");
            }
        }
    }

    #[test]
    fn aead_detects_tampered_ciphertext() {
        for kind in [CipherKind::Aes256Gcm, CipherKind::ChaCha20Poly1305] {
            let (iv, mut ct) = encrypt(kind, &TEST_KEY, b"payload", &[]).expect("encrypt");
            ct[0] ^= 0xFF;
            assert!(
                matches!(decrypt(kind, &TEST_KEY, &iv, &ct, &[]), Err(CryptoError::Decryption)),
                "{kind:?}"
            );
        }
    }

    #[test]
    fn aead_detects_tampered_tag() {
        let (iv, mut ct) =
            encrypt(CipherKind::ChaCha20Poly1305, &TEST_KEY, b"payload", &[]).expect("encrypt");
        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(matches!(
            decrypt(CipherKind::ChaCha20Poly1305, &TEST_KEY, &iv, &ct, &[]),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn aead_detects_aad_mismatch() {
        let (iv, ct) =
            encrypt(CipherKind::Aes256Gcm, &TEST_KEY, b"payload", b"header-bytes").expect("encrypt");
        assert!(matches!(
            decrypt(CipherKind::Aes256Gcm, &TEST_KEY, &iv, &ct, b"other-bytes"),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn aead_roundtrip_with_aad() {
        let aad = b"serialized-header";
        let (iv, ct) = encrypt(CipherKind::Aes256Gcm, &TEST_KEY, b"body", aad).expect("encrypt");
        let pt = decrypt(CipherKind::Aes256Gcm, &TEST_KEY, &iv, &ct, aad).expect("decrypt");
        assert_eq!(pt.expose(), b"body");
    }

    #[test]
    fn truncated_aead_input_is_rejected() {
        assert!(matches!(
            decrypt(CipherKind::Aes256Gcm, &TEST_KEY, &[0u8; 12], &[0u8; 8], &[]),
            Err(CryptoError::Decryption)
        ));
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        for kind in ALL_KINDS {
            let (iv, ct) = encrypt(kind, &TEST_KEY, &[], &[]).expect("encrypt");
            let pt = decrypt(kind, &TEST_KEY, &iv, &ct, &[]).expect("decrypt");
            assert!(pt.expose().is_empty(), "{kind:?}");
        }
    }

    #[test]
    fn two_encrypts_use_fresh_ivs() {
        let (iv_a, ct_a) = encrypt(CipherKind::Aes256Gcm, &TEST_KEY, b"same", &[]).expect("encrypt");
        let (iv_b, ct_b) = encrypt(CipherKind::Aes256Gcm, &TEST_KEY, b"same", &[]).expect("encrypt");
        assert_ne!(iv_a, iv_b);
        assert_ne!(ct_a, ct_b);
    }

    #[test]
    fn encrypt_with_iv_is_deterministic_given_iv() {
        let iv = [0x21; AEAD_NONCE_LEN];
        let a = encrypt_with_iv(CipherKind::Aes256Gcm, &TEST_KEY, &iv, b"same", &[])
            .expect("encrypt");
        let b = encrypt_with_iv(CipherKind::Aes256Gcm, &TEST_KEY, &iv, b"same", &[])
            .expect("encrypt");
        assert_eq!(a, b);
    }

    #[test]
    fn encrypt_with_iv_rejects_bad_iv_length() {
        assert!(encrypt_with_iv(CipherKind::Aes256Cbc, &TEST_KEY, &[0u8; 12], b"x", &[]).is_err());
        assert!(encrypt_with_iv(CipherKind::Aes256Gcm, &TEST_KEY, &[0u8; 16], b"x", &[]).is_err());
    }

    #[test]
    fn bad_key_length_is_rejected() {
        for kind in ALL_KINDS {
            assert!(encrypt(kind, &[0u8; 31], b"x", &[]).is_err());
            assert!(decrypt(kind, &[0u8; 33], &vec![0u8; kind.iv_len()], &[0u8; 32], &[]).is_err());
        }
    }

    #[test]
    fn bad_iv_length_is_rejected() {
        let err = decrypt(CipherKind::Aes256Cbc, &TEST_KEY, &[0u8; 12], &[0u8; 16], &[])
            .expect_err("12-byte IV is wrong for CBC");
        assert!(format!("{err}").contains("IV length"));
    }

    #[test]
    fn wire_ids_are_stable() {
        assert_eq!(CipherKind::Aes256Cbc.wire_id(), 1);
        assert_eq!(CipherKind::Aes256Gcm.wire_id(), 2);
        assert_eq!(CipherKind::ChaCha20Poly1305.wire_id(), 3);
        for kind in ALL_KINDS {
            assert_eq!(CipherKind::from_wire_id(kind.wire_id()).expect("known id"), kind);
        }
    }

    #[test]
    fn unknown_wire_id_is_rejected() {
        assert!(matches!(
            CipherKind::from_wire_id(9),
            Err(CryptoError::UnknownAlgorithm(9))
        ));
    }

    #[test]
    fn decrypted_output_is_masked() {
        let (iv, ct) = encrypt(CipherKind::Aes256Gcm, &TEST_KEY, b"secret", &[]).expect("encrypt");
        let pt = decrypt(CipherKind::Aes256Gcm, &TEST_KEY, &iv, &ct, &[]).expect("decrypt");
        assert_eq!(format!("{pt:?}"), "SecretBuffer(***)");
    }
}

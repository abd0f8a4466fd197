//! Container framing — magic, version dispatch, header layouts.
//!
//! ```text
//! Magic "COFR" (4 B) | Version (u16 LE) | Header | Encrypted body
//! ```
//!
//! Three version families share one read/write contract, selected by a
//! match on the version — a closed dispatch, not subclassing:
//!
//! - **1** — legacy fixed header: every field at a fixed offset, CBC +
//!   PBKDF2 only.
//! - **2** — legacy TLV header: same algorithm family, fields as
//!   tag/length/value records, unknown tags skipped.
//! - **3** — current: TLV header, AEAD cipher, Argon2id or PBKDF2. The
//!   serialized prefix (magic through header end) doubles as the AEAD
//!   associated data, so header tampering breaks authentication.
//!
//! Reading refuses versions above 3 (`UnsupportedVersion`) instead of
//! guessing. Writing supports every family behind the same contract —
//! compatibility tooling needs the legacy writers — but the database
//! service only ever saves version 3.

use coffre_crypto_core::cipher::CipherKind;
use coffre_crypto_core::kdf::{KdfParams, KDF_ID_ARGON2ID, KDF_ID_PBKDF2_SHA256, MIN_SALT_LEN};
use coffre_crypto_core::keys::MASTER_SEED_LEN;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::config::{Compression, DatabaseConfig};
use crate::error::DatabaseError;
use crate::format::integrity::STREAM_START_LEN;

/// Magic signature opening every container.
pub const MAGIC: &[u8; 4] = b"COFR";

/// Legacy fixed-header version.
pub const VERSION_LEGACY_FIXED: u16 = 1;

/// Legacy TLV-header version.
pub const VERSION_LEGACY_TLV: u16 = 2;

/// Current version — the only one the service writes.
pub const VERSION_CURRENT: u16 = 3;

/// KDF salt length generated for new containers.
pub const KDF_SALT_LEN: usize = 32;

/// Fixed-layout (version 1) KDF salt length.
const V1_SALT_LEN: usize = 16;

// Header field tags (versions 2 and 3).
const TAG_END: u8 = 0x00;
const TAG_CIPHER_ID: u8 = 0x01;
const TAG_COMPRESSION: u8 = 0x02;
const TAG_KDF_ID: u8 = 0x03;
const TAG_KDF_PARAMS: u8 = 0x04;
const TAG_KDF_SALT: u8 = 0x05;
const TAG_MASTER_SEED: u8 = 0x06;
const TAG_ENCRYPTION_IV: u8 = 0x07;
const TAG_STREAM_START: u8 = 0x08;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Cleartext container metadata: algorithm choices and the random
/// material needed to reproduce the key schedule. Never user data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// Container format version (1, 2, or 3).
    pub version: u16,
    /// Body cipher.
    pub cipher: CipherKind,
    /// Body compression.
    pub compression: Compression,
    /// KDF and cost parameters.
    pub kdf: KdfParams,
    /// Salt fed to the KDF.
    pub kdf_salt: Vec<u8>,
    /// Per-save random seed mixed into the final key.
    pub master_seed: [u8; MASTER_SEED_LEN],
    /// Cipher IV (16 B for CBC) or nonce (12 B for AEAD).
    pub iv: Vec<u8>,
    /// Legacy early wrong-key marker; `None` for version 3.
    pub stream_start: Option<[u8; STREAM_START_LEN]>,
}

impl Header {
    /// Fresh header for a save in the given version, with new random
    /// salt, seed, IV, and (legacy) stream-start bytes.
    ///
    /// # Errors
    ///
    /// [`DatabaseError::Format`] when the config's algorithms are not
    /// valid for `version` (e.g. CBC in a version-3 container), or if
    /// the CSPRNG fails.
    pub fn generate(config: &DatabaseConfig, version: u16) -> Result<Self, DatabaseError> {
        let (cipher, kdf) = match version {
            VERSION_LEGACY_FIXED | VERSION_LEGACY_TLV => {
                if !matches!(config.kdf, KdfParams::Pbkdf2Sha256 { .. }) {
                    return Err(DatabaseError::Format(
                        "legacy containers require the PBKDF2 key derivation".into(),
                    ));
                }
                (CipherKind::Aes256Cbc, config.kdf.clone())
            }
            VERSION_CURRENT => {
                if !config.cipher.is_aead() {
                    return Err(DatabaseError::Format(
                        "current containers require an AEAD cipher".into(),
                    ));
                }
                (config.cipher, config.kdf.clone())
            }
            other => return Err(DatabaseError::UnsupportedVersion { version: other }),
        };

        let salt_len = if version == VERSION_LEGACY_FIXED {
            V1_SALT_LEN
        } else {
            KDF_SALT_LEN
        };
        let mut kdf_salt = vec![0u8; salt_len];
        fill_random(&mut kdf_salt)?;
        let mut master_seed = [0u8; MASTER_SEED_LEN];
        fill_random(&mut master_seed)?;
        let mut iv = vec![0u8; cipher.iv_len()];
        fill_random(&mut iv)?;

        let stream_start = if version == VERSION_CURRENT {
            None
        } else {
            let mut marker = [0u8; STREAM_START_LEN];
            fill_random(&mut marker)?;
            Some(marker)
        };

        Ok(Self {
            version,
            cipher,
            compression: config.compression,
            kdf,
            kdf_salt,
            master_seed,
            iv,
            stream_start,
        })
    }
}

fn fill_random(buf: &mut [u8]) -> Result<(), DatabaseError> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| DatabaseError::Format(format!("CSPRNG fill failed: {e}")))
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// A parsed container, body still encrypted.
#[derive(Debug)]
pub struct DecodedContainer {
    /// The parsed header.
    pub header: Header,
    /// Raw bytes from the magic through the end of the header — the
    /// version-3 AEAD associated data.
    pub prefix: Vec<u8>,
    /// The encrypted (and possibly compressed) body.
    pub body: Vec<u8>,
}

/// Parse container framing and header; the body stays encrypted.
///
/// # Errors
///
/// [`DatabaseError::Format`] for a bad magic, malformed header, or
/// algorithm invalid for the declared version;
/// [`DatabaseError::UnsupportedVersion`] for versions above 3.
pub fn decode_container(data: &[u8]) -> Result<DecodedContainer, DatabaseError> {
    let mut cursor = Cursor::new(data);

    let magic = cursor.read_exact(MAGIC.len())?;
    if magic != MAGIC.as_slice() {
        return Err(DatabaseError::Format("bad magic signature".into()));
    }
    let version = cursor.read_u16_le()?;

    let header = match version {
        VERSION_LEGACY_FIXED => read_fixed_header(&mut cursor)?,
        VERSION_LEGACY_TLV | VERSION_CURRENT => read_tlv_header(&mut cursor, version)?,
        other => return Err(DatabaseError::UnsupportedVersion { version: other }),
    };

    let prefix = data
        .get(..cursor.pos)
        .ok_or_else(|| DatabaseError::Format("truncated container".into()))?
        .to_vec();
    let body = cursor.rest().to_vec();
    Ok(DecodedContainer {
        header,
        prefix,
        body,
    })
}

fn read_fixed_header(cursor: &mut Cursor<'_>) -> Result<Header, DatabaseError> {
    let cipher_id = cursor.read_u8()?;
    let cipher = CipherKind::from_wire_id(cipher_id).map_err(DatabaseError::from)?;
    if cipher != CipherKind::Aes256Cbc {
        return Err(DatabaseError::Format(format!(
            "cipher id {cipher_id} is not valid for a version-1 container"
        )));
    }

    let compression_id = cursor.read_u8()?;
    let compression = Compression::from_wire_id(compression_id).ok_or_else(|| {
        DatabaseError::Format(format!("unknown compression flag {compression_id}"))
    })?;

    let rounds = cursor.read_u32_le()?;
    let kdf_salt = cursor.read_exact(V1_SALT_LEN)?.to_vec();
    let master_seed: [u8; MASTER_SEED_LEN] = cursor
        .read_exact(MASTER_SEED_LEN)?
        .try_into()
        .map_err(|_| DatabaseError::Format("bad master seed block".into()))?;
    let iv = cursor.read_exact(CipherKind::Aes256Cbc.iv_len())?.to_vec();
    let stream_start: [u8; STREAM_START_LEN] = cursor
        .read_exact(STREAM_START_LEN)?
        .try_into()
        .map_err(|_| DatabaseError::Format("bad stream start block".into()))?;

    Ok(Header {
        version: VERSION_LEGACY_FIXED,
        cipher,
        compression,
        kdf: KdfParams::Pbkdf2Sha256 { rounds },
        kdf_salt,
        master_seed,
        iv,
        stream_start: Some(stream_start),
    })
}

fn read_tlv_header(cursor: &mut Cursor<'_>, version: u16) -> Result<Header, DatabaseError> {
    let mut cipher: Option<CipherKind> = None;
    let mut compression: Option<Compression> = None;
    let mut kdf_id: Option<u8> = None;
    let mut kdf_params_raw: Option<Vec<u8>> = None;
    let mut kdf_salt: Option<Vec<u8>> = None;
    let mut master_seed: Option<[u8; MASTER_SEED_LEN]> = None;
    let mut iv: Option<Vec<u8>> = None;
    let mut stream_start: Option<[u8; STREAM_START_LEN]> = None;

    loop {
        let tag = cursor.read_u8()?;
        let len = cursor.read_u32_le()? as usize;
        let value = cursor.read_exact(len)?;

        match tag {
            TAG_END => {
                if len != 0 {
                    return Err(DatabaseError::Format("end-of-header record has data".into()));
                }
                break;
            }
            TAG_CIPHER_ID => {
                let id = single_byte(value, "cipher id")?;
                cipher = Some(CipherKind::from_wire_id(id).map_err(DatabaseError::from)?);
            }
            TAG_COMPRESSION => {
                let id = single_byte(value, "compression flag")?;
                compression = Some(Compression::from_wire_id(id).ok_or_else(|| {
                    DatabaseError::Format(format!("unknown compression flag {id}"))
                })?);
            }
            TAG_KDF_ID => kdf_id = Some(single_byte(value, "kdf id")?),
            TAG_KDF_PARAMS => kdf_params_raw = Some(value.to_vec()),
            TAG_KDF_SALT => kdf_salt = Some(value.to_vec()),
            TAG_MASTER_SEED => {
                master_seed = Some(value.try_into().map_err(|_| {
                    DatabaseError::Format("master seed record must be 32 bytes".into())
                })?);
            }
            TAG_ENCRYPTION_IV => iv = Some(value.to_vec()),
            TAG_STREAM_START => {
                stream_start = Some(value.try_into().map_err(|_| {
                    DatabaseError::Format("stream start record must be 32 bytes".into())
                })?);
            }
            // Unknown tags are skipped: newer writers may add fields.
            _ => {}
        }
    }

    let cipher = cipher.ok_or_else(|| DatabaseError::Format("header missing cipher id".into()))?;
    let compression =
        compression.ok_or_else(|| DatabaseError::Format("header missing compression".into()))?;
    let kdf_id = kdf_id.ok_or_else(|| DatabaseError::Format("header missing kdf id".into()))?;
    let kdf_params_raw =
        kdf_params_raw.ok_or_else(|| DatabaseError::Format("header missing kdf params".into()))?;
    let kdf_salt =
        kdf_salt.ok_or_else(|| DatabaseError::Format("header missing kdf salt".into()))?;
    let master_seed =
        master_seed.ok_or_else(|| DatabaseError::Format("header missing master seed".into()))?;
    let iv = iv.ok_or_else(|| DatabaseError::Format("header missing encryption IV".into()))?;

    let kdf = decode_kdf_params(kdf_id, &kdf_params_raw)?;

    if kdf_salt.len() < MIN_SALT_LEN {
        return Err(DatabaseError::Format("kdf salt too short".into()));
    }
    if iv.len() != cipher.iv_len() {
        return Err(DatabaseError::Format(format!(
            "IV length {} does not match cipher (expected {})",
            iv.len(),
            cipher.iv_len()
        )));
    }

    match version {
        VERSION_LEGACY_TLV => {
            if cipher != CipherKind::Aes256Cbc {
                return Err(DatabaseError::Format(
                    "version-2 containers require the CBC cipher".into(),
                ));
            }
            if !matches!(kdf, KdfParams::Pbkdf2Sha256 { .. }) {
                return Err(DatabaseError::Format(
                    "version-2 containers require the PBKDF2 key derivation".into(),
                ));
            }
            if stream_start.is_none() {
                return Err(DatabaseError::Format(
                    "version-2 header missing stream start bytes".into(),
                ));
            }
        }
        VERSION_CURRENT => {
            if !cipher.is_aead() {
                return Err(DatabaseError::Format(
                    "version-3 containers require an AEAD cipher".into(),
                ));
            }
            // A stray stream-start record is tolerated and ignored.
            stream_start = None;
        }
        _ => {}
    }

    Ok(Header {
        version,
        cipher,
        compression,
        kdf,
        kdf_salt,
        master_seed,
        iv,
        stream_start,
    })
}

fn decode_kdf_params(id: u8, raw: &[u8]) -> Result<KdfParams, DatabaseError> {
    match id {
        KDF_ID_PBKDF2_SHA256 => {
            let rounds: [u8; 4] = raw.try_into().map_err(|_| {
                DatabaseError::Format("pbkdf2 params must be a 4-byte round count".into())
            })?;
            Ok(KdfParams::Pbkdf2Sha256 {
                rounds: u32::from_le_bytes(rounds),
            })
        }
        KDF_ID_ARGON2ID => {
            let fields: [u8; 12] = raw.try_into().map_err(|_| {
                DatabaseError::Format("argon2id params must be 12 bytes".into())
            })?;
            let m_cost = u32::from_le_bytes([fields[0], fields[1], fields[2], fields[3]]);
            let t_cost = u32::from_le_bytes([fields[4], fields[5], fields[6], fields[7]]);
            let p_cost = u32::from_le_bytes([fields[8], fields[9], fields[10], fields[11]]);
            Ok(KdfParams::Argon2id {
                m_cost,
                t_cost,
                p_cost,
            })
        }
        other => Err(DatabaseError::Format(format!("unknown kdf id {other}"))),
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Serialize the container prefix: magic, version, header. This is the
/// byte string used as AEAD associated data for version 3.
///
/// # Errors
///
/// [`DatabaseError::Format`] when the header is inconsistent with its
/// own version (a version-1 header with a non-CBC cipher, oversized
/// variable fields).
pub fn encode_prefix(header: &Header) -> Result<Vec<u8>, DatabaseError> {
    let mut out = Vec::with_capacity(256);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&header.version.to_le_bytes());

    match header.version {
        VERSION_LEGACY_FIXED => write_fixed_header(&mut out, header)?,
        VERSION_LEGACY_TLV | VERSION_CURRENT => write_tlv_header(&mut out, header)?,
        other => return Err(DatabaseError::UnsupportedVersion { version: other }),
    }
    Ok(out)
}

/// Serialize a full container: prefix plus encrypted body.
///
/// # Errors
///
/// As [`encode_prefix`].
pub fn encode_container(header: &Header, encrypted_body: &[u8]) -> Result<Vec<u8>, DatabaseError> {
    let mut out = encode_prefix(header)?;
    out.extend_from_slice(encrypted_body);
    Ok(out)
}

fn write_fixed_header(out: &mut Vec<u8>, header: &Header) -> Result<(), DatabaseError> {
    if header.cipher != CipherKind::Aes256Cbc {
        return Err(DatabaseError::Format(
            "version-1 containers require the CBC cipher".into(),
        ));
    }
    let KdfParams::Pbkdf2Sha256 { rounds } = header.kdf else {
        return Err(DatabaseError::Format(
            "version-1 containers require the PBKDF2 key derivation".into(),
        ));
    };
    if header.kdf_salt.len() != V1_SALT_LEN {
        return Err(DatabaseError::Format(format!(
            "version-1 kdf salt must be {V1_SALT_LEN} bytes"
        )));
    }
    let Some(stream_start) = header.stream_start else {
        return Err(DatabaseError::Format(
            "version-1 header requires stream start bytes".into(),
        ));
    };
    if header.iv.len() != CipherKind::Aes256Cbc.iv_len() {
        return Err(DatabaseError::Format("version-1 IV must be 16 bytes".into()));
    }

    out.push(header.cipher.wire_id());
    out.push(header.compression.wire_id());
    out.extend_from_slice(&rounds.to_le_bytes());
    out.extend_from_slice(&header.kdf_salt);
    out.extend_from_slice(&header.master_seed);
    out.extend_from_slice(&header.iv);
    out.extend_from_slice(&stream_start);
    Ok(())
}

fn write_tlv_header(out: &mut Vec<u8>, header: &Header) -> Result<(), DatabaseError> {
    put_tlv(out, TAG_CIPHER_ID, &[header.cipher.wire_id()])?;
    put_tlv(out, TAG_COMPRESSION, &[header.compression.wire_id()])?;
    put_tlv(out, TAG_KDF_ID, &[header.kdf.wire_id()])?;
    put_tlv(out, TAG_KDF_PARAMS, &encode_kdf_params(&header.kdf))?;
    put_tlv(out, TAG_KDF_SALT, &header.kdf_salt)?;
    put_tlv(out, TAG_MASTER_SEED, &header.master_seed)?;
    put_tlv(out, TAG_ENCRYPTION_IV, &header.iv)?;
    if header.version != VERSION_CURRENT {
        let Some(stream_start) = header.stream_start else {
            return Err(DatabaseError::Format(
                "version-2 header requires stream start bytes".into(),
            ));
        };
        put_tlv(out, TAG_STREAM_START, &stream_start)?;
    }
    put_tlv(out, TAG_END, &[])?;
    Ok(())
}

fn encode_kdf_params(kdf: &KdfParams) -> Vec<u8> {
    match *kdf {
        KdfParams::Pbkdf2Sha256 { rounds } => rounds.to_le_bytes().to_vec(),
        KdfParams::Argon2id {
            m_cost,
            t_cost,
            p_cost,
        } => {
            let mut raw = Vec::with_capacity(12);
            raw.extend_from_slice(&m_cost.to_le_bytes());
            raw.extend_from_slice(&t_cost.to_le_bytes());
            raw.extend_from_slice(&p_cost.to_le_bytes());
            raw
        }
    }
}

fn put_tlv(out: &mut Vec<u8>, tag: u8, value: &[u8]) -> Result<(), DatabaseError> {
    let len: u32 = u32::try_from(value.len())
        .map_err(|_| DatabaseError::Format("header field too large for u32 length".into()))?;
    out.push(tag);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value);
    Ok(())
}

fn single_byte(value: &[u8], what: &str) -> Result<u8, DatabaseError> {
    match value {
        [byte] => Ok(*byte),
        _ => Err(DatabaseError::Format(format!(
            "{what} record must be exactly one byte"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Bounds-checked little-endian reader over the container bytes.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, DatabaseError> {
        let slice = self.read_exact(1)?;
        Ok(slice[0])
    }

    pub(crate) fn read_u16_le(&mut self) -> Result<u16, DatabaseError> {
        let slice = self.read_exact(2)?;
        Ok(u16::from_le_bytes([slice[0], slice[1]]))
    }

    pub(crate) fn read_u32_le(&mut self) -> Result<u32, DatabaseError> {
        let slice = self.read_exact(4)?;
        Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    pub(crate) fn read_i64_le(&mut self) -> Result<i64, DatabaseError> {
        let slice = self.read_exact(8)?;
        let bytes: [u8; 8] = slice
            .try_into()
            .map_err(|_| DatabaseError::Format("truncated i64 field".into()))?;
        Ok(i64::from_le_bytes(bytes))
    }

    pub(crate) fn read_exact(&mut self, len: usize) -> Result<&'a [u8], DatabaseError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| DatabaseError::Format("length overflow in container".into()))?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| DatabaseError::Format("container truncated".into()))?;
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

//! Body record stream — the serialized tree inside the encrypted payload.
//!
//! A flat, self-describing stream: each record opens with a kind byte
//! (group, entry, end-of-stream), followed by field TLVs
//! (`tag u8 | len u32 LE | value`) closed by an end tag. Unknown field
//! tags are skipped, so an older build reads a newer file's records and
//! loses only what it never knew about.
//!
//! Version differences, chosen by the caller's header:
//! - **1** — groups carry a `Level` depth field; parent edges are
//!   reconstructed from nesting order. No history records.
//! - **2** — groups carry explicit parent identifiers. No history
//!   records.
//! - **3** — parent identifiers and per-entry history records.
//!
//! The writer emits every group depth-first (parents before children),
//! then every entry; [`crate::tree::DatabaseTree::assemble`] relies on
//! that order.

use std::collections::HashMap;
use std::io::{Read, Write};

use chrono::DateTime;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use uuid::Uuid;

use crate::config::Compression;
use crate::error::DatabaseError;
use crate::format::header::{Cursor, VERSION_CURRENT, VERSION_LEGACY_FIXED};
use crate::model::{Attachment, Entry, Field, FieldValue, Group, ProtectedValue, Times};
use crate::tree::DatabaseTree;

// Record kinds.
const REC_END: u8 = 0;
const REC_GROUP: u8 = 1;
const REC_ENTRY: u8 = 2;

// Field tags.
const FT_END: u8 = 0x00;
const FT_UUID: u8 = 0x01;
const FT_PARENT: u8 = 0x02;
const FT_LEVEL: u8 = 0x03;
const FT_NAME: u8 = 0x04;
const FT_ICON: u8 = 0x05;
const FT_TIMES: u8 = 0x06;
const FT_EXPIRES: u8 = 0x07;
const FT_RECYCLE_BIN: u8 = 0x08;
const FT_FIELD: u8 = 0x10;
const FT_ATTACHMENT: u8 = 0x11;
const FT_HISTORY: u8 = 0x12;

/// Protected-value bit in a field record's flag byte.
const FIELD_FLAG_PROTECTED: u8 = 0x01;

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Serialize the tree into a record stream for the given version.
///
/// # Errors
///
/// [`DatabaseError::Format`] if a variable field exceeds the u32 length
/// space or the tree is too deep for a version-1 level field.
pub fn write_body(tree: &DatabaseTree, version: u16) -> Result<Vec<u8>, DatabaseError> {
    let (groups, entries) = tree.flatten();

    // Version 1 encodes nesting depth instead of parent identifiers.
    let mut depths: HashMap<Uuid, u16> = HashMap::new();
    if version == VERSION_LEGACY_FIXED {
        for group in &groups {
            let depth = match group.parent {
                None => 0,
                Some(parent) => {
                    let parent_depth = depths.get(&parent).copied().ok_or_else(|| {
                        DatabaseError::Format("group flattened before its parent".into())
                    })?;
                    parent_depth.checked_add(1).ok_or_else(|| {
                        DatabaseError::Format("tree too deep for a version-1 container".into())
                    })?
                }
            };
            depths.insert(group.uuid, depth);
        }
    }

    let mut out = Vec::new();
    for group in groups {
        out.push(REC_GROUP);
        write_group_fields(&mut out, group, version, &depths)?;
    }
    for entry in entries {
        out.push(REC_ENTRY);
        write_entry_fields(&mut out, entry, version, true)?;
    }
    out.push(REC_END);
    Ok(out)
}

fn write_group_fields(
    out: &mut Vec<u8>,
    group: &Group,
    version: u16,
    depths: &HashMap<Uuid, u16>,
) -> Result<(), DatabaseError> {
    put_field(out, FT_UUID, group.uuid.as_bytes())?;
    if version == VERSION_LEGACY_FIXED {
        let depth = depths
            .get(&group.uuid)
            .copied()
            .ok_or_else(|| DatabaseError::Format("missing depth for group".into()))?;
        put_field(out, FT_LEVEL, &depth.to_le_bytes())?;
    } else if let Some(parent) = group.parent {
        put_field(out, FT_PARENT, parent.as_bytes())?;
    }
    put_field(out, FT_NAME, group.name.as_bytes())?;
    put_field(out, FT_ICON, &group.icon.to_le_bytes())?;
    put_field(out, FT_TIMES, &encode_times(&group.times))?;
    if let Some(expires) = group.times.expires {
        put_field(out, FT_EXPIRES, &expires.timestamp().to_le_bytes())?;
    }
    if group.is_recycle_bin {
        put_field(out, FT_RECYCLE_BIN, &[1])?;
    }
    put_field(out, FT_END, &[])
}

fn write_entry_fields(
    out: &mut Vec<u8>,
    entry: &Entry,
    version: u16,
    with_history: bool,
) -> Result<(), DatabaseError> {
    put_field(out, FT_UUID, entry.uuid.as_bytes())?;
    put_field(out, FT_PARENT, entry.group.as_bytes())?;
    put_field(out, FT_ICON, &entry.icon.to_le_bytes())?;
    put_field(out, FT_TIMES, &encode_times(&entry.times))?;
    if let Some(expires) = entry.times.expires {
        put_field(out, FT_EXPIRES, &expires.timestamp().to_le_bytes())?;
    }

    for field in &entry.fields {
        put_field(out, FT_FIELD, &encode_field(field)?)?;
    }
    for attachment in &entry.attachments {
        put_field(out, FT_ATTACHMENT, &encode_attachment(attachment)?)?;
    }

    // History only exists in current containers, and snapshots never
    // nest further history.
    if with_history && version == VERSION_CURRENT {
        for snapshot in &entry.history {
            let mut nested = Vec::new();
            write_entry_fields(&mut nested, snapshot, version, false)?;
            put_field(out, FT_HISTORY, &nested)?;
        }
    }
    put_field(out, FT_END, &[])
}

fn encode_times(times: &Times) -> Vec<u8> {
    let mut raw = Vec::with_capacity(24);
    raw.extend_from_slice(&times.created.timestamp().to_le_bytes());
    raw.extend_from_slice(&times.modified.timestamp().to_le_bytes());
    raw.extend_from_slice(&times.accessed.timestamp().to_le_bytes());
    raw
}

fn encode_field(field: &Field) -> Result<Vec<u8>, DatabaseError> {
    let key = field.key.as_bytes();
    let key_len: u32 = u32::try_from(key.len())
        .map_err(|_| DatabaseError::Format("field key too large".into()))?;

    let mut raw = Vec::new();
    raw.extend_from_slice(&key_len.to_le_bytes());
    raw.extend_from_slice(key);
    match &field.value {
        FieldValue::Plain(value) => {
            raw.push(0);
            raw.extend_from_slice(value.as_bytes());
        }
        FieldValue::Protected(value) => {
            raw.push(FIELD_FLAG_PROTECTED);
            raw.extend_from_slice(value.expose());
        }
    }
    Ok(raw)
}

fn encode_attachment(attachment: &Attachment) -> Result<Vec<u8>, DatabaseError> {
    let name = attachment.name.as_bytes();
    let name_len: u32 = u32::try_from(name.len())
        .map_err(|_| DatabaseError::Format("attachment name too large".into()))?;

    let mut raw = Vec::new();
    raw.extend_from_slice(&name_len.to_le_bytes());
    raw.extend_from_slice(name);
    raw.extend_from_slice(&attachment.data);
    Ok(raw)
}

fn put_field(out: &mut Vec<u8>, tag: u8, value: &[u8]) -> Result<(), DatabaseError> {
    let len: u32 = u32::try_from(value.len())
        .map_err(|_| DatabaseError::Format("record field too large for u32 length".into()))?;
    out.push(tag);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value);
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parse a record stream back into flat group and entry lists, edges
/// expressed as parent identifiers, ready for
/// [`crate::tree::DatabaseTree::assemble`].
///
/// # Errors
///
/// [`DatabaseError::Format`] for structural damage (bad tags, truncated
/// fields, invalid UTF-8); [`DatabaseError::CorruptTree`] for a
/// version-1 level sequence that cannot be nested.
pub fn read_body(
    data: &[u8],
    version: u16,
) -> Result<(Vec<Group>, Vec<Entry>), DatabaseError> {
    let mut cursor = Cursor::new(data);
    let mut groups: Vec<Group> = Vec::new();
    let mut entries: Vec<Entry> = Vec::new();

    // Version-1 nesting reconstruction: the most recent group seen at
    // each depth.
    let mut level_stack: Vec<Uuid> = Vec::new();

    loop {
        match cursor.read_u8()? {
            REC_END => break,
            REC_GROUP => {
                let record = read_group_fields(&mut cursor, version)?;
                let group = resolve_group_parent(record, version, &mut level_stack)?;
                groups.push(group);
            }
            REC_ENTRY => entries.push(read_entry_fields(&mut cursor, version, true)?),
            other => {
                return Err(DatabaseError::Format(format!(
                    "unknown record kind {other}"
                )))
            }
        }
    }

    if !cursor.is_at_end() {
        return Err(DatabaseError::Format(
            "trailing data after record stream".into(),
        ));
    }
    Ok((groups, entries))
}

struct GroupRecord {
    group: Group,
    level: Option<u16>,
}

fn resolve_group_parent(
    record: GroupRecord,
    version: u16,
    level_stack: &mut Vec<Uuid>,
) -> Result<Group, DatabaseError> {
    let GroupRecord { mut group, level } = record;
    if version != VERSION_LEGACY_FIXED {
        return Ok(group);
    }

    let level = level.ok_or_else(|| {
        DatabaseError::Format("version-1 group record missing level field".into())
    })? as usize;

    if level == 0 {
        group.parent = None;
        level_stack.clear();
        level_stack.push(group.uuid);
        return Ok(group);
    }

    if level > level_stack.len() {
        return Err(DatabaseError::CorruptTree(format!(
            "group {} at level {level} has no parent at level {}",
            group.uuid,
            level.saturating_sub(1)
        )));
    }
    let parent = level_stack
        .get(level.saturating_sub(1))
        .copied()
        .ok_or_else(|| DatabaseError::CorruptTree("level sequence broken".into()))?;
    group.parent = Some(parent);
    level_stack.truncate(level);
    level_stack.push(group.uuid);
    Ok(group)
}

fn read_group_fields(cursor: &mut Cursor<'_>, version: u16) -> Result<GroupRecord, DatabaseError> {
    let mut uuid: Option<Uuid> = None;
    let mut parent: Option<Uuid> = None;
    let mut level: Option<u16> = None;
    let mut name = String::new();
    let mut icon = 0u32;
    let mut times: Option<Times> = None;
    let mut expires: Option<i64> = None;
    let mut is_recycle_bin = false;

    loop {
        let tag = cursor.read_u8()?;
        let len = cursor.read_u32_le()? as usize;
        let value = cursor.read_exact(len)?;

        match tag {
            FT_END => break,
            FT_UUID => uuid = Some(parse_uuid(value)?),
            FT_PARENT => parent = Some(parse_uuid(value)?),
            FT_LEVEL => {
                let raw: [u8; 2] = value.try_into().map_err(|_| {
                    DatabaseError::Format("level field must be 2 bytes".into())
                })?;
                level = Some(u16::from_le_bytes(raw));
            }
            FT_NAME => name = parse_utf8(value)?,
            FT_ICON => icon = parse_u32(value)?,
            FT_TIMES => times = Some(parse_times(value)?),
            FT_EXPIRES => expires = Some(parse_i64(value)?),
            FT_RECYCLE_BIN => is_recycle_bin = value.first().copied() == Some(1),
            // Unknown tags from newer writers are skipped.
            _ => {}
        }
    }

    let uuid =
        uuid.ok_or_else(|| DatabaseError::Format("group record missing identifier".into()))?;
    let mut times =
        times.ok_or_else(|| DatabaseError::Format("group record missing timestamps".into()))?;
    times.expires = expires.map(parse_timestamp).transpose()?;

    if version != VERSION_LEGACY_FIXED && level.is_some() {
        return Err(DatabaseError::Format(
            "level field is only valid in version-1 records".into(),
        ));
    }

    Ok(GroupRecord {
        group: Group {
            uuid,
            parent,
            name,
            icon,
            times,
            is_recycle_bin,
            groups: Vec::new(),
            entries: Vec::new(),
        },
        level,
    })
}

fn read_entry_fields(
    cursor: &mut Cursor<'_>,
    version: u16,
    allow_history: bool,
) -> Result<Entry, DatabaseError> {
    let mut uuid: Option<Uuid> = None;
    let mut group: Option<Uuid> = None;
    let mut icon = 0u32;
    let mut times: Option<Times> = None;
    let mut expires: Option<i64> = None;
    let mut fields: Vec<Field> = Vec::new();
    let mut attachments: Vec<Attachment> = Vec::new();
    let mut history: Vec<Entry> = Vec::new();

    loop {
        let tag = cursor.read_u8()?;
        let len = cursor.read_u32_le()? as usize;
        let value = cursor.read_exact(len)?;

        match tag {
            FT_END => break,
            FT_UUID => uuid = Some(parse_uuid(value)?),
            FT_PARENT => group = Some(parse_uuid(value)?),
            FT_ICON => icon = parse_u32(value)?,
            FT_TIMES => times = Some(parse_times(value)?),
            FT_EXPIRES => expires = Some(parse_i64(value)?),
            FT_FIELD => fields.push(parse_field(value)?),
            FT_ATTACHMENT => attachments.push(parse_attachment(value)?),
            FT_HISTORY => {
                if !allow_history {
                    return Err(DatabaseError::Format(
                        "history snapshots cannot nest".into(),
                    ));
                }
                if version != VERSION_CURRENT {
                    return Err(DatabaseError::Format(
                        "history records are only valid in version-3 containers".into(),
                    ));
                }
                let mut nested = Cursor::new(value);
                let snapshot = read_entry_fields(&mut nested, version, false)?;
                if !nested.is_at_end() {
                    return Err(DatabaseError::Format(
                        "trailing data in history record".into(),
                    ));
                }
                history.push(snapshot);
            }
            _ => {}
        }
    }

    let uuid =
        uuid.ok_or_else(|| DatabaseError::Format("entry record missing identifier".into()))?;
    let group = group
        .ok_or_else(|| DatabaseError::Format("entry record missing owning group".into()))?;
    let mut times =
        times.ok_or_else(|| DatabaseError::Format("entry record missing timestamps".into()))?;
    times.expires = expires.map(parse_timestamp).transpose()?;

    Ok(Entry {
        uuid,
        group,
        icon,
        times,
        fields,
        attachments,
        history,
    })
}

fn parse_field(value: &[u8]) -> Result<Field, DatabaseError> {
    let mut cursor = Cursor::new(value);
    let key_len = cursor.read_u32_le()? as usize;
    let key = parse_utf8(cursor.read_exact(key_len)?)?;
    let flags = cursor.read_u8()?;
    let raw_value = cursor.rest();

    let field_value = if flags & FIELD_FLAG_PROTECTED != 0 {
        FieldValue::Protected(ProtectedValue::new(raw_value))
    } else {
        FieldValue::Plain(parse_utf8(raw_value)?)
    };
    Ok(Field {
        key,
        value: field_value,
    })
}

fn parse_attachment(value: &[u8]) -> Result<Attachment, DatabaseError> {
    let mut cursor = Cursor::new(value);
    let name_len = cursor.read_u32_le()? as usize;
    let name = parse_utf8(cursor.read_exact(name_len)?)?;
    Ok(Attachment {
        name,
        data: cursor.rest().to_vec(),
    })
}

fn parse_times(value: &[u8]) -> Result<Times, DatabaseError> {
    let mut cursor = Cursor::new(value);
    let created = parse_timestamp(cursor.read_i64_le()?)?;
    let modified = parse_timestamp(cursor.read_i64_le()?)?;
    let accessed = parse_timestamp(cursor.read_i64_le()?)?;
    Ok(Times {
        created,
        modified,
        accessed,
        expires: None,
    })
}

fn parse_timestamp(secs: i64) -> Result<chrono::DateTime<chrono::Utc>, DatabaseError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| DatabaseError::Format(format!("timestamp {secs} out of range")))
}

fn parse_uuid(value: &[u8]) -> Result<Uuid, DatabaseError> {
    Uuid::from_slice(value)
        .map_err(|_| DatabaseError::Format("identifier field must be 16 bytes".into()))
}

fn parse_u32(value: &[u8]) -> Result<u32, DatabaseError> {
    let raw: [u8; 4] = value
        .try_into()
        .map_err(|_| DatabaseError::Format("u32 field must be 4 bytes".into()))?;
    Ok(u32::from_le_bytes(raw))
}

fn parse_i64(value: &[u8]) -> Result<i64, DatabaseError> {
    let raw: [u8; 8] = value
        .try_into()
        .map_err(|_| DatabaseError::Format("i64 field must be 8 bytes".into()))?;
    Ok(i64::from_le_bytes(raw))
}

fn parse_utf8(value: &[u8]) -> Result<String, DatabaseError> {
    String::from_utf8(value.to_vec())
        .map_err(|_| DatabaseError::Format("invalid UTF-8 in text field".into()))
}

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

/// Apply body compression before encryption.
///
/// # Errors
///
/// [`DatabaseError::Format`] if the compressor fails (it writes to
/// memory, so this indicates a bug rather than an I/O condition).
pub fn compress(data: &[u8], compression: Compression) -> Result<Vec<u8>, DatabaseError> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder
                .write_all(data)
                .and_then(|()| encoder.finish())
                .map_err(|e| DatabaseError::Format(format!("gzip compression failed: {e}")))
        }
    }
}

/// Undo body compression after decryption and verification.
///
/// # Errors
///
/// [`DatabaseError::Format`] for a broken stream. This runs strictly
/// after authentication, so a failure here reveals nothing about the
/// key.
pub fn decompress(data: &[u8], compression: Compression) -> Result<Vec<u8>, DatabaseError> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| DatabaseError::Format(format!("gzip decompression failed: {e}")))?;
            Ok(out)
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

//! Store key layout for header records
//!
//! Every header is stored under three keys. The index keys are packed
//! nibble by nibble, so the tag becomes the high nibble of the first byte:
//!
//! ```text
//! D <8 hex arrival> <I> 0     arrival index
//! E <8 hex expire>  <I> 0     expiry index
//! <I>                         primary key, leading byte 0x02 or 0x03
//! ```
//!
//! Timestamps are fixed-width, zero padded, so byte order equals numeric
//! order and range scans over the indexes come back sorted by time then
//! identifier. Primary keys sort below both indexes.

use header_types::MessageHeader;

use crate::error::{HeaderCacheError, Result};

const ARRIVAL_TAG: u8 = 0xD;
const EXPIRE_TAG: u8 = 0xE;
const PAD_NIBBLE: u8 = 0x0;

/// Byte length of a decoded compressed point identifier
const IDENTIFIER_LEN: usize = 33;

/// Half-open byte range `[start, end)` over one index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Vec<u8>,
    pub end: Vec<u8>,
}

/// The three store keys of one header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderKeys {
    pub arrival: Vec<u8>,
    pub expire: Vec<u8>,
    pub identifier: Vec<u8>,
}

impl HeaderKeys {
    pub fn derive(header: &MessageHeader) -> Result<Self> {
        let identifier = identifier_key(header.identifier())?;
        Ok(Self {
            arrival: index_key(ARRIVAL_TAG, header.arrival_time(), &identifier, PAD_NIBBLE),
            expire: index_key(EXPIRE_TAG, header.expire_time(), &identifier, PAD_NIBBLE),
            identifier,
        })
    }
}

/// Primary key for a hex identifier
///
/// Only compressed points (leading byte 0x02 or 0x03) are accepted; any
/// other leading byte could fall inside the `D`/`E` index ranges.
pub fn identifier_key(identifier: &str) -> Result<Vec<u8>> {
    let rejected = |reason: String| HeaderCacheError::KeyDerivation {
        identifier: identifier.to_string(),
        reason,
    };

    let key = hex::decode(identifier).map_err(|e| rejected(e.to_string()))?;
    if key.len() != IDENTIFIER_LEN {
        return Err(rejected(format!(
            "expected {} bytes, got {}",
            IDENTIFIER_LEN,
            key.len()
        )));
    }
    if !matches!(key[0], 0x02 | 0x03) {
        return Err(rejected(format!(
            "leading byte {:#04x} is not a compressed point prefix",
            key[0]
        )));
    }
    Ok(key)
}

/// Pack `tag | timestamp | identifier | pad` nibble by nibble
fn index_key(tag: u8, timestamp: u32, identifier: &[u8], pad: u8) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(2 + 2 * (4 + identifier.len()));
    nibbles.push(tag);
    for byte in timestamp.to_be_bytes().iter().chain(identifier) {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0F);
    }
    nibbles.push(pad);

    nibbles
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}

fn lower(tag: u8, timestamp: u32) -> Vec<u8> {
    index_key(tag, timestamp, &[0x00; IDENTIFIER_LEN], 0x0)
}

fn upper(tag: u8) -> Vec<u8> {
    index_key(tag, u32::MAX, &[0xFF; IDENTIFIER_LEN], 0xF)
}

/// Headers that arrived at or after `since`
pub fn arrival_range(since: u32) -> KeyRange {
    KeyRange {
        start: lower(ARRIVAL_TAG, since),
        end: upper(ARRIVAL_TAG),
    }
}

/// Headers that expire at or after `after`
pub fn expire_range(after: u32) -> KeyRange {
    KeyRange {
        start: lower(EXPIRE_TAG, after),
        end: upper(EXPIRE_TAG),
    }
}

/// Headers whose expiry lies strictly before `now`
pub fn expired_before(now: u32) -> KeyRange {
    KeyRange {
        start: lower(EXPIRE_TAG, 0),
        end: lower(EXPIRE_TAG, now),
    }
}

/// Whole expiry index, one entry per live header
pub fn full_expire_range() -> KeyRange {
    expire_range(0)
}

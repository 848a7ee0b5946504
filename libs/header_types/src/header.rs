//! Message header record and canonical codec
//!
//! Serialized layout (all hex upper-cased on the wire for numbers,
//! lower-cased for points and signature halves):
//!
//! ```text
//! | magic | arrival | expire |  I  |  J  |  K  |  r  |  s  | nonce |
//! |   5   |    8    |   8    | 66  | 66  | 66  | 64  | 64  |   6   |
//! ```

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version magic every serialized header starts with
pub const HEADER_VERSION: &str = "M0100";

/// Hex width of a compressed curve point (`I`, `J`, `K`)
pub const IDENTIFIER_HEX_LEN: usize = 66;

const SIG_HEX_LEN: usize = 64;
const TIME_HEX_LEN: usize = 8;
const NONCE_HEX_LEN: usize = 6;
const NONCE_MAX: u32 = 0x00FF_FFFF;

/// Total length of a serialized header in characters
pub const SERIALIZED_LEN: usize = HEADER_VERSION.len()
    + 2 * TIME_HEX_LEN
    + 3 * IDENTIFIER_HEX_LEN
    + 2 * SIG_HEX_LEN
    + NONCE_HEX_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderParseError {
    #[error("Header has wrong length: expected {expected}, actual {actual}")]
    WrongLength { expected: usize, actual: usize },

    #[error("Unsupported header version: {0}")]
    UnsupportedVersion(String),

    #[error("Invalid hex in header field '{field}'")]
    InvalidHex { field: &'static str },

    #[error("Nonce out of range: {0:#x}")]
    NonceOutOfRange(u32),

    /// `I` must be a compressed curve point, `02` or `03` leading byte
    #[error("Header field '{field}' is not a compressed point (prefix {prefix})")]
    InvalidPointPrefix { field: &'static str, prefix: String },
}

/// Metadata record describing one message held by the remote service
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageHeader {
    arrival_time: u32,
    expire_time: u32,
    i: String,
    j: String,
    k: String,
    r: String,
    s: String,
    nonce: u32,
}

impl MessageHeader {
    /// Build a header with the given identifier and timestamps; the
    /// remaining points and signature are zeroed.
    pub fn new(
        identifier: &str,
        arrival_time: u32,
        expire_time: u32,
    ) -> Result<Self, HeaderParseError> {
        let i = checked_point(identifier, "I")?;
        let zero_point = "0".repeat(IDENTIFIER_HEX_LEN);
        let zero_sig = "0".repeat(SIG_HEX_LEN);

        Ok(Self {
            arrival_time,
            expire_time,
            i,
            j: zero_point.clone(),
            k: zero_point,
            r: zero_sig.clone(),
            s: zero_sig,
            nonce: 0,
        })
    }

    /// Replace the proof-of-work nonce (24 bits)
    pub fn with_nonce(mut self, nonce: u32) -> Result<Self, HeaderParseError> {
        if nonce > NONCE_MAX {
            return Err(HeaderParseError::NonceOutOfRange(nonce));
        }
        self.nonce = nonce;
        Ok(self)
    }

    /// Parse the canonical serialized form
    pub fn parse(input: &str) -> Result<Self, HeaderParseError> {
        if input.len() != SERIALIZED_LEN || !input.is_ascii() {
            return Err(HeaderParseError::WrongLength {
                expected: SERIALIZED_LEN,
                actual: input.len(),
            });
        }

        let mut cursor = Cursor { input, pos: 0 };

        let magic = cursor.take(HEADER_VERSION.len());
        if magic != HEADER_VERSION {
            return Err(HeaderParseError::UnsupportedVersion(magic.to_string()));
        }

        let arrival_time = parse_hex_be(cursor.take(TIME_HEX_LEN), "time")?;
        let expire_time = parse_hex_be(cursor.take(TIME_HEX_LEN), "expire")?;
        let i = checked_point(cursor.take(IDENTIFIER_HEX_LEN), "I")?;
        let j = checked_hex(cursor.take(IDENTIFIER_HEX_LEN), IDENTIFIER_HEX_LEN, "J")?;
        let k = checked_hex(cursor.take(IDENTIFIER_HEX_LEN), IDENTIFIER_HEX_LEN, "K")?;
        let r = checked_hex(cursor.take(SIG_HEX_LEN), SIG_HEX_LEN, "r")?;
        let s = checked_hex(cursor.take(SIG_HEX_LEN), SIG_HEX_LEN, "s")?;
        let nonce = parse_hex_be(cursor.take(NONCE_HEX_LEN), "nonce")?;

        Ok(Self {
            arrival_time,
            expire_time,
            i,
            j,
            k,
            r,
            s,
            nonce,
        })
    }

    /// Canonical serialized form
    pub fn serialize(&self) -> String {
        format!(
            "{}{:08X}{:08X}{}{}{}{}{}{:06X}",
            HEADER_VERSION,
            self.arrival_time,
            self.expire_time,
            self.i,
            self.j,
            self.k,
            self.r,
            self.s,
            self.nonce,
        )
    }

    /// Hex identifier (`I`), the record's primary key
    pub fn identifier(&self) -> &str {
        &self.i
    }

    pub fn arrival_time(&self) -> u32 {
        self.arrival_time
    }

    pub fn expire_time(&self) -> u32 {
        self.expire_time
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    /// True once `now` is past the expiry timestamp. A header expiring
    /// exactly at `now` is still live.
    pub fn is_expired(&self, now: u32) -> bool {
        self.expire_time < now
    }
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> &'a str {
        let field = &self.input[self.pos..self.pos + len];
        self.pos += len;
        field
    }
}

fn checked_hex(
    field: &str,
    expected_len: usize,
    name: &'static str,
) -> Result<String, HeaderParseError> {
    if field.len() != expected_len {
        return Err(HeaderParseError::WrongLength {
            expected: expected_len,
            actual: field.len(),
        });
    }
    hex::decode(field).map_err(|_| HeaderParseError::InvalidHex { field: name })?;
    Ok(field.to_ascii_lowercase())
}

fn checked_point(field: &str, name: &'static str) -> Result<String, HeaderParseError> {
    let point = checked_hex(field, IDENTIFIER_HEX_LEN, name)?;
    match &point[..2] {
        "02" | "03" => Ok(point),
        prefix => Err(HeaderParseError::InvalidPointPrefix {
            field: name,
            prefix: prefix.to_string(),
        }),
    }
}

/// Big-endian hex field of at most 8 digits, even width
fn parse_hex_be(field: &str, name: &'static str) -> Result<u32, HeaderParseError> {
    let mut buf = [0u8; 4];
    let width = field.len() / 2;
    hex::decode_to_slice(field, &mut buf[4 - width..])
        .map_err(|_| HeaderParseError::InvalidHex { field: name })?;
    Ok(u32::from_be_bytes(buf))
}

impl FromStr for MessageHeader {
    type Err = HeaderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MessageHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl Serialize for MessageHeader {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&MessageHeader::serialize(self))
    }
}

impl<'de> Deserialize<'de> for MessageHeader {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        MessageHeader::parse(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identifier(fill: char) -> String {
        format!("02{}", fill.to_string().repeat(IDENTIFIER_HEX_LEN - 2))
    }

    #[test]
    fn test_serialized_layout() {
        let header = MessageHeader::new(&identifier('a'), 0x5A00_0001, 0x5A01_0000)
            .unwrap()
            .with_nonce(0x00ABCD)
            .unwrap();

        let wire = header.serialize();
        assert_eq!(wire.len(), SERIALIZED_LEN);
        assert!(wire.starts_with("M01005A0000015A010000"));
        assert!(wire.ends_with("00ABCD"));
        assert_eq!(&wire[21..87], identifier('a'));
    }

    #[test]
    fn test_parse_restores_record() {
        let header = MessageHeader::new(&identifier('7'), 100, 200)
            .unwrap()
            .with_nonce(42)
            .unwrap();

        let parsed = MessageHeader::parse(&header.serialize()).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.arrival_time(), 100);
        assert_eq!(parsed.expire_time(), 200);
        assert_eq!(parsed.nonce(), 42);
    }

    #[test]
    fn test_identifier_is_lowercased() {
        let upper = format!("03{}", "AB".repeat(32));
        let header = MessageHeader::new(&upper, 1, 2).unwrap();
        assert_eq!(header.identifier(), upper.to_ascii_lowercase());
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        let err = MessageHeader::parse("M0100").unwrap_err();
        assert_eq!(
            err,
            HeaderParseError::WrongLength {
                expected: SERIALIZED_LEN,
                actual: 5
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_version() {
        let wire = MessageHeader::new(&identifier('1'), 1, 2)
            .unwrap()
            .serialize()
            .replacen("M0100", "M0200", 1);

        assert_eq!(
            MessageHeader::parse(&wire).unwrap_err(),
            HeaderParseError::UnsupportedVersion("M0200".to_string())
        );
    }

    #[test]
    fn test_parse_rejects_bad_hex() {
        let mut wire = MessageHeader::new(&identifier('1'), 1, 2).unwrap().serialize();
        wire.replace_range(30..31, "z");
        assert_eq!(
            MessageHeader::parse(&wire).unwrap_err(),
            HeaderParseError::InvalidHex { field: "I" }
        );

        let mut wire = MessageHeader::new(&identifier('1'), 1, 2).unwrap().serialize();
        wire.replace_range(5..6, "+");
        assert_eq!(
            MessageHeader::parse(&wire).unwrap_err(),
            HeaderParseError::InvalidHex { field: "time" }
        );
    }

    #[test]
    fn test_new_rejects_bad_identifier() {
        assert!(MessageHeader::new("not-hex", 1, 2).is_err());
        assert!(MessageHeader::new(&"g".repeat(IDENTIFIER_HEX_LEN), 1, 2).is_err());
    }

    #[test]
    fn test_nonce_range() {
        let header = MessageHeader::new(&identifier('1'), 1, 2).unwrap();
        assert_eq!(
            header.with_nonce(0x0100_0000).unwrap_err(),
            HeaderParseError::NonceOutOfRange(0x0100_0000)
        );
    }

    #[test]
    fn test_expiry_boundary() {
        let header = MessageHeader::new(&identifier('1'), 100, 200).unwrap();
        assert!(!header.is_expired(199));
        assert!(!header.is_expired(200));
        assert!(header.is_expired(201));
    }

    #[test]
    fn test_identifier_must_be_compressed_point() {
        for prefix in ["d0", "e0", "00", "04"] {
            let id = format!("{}{}", prefix, "f".repeat(IDENTIFIER_HEX_LEN - 2));
            assert_eq!(
                MessageHeader::new(&id, 1, 2).unwrap_err(),
                HeaderParseError::InvalidPointPrefix {
                    field: "I",
                    prefix: prefix.to_string()
                }
            );
        }

        // same check on the wire
        let mut wire = MessageHeader::new(&identifier('f'), 1, 2).unwrap().serialize();
        wire.replace_range(21..23, "e0");
        assert!(matches!(
            MessageHeader::parse(&wire).unwrap_err(),
            HeaderParseError::InvalidPointPrefix { field: "I", .. }
        ));
    }

    #[test]
    fn test_json_uses_canonical_string() {
        let header = MessageHeader::new(&identifier('c'), 10, 20).unwrap();
        let json = serde_json::to_string(&header).unwrap();
        assert_eq!(json, format!("\"{}\"", header.serialize()));

        let back: MessageHeader = serde_json::from_str(&json).unwrap();
        assert_eq!(back, header);

        assert!(serde_json::from_str::<MessageHeader>("\"M0100\"").is_err());
    }
}

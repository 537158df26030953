//! Framing of text messages and of the file-transfer header.

use crate::DELIMITER;
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use thiserror::Error;

/// Errors raised while parsing or building wire data.
#[derive(Debug, Error)]
pub enum FrameError {
    /// A text message needs a tag and at least one more field.
    #[error("malformed message: expected at least 2 fields, got {fields}")]
    Malformed { fields: usize },

    /// Not enough bytes to decode a transfer header.
    #[error("transfer header too short: need {needed} bytes, have {available}")]
    HeaderTooShort { needed: usize, available: usize },

    /// The header name is not a valid serialized string.
    #[error("transfer header carries an invalid name")]
    InvalidName,

    /// A header length field is negative or does not fit.
    #[error("transfer header length out of range: {0}")]
    InvalidLength(i128),

    #[error("header encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Message type, the first field of every text message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Tag {
    Key,
    Button,
    Command,
    File,
    McServerStatus,
    McServerLogs,
    McLogsUpdate,
    /// Handshake verdicts sent by the server.
    Remote,
    /// Failure explanations sent by the server.
    Reason,
    Unknown(Vec<u8>),
}

impl Tag {
    pub fn from_bytes(raw: &[u8]) -> Self {
        match raw {
            b"key" => Tag::Key,
            b"button" => Tag::Button,
            b"command" => Tag::Command,
            b"file" => Tag::File,
            b"mcServerStatus" => Tag::McServerStatus,
            b"mcServerLogs" => Tag::McServerLogs,
            b"mcLogsUpdate" => Tag::McLogsUpdate,
            b"remote" => Tag::Remote,
            b"reason" => Tag::Reason,
            other => Tag::Unknown(other.to_vec()),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Tag::Key => b"key",
            Tag::Button => b"button",
            Tag::Command => b"command",
            Tag::File => b"file",
            Tag::McServerStatus => b"mcServerStatus",
            Tag::McServerLogs => b"mcServerLogs",
            Tag::McLogsUpdate => b"mcLogsUpdate",
            Tag::Remote => b"remote",
            Tag::Reason => b"reason",
            Tag::Unknown(raw) => raw,
        }
    }
}

/// One parsed text message.
///
/// `payload` holds everything after the first delimiter, byte for byte. That
/// is the primary token with any further fields rejoined by the delimiter, so
/// log text, console commands and raw key digests survive containing `|`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub tag: Tag,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(tag: Tag, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    /// Parses one message from the bytes of a single read.
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        let mut fields = raw.splitn(2, |byte| *byte == DELIMITER);

        match (fields.next(), fields.next()) {
            (Some(tag), Some(payload)) => Ok(Self {
                tag: Tag::from_bytes(tag),
                payload: payload.to_vec(),
            }),
            _ => Err(FrameError::Malformed {
                fields: usize::from(!raw.is_empty()),
            }),
        }
    }

    /// Serializes a tag followed by `fields`, each preceded by the delimiter.
    pub fn join(tag: &Tag, fields: &[&[u8]]) -> Vec<u8> {
        let size = tag.as_bytes().len() + fields.iter().map(|f| f.len() + 1).sum::<usize>();
        let mut out = Vec::with_capacity(size);
        out.extend_from_slice(tag.as_bytes());
        for field in fields {
            out.push(DELIMITER);
            out.extend_from_slice(field);
        }
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        Self::join(&self.tag, &[&self.payload])
    }

    /// The payload split back into its delimited fields.
    pub fn fields(&self) -> impl Iterator<Item = &[u8]> {
        self.payload.split(|byte| *byte == DELIMITER)
    }

    /// Number of delimited fields, tag included.
    pub fn field_count(&self) -> usize {
        1 + self.fields().count()
    }

    /// The primary command token (second field).
    pub fn token(&self) -> &[u8] {
        self.fields().next().unwrap_or_default()
    }

    /// Fields beyond the primary token, still joined by the delimiter.
    pub fn extended(&self) -> Option<&[u8]> {
        self.payload
            .iter()
            .position(|byte| *byte == DELIMITER)
            .map(|at| &self.payload[at + 1..])
    }

    pub fn payload_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Fixed part of the transfer header: two big-endian 64-bit integers.
#[derive(Debug, Serialize, Deserialize)]
struct HeaderPrefix {
    total_bytes: i64,
    name_len: i64,
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_big_endian()
        .with_fixint_encoding()
}

/// Header written once at the start of a file transfer.
///
/// Layout: `i64 total_bytes`, `i64 name_len`, then the name as a Qt string
/// (`u32` byte count followed by UTF-16BE units). `total_bytes` covers the
/// header itself plus the body; `name_len` counts the serialized name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferHeader {
    pub total_bytes: u64,
    pub name: String,
}

impl TransferHeader {
    pub const PREFIX_LEN: usize = 16;

    /// Builds the header announcing a body of `body_len` bytes.
    pub fn for_body(name: impl Into<String>, body_len: u64) -> Self {
        let name = name.into();
        let header_len = (Self::PREFIX_LEN + qstring_len(&name)) as u64;
        Self {
            total_bytes: header_len + body_len,
            name,
        }
    }

    /// Size of the encoded header in bytes.
    pub fn header_len(&self) -> usize {
        Self::PREFIX_LEN + qstring_len(&self.name)
    }

    pub fn body_len(&self) -> u64 {
        self.total_bytes.saturating_sub(self.header_len() as u64)
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let name = encode_qstring(&self.name)?;
        let prefix = HeaderPrefix {
            total_bytes: i64::try_from(self.total_bytes)
                .map_err(|_| FrameError::InvalidLength(i128::from(self.total_bytes)))?,
            name_len: name.len() as i64,
        };

        let mut out = wire_options().serialize(&prefix)?;
        out.extend_from_slice(&name);
        Ok(out)
    }

    /// Decodes a header from the front of `buf`.
    ///
    /// Returns the header and the number of bytes it occupied; whatever
    /// follows belongs to the body.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), FrameError> {
        if buf.len() < Self::PREFIX_LEN {
            return Err(FrameError::HeaderTooShort {
                needed: Self::PREFIX_LEN,
                available: buf.len(),
            });
        }

        let prefix: HeaderPrefix = wire_options().deserialize(&buf[..Self::PREFIX_LEN])?;
        let name_len = usize::try_from(prefix.name_len)
            .map_err(|_| FrameError::InvalidLength(i128::from(prefix.name_len)))?;
        let total_bytes = u64::try_from(prefix.total_bytes)
            .map_err(|_| FrameError::InvalidLength(i128::from(prefix.total_bytes)))?;

        let end = Self::PREFIX_LEN + name_len;
        if buf.len() < end {
            return Err(FrameError::HeaderTooShort {
                needed: end,
                available: buf.len(),
            });
        }

        let name = decode_qstring(&buf[Self::PREFIX_LEN..end])?;
        Ok((Self { total_bytes, name }, end))
    }
}

/// Serialized size of `text` as a Qt string.
fn qstring_len(text: &str) -> usize {
    4 + text.encode_utf16().count() * 2
}

fn encode_qstring(text: &str) -> Result<Vec<u8>, FrameError> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let byte_len = u32::try_from(units.len() * 2)
        .map_err(|_| FrameError::InvalidLength((units.len() * 2) as i128))?;

    let mut out = Vec::with_capacity(4 + units.len() * 2);
    wire_options().serialize_into(&mut out, &byte_len)?;
    for unit in &units {
        wire_options().serialize_into(&mut out, unit)?;
    }
    Ok(out)
}

fn decode_qstring(raw: &[u8]) -> Result<String, FrameError> {
    if raw.len() < 4 {
        return Err(FrameError::InvalidName);
    }
    let (len, body) = raw.split_at(4);
    let len: u32 = wire_options().deserialize(len)?;

    // Qt writes a null string as an all-ones length.
    if len == u32::MAX {
        return Ok(String::new());
    }
    if len as usize != body.len() || body.len() % 2 != 0 {
        return Err(FrameError::InvalidName);
    }

    let units = body
        .chunks_exact(2)
        .map(|pair| wire_options().deserialize::<u16>(pair))
        .collect::<Result<Vec<u16>, _>>()?;
    String::from_utf16(&units).map_err(|_| FrameError::InvalidName)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_message() {
        let message = Message::parse(b"key|secret").unwrap();
        assert_eq!(message.tag, Tag::Key);
        assert_eq!(message.payload, b"secret");
        assert_eq!(message.field_count(), 2);
    }

    #[test]
    fn test_parse_rejoins_extra_fields() {
        let message = Message::parse(b"command|say a|b|c").unwrap();
        assert_eq!(message.tag, Tag::Command);
        assert_eq!(message.payload, b"say a|b|c");
        assert_eq!(message.token(), b"say a");
        assert_eq!(message.extended(), Some(&b"b|c"[..]));
        assert_eq!(message.field_count(), 4);
    }

    #[test]
    fn test_parse_empty_token() {
        let message = Message::parse(b"mcServerStatus|").unwrap();
        assert_eq!(message.tag, Tag::McServerStatus);
        assert!(message.payload.is_empty());
        assert_eq!(message.token(), b"");
        assert_eq!(message.extended(), None);
    }

    #[test]
    fn test_parse_rejects_too_few_fields() {
        match Message::parse(b"") {
            Err(FrameError::Malformed { fields }) => assert_eq!(fields, 0),
            other => panic!("Unexpected parse result: {:?}", other),
        }

        match Message::parse(b"button") {
            Err(FrameError::Malformed { fields }) => assert_eq!(fields, 1),
            other => panic!("Unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_keeps_binary_payload() {
        let raw = [b'k', b'e', b'y', b'|', 0x00, 0x7C, 0xFF, 0x7C];
        let message = Message::parse(&raw).unwrap();
        assert_eq!(message.tag, Tag::Key);
        assert_eq!(message.payload, vec![0x00, 0x7C, 0xFF, 0x7C]);
    }

    #[test]
    fn test_unknown_tag_is_preserved() {
        let message = Message::parse(b"ping|now").unwrap();
        assert_eq!(message.tag, Tag::Unknown(b"ping".to_vec()));
        assert_eq!(message.to_bytes(), b"ping|now");
    }

    #[test]
    fn test_join_fields() {
        let bytes = Message::join(&Tag::Remote, &[b"Verification fail", b"wrong key"]);
        assert_eq!(bytes, b"remote|Verification fail|wrong key");

        let bytes = Message::new(Tag::McServerLogs, "42").to_bytes();
        assert_eq!(bytes, b"mcServerLogs|42");
    }

    #[test]
    fn test_header_layout() {
        let header = TransferHeader::for_body("latest.log", 100);
        let encoded = header.encode().unwrap();

        // 16 byte prefix + 4 byte string length + 10 UTF-16 units
        assert_eq!(encoded.len(), 40);
        assert_eq!(header.header_len(), 40);
        assert_eq!(header.total_bytes, 140);
        assert_eq!(header.body_len(), 100);

        assert_eq!(&encoded[0..8], &140i64.to_be_bytes());
        assert_eq!(&encoded[8..16], &24i64.to_be_bytes());
        assert_eq!(&encoded[16..20], &20u32.to_be_bytes());
        assert_eq!(&encoded[20..22], &[0x00, b'l']);
    }

    #[test]
    fn test_header_decode_leaves_body() {
        let header = TransferHeader::for_body("latest.log", 3);
        let mut wire = header.encode().unwrap();
        wire.extend_from_slice(b"abc");

        let (decoded, used) = TransferHeader::decode(&wire).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(&wire[used..], b"abc");
    }

    #[test]
    fn test_header_decode_short_input() {
        match TransferHeader::decode(&[0u8; 10]) {
            Err(FrameError::HeaderTooShort { needed, available }) => {
                assert_eq!(needed, 16);
                assert_eq!(available, 10);
            }
            other => panic!("Unexpected decode result: {:?}", other),
        }

        let header = TransferHeader::for_body("latest.log", 0).encode().unwrap();
        assert!(matches!(
            TransferHeader::decode(&header[..30]),
            Err(FrameError::HeaderTooShort { needed: 40, .. })
        ));
    }

    #[test]
    fn test_header_decode_rejects_odd_name() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&21i64.to_be_bytes());
        wire.extend_from_slice(&5i64.to_be_bytes());
        wire.extend_from_slice(&1u32.to_be_bytes());
        wire.push(b'x');

        assert!(matches!(
            TransferHeader::decode(&wire),
            Err(FrameError::InvalidName)
        ));
    }

    #[test]
    fn test_qstring_uses_utf16_units() {
        // U+00E9 is one unit, U+1F600 is a surrogate pair
        let name = "\u{e9}\u{1f600}";
        let encoded = encode_qstring(name).unwrap();
        assert_eq!(encoded.len(), qstring_len(name));
        assert_eq!(
            encoded,
            vec![0x00, 0x00, 0x00, 0x06, 0x00, 0xe9, 0xd8, 0x3d, 0xde, 0x00]
        );
        assert_eq!(decode_qstring(&encoded).unwrap(), name);

        let header = TransferHeader::for_body(name, 7);
        let (decoded, used) = TransferHeader::decode(&header.encode().unwrap()).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(used, 16 + 10);
    }

    #[test]
    fn test_header_decode_null_name() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&20i64.to_be_bytes());
        wire.extend_from_slice(&4i64.to_be_bytes());
        wire.extend_from_slice(&u32::MAX.to_be_bytes());

        let (decoded, used) = TransferHeader::decode(&wire).unwrap();
        assert_eq!(decoded.name, "");
        assert_eq!(used, 20);
    }
}

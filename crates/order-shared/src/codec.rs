//! Primitive wire encodings used by every binary sub-payload.
//!
//! All multi-byte integers are big-endian. Optional values that are absent
//! encode to zero bytes, and the `*_field` decoders turn an empty slice back
//! into `None`, so presence never hinges on a sentinel value like `0`.
//!
//! ```text
//! string       ┌──────────┬─────────────┐
//!              │ len u16  │ UTF-8 bytes │
//!              └──────────┴─────────────┘
//! list         ┌──────────┬──────────────────────────┐
//!              │ count u16│ count x element          │
//!              └──────────┴──────────────────────────┘
//! section      ┌────────┬─────────┬──────────┬───────┐
//!              │ kind u8│ id u64  │ len u16  │ text  │
//!              └────────┴─────────┴──────────┴───────┘
//! ```

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

use crate::constants::{LENGTH_PREFIX_SIZE, SECTION_HEADER_SIZE};
use crate::error::{DecodeError, EncodeError};

/// Widest fixed-width integer the codec supports, in bytes.
pub const MAX_INT_WIDTH: usize = 8;

fn ensure(remaining: usize, needed: usize) -> Result<(), DecodeError> {
    if remaining < needed {
        return Err(DecodeError::Truncated { needed, remaining });
    }
    Ok(())
}

fn valid_width(width: usize) -> bool {
    (1..=MAX_INT_WIDTH).contains(&width)
}

fn length_prefix(len: usize) -> Result<u16, EncodeError> {
    u16::try_from(len).map_err(|_| EncodeError::LengthOverflow(len))
}

fn fits(value: u64, width: usize) -> bool {
    width >= MAX_INT_WIDTH || value >> (width * 8) == 0
}

// ---------------------------------------------------------------------------
// Booleans
// ---------------------------------------------------------------------------

pub fn encode_bool<B: BufMut>(buf: &mut B, value: bool) {
    buf.put_u8(u8::from(value));
}

pub fn decode_bool<B: Buf>(buf: &mut B) -> Result<bool, DecodeError> {
    ensure(buf.remaining(), 1)?;
    match buf.get_u8() {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(DecodeError::InvalidBool(other)),
    }
}

// ---------------------------------------------------------------------------
// Fixed-width unsigned integers
// ---------------------------------------------------------------------------

/// Encode `value` as a `width`-byte big-endian integer. `None` writes nothing.
pub fn encode_uint<B: BufMut>(
    buf: &mut B,
    value: Option<u64>,
    width: usize,
) -> Result<(), EncodeError> {
    if !valid_width(width) {
        return Err(EncodeError::UnsupportedWidth(width));
    }
    let Some(value) = value else {
        return Ok(());
    };
    if !fits(value, width) {
        return Err(EncodeError::ValueTooWide { value, width });
    }
    buf.put_uint(value, width);
    Ok(())
}

pub fn decode_uint<B: Buf>(buf: &mut B, width: usize) -> Result<u64, DecodeError> {
    if !valid_width(width) {
        return Err(DecodeError::UnsupportedWidth(width));
    }
    ensure(buf.remaining(), width)?;
    Ok(buf.get_uint(width))
}

/// Decode a standalone integer field. An empty field is an absent value.
pub fn decode_uint_field(field: &[u8], width: usize) -> Result<Option<u64>, DecodeError> {
    if field.is_empty() {
        return Ok(None);
    }
    let mut cursor = field;
    let value = decode_uint(&mut cursor, width)?;
    reject_trailing(cursor)?;
    Ok(Some(value))
}

fn reject_trailing(cursor: &[u8]) -> Result<(), DecodeError> {
    if cursor.is_empty() {
        Ok(())
    } else {
        Err(DecodeError::Malformed(format!(
            "{} trailing bytes after field",
            cursor.len()
        )))
    }
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

/// Encode a length-prefixed UTF-8 string. `None` writes nothing.
pub fn encode_str<B: BufMut>(buf: &mut B, value: Option<&str>) -> Result<(), EncodeError> {
    let Some(value) = value else {
        return Ok(());
    };
    let len = length_prefix(value.len())?;
    buf.put_u16(len);
    buf.put_slice(value.as_bytes());
    Ok(())
}

pub fn decode_str<B: Buf>(buf: &mut B) -> Result<String, DecodeError> {
    ensure(buf.remaining(), LENGTH_PREFIX_SIZE)?;
    let len = usize::from(buf.get_u16());
    ensure(buf.remaining(), len)?;
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)
}

/// Decode a standalone string field. An empty field is an absent value.
pub fn decode_str_field(field: &[u8]) -> Result<Option<String>, DecodeError> {
    if field.is_empty() {
        return Ok(None);
    }
    let mut cursor = field;
    let value = decode_str(&mut cursor)?;
    reject_trailing(cursor)?;
    Ok(Some(value))
}

// ---------------------------------------------------------------------------
// Lists
// ---------------------------------------------------------------------------

/// Encode a count-prefixed list of `width`-byte integers. `None` writes nothing.
pub fn encode_uint_list<B: BufMut>(
    buf: &mut B,
    values: Option<&[u64]>,
    width: usize,
) -> Result<(), EncodeError> {
    if !valid_width(width) {
        return Err(EncodeError::UnsupportedWidth(width));
    }
    let Some(values) = values else {
        return Ok(());
    };
    let count = length_prefix(values.len())?;
    if let Some(&value) = values.iter().find(|&&v| !fits(v, width)) {
        return Err(EncodeError::ValueTooWide { value, width });
    }

    buf.put_u16(count);
    for &value in values {
        buf.put_uint(value, width);
    }
    Ok(())
}

pub fn decode_uint_list<B: Buf>(buf: &mut B, width: usize) -> Result<Vec<u64>, DecodeError> {
    if !valid_width(width) {
        return Err(DecodeError::UnsupportedWidth(width));
    }
    ensure(buf.remaining(), LENGTH_PREFIX_SIZE)?;
    let count = usize::from(buf.get_u16());
    ensure(buf.remaining(), count * width)?;
    Ok((0..count).map(|_| buf.get_uint(width)).collect())
}

/// Encode a count-prefixed list of length-prefixed strings. `None` writes nothing.
pub fn encode_str_list<B: BufMut, S: AsRef<str>>(
    buf: &mut B,
    values: Option<&[S]>,
) -> Result<(), EncodeError> {
    let Some(values) = values else {
        return Ok(());
    };
    let count = length_prefix(values.len())?;
    for value in values {
        length_prefix(value.as_ref().len())?;
    }

    buf.put_u16(count);
    for value in values {
        encode_str(buf, Some(value.as_ref()))?;
    }
    Ok(())
}

pub fn decode_str_list<B: Buf>(buf: &mut B) -> Result<Vec<String>, DecodeError> {
    ensure(buf.remaining(), LENGTH_PREFIX_SIZE)?;
    let count = buf.get_u16();
    (0..count).map(|_| decode_str(buf)).collect()
}

/// Size in bytes of the string list at the front of `bytes`, found by walking
/// the length prefixes without decoding any string.
pub fn str_list_len(bytes: &[u8]) -> Result<usize, DecodeError> {
    let mut cursor = bytes;
    ensure(cursor.remaining(), LENGTH_PREFIX_SIZE)?;
    let count = cursor.get_u16();
    for _ in 0..count {
        ensure(cursor.remaining(), LENGTH_PREFIX_SIZE)?;
        let len = usize::from(cursor.get_u16());
        ensure(cursor.remaining(), len)?;
        cursor.advance(len);
    }
    Ok(bytes.len() - cursor.len())
}

// ---------------------------------------------------------------------------
// Message sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SectionKind {
    Text = 0,
    File = 1,
    Code = 2,
    Quote = 3,
    Invite = 4,
    User = 5,
    BotUi = 6,
}

impl SectionKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Text),
            1 => Some(Self::File),
            2 => Some(Self::Code),
            3 => Some(Self::Quote),
            4 => Some(Self::Invite),
            5 => Some(Self::User),
            6 => Some(Self::BotUi),
            _ => None,
        }
    }
}

/// One typed block of a message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSection {
    pub kind: SectionKind,
    /// Blob id for files, quoted message id for quotes, user id for mentions; 0 if unused.
    pub blob: u64,
    pub text: String,
}

impl MessageSection {
    pub fn new(kind: SectionKind, blob: u64, text: impl Into<String>) -> Self {
        Self {
            kind,
            blob,
            text: text.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(SectionKind::Text, 0, text)
    }

    pub fn file(blob: u64) -> Self {
        Self::new(SectionKind::File, blob, String::new())
    }

    pub fn quote(message: u64) -> Self {
        Self::new(SectionKind::Quote, message, String::new())
    }

    /// Number of bytes [`encode`](Self::encode) writes.
    pub fn encoded_len(&self) -> usize {
        SECTION_HEADER_SIZE + LENGTH_PREFIX_SIZE + self.text.len()
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<(), EncodeError> {
        length_prefix(self.text.len())?;
        buf.put_u8(self.kind as u8);
        buf.put_u64(self.blob);
        encode_str(buf, Some(&self.text))
    }

    /// Decode the section at the front of `bytes`, returning it together with
    /// the number of bytes it occupied.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), DecodeError> {
        let mut cursor = bytes;
        ensure(cursor.remaining(), SECTION_HEADER_SIZE)?;
        let kind_byte = cursor.get_u8();
        let kind =
            SectionKind::from_byte(kind_byte).ok_or(DecodeError::UnknownSectionKind(kind_byte))?;
        let blob = cursor.get_u64();
        let text = decode_str(&mut cursor)?;
        Ok((Self { kind, blob, text }, bytes.len() - cursor.len()))
    }

    /// Length of the section at the front of `bytes`, read from its header
    /// without decoding the text.
    pub fn len_at(bytes: &[u8]) -> Result<usize, DecodeError> {
        ensure(bytes.len(), SECTION_HEADER_SIZE + LENGTH_PREFIX_SIZE)?;
        let text_len = usize::from(u16::from_be_bytes([
            bytes[SECTION_HEADER_SIZE],
            bytes[SECTION_HEADER_SIZE + 1],
        ]));
        let total = SECTION_HEADER_SIZE + LENGTH_PREFIX_SIZE + text_len;
        ensure(bytes.len(), total)?;
        Ok(total)
    }
}

/// Encode sections back to back, with no count or length table.
pub fn encode_sections<B: BufMut>(
    buf: &mut B,
    sections: &[MessageSection],
) -> Result<(), EncodeError> {
    for section in sections {
        section.encode(buf)?;
    }
    Ok(())
}

/// Walk a run of back-to-back sections until `bytes` is exhausted.
pub fn decode_sections(bytes: &[u8]) -> Result<Vec<MessageSection>, DecodeError> {
    let mut sections = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (section, len) = MessageSection::decode(&bytes[offset..])?;
        sections.push(section);
        offset += len;
    }
    Ok(sections)
}

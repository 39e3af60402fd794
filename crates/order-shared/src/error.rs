use thiserror::Error;

/// Malformed wire bytes. Fatal to the one record being decoded, never to the
/// stream it came from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated input: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("Invalid boolean byte: {0:#04x}")]
    InvalidBool(u8),

    #[error("Invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("Unsupported integer width: {0} bytes")]
    UnsupportedWidth(usize),

    #[error("Unknown message section kind: {0}")]
    UnknownSectionKind(u8),

    #[error("Unknown entity kind: {0}")]
    UnknownEntityKind(String),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Malformed record: {0}")]
    Malformed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Value {value} does not fit in {width} bytes")]
    ValueTooWide { value: u64, width: usize },

    #[error("Unsupported integer width: {0} bytes")]
    UnsupportedWidth(usize),

    #[error("Length {0} exceeds the 16-bit length prefix")]
    LengthOverflow(usize),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Page count {count} exceeds the ceiling of {max}")]
    PageTooLarge { count: u16, max: u16 },

    #[error("Page count must be at least 1")]
    EmptyPage,

    #[error("Field {field} cannot be paged on a {kind} entity")]
    FieldNotPageable { field: &'static str, kind: &'static str },
}

impl From<bincode::Error> for DecodeError {
    fn from(e: bincode::Error) -> Self {
        DecodeError::Malformed(e.to_string())
    }
}

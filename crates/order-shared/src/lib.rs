//! # order-shared
//!
//! Wire-level vocabulary shared by the Order client engine: the primitive
//! binary codec, entity and id types, and the application-level messages
//! exchanged with the transport.

pub mod codec;
pub mod constants;
pub mod entity;
pub mod error;
pub mod protocol;
pub mod types;

pub use entity::{Entity, FieldValue};
pub use error::{DecodeError, EncodeError, ProtocolError};
pub use protocol::{
    BlobDescriptor, BlobPreview, ClientMessage, EntityRef, NoticeKind, PageDescriptor,
    ServerMessage,
};
pub use types::{BlobId, CorrelationToken, EntityId, EntityKind, PageDirection, PageField};

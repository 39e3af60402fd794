use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_PAGE_SIZE;
use crate::entity::Entity;
use crate::error::{DecodeError, EncodeError, ProtocolError};
use crate::types::{BlobId, CorrelationToken, EntityId, EntityKind, PageDirection, PageField};

/// Messages the client hands to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Fetch a batch of entities (or windows of their collections)
    EntityGet {
        entities: Vec<EntityRef>,
        token: CorrelationToken,
    },

    /// Ask the server to apply partial entity updates
    EntityPut {
        entities: Vec<Entity>,
        token: Option<CorrelationToken>,
    },

    /// Start uploading a local file
    BlobUpload {
        path: PathBuf,
        token: CorrelationToken,
        progress_token: Option<CorrelationToken>,
    },

    /// Start downloading a blob, or only fetch its preview information
    BlobDownload {
        id: BlobId,
        token: CorrelationToken,
        preview_token: Option<CorrelationToken>,
        actually_download: bool,
    },
}

/// Messages the transport delivers to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Entity push. `spontaneous` pushes answer no request.
    Entities {
        entities: Vec<Entity>,
        spontaneous: bool,
        token: Option<CorrelationToken>,
    },

    /// A fetch or mutation finished without carrying entities itself
    Completed { token: CorrelationToken },

    /// Bytes sent so far for an upload
    UploadProgress {
        token: CorrelationToken,
        progress: u64,
        max: u64,
    },

    /// Preview information for a download became available
    PreviewAvailable {
        token: CorrelationToken,
        preview: BlobPreview,
    },

    UploadEnd {
        token: CorrelationToken,
        blob: BlobDescriptor,
    },

    DownloadEnd {
        token: CorrelationToken,
        blob: BlobDescriptor,
    },

    /// The transfer behind `token` ended without a payload
    TransferFailed {
        token: CorrelationToken,
        reason: String,
    },

    /// User-visible failure reported by the server
    Notice { kind: NoticeKind, message: String },

    /// Authentication completed and a new session begins
    SessionStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoticeKind {
    LoginError,
    SignupError,
    Outdated,
    RateLimit,
    InvalidUsername,
    InvalidInvite,
    InternalError,
}

/// One window of a collection field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageDescriptor {
    pub field: PageField,
    /// Anchor id; 0 starts from the most recent end.
    pub from: EntityId,
    pub direction: PageDirection,
    pub count: u16,
}

impl PageDescriptor {
    pub fn new(
        field: PageField,
        from: EntityId,
        direction: PageDirection,
        count: u16,
    ) -> Result<Self, ProtocolError> {
        let page = Self {
            field,
            from,
            direction,
            count,
        };
        page.validate()?;
        Ok(page)
    }

    /// Window size must be within `1..=MAX_PAGE_SIZE`.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.count == 0 {
            return Err(ProtocolError::EmptyPage);
        }
        if self.count > MAX_PAGE_SIZE {
            return Err(ProtocolError::PageTooLarge {
                count: self.count,
                max: MAX_PAGE_SIZE,
            });
        }
        Ok(())
    }

    pub fn older(field: PageField, from: EntityId, count: u16) -> Result<Self, ProtocolError> {
        Self::new(field, from, PageDirection::Older, count)
    }

    pub fn newer(field: PageField, from: EntityId, count: u16) -> Result<Self, ProtocolError> {
        Self::new(field, from, PageDirection::Newer, count)
    }

    /// A window that came back short is the last one in its direction.
    pub fn more_available(&self, returned: usize) -> bool {
        returned >= usize::from(self.count)
    }
}

/// Reference to an entity in a fetch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
    pub page: Option<PageDescriptor>,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self {
            kind,
            id,
            page: None,
        }
    }

    pub fn paged(
        kind: EntityKind,
        id: EntityId,
        page: PageDescriptor,
    ) -> Result<Self, ProtocolError> {
        page.validate()?;
        if page.field.owner() != kind {
            return Err(ProtocolError::FieldNotPageable {
                field: page.field.field_name(),
                kind: kind.as_str(),
            });
        }
        Ok(Self {
            kind,
            id,
            page: Some(page),
        })
    }
}

/// A finished transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    pub id: BlobId,
    /// Where the host process keeps the payload on disk.
    pub path: PathBuf,
    pub length: u64,
}

/// Information available about a blob before its payload arrives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobPreview {
    pub name: String,
    /// Pixel dimensions as `"<width>x<height>"`, empty for non-images.
    pub size: String,
    /// Blurhash placeholder, empty when the server has none.
    pub preview: String,
    pub hash: Vec<u8>,
    pub length: u64,
}

impl BlobPreview {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = self.size.split_once('x')?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }
}

impl ClientMessage {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        bincode::serialize(self).map_err(|e| EncodeError::Serialization(e.to_string()))
    }

    /// Deserialize from binary
    pub fn from_bytes(data: &[u8]) -> Result<Self, DecodeError> {
        Ok(bincode::deserialize(data)?)
    }
}

impl ServerMessage {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        bincode::serialize(self).map_err(|e| EncodeError::Serialization(e.to_string()))
    }

    /// Deserialize from binary, refusing frames larger than `max_size`
    pub fn from_bytes(data: &[u8], max_size: usize) -> Result<Self, DecodeError> {
        if data.len() > max_size {
            return Err(DecodeError::FrameTooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        Ok(bincode::deserialize(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_FRAME_SIZE;
    use crate::entity::fields;

    #[test]
    fn test_server_message_roundtrip() {
        let msg = ServerMessage::Entities {
            entities: vec![Entity::new(EntityKind::User, EntityId(5)).with(fields::NAME, "A")],
            spontaneous: false,
            token: Some(CorrelationToken(3)),
        };

        let bytes = msg.to_bytes().unwrap();
        let restored = ServerMessage::from_bytes(&bytes, MAX_FRAME_SIZE).unwrap();
        assert_eq!(msg, restored);
    }

    #[test]
    fn test_truncated_frame_is_decode_error() {
        let bytes = ServerMessage::Completed {
            token: CorrelationToken(1),
        }
        .to_bytes()
        .unwrap();
        assert!(matches!(
            ServerMessage::from_bytes(&bytes[..2], MAX_FRAME_SIZE),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let err = ServerMessage::from_bytes(&[0u8; 16], 8).unwrap_err();
        assert_eq!(err, DecodeError::FrameTooLarge { size: 16, max: 8 });
    }

    #[test]
    fn test_page_bounds() {
        assert!(PageDescriptor::older(PageField::Messages, EntityId(0), 50).is_ok());
        assert_eq!(
            PageDescriptor::older(PageField::Messages, EntityId(0), 0).unwrap_err(),
            ProtocolError::EmptyPage
        );
        assert!(matches!(
            PageDescriptor::older(PageField::Messages, EntityId(0), MAX_PAGE_SIZE + 1),
            Err(ProtocolError::PageTooLarge { .. })
        ));
    }

    #[test]
    fn test_page_termination() {
        let page = PageDescriptor::older(PageField::Messages, EntityId(0), 50).unwrap();
        assert!(page.more_available(50));
        assert!(!page.more_available(37));
    }

    #[test]
    fn test_paged_ref_requires_owner_kind() {
        let page = PageDescriptor::older(PageField::Members, EntityId(0), 50).unwrap();
        assert!(EntityRef::paged(EntityKind::Role, EntityId(1), page).is_ok());
        assert!(matches!(
            EntityRef::paged(EntityKind::Channel, EntityId(1), page),
            Err(ProtocolError::FieldNotPageable { .. })
        ));
    }

    #[test]
    fn test_paged_ref_rejects_hand_built_window() {
        let oversized = PageDescriptor {
            field: PageField::Messages,
            from: EntityId(0),
            direction: PageDirection::Older,
            count: 5000,
        };
        assert_eq!(
            EntityRef::paged(EntityKind::Channel, EntityId(1), oversized).unwrap_err(),
            ProtocolError::PageTooLarge {
                count: 5000,
                max: MAX_PAGE_SIZE,
            }
        );

        let empty = PageDescriptor { count: 0, ..oversized };
        assert_eq!(
            EntityRef::paged(EntityKind::Channel, EntityId(1), empty).unwrap_err(),
            ProtocolError::EmptyPage
        );
    }

    #[test]
    fn test_preview_dimensions() {
        let mut preview = BlobPreview {
            name: "cat.png".into(),
            size: "640x480".into(),
            preview: String::new(),
            hash: vec![],
            length: 1024,
        };
        assert_eq!(preview.dimensions(), Some((640, 480)));
        preview.size.clear();
        assert_eq!(preview.dimensions(), None);
    }
}

//! Partially-known entity records.
//!
//! Every message from the server may carry only a subset of an entity's
//! fields, so an [`Entity`] is a kind, an id, and a map of whichever fields
//! are known. Merging overlays present fields and never removes one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::codec::{self, MessageSection};
use crate::error::{DecodeError, EncodeError};
use crate::types::{BlobId, EntityId, EntityKind};

/// Well-known field names.
pub mod fields {
    pub const NAME: &str = "name";
    pub const STATUS: &str = "status";
    /// Paged collection of a channel.
    pub const MESSAGES: &str = "messages";
    /// Paged collection of a role.
    pub const MEMBERS: &str = "members";
    pub const CHANNEL: &str = "channel";
    /// Zero on a message marks it deleted.
    pub const SENDER: &str = "sender";
    pub const SECTIONS: &str = "sections";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Text(String),
    /// Reference to another entity or blob by id.
    Id(u64),
    /// Ordered collection of entity ids.
    Ids(Vec<EntityId>),
    /// Binary sub-payload in wire codec format.
    Bytes(Vec<u8>),
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<EntityId> for FieldValue {
    fn from(v: EntityId) -> Self {
        Self::Id(v.0)
    }
}

impl From<BlobId> for FieldValue {
    fn from(v: BlobId) -> Self {
        Self::Id(v.0)
    }
}

impl From<Vec<EntityId>> for FieldValue {
    fn from(v: Vec<EntityId>) -> Self {
        Self::Ids(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub id: EntityId,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Entity {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        Self {
            kind,
            id,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            FieldValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            FieldValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FieldValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn reference(&self, name: &str) -> Option<EntityId> {
        match self.get(name)? {
            FieldValue::Id(v) => Some(EntityId(*v)),
            _ => None,
        }
    }

    pub fn blob(&self, name: &str) -> Option<BlobId> {
        match self.get(name)? {
            FieldValue::Id(v) => Some(BlobId(*v)),
            _ => None,
        }
    }

    pub fn ids(&self, name: &str) -> Option<&[EntityId]> {
        match self.get(name)? {
            FieldValue::Ids(v) => Some(v),
            _ => None,
        }
    }

    /// Decoded message body, if the `sections` field is present.
    pub fn sections(&self) -> Option<Result<Vec<MessageSection>, DecodeError>> {
        match self.get(fields::SECTIONS)? {
            FieldValue::Bytes(bytes) => Some(codec::decode_sections(bytes)),
            _ => Some(Err(DecodeError::Malformed(
                "sections field is not binary".into(),
            ))),
        }
    }

    pub fn set_sections(&mut self, sections: &[MessageSection]) -> Result<(), EncodeError> {
        let mut buf = Vec::with_capacity(sections.iter().map(|s| s.encoded_len()).sum());
        codec::encode_sections(&mut buf, sections)?;
        self.set(fields::SECTIONS, FieldValue::Bytes(buf));
        Ok(())
    }

    /// Check that every binary sub-payload decodes.
    pub fn validate(&self) -> Result<(), DecodeError> {
        match self.sections() {
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }

    /// A message whose sender has been zeroed was deleted.
    pub fn is_deleted_message(&self) -> bool {
        self.kind == EntityKind::Message && self.reference(fields::SENDER) == Some(EntityId(0))
    }

    /// Overlay the fields present in `incoming`. Fields absent from `incoming`
    /// are kept. Returns whether anything changed.
    pub fn merge_from(&mut self, incoming: Entity) -> bool {
        debug_assert_eq!(self.id, incoming.id);
        let mut changed = false;
        for (name, value) in incoming.fields {
            match self.fields.get(&name) {
                Some(existing) if *existing == value => {}
                _ => {
                    self.fields.insert(name, value);
                    changed = true;
                }
            }
        }
        changed
    }
}

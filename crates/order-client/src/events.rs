use serde::Serialize;
use tokio::sync::mpsc;

use order_shared::{BlobId, EntityId, NoticeKind};

/// Notifications the engine pushes to the embedding host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Entities were merged into the cache.
    EntitiesChanged {
        ids: Vec<EntityId>,
        /// Messages whose sender was zeroed, i.e. deleted on the server.
        removed: Vec<EntityId>,
        spontaneous: bool,
    },

    /// A blob finished transferring and is now cached.
    BlobReady { id: BlobId },

    Notice { kind: NoticeKind, message: String },

    /// A new session began; every cached entity and pending operation was dropped.
    SessionReset,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::EntitiesChanged { .. } => "entities-changed",
            Self::BlobReady { .. } => "blob-ready",
            Self::Notice { .. } => "notice",
            Self::SessionReset => "session-reset",
        }
    }

    /// JSON payload for hosts that bridge events into a UI layer.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

pub type EventSender = mpsc::UnboundedSender<ClientEvent>;

pub fn emit_event(events: &EventSender, event: ClientEvent) {
    let name = event.name();
    if events.send(event).is_err() {
        tracing::error!(event = name, "Failed to emit event, receiver dropped");
    }
}

//! Outbound seam between the engine and whatever carries bytes to the server.

use tokio::sync::mpsc;
use tracing::trace;

use order_shared::ClientMessage;

use crate::error::TransportError;

/// Sink for outbound messages. Connection management, reconnection and
/// authentication live on the other side of this trait.
pub trait Transport: Send {
    fn send(&mut self, message: ClientMessage) -> Result<(), TransportError>;
}

/// Hand messages over unencoded, for hosts that share the message types.
impl Transport for mpsc::UnboundedSender<ClientMessage> {
    fn send(&mut self, message: ClientMessage) -> Result<(), TransportError> {
        mpsc::UnboundedSender::send(self, message).map_err(|_| TransportError::Closed)
    }
}

/// Encodes each message to a binary frame before handing it on.
pub struct FrameTransport {
    frames: mpsc::UnboundedSender<Vec<u8>>,
}

impl FrameTransport {
    pub fn new(frames: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        Self { frames }
    }
}

impl Transport for FrameTransport {
    fn send(&mut self, message: ClientMessage) -> Result<(), TransportError> {
        let frame = message.to_bytes()?;
        trace!(len = frame.len(), "Outbound frame");
        self.frames.send(frame).map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use order_shared::{CorrelationToken, EntityId, EntityKind, EntityRef};

    use super::*;

    fn sample() -> ClientMessage {
        ClientMessage::EntityGet {
            entities: vec![EntityRef::new(EntityKind::User, EntityId(5))],
            token: CorrelationToken(0),
        }
    }

    #[test]
    fn test_frame_transport_encodes() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = FrameTransport::new(tx);
        transport.send(sample()).unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(ClientMessage::from_bytes(&frame).unwrap(), sample());
    }

    #[test]
    fn test_closed_channel_reports_error() {
        let (tx, rx) = mpsc::unbounded_channel::<ClientMessage>();
        drop(rx);
        let mut transport = tx;
        assert!(matches!(
            Transport::send(&mut transport, sample()),
            Err(TransportError::Closed)
        ));
    }
}

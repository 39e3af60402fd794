//! Tokio task that owns a [`Session`] and serializes everything touching it.
//!
//! Inbound frames and caller commands arrive on two channels; the task
//! applies them one at a time, so no lock guards the session.

use anyhow::Context;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::session::Session;
use crate::transport::FrameTransport;

/// Closure run against the session on the dispatcher task.
pub type Intent = Box<dyn FnOnce(&mut Session) + Send>;

pub enum SessionCommand {
    Run(Intent),
    /// Stop the dispatcher and hand the session back.
    Shutdown,
}

/// Cloneable handle for submitting work to the dispatcher task.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Queue `f` to run on the dispatcher task.
    pub fn submit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Session) + Send + 'static,
    {
        let intent: Intent = Box::new(f);
        self.cmd_tx
            .send(SessionCommand::Run(intent))
            .map_err(|_| ClientError::SessionClosed)
    }

    /// Run `f` on the dispatcher task and wait for its result.
    pub async fn query<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Session) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.submit(move |session: &mut Session| {
            let _ = reply_tx.send(f(session));
        })?;
        reply_rx.await.map_err(|_| ClientError::SessionClosed)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.cmd_tx
            .send(SessionCommand::Shutdown)
            .map_err(|_| ClientError::SessionClosed)
    }
}

/// Spawn the dispatcher loop for `session`, reading inbound frames from
/// `inbound_rx`. The task returns the session when it stops.
pub fn spawn_session(
    session: Session,
    inbound_rx: mpsc::Receiver<Vec<u8>>,
) -> (SessionHandle, JoinHandle<Session>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(dispatch_loop(session, inbound_rx, cmd_rx));
    (SessionHandle { cmd_tx }, task)
}

async fn dispatch_loop(
    mut session: Session,
    mut inbound_rx: mpsc::Receiver<Vec<u8>>,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
) -> Session {
    info!("Session dispatcher started");

    loop {
        tokio::select! {
            // server traffic already queued is applied before caller commands
            biased;

            frame = inbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = session.dispatch_frame(&frame) {
                            warn!(len = frame.len(), error = %e, "Dropped inbound message");
                        }
                    }
                    None => {
                        info!("Inbound channel closed, stopping dispatcher");
                        break;
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Run(intent)) => intent(&mut session),
                    Some(SessionCommand::Shutdown) => {
                        info!("Session shutdown requested");
                        break;
                    }
                    None => {
                        info!("Command channel closed, stopping dispatcher");
                        break;
                    }
                }
            }
        }
    }

    session
}

/// A running engine wired to channels: the host pushes received frames into
/// `inbound`, sends whatever appears on `outbound`, and observes `events`.
pub struct Engine {
    pub handle: SessionHandle,
    pub inbound: mpsc::Sender<Vec<u8>>,
    pub outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    task: JoinHandle<Session>,
}

impl Engine {
    pub fn start(config: ClientConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let session = Session::new(config, FrameTransport::new(outbound_tx), events_tx);
        let (handle, task) = spawn_session(session, inbound_rx);

        Self {
            handle,
            inbound: inbound_tx,
            outbound: outbound_rx,
            events: events_rx,
            task,
        }
    }

    /// Stop the dispatcher and return the session it owned.
    pub async fn shutdown(self) -> anyhow::Result<Session> {
        // the task may already have stopped on its own
        let _ = self.handle.shutdown();
        self.task.await.context("Session dispatcher task failed")
    }
}

#[cfg(test)]
mod tests {
    use order_shared::entity::fields;
    use order_shared::{
        ClientMessage, CorrelationToken, Entity, EntityId, EntityKind, EntityRef, ServerMessage,
    };

    use super::*;

    fn entities_frame(token: Option<CorrelationToken>, entities: Vec<Entity>) -> Vec<u8> {
        ServerMessage::Entities {
            entities,
            spontaneous: token.is_none(),
            token,
        }
        .to_bytes()
        .unwrap()
    }

    #[tokio::test]
    async fn test_request_roundtrip_through_channels() {
        let mut engine = Engine::start(ClientConfig::default());
        let (done_tx, done_rx) = oneshot::channel();

        engine
            .handle
            .submit(move |session: &mut Session| {
                let refs = vec![EntityRef::new(EntityKind::User, EntityId(5))];
                session
                    .request(refs, false, move |session: &mut Session| {
                        let name = session
                            .entity(EntityKind::User, EntityId(5))
                            .and_then(|u| u.text(fields::NAME))
                            .map(str::to_string);
                        let _ = done_tx.send(name);
                    })
                    .unwrap();
            })
            .unwrap();

        let frame = engine.outbound.recv().await.unwrap();
        let token = match ClientMessage::from_bytes(&frame).unwrap() {
            ClientMessage::EntityGet { token, .. } => token,
            other => panic!("unexpected message {other:?}"),
        };

        let user = Entity::new(EntityKind::User, EntityId(5)).with(fields::NAME, "five");
        engine
            .inbound
            .send(entities_frame(Some(token), vec![user]))
            .await
            .unwrap();

        assert_eq!(done_rx.await.unwrap().as_deref(), Some("five"));
        assert!(matches!(
            engine.events.recv().await.unwrap(),
            ClientEvent::EntitiesChanged { .. }
        ));
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_frame_does_not_stop_dispatcher() {
        let engine = Engine::start(ClientConfig::default());

        engine.inbound.send(vec![0xff; 3]).await.unwrap();
        let user = Entity::new(EntityKind::User, EntityId(1));
        engine.inbound.send(entities_frame(None, vec![user])).await.unwrap();

        let cached = engine
            .handle
            .query(|session: &mut Session| session.cache().len())
            .await
            .unwrap();
        assert_eq!(cached, 1);

        let session = engine.shutdown().await.unwrap();
        assert_eq!(session.cache().len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let config = ClientConfig {
            max_frame_size: 16,
            ..ClientConfig::default()
        };
        let engine = Engine::start(config);

        let users = (1..20)
            .map(|id| Entity::new(EntityKind::User, EntityId(id)))
            .collect();
        engine.inbound.send(entities_frame(None, users)).await.unwrap();

        let cached = engine
            .handle
            .query(|session: &mut Session| session.cache().len())
            .await
            .unwrap();
        assert_eq!(cached, 0);
    }

    #[tokio::test]
    async fn test_handle_reports_closed_session() {
        let engine = Engine::start(ClientConfig::default());
        let handle = engine.handle.clone();
        engine.shutdown().await.unwrap();

        assert!(matches!(
            handle.submit(|_: &mut Session| {}),
            Err(ClientError::SessionClosed)
        ));
        assert!(matches!(
            handle.query(|_: &mut Session| ()).await,
            Err(ClientError::SessionClosed)
        ));
    }
}

//! The dispatcher: owns the caches and registries of one logged-in session
//! and applies every inbound server message to them in arrival order.
//!
//! All mutation happens through `&mut Session`, so callbacks run one at a
//! time and always observe the cache with every preceding message applied.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use order_shared::{
    ClientMessage, CorrelationToken, Entity, EntityId, EntityKind, EntityRef, ServerMessage,
};

use crate::blobs::{TransferDirection, TransferManager};
use crate::cache::{EntityCache, FetchKey, FetchPlan};
use crate::config::ClientConfig;
use crate::error::{Result, TransferFailure};
use crate::events::{emit_event, ClientEvent, EventSender};
use crate::registry::{Registry, TokenClass};
use crate::transport::Transport;

/// Callback fired once the request it was registered with resolves.
pub type Completion = Box<dyn FnOnce(&mut Session) + Send>;

/// An entity fetch or mutation awaiting its response.
pub(crate) struct PendingRequest {
    /// Fetch keys this request put in flight.
    keys: Vec<FetchKey>,
    waiters: Vec<Completion>,
}

pub struct Session {
    pub(crate) config: ClientConfig,
    pub(crate) cache: EntityCache,
    pub(crate) requests: Registry<PendingRequest>,
    pub(crate) transfers: TransferManager,
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) events: EventSender,
}

impl Session {
    pub fn new(
        config: ClientConfig,
        transport: impl Transport + 'static,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            cache: EntityCache::new(),
            requests: Registry::new(TokenClass::Request),
            transfers: TransferManager::new(),
            transport: Box::new(transport),
            events,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn entity(&self, kind: EntityKind, id: EntityId) -> Option<&Entity> {
        self.cache.get(kind, id)
    }

    /// Number of fetches and mutations still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    // ------------------------------------------------------------------
    // Entity requests
    // ------------------------------------------------------------------

    /// Make sure every referenced entity is cached, then call `on_complete`.
    ///
    /// Without `force`, cached entities are not fetched again and entities
    /// another request is already fetching are awaited rather than re-sent.
    /// When nothing needs fetching `on_complete` runs before this returns.
    /// Returns the token of the fetch sent on the wire, if one was.
    pub fn request<F>(
        &mut self,
        refs: Vec<EntityRef>,
        force: bool,
        on_complete: F,
    ) -> Result<Option<CorrelationToken>>
    where
        F: FnOnce(&mut Session) + Send + 'static,
    {
        let callback: Completion = Box::new(on_complete);
        self.request_inner(refs, force, Some(callback), HashSet::new())
    }

    /// Fetch without waiting on the result; changes surface as events.
    pub fn fetch(&mut self, refs: Vec<EntityRef>, force: bool) -> Result<Option<CorrelationToken>> {
        self.request_inner(refs, force, None, HashSet::new())
    }

    fn request_inner(
        &mut self,
        refs: Vec<EntityRef>,
        force: bool,
        on_complete: Option<Completion>,
        settled: HashSet<FetchKey>,
    ) -> Result<Option<CorrelationToken>> {
        let plan = self.cache.plan(&refs, force, &settled);
        if plan.is_satisfied() {
            if let Some(callback) = on_complete {
                callback(self);
            }
            return Ok(None);
        }

        let FetchPlan {
            fetch,
            wait_on,
            keys,
        } = plan;

        // When part of the request rides on someone else's fetch, plan again
        // once a response lands, treating every key of this plan as settled.
        let follow_up: Option<Completion> = match (wait_on, on_complete) {
            (Some(_), Some(callback)) => {
                let mut settled = settled;
                settled.extend(keys.iter().copied());
                let retry: Completion = Box::new(move |session: &mut Session| {
                    if let Err(e) = session.request_inner(refs, false, Some(callback), settled) {
                        warn!(error = %e, "Follow-up fetch failed");
                    }
                });
                Some(retry)
            }
            (_, callback) => callback,
        };

        if fetch.is_empty() {
            if let (Some(token), Some(callback)) = (wait_on, follow_up) {
                match self.requests.get_mut(token) {
                    Some(pending) => {
                        debug!(token = %token, "Joining in-flight fetch");
                        pending.waiters.push(callback);
                    }
                    None => {
                        // in-flight mark outlived its request; drop it and re-plan
                        self.cache.settle(&keys, token);
                        callback(self);
                    }
                }
            }
            return Ok(None);
        }

        let fetched: Vec<FetchKey> = fetch.iter().map(FetchKey::from).collect();
        let token = self.requests.insert(PendingRequest {
            keys: fetched.clone(),
            waiters: follow_up.into_iter().collect(),
        });
        self.cache.mark_in_flight(&fetched, token);

        debug!(token = %token, count = fetch.len(), force, "Fetching entities");
        if let Err(e) = self.transport.send(ClientMessage::EntityGet {
            entities: fetch,
            token,
        }) {
            self.requests.resolve(token);
            self.cache.settle(&fetched, token);
            return Err(e.into());
        }
        Ok(Some(token))
    }

    /// Ask the server to apply partial updates. The cache changes only when
    /// the server echoes the result back.
    pub fn put(&mut self, entities: Vec<Entity>) -> Result<()> {
        debug!(count = entities.len(), "Sending entity update");
        self.transport.send(ClientMessage::EntityPut {
            entities,
            token: None,
        })?;
        Ok(())
    }

    /// Like [`Session::put`], calling `on_complete` once the server confirms.
    pub fn put_with_completion<F>(
        &mut self,
        entities: Vec<Entity>,
        on_complete: F,
    ) -> Result<CorrelationToken>
    where
        F: FnOnce(&mut Session) + Send + 'static,
    {
        let callback: Completion = Box::new(on_complete);
        let token = self.requests.insert(PendingRequest {
            keys: Vec::new(),
            waiters: vec![callback],
        });
        debug!(token = %token, count = entities.len(), "Sending entity update");
        if let Err(e) = self.transport.send(ClientMessage::EntityPut {
            entities,
            token: Some(token),
        }) {
            self.requests.resolve(token);
            return Err(e.into());
        }
        Ok(token)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Decode one inbound frame and dispatch it.
    pub fn dispatch_frame(&mut self, frame: &[u8]) -> Result<()> {
        let message = ServerMessage::from_bytes(frame, self.config.max_frame_size)?;
        self.dispatch(message)
    }

    /// Apply one server message. An error means the message, or part of it,
    /// was rejected; the session itself stays usable.
    pub fn dispatch(&mut self, message: ServerMessage) -> Result<()> {
        match message {
            ServerMessage::Entities {
                entities,
                spontaneous,
                token,
            } => self.on_entities(entities, spontaneous, token),

            ServerMessage::Completed { token } => {
                self.resolve_request(token);
                Ok(())
            }

            ServerMessage::UploadProgress {
                token,
                progress,
                max,
            } => {
                self.transfers.on_progress(token, progress, max);
                Ok(())
            }

            ServerMessage::PreviewAvailable { token, preview } => {
                self.on_preview(token, preview);
                Ok(())
            }

            ServerMessage::UploadEnd { token, blob } => {
                self.on_transfer_end(token, Some(TransferDirection::Upload), Ok(blob));
                Ok(())
            }

            ServerMessage::DownloadEnd { token, blob } => {
                self.on_transfer_end(token, Some(TransferDirection::Download), Ok(blob));
                Ok(())
            }

            ServerMessage::TransferFailed { token, reason } => {
                self.on_transfer_end(token, None, Err(TransferFailure { reason }));
                Ok(())
            }

            ServerMessage::Notice { kind, message } => {
                warn!(kind = ?kind, message = %message, "Server notice");
                emit_event(&self.events, ClientEvent::Notice { kind, message });
                Ok(())
            }

            ServerMessage::SessionStarted => {
                self.reset();
                Ok(())
            }
        }
    }

    fn on_entities(
        &mut self,
        entities: Vec<Entity>,
        spontaneous: bool,
        token: Option<CorrelationToken>,
    ) -> Result<()> {
        if let Some(token) = token {
            if self.requests.is_stale(token) {
                debug!(
                    token = %token,
                    count = entities.len(),
                    "Dropping response from before session start"
                );
                return Ok(());
            }
        }

        // a malformed record rejects the whole message before anything is merged,
        // but the request it answers still resolves
        if let Err(e) = entities.iter().try_for_each(Entity::validate) {
            if let Some(token) = token {
                self.resolve_request(token);
            }
            return Err(e.into());
        }

        let mut changed = Vec::new();
        let mut removed = Vec::new();
        let mut conflict = None;

        for entity in entities {
            let id = entity.id;
            let deleted = entity.is_deleted_message();
            match self.cache.merge(entity) {
                Ok(true) if deleted => removed.push(id),
                Ok(true) => changed.push(id),
                Ok(false) => {}
                Err(e) => {
                    warn!(id = %id, error = %e, "Skipping conflicting entity");
                    if conflict.is_none() {
                        conflict = Some(e);
                    }
                }
            }
        }

        debug!(
            changed = changed.len(),
            removed = removed.len(),
            spontaneous,
            "Merged entities"
        );
        if !changed.is_empty() || !removed.is_empty() {
            emit_event(
                &self.events,
                ClientEvent::EntitiesChanged {
                    ids: changed,
                    removed,
                    spontaneous,
                },
            );
        }

        if let Some(token) = token {
            self.resolve_request(token);
        }

        match conflict {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn resolve_request(&mut self, token: CorrelationToken) {
        let pending = match self.requests.resolve(token) {
            Some(p) => p,
            None => {
                warn!(token = %token, "Response for unknown request token");
                return;
            }
        };
        self.cache.settle(&pending.keys, token);
        for waiter in pending.waiters {
            waiter(self);
        }
    }

    /// Drop every cached entity, blob and pending operation.
    pub fn reset(&mut self) {
        let dropped = self.requests.clear() + self.transfers.clear();
        self.cache.clear();
        info!(dropped, "Session started, local state reset");
        emit_event(&self.events, ClientEvent::SessionReset);
    }
}

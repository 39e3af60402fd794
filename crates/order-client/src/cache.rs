//! Local copy of every entity the server has told us about, plus the record
//! of which fetches are still on the wire.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use order_shared::{CorrelationToken, Entity, EntityId, EntityKind, EntityRef, PageDescriptor};

use crate::error::{ClientError, Result};

/// Identity of one fetch: the same entity paged differently is a different key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FetchKey {
    pub kind: EntityKind,
    pub id: EntityId,
    pub page: Option<PageDescriptor>,
}

impl From<&EntityRef> for FetchKey {
    fn from(r: &EntityRef) -> Self {
        Self {
            kind: r.kind,
            id: r.id,
            page: r.page,
        }
    }
}

/// How a request splits against the cache and the fetches already in flight.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FetchPlan {
    /// References that must go out in a new request.
    pub fetch: Vec<EntityRef>,
    /// Token of an earlier fetch already covering some of the references.
    pub wait_on: Option<CorrelationToken>,
    /// Every key the plan fetches or waits for.
    pub keys: Vec<FetchKey>,
}

impl FetchPlan {
    pub fn is_satisfied(&self) -> bool {
        self.fetch.is_empty() && self.wait_on.is_none()
    }
}

#[derive(Default)]
pub struct EntityCache {
    entities: HashMap<EntityId, Entity>,
    in_flight: HashMap<FetchKey, CorrelationToken>,
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached record for `id`, if it is of the given kind.
    pub fn get(&self, kind: EntityKind, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id).filter(|e| e.kind == kind)
    }

    pub fn get_any(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn contains(&self, kind: EntityKind, id: EntityId) -> bool {
        self.get(kind, id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Overlay `incoming` onto the cached record, inserting it if new.
    /// Returns whether the cache changed.
    pub fn merge(&mut self, incoming: Entity) -> Result<bool> {
        match self.entities.get_mut(&incoming.id) {
            Some(cached) if cached.kind != incoming.kind => Err(ClientError::MergeConflict {
                id: incoming.id,
                cached: cached.kind,
                incoming: incoming.kind,
            }),
            Some(cached) => Ok(cached.merge_from(incoming)),
            None => {
                trace!(id = %incoming.id, kind = %incoming.kind, "Caching new entity");
                self.entities.insert(incoming.id, incoming);
                Ok(true)
            }
        }
    }

    /// Split `refs` into what must be fetched and what is already on its way.
    ///
    /// Checks run in order: cached, in flight, settled. A key is settled once
    /// a fetch for it resolved without the entity arriving, so asking again
    /// would never converge. Forced plans skip the cache and in-flight checks.
    pub fn plan(
        &self,
        refs: &[EntityRef],
        force: bool,
        settled: &HashSet<FetchKey>,
    ) -> FetchPlan {
        let mut plan = FetchPlan::default();
        let mut seen = HashSet::new();

        for r in refs {
            let key = FetchKey::from(r);
            if !seen.insert(key) {
                continue;
            }
            if force {
                plan.fetch.push(*r);
                plan.keys.push(key);
                continue;
            }
            if self.contains(r.kind, r.id) {
                continue;
            }
            if let Some(token) = self.in_flight.get(&key) {
                plan.wait_on.get_or_insert(*token);
                plan.keys.push(key);
                continue;
            }
            if settled.contains(&key) {
                continue;
            }
            plan.fetch.push(*r);
            plan.keys.push(key);
        }

        plan
    }

    pub fn in_flight(&self, key: &FetchKey) -> Option<CorrelationToken> {
        self.in_flight.get(key).copied()
    }

    pub fn mark_in_flight<'a>(
        &mut self,
        keys: impl IntoIterator<Item = &'a FetchKey>,
        token: CorrelationToken,
    ) {
        for key in keys {
            self.in_flight.insert(*key, token);
        }
    }

    /// Forget in-flight marks that `token` still owns.
    pub fn settle(&mut self, keys: &[FetchKey], token: CorrelationToken) {
        for key in keys {
            if self.in_flight.get(key) == Some(&token) {
                self.in_flight.remove(key);
            }
        }
    }

    pub fn clear(&mut self) {
        debug!(
            entities = self.entities.len(),
            in_flight = self.in_flight.len(),
            "Clearing entity cache"
        );
        self.entities.clear();
        self.in_flight.clear();
    }
}

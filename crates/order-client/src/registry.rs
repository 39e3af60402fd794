//! Correlation of outstanding operations with the callbacks awaiting them.
//!
//! Each registry hands out tokens for one class of operation. A token packs
//! three parts:
//!
//! ```text
//! | epoch (32 bits) | class (8 bits) | sequence (24 bits) |
//! ```
//!
//! [`Registry::clear`] bumps the epoch so a token issued before a session
//! reset can never match a registration made after it. The class tag keeps
//! tokens from different registries apart on the wire.

use std::collections::HashMap;

use order_shared::CorrelationToken;
use tracing::{debug, trace};

const EPOCH_SHIFT: u32 = 32;
const CLASS_SHIFT: u32 = 24;
const SEQ_MASK: u32 = (1 << CLASS_SHIFT) - 1;

/// Which kind of operation a registry correlates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenClass {
    /// Entity fetches and mutations
    Request = 0,
    /// Terminal callback of an upload or download
    Transfer = 1,
    Progress = 2,
    Preview = 3,
}

impl TokenClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Transfer => "transfer",
            Self::Progress => "progress",
            Self::Preview => "preview",
        }
    }

    /// Class encoded in `token`, if it names a known one.
    pub fn of(token: CorrelationToken) -> Option<Self> {
        match (token.0 >> CLASS_SHIFT) & 0xff {
            0 => Some(Self::Request),
            1 => Some(Self::Transfer),
            2 => Some(Self::Progress),
            3 => Some(Self::Preview),
            _ => None,
        }
    }
}

pub struct Registry<C> {
    pending: HashMap<CorrelationToken, C>,
    next: u32,
    epoch: u32,
    class: TokenClass,
}

impl<C> Registry<C> {
    pub fn new(class: TokenClass) -> Self {
        Self {
            pending: HashMap::new(),
            next: 0,
            epoch: 0,
            class,
        }
    }

    /// Register a callback. `None` asks for no correlation and returns no token.
    pub fn register(&mut self, callback: Option<C>) -> Option<CorrelationToken> {
        callback.map(|cb| self.insert(cb))
    }

    /// Register a callback and return its fresh token.
    pub fn insert(&mut self, callback: C) -> CorrelationToken {
        loop {
            let token = self.token_for(self.next);
            self.next = self.next.wrapping_add(1) & SEQ_MASK;
            // only reachable after the sequence wraps around
            if self.pending.contains_key(&token) {
                continue;
            }
            self.pending.insert(token, callback);
            trace!(class = self.class.as_str(), token = %token, pending = self.pending.len(), "Registered");
            return token;
        }
    }

    /// Remove and return the callback for `token`. Unknown, already-resolved
    /// and stale tokens yield `None`. Draining the registry compacts it.
    pub fn resolve(&mut self, token: CorrelationToken) -> Option<C> {
        let callback = self.pending.remove(&token);
        match callback {
            Some(_) => {
                trace!(class = self.class.as_str(), token = %token, "Resolved");
                self.compact();
            }
            None => debug!(class = self.class.as_str(), token = %token, "No pending operation for token"),
        }
        callback
    }

    /// Access a callback that fires repeatedly without resolving it.
    pub fn get_mut(&mut self, token: CorrelationToken) -> Option<&mut C> {
        self.pending.get_mut(&token)
    }

    pub fn get(&self, token: CorrelationToken) -> Option<&C> {
        self.pending.get(&token)
    }

    pub fn contains(&self, token: CorrelationToken) -> bool {
        self.pending.contains_key(&token)
    }

    /// True when `token` was issued before the last [`Registry::clear`].
    pub fn is_stale(&self, token: CorrelationToken) -> bool {
        (token.0 >> EPOCH_SHIFT) as u32 != self.epoch
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Restart the sequence at zero if nothing is outstanding.
    pub fn compact(&mut self) -> bool {
        if self.pending.is_empty() {
            self.next = 0;
            true
        } else {
            false
        }
    }

    /// Drop every pending callback and start a new epoch. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.next = 0;
        self.epoch = self.epoch.wrapping_add(1);
        if dropped > 0 {
            debug!(class = self.class.as_str(), dropped, "Dropped pending operations");
        }
        dropped
    }

    fn token_for(&self, seq: u32) -> CorrelationToken {
        CorrelationToken(
            (u64::from(self.epoch) << EPOCH_SHIFT)
                | ((self.class as u64) << CLASS_SHIFT)
                | u64::from(seq & SEQ_MASK),
        )
    }
}

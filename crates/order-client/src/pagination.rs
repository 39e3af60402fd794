//! Windowed fetches of large collection fields (channel messages, role members).

use tracing::{debug, warn};

use order_shared::{
    CorrelationToken, EntityId, EntityKind, EntityRef, PageDescriptor, PageDirection, PageField,
    ProtocolError,
};

use crate::error::Result;
use crate::session::Session;

/// What one window returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageOutcome {
    /// Item ids in the window, oldest first.
    pub ids: Vec<EntityId>,
    /// False once a window comes back short.
    pub more_available: bool,
}

/// Walks a collection one window at a time in a single direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    field: PageField,
    direction: PageDirection,
    count: u16,
    anchor: EntityId,
    exhausted: bool,
}

impl PageCursor {
    /// Start at the most recent end of the collection.
    pub fn new(
        field: PageField,
        direction: PageDirection,
        count: u16,
    ) -> std::result::Result<Self, ProtocolError> {
        PageDescriptor::new(field, EntityId(0), direction, count)?;
        Ok(Self {
            field,
            direction,
            count,
            anchor: EntityId(0),
            exhausted: false,
        })
    }

    pub fn anchor(&self) -> EntityId {
        self.anchor
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Descriptor for the next window, `None` once the end was reached.
    pub fn next_page(&self) -> Option<PageDescriptor> {
        if self.exhausted {
            return None;
        }
        Some(PageDescriptor {
            field: self.field,
            from: self.anchor,
            direction: self.direction,
            count: self.count,
        })
    }

    /// Move the anchor past the window just received.
    pub fn advance(&mut self, outcome: &PageOutcome) {
        let edge = match self.direction {
            PageDirection::Older => outcome.ids.iter().min(),
            PageDirection::Newer => outcome.ids.iter().max(),
        };
        match edge {
            Some(id) => {
                self.anchor = *id;
                self.exhausted = !outcome.more_available;
            }
            None => self.exhausted = true,
        }
    }
}

impl Session {
    /// Cursor over `field` using the configured window size.
    pub fn page_cursor(&self, field: PageField, direction: PageDirection) -> Result<PageCursor> {
        Ok(PageCursor::new(field, direction, self.config.page_size)?)
    }

    /// Fetch one window of the owner's collection field. Always goes to the
    /// server; `on_complete` sees the ids the window contained.
    pub fn request_page<F>(
        &mut self,
        owner: EntityId,
        page: PageDescriptor,
        on_complete: F,
    ) -> Result<Option<CorrelationToken>>
    where
        F: FnOnce(&mut Session, PageOutcome) + Send + 'static,
    {
        let kind = page.field.owner();
        let reference = EntityRef::paged(kind, owner, page)?;
        debug!(
            owner = %owner,
            field = page.field.field_name(),
            from = %page.from,
            direction = ?page.direction,
            count = page.count,
            "Requesting page"
        );
        self.request(vec![reference], true, move |session: &mut Session| {
            let outcome = session.page_outcome(kind, owner, &page);
            on_complete(session, outcome);
        })
    }

    /// Fetch one window and then every item it references, calling
    /// `on_complete` once all of them are cached.
    pub fn fetch_page<F>(
        &mut self,
        owner: EntityId,
        page: PageDescriptor,
        on_complete: F,
    ) -> Result<Option<CorrelationToken>>
    where
        F: FnOnce(&mut Session, PageOutcome) + Send + 'static,
    {
        let item_kind = page.field.item_kind();
        self.request_page(owner, page, move |session: &mut Session, outcome: PageOutcome| {
            let refs = outcome
                .ids
                .iter()
                .map(|id| EntityRef::new(item_kind, *id))
                .collect();
            if let Err(e) = session.request(refs, false, move |session: &mut Session| {
                on_complete(session, outcome)
            }) {
                warn!(owner = %owner, error = %e, "Failed to fetch page items");
            }
        })
    }

    fn page_outcome(&self, kind: EntityKind, owner: EntityId, page: &PageDescriptor) -> PageOutcome {
        let mut ids = self
            .cache
            .get(kind, owner)
            .and_then(|e| e.ids(page.field.field_name()))
            .map(<[EntityId]>::to_vec)
            .unwrap_or_default();
        ids.sort_unstable();
        ids.dedup();

        let more_available = page.more_available(ids.len());
        PageOutcome {
            ids,
            more_available,
        }
    }
}

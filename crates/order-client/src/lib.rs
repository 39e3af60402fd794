//! # order-client
//!
//! Client-side protocol engine for the Order messaging app: correlates
//! requests with responses, caches partially-known entities, pages through
//! large collections and tracks blob transfers. Everything runs on one
//! dispatcher ([`Session`]), optionally hosted on a tokio task ([`Engine`]).

pub mod blobs;
pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod pagination;
pub mod registry;
pub mod session;
pub mod transport;

use tracing_subscriber::{fmt, EnvFilter};

pub use blobs::{TransferDirection, TransferResult, TransferState, TransferStatus};
pub use config::ClientConfig;
pub use driver::{spawn_session, Engine, SessionHandle};
pub use error::{ClientError, Result, TransferFailure};
pub use events::ClientEvent;
pub use pagination::{PageCursor, PageOutcome};
pub use session::Session;
pub use transport::{FrameTransport, Transport};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("order_client=debug,order_shared=info,warn"));

    // a host that installed its own subscriber keeps it
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();

    tracing::info!("Order client engine starting");
}

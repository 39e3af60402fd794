//! Client configuration loaded from environment variables.
//!
//! All settings have defaults so an embedding host can start the engine with
//! zero configuration.

use order_shared::constants::{DEFAULT_PAGE_SIZE, MAX_FRAME_SIZE, MAX_PAGE_SIZE};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Window size for paginated collection fetches, at most `MAX_PAGE_SIZE`.
    /// Env: `ORDER_PAGE_SIZE`
    /// Default: `50`
    pub page_size: u16,

    /// Capacity of the bounded channel carrying inbound frames to the dispatcher.
    /// Env: `ORDER_INBOUND_CAPACITY`
    /// Default: `256`
    pub inbound_capacity: usize,

    /// Inbound frames larger than this are rejected before decoding.
    /// Env: `ORDER_MAX_FRAME_SIZE`
    /// Default: 256 KiB
    pub max_frame_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            inbound_capacity: 256,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("ORDER_PAGE_SIZE") {
            match val.parse::<u16>() {
                Ok(n) if n > 0 => config.page_size = n.min(MAX_PAGE_SIZE),
                _ => tracing::warn!(value = %val, "Invalid ORDER_PAGE_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("ORDER_INBOUND_CAPACITY") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.inbound_capacity = n,
                _ => tracing::warn!(value = %val, "Invalid ORDER_INBOUND_CAPACITY, using default"),
            }
        }

        if let Some(val) = lookup("ORDER_MAX_FRAME_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_frame_size = n,
                _ => tracing::warn!(value = %val, "Invalid ORDER_MAX_FRAME_SIZE, using default"),
            }
        }

        config
    }
}

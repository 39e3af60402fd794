/// Start of the id timestamp epoch (2020-01-01T00:00:00Z) in Unix milliseconds
pub const ID_EPOCH_MILLIS: i64 = 1_577_836_800_000;

/// Number of low id bits that do not belong to the timestamp
pub const ID_TIMESTAMP_SHIFT: u32 = 16;

/// Size of a length or count prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Size of an entity or blob identifier on the wire in bytes
pub const ID_SIZE: usize = 8;

/// Size of a message section header (kind + associated id) in bytes
pub const SECTION_HEADER_SIZE: usize = 1 + ID_SIZE;

/// Upper bound on any single pagination window
pub const MAX_PAGE_SIZE: u16 = 100;

/// Window size used when the caller does not pick one
pub const DEFAULT_PAGE_SIZE: u16 = 50;

/// Maximum inbound frame size in bytes (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;

/// Id that addresses the logged-in user in fetch requests
pub const SELF_USER_ID: u64 = 0;

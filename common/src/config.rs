// Shared engine constants.

// How many consecutive unused receive addresses end the discovery scan
pub const ADDRESS_GAP_LIMIT: u32 = 20;

// Widest block range requested from the remote index in one query
pub const API_SYNC_WINDOW_BLOCKS: u64 = 5_000;

// Seconds between block height polls while connected in API mode
pub const API_POLL_INTERVAL_SECS: u64 = 30;

// Longest detail string carried by an include status or submit error
pub const STATUS_DETAIL_MAX_BYTES: usize = 31;

// Current version of the account wire format
pub const ACCOUNT_SERIALIZATION_VERSION: u16 = 6;

// Oldest account wire format still accepted on read
pub const ACCOUNT_SERIALIZATION_OLDEST: u16 = 4;

// Engine-side tunables. Per-chain parameters live with the chain
// handlers; nothing here depends on a chain.

// Outputs below this many base units are not worth a change output
pub const DUST_THRESHOLD: u64 = 546;

// Recently-seen transaction identifiers kept per P2P client
pub const P2P_SEEN_CACHE_SIZE: usize = 4_096;

// Errno values used when mapping transport failures onto the POSIX
// stop/disconnect reasons
pub const ERRNO_CONNECTION_REFUSED: i32 = 111;
pub const ERRNO_NOT_CONNECTED: i32 = 107;

// Filename suffix given to unreadable persisted entities
pub const QUARANTINE_SUFFIX: &str = ".corrupt";

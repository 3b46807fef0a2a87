//! Upper bounds on engine input. Checked before anything reaches the WAL.

pub const MAX_LOTS: usize = 10_000;
pub const MAX_SLOTS_PER_LOT: u32 = 10_000;
pub const MAX_USERS: usize = 1_000_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LOCATION_LEN: usize = 512;
pub const MAX_USERNAME_LEN: usize = 128;

/// Max rows in a seed file.
pub const MAX_SEED_LOTS: usize = 1_000;

/// Largest WAL record replay will allocate for. A bigger length prefix is
/// treated as a torn tail.
pub const MAX_WAL_RECORD_LEN: usize = 16 * 1024 * 1024;

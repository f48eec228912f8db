//! Limits shared across the VM (§3.1, §6). The on-disk magic numbers live
//! with the code that actually writes and checks them, `storage::pager`.

/// `NewRecno` retries a small random delta around the running hint this
/// many times before falling back to a fully random probe (§4.5).
pub const NEWRECNO_HINT_ATTEMPTS: u32 = 5;
/// Total probe budget before `NewRecno` gives up with `Full` (§4.5).
pub const NEWRECNO_MAX_ATTEMPTS: u32 = 1000;

/// Bin count for the sorter's power-of-two merge ladder (§4.5); bin `i`
/// holds runs of length up to `2^i` records, so 32 bins comfortably
/// covers any sort this engine will see before overflowing to the next
/// bin "that high".
pub const SORT_BIN_COUNT: usize = 32;

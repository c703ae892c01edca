//! 64-bit sortable lookup keys
//!
//! A lookup key packs a (spot id, read-in-pair number) pair into one u64 so
//! that the natural integer order over keys matches ascending
//! (spot id, read number) order. Read numbers are 1 or 2; the low bit of the
//! key is set for read 2.

/// A 64-bit sortable encoding of (spot id, read number)
pub type Key = u64;

/// Encodes a spot id and a read number (1 or 2) into a sortable key
#[must_use]
#[inline]
pub fn encode(spot_id: u64, read_number: u32) -> Key {
    (spot_id << 1) | u64::from(read_number == 2)
}

/// Decodes a key back into its (spot id, read number) pair
#[must_use]
#[inline]
pub fn decode(key: Key) -> (u64, u32) {
    (key >> 1, if key & 1 == 1 { 2 } else { 1 })
}

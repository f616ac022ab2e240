//! Stable hashing utilities.
//!
//! Goals:
//! - Use a stable, explicit hash (not std::DefaultHasher) so that bloom bits
//!   stay invariant across toolchains/platforms.
//! - Keep the bloom mapping independent from the in-page key hash, which is
//!   derived from nibbles directly (see slotted module).

use std::hash::Hasher;
use twox_hash::XxHash64;

/// Compute a 64-bit stable hash of a serialized key (xxhash64, seed=0).
pub fn hash64(key: &[u8]) -> u64 {
    let mut h = XxHash64::with_seed(0);
    h.write(key);
    h.finish()
}

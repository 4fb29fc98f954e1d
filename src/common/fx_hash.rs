//! Fast, non-cryptographic hash maps/sets for identity-keyed CFG data.
//!
//! Everything keyed here (register indices, value ids, basic block indices)
//! comes from the compiler itself, never from untrusted input, so there is no
//! reason to pay for a DoS-resistant hasher.

pub use rustc_hash::{FxHashMap, FxHashSet};

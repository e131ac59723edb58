//! Stable string hashing for partition placement.

/// 64-bit FNV-1a. Stable across processes and releases, unlike `std`'s
/// default hasher.
pub fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

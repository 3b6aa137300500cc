//! Stable content hashing for determinism checks.

use xxhash_rust::xxh3::Xxh3;

/// Hash a tightly packed `f32` pixel buffer to a stable 64-bit digest.
///
/// Hashes the little-endian bit pattern of every float, so two buffers hash equal exactly
/// when they are bit-identical. Used by determinism checks ("pixel-identical output").
pub fn hash_pixels(pixels: &[f32]) -> u64 {
    let mut h = Xxh3::new();
    for p in pixels {
        h.update(&p.to_bits().to_le_bytes());
    }
    h.digest()
}

/// Hash an arbitrary byte buffer (used for instruction-list digests).
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

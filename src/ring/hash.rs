use sha1::{Digest, Sha1};

/// Number of bits in a ring identifier. Also the number of finger table
/// entries per node.
pub const M: usize = 16;

/// Size of the identifier space, `2^M`.
pub const RING_SIZE: u64 = 1 << M;

/// Hashes a string to its position on the ring.
///
/// The SHA-1 digest is interpreted as a big-endian unsigned integer and
/// reduced modulo [`RING_SIZE`]. Both node addresses (`host:port`) and data
/// keys go through this function, which is what makes key ownership a pure
/// comparison of ring positions.
pub fn key_to_ring_id(key: &str) -> u64 {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();

    // The ring size is a power of two, so the low-order bytes of the digest
    // carry the full digest's value modulo RING_SIZE.
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&digest[digest.len() - 8..]);
    u64::from_be_bytes(tail) & (RING_SIZE - 1)
}

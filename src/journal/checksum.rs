//! CRC32 checksums for journal frames
//!
//! A record's checksum covers its length prefix, seq and payload; the
//! header's covers every header field before it.

use crc32fast::Hasher;

/// CRC32 (IEEE) over `data`
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}

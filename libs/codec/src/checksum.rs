//! CRC32 Checksum Calculation
//!
//! Hardware-accelerated CRC32 over the checksummed region of a wire message.
//! CRC32 detects every burst error up to 32 bits, so any single flipped byte in
//! the payload region is always caught.

/// Streaming checksum calculator for messages assembled from several parts
pub struct StreamingChecksum {
    hasher: crc32fast::Hasher,
}

impl StreamingChecksum {
    pub fn new() -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> u32 {
        self.hasher.finalize()
    }
}

impl Default for StreamingChecksum {
    fn default() -> Self {
        Self::new()
    }
}

//! Payload masking (RFC 6455 section 5.3).
//!
//! Every frame a client sends is XORed with a fresh 4-byte key.

/// XOR `data` in place with the repeating 4-byte `mask`.
///
/// Applying the same mask twice restores the original bytes.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    let mask_u32 = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let val = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) ^ mask_u32;
        chunk.copy_from_slice(&val.to_ne_bytes());
    }
    for (byte, key) in chunks.into_remainder().iter_mut().zip(mask) {
        *byte ^= key;
    }
}

/// Source of masking keys for one connection.
///
/// Seeded from the OS RNG, then advanced with a cheap mixing step so each
/// frame gets a distinct key without a syscall per frame.
#[derive(Debug, Clone)]
pub struct MaskGenerator {
    state: u32,
}

impl MaskGenerator {
    /// Create a generator seeded from `getrandom`, falling back to the clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: random_seed(),
        }
    }

    /// Produce the next masking key.
    pub fn next_mask(&mut self) -> [u8; 4] {
        self.state = self.state.wrapping_add(0x9E37_79B9);
        let b = self.state.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        c.wrapping_mul(0xC2B2_AE35).to_le_bytes()
    }
}

impl Default for MaskGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn random_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x1234_5678)
    }
}

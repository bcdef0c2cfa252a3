//! Rolling polynomial hashing shared by version assignment and structural
//! schedule fingerprints.

/// Multiplier of the rolling polynomial.
pub const HASH_MULTIPLIER: u64 = 131;

/// Accumulates a ×131 rolling hash over words and bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollingHasher {
    state: u64,
}

impl RollingHasher {
    pub fn new() -> Self {
        Self { state: 0 }
    }

    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.state = self.state.wrapping_mul(HASH_MULTIPLIER).wrapping_add(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.write_u64(u64::from(*byte));
        }
    }

    pub fn finish(self) -> u64 {
        self.state
    }
}

/// Folds a sequence of already-computed hashes into one fingerprint.
pub fn fold_hashes(values: impl IntoIterator<Item = u64>) -> u64 {
    let mut hasher = RollingHasher::new();
    for value in values {
        hasher.write_u64(value);
    }
    hasher.finish()
}

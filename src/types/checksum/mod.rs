#![forbid(unsafe_code)]

/// Incremental 32-bit checksum.
pub trait Checksum {
    fn reset(&mut self);
    fn update(&mut self, bytes: &[u8]);
    fn finalize(&self) -> u32;
}

/// CRC-32 (IEEE) backed by `crc32fast`.
pub struct Crc32Fast {
    inner: crc32fast::Hasher,
}

impl Default for Crc32Fast {
    fn default() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }
}

impl Checksum for Crc32Fast {
    fn reset(&mut self) {
        self.inner.reset();
    }

    fn update(&mut self, bytes: &[u8]) {
        self.inner.update(bytes);
    }

    fn finalize(&self) -> u32 {
        self.inner.clone().finalize()
    }
}

/// Checksum of a fixed-size record, salted with its id so that a record
/// copied to the wrong slot does not validate.
pub fn record_crc32(record_id: u64, payload: &[u8]) -> u32 {
    let mut hasher = Crc32Fast::default();
    hasher.update(&record_id.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

//! Snapshot State Hashing
//!
//! SHA-256 digest of the entity registry. Snapshots carry it hex-encoded
//! so a client can tell when its mirrored world diverged from the
//! authoritative one.

use sha2::{Digest, Sha256};

/// Raw digest bytes.
pub type StateHash = [u8; 32];

const WORLD_DOMAIN: &[u8] = b"GRIDFIRE_WORLD_V1";

/// A value with a fixed byte encoding for hashing.
pub trait HashField {
    /// Feed the encoded value to `digest`.
    fn feed(&self, digest: &mut Sha256);
}

impl HashField for u32 {
    fn feed(&self, digest: &mut Sha256) {
        digest.update(self.to_le_bytes());
    }
}

impl HashField for u64 {
    fn feed(&self, digest: &mut Sha256) {
        digest.update(self.to_le_bytes());
    }
}

// Bit pattern, so 0.0 and -0.0 differ
impl HashField for f64 {
    fn feed(&self, digest: &mut Sha256) {
        digest.update(self.to_bits().to_le_bytes());
    }
}

impl HashField for bool {
    fn feed(&self, digest: &mut Sha256) {
        digest.update([u8::from(*self)]);
    }
}

impl HashField for str {
    fn feed(&self, digest: &mut Sha256) {
        (self.len() as u64).feed(digest);
        digest.update(self.as_bytes());
    }
}

impl<T: HashField + ?Sized> HashField for &T {
    fn feed(&self, digest: &mut Sha256) {
        (**self).feed(digest);
    }
}

/// Incremental world hasher. Field order is part of the digest, so
/// entities must be fed in id order.
pub struct StateHasher {
    digest: Sha256,
}

impl StateHasher {
    /// Start a digest under the given domain tag.
    pub fn with_domain(domain: &[u8]) -> Self {
        let mut digest = Sha256::new();
        digest.update(domain);
        Self { digest }
    }

    /// Start a world snapshot digest.
    pub fn for_world() -> Self {
        Self::with_domain(WORLD_DOMAIN)
    }

    /// Append one field.
    #[inline]
    pub fn field<T: HashField + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.feed(&mut self.digest);
        self
    }

    /// Raw digest.
    pub fn finish(self) -> StateHash {
        self.digest.finalize().into()
    }

    /// Lowercase hex digest, as sent in snapshots.
    pub fn finish_hex(self) -> String {
        hex::encode(self.finish())
    }
}

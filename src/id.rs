//! 160-bit node and key identifiers.
//!
//! Every node and every stored value lives in the same 160-bit identifier
//! space. Closeness between identifiers is measured with the Kademlia XOR
//! metric: `distance(a, b) = a ^ b`, compared as a big-endian unsigned
//! integer. Keys are mapped into the space by hashing their bytes with
//! SHA-1, so every node derives the same identifier for the same key.

use std::fmt;

use rand::Rng as _;
use sha1::{Digest, Sha1};

/// Identifier width in bits.
pub const ID_BITS: usize = 160;

/// Identifier width in bytes.
pub const ID_BYTES: usize = 20;

/// A 160-bit identifier in the DHT keyspace.
///
/// Ordering is big-endian unsigned comparison, which makes XOR distances
/// directly comparable.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(pub [u8; ID_BYTES]);

impl Id {
    /// Generates a uniformly random identifier.
    pub fn random() -> Self {
        let mut id = [0u8; ID_BYTES];
        rand::rng().fill(&mut id);
        Self(id)
    }

    /// Derives the identifier of a caller-supplied key.
    pub fn from_key(key: &[u8]) -> Self {
        let digest = Sha1::digest(key);
        let mut id = [0u8; ID_BYTES];
        id.copy_from_slice(&digest);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; ID_BYTES] {
        &self.0
    }

    /// XOR distance to `other`.
    pub fn distance(&self, other: &Id) -> Id {
        let mut dist = [0u8; ID_BYTES];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        Id(dist)
    }

    /// Reads bit `i`, where bit 0 is the most significant.
    pub fn bit(&self, i: usize) -> bool {
        debug_assert!(i < ID_BITS);
        self.0[i / 8] >> (7 - i % 8) & 1 == 1
    }

    /// Returns a copy with bit `i` inverted, where bit 0 is the most
    /// significant.
    pub fn flip(&self, i: usize) -> Id {
        debug_assert!(i < ID_BITS);
        let mut id = self.0;
        id[i / 8] ^= 1 << (7 - i % 8);
        Id(id)
    }

    /// Number of leading zero bits; 160 for the zero identifier.
    pub fn leading_zeros(&self) -> usize {
        for (i, &byte) in self.0.iter().enumerate() {
            if byte != 0 {
                return i * 8 + byte.leading_zeros() as usize;
            }
        }
        ID_BITS
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ID_BYTES]
    }
}

impl From<[u8; ID_BYTES]> for Id {
    fn from(bytes: [u8; ID_BYTES]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

use crate::chain::ChainType;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const SEED_SIZE: usize = 64;

// The 64-byte wallet seed. Wiped on drop and never printed; everything
// derived from it is produced through the chain handlers.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret {
    bytes: [u8; SEED_SIZE],
}

impl Secret {
    pub fn new(bytes: [u8; SEED_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; SEED_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(..)")
    }
}

// Per-chain key material: public bytes, and private bytes when the key
// was imported rather than derived on demand from the seed.
#[derive(Clone)]
pub struct Key {
    chain: ChainType,
    public: Vec<u8>,
    secret: Option<Vec<u8>>,
}

impl Key {
    pub fn public_only(chain: ChainType, public: Vec<u8>) -> Self {
        Self {
            chain,
            public,
            secret: None,
        }
    }

    pub fn with_secret(chain: ChainType, public: Vec<u8>, secret: Vec<u8>) -> Self {
        Self {
            chain,
            public,
            secret: Some(secret),
        }
    }

    pub fn chain(&self) -> ChainType {
        self.chain
    }

    pub fn public(&self) -> &[u8] {
        &self.public
    }

    pub fn has_secret(&self) -> bool {
        self.secret.is_some()
    }

    pub fn secret(&self) -> Option<&[u8]> {
        self.secret.as_deref()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("chain", &self.chain)
            .field("public", &hex::encode(&self.public))
            .field("secret", &self.secret.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Drop for Key {
    fn drop(&mut self) {
        if let Some(secret) = self.secret.as_mut() {
            secret.zeroize();
        }
    }
}

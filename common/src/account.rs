use crate::{
    chain::ChainType,
    config::{ACCOUNT_SERIALIZATION_OLDEST, ACCOUNT_SERIALIZATION_VERSION},
    keys::Secret,
    serializer::{Reader, ReaderError, Writer},
    time::TimestampSeconds,
};
use indexmap::IndexMap;
use rand::RngCore;
use std::sync::Arc;
use strum::IntoEnumIterator;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("checksum mismatch")]
    InvalidChecksum,
    #[error("declared size {declared} does not match {actual} bytes")]
    InvalidSize { declared: usize, actual: usize },
    #[error("unsupported serialization version {0}")]
    UnsupportedVersion(u16),
    #[error(transparent)]
    Reader(#[from] ReaderError),
}

// The user's top-level identity: an opaque uids plus derived public
// material for every supported chain. The uids is not part of the wire
// format; callers supply it again on deserialization, so it is stable
// across round-trips by construction.
pub struct Account {
    uids: String,
    timestamp: TimestampSeconds,
    materials: IndexMap<ChainType, Vec<u8>>,
}

impl Account {
    // Derive material for every chain from the 64-byte seed
    pub fn from_seed(seed: &Secret, timestamp: TimestampSeconds, uids: impl Into<String>) -> Arc<Self> {
        let mut materials = IndexMap::new();
        for chain in ChainType::iter() {
            materials.insert(chain, derive_material(chain, seed));
        }

        Arc::new(Self {
            uids: uids.into(),
            timestamp,
            materials,
        })
    }

    // Restore from an earlier `serialize` output. Wire versions older
    // than the current one carry fewer chain records; the missing ones
    // read back empty and the account re-serializes at the current
    // version.
    pub fn deserialize(bytes: &[u8], uids: impl Into<String>) -> Result<Arc<Self>, AccountError> {
        let mut reader = Reader::new(bytes);
        let checksum = reader.read_u16()?;
        if checksum != fletcher16(&bytes[2..]) {
            return Err(AccountError::InvalidChecksum);
        }

        let declared = reader.read_u32()? as usize;
        if declared != bytes.len() {
            return Err(AccountError::InvalidSize {
                declared,
                actual: bytes.len(),
            });
        }

        let version = reader.read_u16()?;
        if !(ACCOUNT_SERIALIZATION_OLDEST..=ACCOUNT_SERIALIZATION_VERSION).contains(&version) {
            return Err(AccountError::UnsupportedVersion(version));
        }
        if version < ACCOUNT_SERIALIZATION_VERSION {
            log::debug!(
                "upgrading account serialization from version {} to {}",
                version,
                ACCOUNT_SERIALIZATION_VERSION
            );
        }

        let timestamp = reader.read_u64()?;

        let mut materials = IndexMap::new();
        for chain in chains_for_version(version) {
            let len = reader.read_u32()? as usize;
            materials.insert(*chain, reader.read_bytes_vec(len)?);
        }
        for chain in ChainType::iter() {
            materials.entry(chain).or_default();
        }

        Ok(Arc::new(Self {
            uids: uids.into(),
            timestamp,
            materials,
        }))
    }

    // Wire format:
    //   fletcher16 BE | total_size u32 BE | version u16 BE | timestamp u64 BE
    //   then per chain in enumeration order: len u32 BE | material
    pub fn serialize(&self) -> Vec<u8> {
        let mut body = Writer::new();

        let records: usize = self.materials.values().map(|m| 4 + m.len()).sum();
        let total = 2 + 4 + 2 + 8 + records;

        body.write_u32(total as u32);
        body.write_u16(ACCOUNT_SERIALIZATION_VERSION);
        body.write_u64(self.timestamp);
        for chain in ChainType::iter() {
            let material = &self.materials[&chain];
            body.write_u32(material.len() as u32);
            body.write_bytes(material);
        }

        let mut out = Writer::with_capacity(total);
        out.write_u16(fletcher16(body.as_bytes()));
        out.write_bytes(body.as_bytes());
        out.into_bytes()
    }

    // True iff `bytes` is this account's serialization, checksum aside
    pub fn validate_serialization(&self, bytes: &[u8]) -> bool {
        let own = self.serialize();
        bytes.len() == own.len() && bytes[2..] == own[2..]
    }

    pub fn uids(&self) -> &str {
        &self.uids
    }

    pub fn timestamp(&self) -> TimestampSeconds {
        self.timestamp
    }

    pub fn material(&self, chain: ChainType) -> &[u8] {
        self.materials
            .get(&chain)
            .map(|m| m.as_slice())
            .unwrap_or(&[])
    }

    // A fresh opaque identifier for accounts created locally
    pub fn generate_uids() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}

// Chain records present in each wire version. Chains are appended to
// the enumeration as they are adopted, so older versions are prefixes.
fn chains_for_version(version: u16) -> &'static [ChainType] {
    match version {
        4 => &[ChainType::Bitcoin, ChainType::Litecoin, ChainType::Ethereum],
        5 => &[
            ChainType::Bitcoin,
            ChainType::Litecoin,
            ChainType::Dogecoin,
            ChainType::Ethereum,
        ],
        _ => &[
            ChainType::Bitcoin,
            ChainType::Litecoin,
            ChainType::Dogecoin,
            ChainType::Ethereum,
            ChainType::Stellar,
        ],
    }
}

// The actual per-chain derivation (BIP-32 style trees, chain codes) is a
// pluggable collaborator; the engine only requires that material is a
// pure function of (chain, seed) with the chain's public-key width.
// Exposed so the chain handlers answer derive requests identically.
pub fn derive_material(chain: ChainType, seed: &Secret) -> Vec<u8> {
    let context = format!("polywallet account {} v1", chain.code());
    let derived = blake3::derive_key(&context, seed.as_bytes());

    match chain {
        // Compressed-key width
        ChainType::Bitcoin | ChainType::Litecoin | ChainType::Dogecoin => {
            let mut material = Vec::with_capacity(33);
            material.push(0x02);
            material.extend_from_slice(&derived);
            material
        }
        // Uncompressed-key width
        ChainType::Ethereum => {
            let second = blake3::derive_key(&format!("{}/1", context), seed.as_bytes());
            let mut material = Vec::with_capacity(64);
            material.extend_from_slice(&derived);
            material.extend_from_slice(&second);
            material
        }
        ChainType::Stellar => derived.to_vec(),
    }
}

fn fletcher16(data: &[u8]) -> u16 {
    let mut sum1: u16 = 0;
    let mut sum2: u16 = 0;
    for byte in data {
        sum1 = (sum1 + *byte as u16) % 255;
        sum2 = (sum2 + sum1) % 255;
    }
    (sum2 << 8) | sum1
}

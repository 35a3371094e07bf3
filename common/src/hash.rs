use crate::{
    chain::ChainType,
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use std::{
    fmt::{Display, Error, Formatter},
    hash::Hasher,
    str::FromStr,
};

pub const TX_HASH_SIZE: usize = 32; // 32 bytes / 256 bits

// A chain-tagged transaction (or block) hash.
// Equality implies byte-identical payload on the same chain.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Debug)]
pub struct TxHash {
    chain: ChainType,
    bytes: [u8; TX_HASH_SIZE],
}

impl TxHash {
    pub const fn new(chain: ChainType, bytes: [u8; TX_HASH_SIZE]) -> Self {
        Self { chain, bytes }
    }

    pub fn from_hex(chain: ChainType, hex_str: &str) -> Result<Self, ReaderError> {
        let decoded = hex::decode(hex_str).map_err(|_| ReaderError::InvalidHex)?;
        let bytes: [u8; TX_HASH_SIZE] =
            decoded.try_into().map_err(|_| ReaderError::InvalidSize)?;
        Ok(Self::new(chain, bytes))
    }

    pub fn chain(&self) -> ChainType {
        self.chain
    }

    pub fn as_bytes(&self) -> &[u8; TX_HASH_SIZE] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl Display for TxHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.to_hex())
    }
}

impl std::hash::Hash for TxHash {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.chain.hash(state);
        self.bytes.hash(state);
    }
}

impl Serializer for TxHash {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let chain = ChainType::read(reader)?;
        let bytes = reader.read_array::<TX_HASH_SIZE>()?;
        Ok(Self::new(chain, bytes))
    }

    fn write(&self, writer: &mut Writer) {
        self.chain.write(writer);
        writer.write_bytes(&self.bytes);
    }

    fn size(&self) -> usize {
        1 + TX_HASH_SIZE
    }
}

// Content digest used for file-service identifiers and engine-internal
// transaction hashing
#[inline(always)]
pub fn digest(value: &[u8]) -> [u8; TX_HASH_SIZE] {
    blake3::hash(value).into()
}

// Parse helper mirroring FromStr for contexts where the chain is implied
pub struct HexHash(pub [u8; TX_HASH_SIZE]);

impl FromStr for HexHash {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s).map_err(|_| ReaderError::InvalidHex)?;
        let bytes: [u8; TX_HASH_SIZE] =
            decoded.try_into().map_err(|_| ReaderError::InvalidSize)?;
        Ok(HexHash(bytes))
    }
}

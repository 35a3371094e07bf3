use crate::serializer::{Reader, ReaderError, Serializer, Writer};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};

// Closed enumeration of supported chains. Everything outside the handler
// implementations consumes this tag without knowing what is behind it.
// The enumeration order is part of the account wire format; new chains
// are appended, never inserted.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    EnumIter,
    Display,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ChainType {
    Bitcoin,
    Litecoin,
    Dogecoin,
    Ethereum,
    Stellar,
}

impl ChainType {
    // Does the chain account with unspent outputs rather than balances
    pub fn is_utxo(&self) -> bool {
        matches!(
            self,
            ChainType::Bitcoin | ChainType::Litecoin | ChainType::Dogecoin
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            ChainType::Bitcoin => "btc",
            ChainType::Litecoin => "ltc",
            ChainType::Dogecoin => "doge",
            ChainType::Ethereum => "eth",
            ChainType::Stellar => "xlm",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Some(match code {
            "btc" => ChainType::Bitcoin,
            "ltc" => ChainType::Litecoin,
            "doge" => ChainType::Dogecoin,
            "eth" => ChainType::Ethereum,
            "xlm" => ChainType::Stellar,
            _ => return None,
        })
    }

    fn id(&self) -> u8 {
        match self {
            ChainType::Bitcoin => 0,
            ChainType::Litecoin => 1,
            ChainType::Dogecoin => 2,
            ChainType::Ethereum => 3,
            ChainType::Stellar => 4,
        }
    }

    fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => ChainType::Bitcoin,
            1 => ChainType::Litecoin,
            2 => ChainType::Dogecoin,
            3 => ChainType::Ethereum,
            4 => ChainType::Stellar,
            _ => return None,
        })
    }
}

impl Serializer for ChainType {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        ChainType::from_id(reader.read_u8()?).ok_or(ReaderError::InvalidValue)
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.id());
    }

    fn size(&self) -> usize {
        1
    }
}

// How a wallet manager reaches the chain.
// Reads and writes can go through the remote index, the peer network,
// or a mix of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    ApiOnly,
    ApiWithP2pSend,
    P2pWithApiSync,
    P2pOnly,
}

impl SyncMode {
    // Does submission go through the peer network
    pub fn sends_via_p2p(&self) -> bool {
        matches!(
            self,
            SyncMode::ApiWithP2pSend | SyncMode::P2pWithApiSync | SyncMode::P2pOnly
        )
    }

    // Does reading chain state go through the peer network
    pub fn syncs_via_p2p(&self) -> bool {
        matches!(self, SyncMode::P2pOnly)
    }
}

// How far back a forced sync rewinds before catching up again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SyncDepth {
    FromLastConfirmedSend,
    FromLastTrustedBlock,
    FromCreation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AddressScheme {
    Native,
    Legacy,
}

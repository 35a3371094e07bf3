// The persisted entity records and their wire layouts. Identifiers are
// content-derived; the engine treats a missing or quarantined file as
// "not yet known".

use super::FileEntity;
use polywallet_common::{
    hash::digest,
    serializer::{Reader, ReaderError, Writer},
};

// Serialized block followed by its height. The block bytes themselves
// are chain-specific and opaque here.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBlock {
    pub raw: Vec<u8>,
    pub height: u32,
}

impl FileEntity for StoredBlock {
    const TYPE_NAME: &'static str = "blocks";
    const CURRENT_VERSION: u32 = 1;
    const VERSIONS: &'static [u32] = &[1];

    fn identifier(&self) -> [u8; 32] {
        digest(&self.raw)
    }

    fn write_entity(&self, writer: &mut Writer) {
        writer.write_bytes(&self.raw);
        writer.write_u32_le(self.height);
    }

    fn read_entity(_version: u32, reader: &mut Reader) -> Result<Self, ReaderError> {
        let remaining = reader.size();
        if remaining < 4 {
            return Err(ReaderError::InvalidSize);
        }
        let raw = reader.read_bytes_vec(remaining - 4)?;
        let height = reader.read_u32_le()?;
        Ok(Self { raw, height })
    }
}

// One known peer: 16-byte address (v4 mapped into v6 space), port,
// service bits, last-seen timestamp and flags
#[derive(Debug, Clone, PartialEq)]
pub struct StoredPeer {
    pub address: [u8; 16],
    pub port: u16,
    pub services: u64,
    pub timestamp: u64,
    pub flags: u8,
}

impl FileEntity for StoredPeer {
    const TYPE_NAME: &'static str = "peers";
    const CURRENT_VERSION: u32 = 1;
    const VERSIONS: &'static [u32] = &[1];

    fn identifier(&self) -> [u8; 32] {
        let mut writer = Writer::with_capacity(35);
        self.write_entity(&mut writer);
        digest(writer.as_bytes())
    }

    fn write_entity(&self, writer: &mut Writer) {
        writer.write_bytes(&self.address);
        writer.write_u16(self.port);
        writer.write_u64(self.services);
        writer.write_u64(self.timestamp);
        writer.write_u8(self.flags);
    }

    fn read_entity(_version: u32, reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            address: reader.read_array::<16>()?,
            port: reader.read_u16()?,
            services: reader.read_u64()?,
            timestamp: reader.read_u64()?,
            flags: reader.read_u8()?,
        })
    }
}

// Serialized transaction followed by block height and timestamp.
// Version 1 predates the timestamp field; it reads back as zero and the
// record re-saves at the current version.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTransaction {
    pub raw: Vec<u8>,
    pub height: u32,
    pub timestamp: u32,
}

impl FileEntity for StoredTransaction {
    const TYPE_NAME: &'static str = "transactions";
    const CURRENT_VERSION: u32 = 2;
    const VERSIONS: &'static [u32] = &[1, 2];

    fn identifier(&self) -> [u8; 32] {
        digest(&self.raw)
    }

    fn write_entity(&self, writer: &mut Writer) {
        writer.write_bytes(&self.raw);
        writer.write_u32_le(self.height);
        writer.write_u32_le(self.timestamp);
    }

    fn read_entity(version: u32, reader: &mut Reader) -> Result<Self, ReaderError> {
        let trailer = if version >= 2 { 8 } else { 4 };
        let remaining = reader.size();
        if remaining < trailer {
            return Err(ReaderError::InvalidSize);
        }
        let raw = reader.read_bytes_vec(remaining - trailer)?;
        let height = reader.read_u32_le()?;
        let timestamp = if version >= 2 { reader.read_u32_le()? } else { 0 };
        Ok(Self {
            raw,
            height,
            timestamp,
        })
    }
}

// A client-delivered transfer bundle, kept verbatim as JSON so
// account-chain wallets can rebuild their transfer sets without asking
// the index again
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBundle {
    pub json: Vec<u8>,
}

impl FileEntity for StoredBundle {
    const TYPE_NAME: &'static str = "bundles";
    const CURRENT_VERSION: u32 = 1;
    const VERSIONS: &'static [u32] = &[1];

    fn identifier(&self) -> [u8; 32] {
        digest(&self.json)
    }

    fn write_entity(&self, writer: &mut Writer) {
        writer.write_bytes(&self.json);
    }

    fn read_entity(_version: u32, reader: &mut Reader) -> Result<Self, ReaderError> {
        let remaining = reader.size();
        Ok(Self {
            json: reader.read_bytes_vec(remaining)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polywallet_common::serializer::Reader;

    #[test]
    fn test_block_layout() {
        let block = StoredBlock {
            raw: vec![1, 2, 3],
            height: 0x0102_0304,
        };
        let mut writer = Writer::new();
        block.write_entity(&mut writer);
        // Height is little-endian per the on-disk contract
        assert_eq!(writer.as_bytes(), &[1, 2, 3, 0x04, 0x03, 0x02, 0x01]);

        let mut reader = Reader::new(writer.as_bytes());
        let back = StoredBlock::read_entity(1, &mut reader).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn test_peer_layout_is_35_bytes() {
        let peer = StoredPeer {
            address: [0; 16],
            port: 8333,
            services: 1,
            timestamp: 1_600_000_000,
            flags: 0,
        };
        let mut writer = Writer::new();
        peer.write_entity(&mut writer);
        assert_eq!(writer.len(), 35);

        let mut reader = Reader::new(writer.as_bytes());
        assert_eq!(StoredPeer::read_entity(1, &mut reader).unwrap(), peer);
    }

    #[test]
    fn test_transaction_version_upgrade() {
        // A version 1 record has no timestamp trailer
        let mut writer = Writer::new();
        writer.write_bytes(&[9, 9]);
        writer.write_u32_le(77);

        let mut reader = Reader::new(writer.as_bytes());
        let tx = StoredTransaction::read_entity(1, &mut reader).unwrap();
        assert_eq!(tx.raw, vec![9, 9]);
        assert_eq!(tx.height, 77);
        assert_eq!(tx.timestamp, 0);
    }
}

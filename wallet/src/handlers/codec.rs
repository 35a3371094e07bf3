// The engine-internal transaction codec. Real chain wire formats
// (script encodings, RLP, XDR) are pluggable collaborators bound at the
// handler boundary; within the engine every chain speaks this one
// length-prefixed layout so reconciliation, persistence and signing stay
// chain-agnostic.

use polywallet_common::{
    address::Address,
    chain::ChainType,
    hash::{digest, TxHash},
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use primitive_types::U256;

const CODEC_VERSION: u8 = 1;

// One spend of a previous output. The spender address is recoverable
// from the input's unlocking data on every supported chain, so it is
// carried explicitly; the spent VALUE is not, which is what forces the
// unresolved-transaction machinery upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct TxInput {
    pub prev_hash: TxHash,
    pub prev_index: u32,
    pub spender: Address,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TxOutput {
    pub value: U256,
    pub target: Address,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TxBody {
    Utxo {
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
    },
    Account {
        source: Address,
        target: Address,
        value: U256,
        fee: U256,
        // Nonce or sequence number, whatever the chain calls it
        counter: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTransaction {
    pub chain: ChainType,
    pub body: TxBody,
    // Account-level signature; UTXO signatures sit on the inputs
    pub signature: Option<Vec<u8>>,
}

impl ParsedTransaction {
    // The identity hash covers everything except unlocking data, so it
    // is stable across signing
    pub fn hash(&self) -> TxHash {
        TxHash::new(self.chain, digest(&self.preimage()))
    }

    pub fn is_signed(&self) -> bool {
        match &self.body {
            TxBody::Utxo { inputs, .. } => {
                !inputs.is_empty() && inputs.iter().all(|input| !input.signature.is_empty())
            }
            TxBody::Account { .. } => self.signature.is_some(),
        }
    }

    pub fn preimage(&self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.write_u8(CODEC_VERSION);
        self.chain.write(&mut writer);
        match &self.body {
            TxBody::Utxo { inputs, outputs } => {
                writer.write_u8(0);
                writer.write_u16(inputs.len() as u16);
                for input in inputs {
                    writer.write_bytes(input.prev_hash.as_bytes());
                    writer.write_u32(input.prev_index);
                    input.spender.write(&mut writer);
                }
                writer.write_u16(outputs.len() as u16);
                for output in outputs {
                    output.value.write(&mut writer);
                    output.target.write(&mut writer);
                }
            }
            TxBody::Account {
                source,
                target,
                value,
                fee,
                counter,
            } => {
                writer.write_u8(1);
                source.write(&mut writer);
                target.write(&mut writer);
                value.write(&mut writer);
                fee.write(&mut writer);
                writer.write_u64(*counter);
            }
        }
        writer.into_bytes()
    }
}

impl Serializer for TxInput {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let chain = ChainType::read(reader)?;
        let bytes = reader.read_array::<32>()?;
        let prev_hash = TxHash::new(chain, bytes);
        let prev_index = reader.read_u32()?;
        let spender = Address::read(reader)?;
        let signature = reader.read_blob()?;
        Ok(Self {
            prev_hash,
            prev_index,
            spender,
            signature,
        })
    }

    fn write(&self, writer: &mut Writer) {
        self.prev_hash.chain().write(writer);
        writer.write_bytes(self.prev_hash.as_bytes());
        writer.write_u32(self.prev_index);
        self.spender.write(writer);
        writer.write_blob(&self.signature);
    }
}

impl Serializer for TxOutput {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let value = U256::read(reader)?;
        let target = Address::read(reader)?;
        Ok(Self { value, target })
    }

    fn write(&self, writer: &mut Writer) {
        self.value.write(writer);
        self.target.write(writer);
    }
}

impl Serializer for ParsedTransaction {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let version = reader.read_u8()?;
        if version != CODEC_VERSION {
            return Err(ReaderError::InvalidValue);
        }
        let chain = ChainType::read(reader)?;
        let body = match reader.read_u8()? {
            0 => {
                let input_count = reader.read_u16()? as usize;
                let mut inputs = Vec::with_capacity(input_count);
                for _ in 0..input_count {
                    inputs.push(TxInput::read(reader)?);
                }
                let output_count = reader.read_u16()? as usize;
                let mut outputs = Vec::with_capacity(output_count);
                for _ in 0..output_count {
                    outputs.push(TxOutput::read(reader)?);
                }
                TxBody::Utxo { inputs, outputs }
            }
            1 => {
                let source = Address::read(reader)?;
                let target = Address::read(reader)?;
                let value = U256::read(reader)?;
                let fee = U256::read(reader)?;
                let counter = reader.read_u64()?;
                TxBody::Account {
                    source,
                    target,
                    value,
                    fee,
                    counter,
                }
            }
            _ => return Err(ReaderError::InvalidValue),
        };
        let signature = Option::<Vec<u8>>::read(reader)?;

        Ok(Self {
            chain,
            body,
            signature,
        })
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(CODEC_VERSION);
        self.chain.write(writer);
        match &self.body {
            TxBody::Utxo { inputs, outputs } => {
                writer.write_u8(0);
                writer.write_u16(inputs.len() as u16);
                for input in inputs {
                    input.write(writer);
                }
                writer.write_u16(outputs.len() as u16);
                for output in outputs {
                    output.write(writer);
                }
            }
            TxBody::Account {
                source,
                target,
                value,
                fee,
                counter,
            } => {
                writer.write_u8(1);
                source.write(writer);
                target.write(writer);
                value.write(writer);
                fee.write(writer);
                writer.write_u64(*counter);
            }
        }
        self.signature.write(writer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_address(tag: u8) -> Address {
        Address::from_parts(
            ChainType::Bitcoin,
            None,
            vec![tag; 20],
            format!("addr-{}", tag),
        )
    }

    fn sample_tx() -> ParsedTransaction {
        ParsedTransaction {
            chain: ChainType::Bitcoin,
            body: TxBody::Utxo {
                inputs: vec![TxInput {
                    prev_hash: TxHash::new(ChainType::Bitcoin, digest(b"prev")),
                    prev_index: 1,
                    spender: sample_address(1),
                    signature: vec![],
                }],
                outputs: vec![TxOutput {
                    value: U256::from(50_000u64),
                    target: sample_address(2),
                }],
            },
            signature: None,
        }
    }

    #[test]
    fn test_round_trip() {
        let tx = sample_tx();
        let restored = ParsedTransaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(restored, tx);
    }

    #[test]
    fn test_hash_stable_across_signing() {
        let unsigned = sample_tx();
        let mut signed = unsigned.clone();
        if let TxBody::Utxo { inputs, .. } = &mut signed.body {
            inputs[0].signature = vec![0xAA; 64];
        }
        assert_eq!(unsigned.hash(), signed.hash());
        assert!(!unsigned.is_signed());
        assert!(signed.is_signed());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = sample_tx().to_bytes();
        bytes[0] = 99;
        assert!(ParsedTransaction::from_bytes(&bytes).is_err());
    }
}

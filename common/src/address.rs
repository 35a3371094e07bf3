use crate::{
    chain::{AddressScheme, ChainType},
    serializer::{Reader, ReaderError, Serializer, Writer},
};
use std::{
    fmt::{Display, Error, Formatter},
    hash::Hasher,
};

// A chain-tagged address. Parsing and rendering rules live in the chain
// handlers; this type only guarantees that equality means byte-identical
// payload on the same chain, and that the rendered form is stable.
#[derive(Debug, Clone)]
pub struct Address {
    chain: ChainType,
    scheme: Option<AddressScheme>,
    payload: Vec<u8>,
    rendered: String,
}

impl Address {
    pub fn from_parts(
        chain: ChainType,
        scheme: Option<AddressScheme>,
        payload: Vec<u8>,
        rendered: String,
    ) -> Self {
        Self {
            chain,
            scheme,
            payload,
            rendered,
        }
    }

    pub fn chain(&self) -> ChainType {
        self.chain
    }

    pub fn scheme(&self) -> Option<AddressScheme> {
        self.scheme
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn rendered(&self) -> &str {
        &self.rendered
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.chain == other.chain && self.payload == other.payload
    }
}

impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.chain.hash(state);
        self.payload.hash(state);
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.rendered)
    }
}

impl Serializer for Address {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let chain = ChainType::read(reader)?;
        let scheme = Option::<u8>::read(reader)?
            .map(|id| match id {
                0 => Ok(AddressScheme::Native),
                1 => Ok(AddressScheme::Legacy),
                _ => Err(ReaderError::InvalidValue),
            })
            .transpose()?;
        let len = reader.read_u16()? as usize;
        let payload = reader.read_bytes_vec(len)?;
        let rendered = reader.read_string()?;

        Ok(Self {
            chain,
            scheme,
            payload,
            rendered,
        })
    }

    fn write(&self, writer: &mut Writer) {
        self.chain.write(writer);
        self.scheme
            .map(|s| match s {
                AddressScheme::Native => 0u8,
                AddressScheme::Legacy => 1u8,
            })
            .write(writer);
        writer.write_u16(self.payload.len() as u16);
        writer.write_bytes(&self.payload);
        writer.write_string(&self.rendered);
    }
}

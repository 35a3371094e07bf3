mod reader;
mod writer;

pub use reader::{Reader, ReaderError};
pub use writer::Writer;

use primitive_types::U256;

// Binary wire/persistence framework used by every stored entity and by
// the account serialization format. JSON-facing types use serde instead.
pub trait Serializer: Sized {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError>;

    fn write(&self, writer: &mut Writer);

    fn size(&self) -> usize {
        let mut writer = Writer::new();
        self.write(&mut writer);
        writer.len()
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::with_capacity(self.size());
        self.write(&mut writer);
        writer.into_bytes()
    }

    // Reads a value and requires the input to be fully consumed
    fn from_bytes(bytes: &[u8]) -> Result<Self, ReaderError> {
        let mut reader = Reader::new(bytes);
        let value = Self::read(&mut reader)?;
        if reader.size() != 0 {
            return Err(ReaderError::TrailingBytes(reader.size()));
        }
        Ok(value)
    }
}

impl Serializer for u8 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u8()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(*self);
    }
}

impl Serializer for u16 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u16()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u16(*self);
    }
}

impl Serializer for u32 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u32()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u32(*self);
    }
}

impl Serializer for u64 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u64()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u64(*self);
    }
}

impl Serializer for bool {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_bool()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_bool(*self);
    }
}

impl Serializer for String {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_string()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_string(self);
    }
}

impl Serializer for Vec<u8> {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_blob()
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_blob(self);
    }
}

impl<T: Serializer> Serializer for Option<T> {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_bool()? {
            true => Ok(Some(T::read(reader)?)),
            false => Ok(None),
        }
    }

    fn write(&self, writer: &mut Writer) {
        match self {
            Some(value) => {
                writer.write_bool(true);
                value.write(writer);
            }
            None => writer.write_bool(false),
        }
    }
}

// Stored as 32 big-endian bytes
impl Serializer for U256 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes(32)?;
        Ok(U256::from_big_endian(bytes))
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.to_big_endian());
    }

    fn size(&self) -> usize {
        32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_round_trip() {
        let value: Option<u64> = Some(42);
        let bytes = value.to_bytes();
        assert_eq!(Option::<u64>::from_bytes(&bytes).unwrap(), Some(42));

        let none: Option<u64> = None;
        assert_eq!(Option::<u64>::from_bytes(&none.to_bytes()).unwrap(), None);
    }

    #[test]
    fn test_from_bytes_rejects_trailing() {
        let mut bytes = 7u32.to_bytes();
        bytes.push(0);
        assert!(u32::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_u256_round_trip() {
        let value = U256::from(123_456_789_u64);
        let bytes = value.to_bytes();
        assert_eq!(bytes.len(), 32);
        assert_eq!(U256::from_bytes(&bytes).unwrap(), value);
    }
}

//! Canonical little-endian byte encoding, compatible with the node's `bytesrepr` format.
//!
//! Only encoding is provided: deploys are built locally and hashed, the node never sends raw
//! `bytesrepr` back over JSON-RPC.

use primitive_types::{U256, U512};
use thiserror::Error;

/// Length in bytes of a serialized `u32` length prefix.
pub const U32_SERIALIZED_LENGTH: usize = 4;
/// Length in bytes of a serialized `u64`.
pub const U64_SERIALIZED_LENGTH: usize = 8;

const OPTION_NONE_TAG: u8 = 0;
const OPTION_SOME_TAG: u8 = 1;

/// Serialization failure.
#[derive(Copy, Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A collection or byte string is longer than a `u32` length prefix can describe.
    #[error("serialized length {0} does not fit in a u32 length prefix")]
    LengthOverflow(usize),
}

/// Types which can be written in the canonical byte encoding.
pub trait ToBytes {
    /// Appends the canonical encoding of `self` to `writer`.
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), Error>;

    /// Number of bytes `write_bytes` will append.
    fn serialized_length(&self) -> usize;

    /// Serializes `self` into a freshly allocated buffer.
    fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut buffer = Vec::with_capacity(self.serialized_length());
        self.write_bytes(&mut buffer)?;
        Ok(buffer)
    }
}

pub(crate) fn write_length(length: usize, writer: &mut Vec<u8>) -> Result<(), Error> {
    let length = u32::try_from(length).map_err(|_| Error::LengthOverflow(length))?;
    writer.extend_from_slice(&length.to_le_bytes());
    Ok(())
}

/// Writes `bytes` with a `u32` length prefix.
pub(crate) fn write_byte_string(bytes: &[u8], writer: &mut Vec<u8>) -> Result<(), Error> {
    write_length(bytes.len(), writer)?;
    writer.extend_from_slice(bytes);
    Ok(())
}

impl ToBytes for u8 {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), Error> {
        writer.push(*self);
        Ok(())
    }

    fn serialized_length(&self) -> usize {
        1
    }
}

impl ToBytes for bool {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), Error> {
        writer.push(u8::from(*self));
        Ok(())
    }

    fn serialized_length(&self) -> usize {
        1
    }
}

macro_rules! impl_to_bytes_for_int {
    ($($ty:ty),*) => {
        $(
            impl ToBytes for $ty {
                fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), Error> {
                    writer.extend_from_slice(&self.to_le_bytes());
                    Ok(())
                }

                fn serialized_length(&self) -> usize {
                    std::mem::size_of::<$ty>()
                }
            }
        )*
    };
}

impl_to_bytes_for_int!(i32, i64, u32, u64, u128);

impl ToBytes for str {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), Error> {
        write_byte_string(self.as_bytes(), writer)
    }

    fn serialized_length(&self) -> usize {
        U32_SERIALIZED_LENGTH + self.len()
    }
}

impl ToBytes for String {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), Error> {
        self.as_str().write_bytes(writer)
    }

    fn serialized_length(&self) -> usize {
        self.as_str().serialized_length()
    }
}

impl<const N: usize> ToBytes for [u8; N] {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), Error> {
        writer.extend_from_slice(self);
        Ok(())
    }

    fn serialized_length(&self) -> usize {
        N
    }
}

impl<T: ToBytes> ToBytes for Vec<T> {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), Error> {
        write_length(self.len(), writer)?;
        for item in self {
            item.write_bytes(writer)?;
        }
        Ok(())
    }

    fn serialized_length(&self) -> usize {
        U32_SERIALIZED_LENGTH + self.iter().map(ToBytes::serialized_length).sum::<usize>()
    }
}

impl<T: ToBytes> ToBytes for Option<T> {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), Error> {
        match self {
            None => writer.push(OPTION_NONE_TAG),
            Some(value) => {
                writer.push(OPTION_SOME_TAG);
                value.write_bytes(writer)?;
            }
        }
        Ok(())
    }

    fn serialized_length(&self) -> usize {
        1 + self.as_ref().map_or(0, ToBytes::serialized_length)
    }
}

macro_rules! impl_to_bytes_for_big_uint {
    ($($ty:ty),*) => {
        $(
            impl ToBytes for $ty {
                fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), Error> {
                    let length = significant_bytes(self.bits());
                    writer.push(length as u8);
                    writer.extend((0..length).map(|index| self.byte(index)));
                    Ok(())
                }

                fn serialized_length(&self) -> usize {
                    1 + significant_bytes(self.bits())
                }
            }
        )*
    };
}

impl_to_bytes_for_big_uint!(U256, U512);

fn significant_bytes(bits: usize) -> usize {
    (bits + 7) / 8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_prefix_strings_with_their_length() {
        assert_eq!("abc".to_bytes().unwrap(), vec![3, 0, 0, 0, b'a', b'b', b'c']);
        assert_eq!(String::new().to_bytes().unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn should_encode_integers_little_endian() {
        assert_eq!(1_u32.to_bytes().unwrap(), vec![1, 0, 0, 0]);
        assert_eq!(
            0x0102_0304_0506_0708_u64.to_bytes().unwrap(),
            vec![8, 7, 6, 5, 4, 3, 2, 1]
        );
        assert_eq!((-1_i32).to_bytes().unwrap(), vec![0xff; 4]);
    }

    #[test]
    fn should_encode_options_with_tag() {
        assert_eq!(None::<u8>.to_bytes().unwrap(), vec![0]);
        assert_eq!(Some(7_u8).to_bytes().unwrap(), vec![1, 7]);
    }

    #[test]
    fn should_prefix_vectors_with_their_count() {
        let items = vec![String::from("a"), String::from("bc")];
        assert_eq!(
            items.to_bytes().unwrap(),
            vec![2, 0, 0, 0, 1, 0, 0, 0, b'a', 2, 0, 0, 0, b'b', b'c']
        );
        assert_eq!(items.serialized_length(), 15);
    }

    #[test]
    fn should_trim_big_uints_to_significant_bytes() {
        assert_eq!(U512::zero().to_bytes().unwrap(), vec![0]);
        assert_eq!(U256::from(255).to_bytes().unwrap(), vec![1, 255]);
        assert_eq!(U256::from(256).to_bytes().unwrap(), vec![2, 0, 1]);
        // 200_000_000_000 == 0x2e_90ed_d000
        assert_eq!(
            U512::from(200_000_000_000_u64).to_bytes().unwrap(),
            vec![5, 0x00, 0xd0, 0xed, 0x90, 0x2e]
        );
        assert_eq!(U256::MAX.serialized_length(), 33);
    }
}

use std::{
    array::TryFromSliceError,
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use blake2::{digest::consts::U32, Blake2b, Digest as _};
use hex_fmt::HexFmt;
use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize, Serializer};

use crate::bytesrepr::{self, ToBytes};

type Blake2b256 = Blake2b<U32>;

/// The output of the hash function.
#[derive(Copy, Clone, Default, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct Digest([u8; Digest::LENGTH]);

impl Digest {
    /// The number of bytes in a `Digest`.
    pub const LENGTH: usize = 32;

    /// Hashes `data` with blake2b-256.
    pub fn hash<T: AsRef<[u8]>>(data: T) -> Digest {
        Digest(Blake2b256::digest(data.as_ref()).into())
    }

    pub fn value(&self) -> [u8; Digest::LENGTH] {
        self.0
    }

    /// Lower-case hex encoding of the full digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl From<[u8; Digest::LENGTH]> for Digest {
    fn from(arr: [u8; Digest::LENGTH]) -> Self {
        Digest(arr)
    }
}

impl<'a> TryFrom<&'a [u8]> for Digest {
    type Error = TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Digest, Self::Error> {
        <[u8; Digest::LENGTH]>::try_from(slice).map(Digest)
    }
}

/// Failure to parse a hex-encoded digest.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DigestParseError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected {} bytes, got {0}", Digest::LENGTH)]
    Length(usize),
}

impl FromStr for Digest {
    type Err = DigestParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(input)?;
        Digest::try_from(bytes.as_slice()).map_err(|_| DigestParseError::Length(bytes.len()))
    }
}

impl ToBytes for Digest {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        self.0.write_bytes(writer)
    }

    fn serialized_length(&self) -> usize {
        Digest::LENGTH
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex_string = String::deserialize(deserializer)?;
        Digest::from_str(&hex_string).map_err(SerdeError::custom)
    }
}

impl Debug for Digest {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", HexFmt(&self.0))
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", HexFmt(&self.0))
    }
}

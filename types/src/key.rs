use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::{
    bytesrepr::{self, ToBytes},
    AccountHash, Digest,
};

const ACCOUNT_TAG: u8 = 0;
const HASH_TAG: u8 = 1;

const HASH_PREFIX: &str = "hash-";

/// A global state key, limited to the variants a deploy argument or a query needs.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Account(AccountHash),
    Hash([u8; Digest::LENGTH]),
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum KeyFromStrError {
    #[error("unknown key prefix in '{0}'")]
    UnknownPrefix(String),
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("expected 32 bytes, got {0}")]
    Length(usize),
}

impl Key {
    /// The formatted string the node's JSON API uses, e.g. `hash-0a1b..`.
    pub fn to_formatted_string(&self) -> String {
        match self {
            Key::Account(account_hash) => account_hash.to_string(),
            Key::Hash(hash) => format!("{}{}", HASH_PREFIX, hex::encode(hash)),
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            Key::Account(_) => ACCOUNT_TAG,
            Key::Hash(_) => HASH_TAG,
        }
    }

    fn raw(&self) -> &[u8; Digest::LENGTH] {
        match self {
            Key::Account(AccountHash(raw)) | Key::Hash(raw) => raw,
        }
    }
}

fn parse_hash(hex_part: &str) -> Result<[u8; Digest::LENGTH], KeyFromStrError> {
    let bytes = hex::decode(hex_part)?;
    <[u8; Digest::LENGTH]>::try_from(bytes.as_slice())
        .map_err(|_| KeyFromStrError::Length(bytes.len()))
}

impl FromStr for Key {
    type Err = KeyFromStrError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if let Some(hex_part) = input.strip_prefix(AccountHash::PREFIX) {
            return parse_hash(hex_part).map(|raw| Key::Account(AccountHash(raw)));
        }
        if let Some(hex_part) = input.strip_prefix(HASH_PREFIX) {
            return parse_hash(hex_part).map(Key::Hash);
        }
        Err(KeyFromStrError::UnknownPrefix(input.to_string()))
    }
}

impl ToBytes for Key {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        writer.push(self.tag());
        self.raw().write_bytes(writer)
    }

    fn serialized_length(&self) -> usize {
        1 + Digest::LENGTH
    }
}

impl Display for Key {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.to_formatted_string())
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Key({})", self.to_formatted_string())
    }
}

impl Serialize for Key {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_formatted_string().serialize(serializer)
    }
}

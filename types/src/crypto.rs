//! Public keys, signatures and signature verification.
//!
//! Keys and signatures are tagged with their algorithm the way the network expects: `01` for
//! Ed25519 and `02` for Secp256k1, both in the byte encoding and as a hex prefix in JSON.

use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use ed25519_dalek::Verifier as _;
use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::{
    bytesrepr::{self, ToBytes},
    Digest,
};

pub const ED25519_TAG: u8 = 1;
pub const SECP256K1_TAG: u8 = 2;

const ED25519_PUBLIC_KEY_LENGTH: usize = 32;
const SECP256K1_COMPRESSED_PUBLIC_KEY_LENGTH: usize = 33;
const SIGNATURE_LENGTH: usize = 64;

const ED25519_LOWERCASE: &str = "ed25519";
const SECP256K1_LOWERCASE: &str = "secp256k1";

#[derive(Clone, Debug, Error, PartialEq)]
pub enum CryptoError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    #[error("empty key or signature")]
    Empty,
    #[error("unknown algorithm tag {0}")]
    UnknownTag(u8),
    #[error("invalid {algorithm} public key")]
    InvalidPublicKey { algorithm: &'static str },
    #[error("invalid signature length {0}")]
    InvalidSignatureLength(usize),
    #[error("signature and public key algorithms do not match")]
    AlgorithmMismatch,
    #[error("signature verification failed")]
    VerificationFailed,
}

/// A signer's public key.
#[derive(Clone, PartialEq, Eq)]
pub enum PublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    Secp256k1(k256::ecdsa::VerifyingKey),
}

impl PublicKey {
    /// Builds an Ed25519 key from its 32 raw bytes.
    pub fn ed25519_from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let invalid = || CryptoError::InvalidPublicKey {
            algorithm: ED25519_LOWERCASE,
        };
        let raw: [u8; ED25519_PUBLIC_KEY_LENGTH] = bytes.try_into().map_err(|_| invalid())?;
        ed25519_dalek::VerifyingKey::from_bytes(&raw)
            .map(PublicKey::Ed25519)
            .map_err(|_| invalid())
    }

    /// Builds a Secp256k1 key from its SEC1 encoding.
    pub fn secp256k1_from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        k256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
            .map(PublicKey::Secp256k1)
            .map_err(|_| CryptoError::InvalidPublicKey {
                algorithm: SECP256K1_LOWERCASE,
            })
    }

    pub fn tag(&self) -> u8 {
        match self {
            PublicKey::Ed25519(_) => ED25519_TAG,
            PublicKey::Secp256k1(_) => SECP256K1_TAG,
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        match self {
            PublicKey::Ed25519(_) => ED25519_LOWERCASE,
            PublicKey::Secp256k1(_) => SECP256K1_LOWERCASE,
        }
    }

    /// Raw key bytes without the algorithm tag; Secp256k1 keys are SEC1-compressed.
    pub fn raw_bytes(&self) -> Vec<u8> {
        match self {
            PublicKey::Ed25519(key) => key.to_bytes().to_vec(),
            PublicKey::Secp256k1(key) => key.to_encoded_point(true).as_bytes().to_vec(),
        }
    }

    /// Tag-prefixed lower-case hex, the form used by the node's JSON API.
    pub fn to_hex(&self) -> String {
        let mut bytes = vec![self.tag()];
        bytes.extend(self.raw_bytes());
        hex::encode(bytes)
    }

    /// The account hash is `blake2b256(algorithm_name || 0x00 || raw_key)`.
    pub fn to_account_hash(&self) -> AccountHash {
        let mut preimage = self.algorithm_name().as_bytes().to_vec();
        preimage.push(0);
        preimage.extend(self.raw_bytes());
        AccountHash(Digest::hash(preimage).value())
    }
}

impl FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(input)?;
        let (tag, raw) = bytes.split_first().ok_or(CryptoError::Empty)?;
        match *tag {
            ED25519_TAG => PublicKey::ed25519_from_bytes(raw),
            SECP256K1_TAG => PublicKey::secp256k1_from_bytes(raw),
            other => Err(CryptoError::UnknownTag(other)),
        }
    }
}

impl ToBytes for PublicKey {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        writer.push(self.tag());
        writer.extend(self.raw_bytes());
        Ok(())
    }

    fn serialized_length(&self) -> usize {
        1 + match self {
            PublicKey::Ed25519(_) => ED25519_PUBLIC_KEY_LENGTH,
            PublicKey::Secp256k1(_) => SECP256K1_COMPRESSED_PUBLIC_KEY_LENGTH,
        }
    }
}

impl Display for PublicKey {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "PublicKey::{}({})", self.algorithm_name(), self.to_hex())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex_string = String::deserialize(deserializer)?;
        PublicKey::from_str(&hex_string).map_err(SerdeError::custom)
    }
}

/// A signature over a deploy hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Signature {
    Ed25519([u8; SIGNATURE_LENGTH]),
    Secp256k1([u8; SIGNATURE_LENGTH]),
}

impl Signature {
    pub fn tag(&self) -> u8 {
        match self {
            Signature::Ed25519(_) => ED25519_TAG,
            Signature::Secp256k1(_) => SECP256K1_TAG,
        }
    }

    pub fn raw_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        match self {
            Signature::Ed25519(bytes) | Signature::Secp256k1(bytes) => bytes,
        }
    }

    pub fn to_hex(&self) -> String {
        let mut bytes = vec![self.tag()];
        bytes.extend_from_slice(self.raw_bytes());
        hex::encode(bytes)
    }
}

impl FromStr for Signature {
    type Err = CryptoError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(input)?;
        let (tag, raw) = bytes.split_first().ok_or(CryptoError::Empty)?;
        let raw: [u8; SIGNATURE_LENGTH] = raw
            .try_into()
            .map_err(|_| CryptoError::InvalidSignatureLength(raw.len()))?;
        match *tag {
            ED25519_TAG => Ok(Signature::Ed25519(raw)),
            SECP256K1_TAG => Ok(Signature::Secp256k1(raw)),
            other => Err(CryptoError::UnknownTag(other)),
        }
    }
}

impl ToBytes for Signature {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        writer.push(self.tag());
        writer.extend_from_slice(self.raw_bytes());
        Ok(())
    }

    fn serialized_length(&self) -> usize {
        1 + SIGNATURE_LENGTH
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{:10}", hex_fmt::HexFmt(self.raw_bytes()))
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_hex().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex_string = String::deserialize(deserializer)?;
        Signature::from_str(&hex_string).map_err(SerdeError::custom)
    }
}

/// Verifies `signature` over `message` against `public_key`.
pub fn verify<T: AsRef<[u8]>>(
    message: T,
    signature: &Signature,
    public_key: &PublicKey,
) -> Result<(), CryptoError> {
    match (signature, public_key) {
        (Signature::Ed25519(raw), PublicKey::Ed25519(key)) => {
            let signature = ed25519_dalek::Signature::from_bytes(raw);
            key.verify(message.as_ref(), &signature)
                .map_err(|_| CryptoError::VerificationFailed)
        }
        (Signature::Secp256k1(raw), PublicKey::Secp256k1(key)) => {
            let signature = k256::ecdsa::Signature::from_slice(raw)
                .map_err(|_| CryptoError::VerificationFailed)?;
            key.verify(message.as_ref(), &signature)
                .map_err(|_| CryptoError::VerificationFailed)
        }
        _ => Err(CryptoError::AlgorithmMismatch),
    }
}

/// The hash identifying an account, derived from its public key.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountHash(pub [u8; 32]);

impl AccountHash {
    pub const PREFIX: &'static str = "account-hash-";
}

impl Display for AccountHash {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, hex::encode(self.0))
    }
}

impl Debug for AccountHash {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::Signer as _;

    use super::*;

    #[test]
    fn should_round_trip_ed25519_public_key_through_hex() {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&[7; 32]);
        let public_key = PublicKey::Ed25519(signing_key.verifying_key());

        let hex = public_key.to_hex();
        assert!(hex.starts_with("01"));
        assert_eq!(hex.len(), 66);
        assert_eq!(hex.parse::<PublicKey>().unwrap(), public_key);
        assert_eq!(public_key.to_bytes().unwrap().len(), 33);
    }

    #[test]
    fn should_round_trip_secp256k1_public_key_through_hex() {
        let signing_key = k256::ecdsa::SigningKey::from_slice(&[9; 32]).unwrap();
        let public_key = PublicKey::Secp256k1(k256::ecdsa::VerifyingKey::from(&signing_key));

        let hex = public_key.to_hex();
        assert!(hex.starts_with("02"));
        assert_eq!(hex.len(), 68);
        assert_eq!(hex.parse::<PublicKey>().unwrap(), public_key);
        assert_eq!(public_key.serialized_length(), 34);
    }

    #[test]
    fn should_reject_unknown_tags() {
        let input = format!("03{}", "00".repeat(32));
        assert_eq!(
            input.parse::<PublicKey>(),
            Err(CryptoError::UnknownTag(3))
        );
        assert_eq!("".parse::<Signature>(), Err(CryptoError::Empty));
    }

    #[test]
    fn should_verify_and_reject_tampered_ed25519_signature() {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&[3; 32]);
        let public_key = PublicKey::Ed25519(signing_key.verifying_key());
        let signature = Signature::Ed25519(signing_key.sign(b"message").to_bytes());

        assert!(verify(b"message", &signature, &public_key).is_ok());
        assert_eq!(
            verify(b"messagf", &signature, &public_key),
            Err(CryptoError::VerificationFailed)
        );
    }

    #[test]
    fn should_refuse_mixed_algorithms() {
        let secp_key = k256::ecdsa::SigningKey::from_slice(&[5; 32]).unwrap();
        let public_key = PublicKey::Secp256k1(k256::ecdsa::VerifyingKey::from(&secp_key));
        let signature = Signature::Ed25519([0; 64]);
        assert_eq!(
            verify(b"message", &signature, &public_key),
            Err(CryptoError::AlgorithmMismatch)
        );
    }

    #[test]
    fn should_derive_account_hash_from_algorithm_and_key() {
        let signing_key = ed25519_dalek::SigningKey::from_bytes(&[1; 32]);
        let public_key = PublicKey::Ed25519(signing_key.verifying_key());

        let mut preimage = b"ed25519".to_vec();
        preimage.push(0);
        preimage.extend(signing_key.verifying_key().to_bytes());
        let expected = AccountHash(Digest::hash(preimage).value());

        assert_eq!(public_key.to_account_hash(), expected);
        assert!(expected.to_string().starts_with("account-hash-"));
    }
}

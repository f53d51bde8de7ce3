//! Holds the signing key of the deploying account.
//!
//! Secret material lives only inside [`KeyStore`]; the underlying `ed25519-dalek` and `k256`
//! signing keys zero their memory on drop, and every intermediate buffer holding decoded key
//! bytes is wrapped in [`Zeroizing`].

use std::{
    fmt::{self, Debug, Formatter},
    fs,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{pkcs8::DecodePrivateKey as _, Signer as _};
use k256::ecdsa::signature::Signer as _;
use thiserror::Error;
use tracing::debug;
use zeroize::Zeroizing;

use casper_deploy_types::{verify, AccountHash, CryptoError, PublicKey, Signature};

const PKCS8_LABEL: &str = "PRIVATE KEY";
const SEC1_LABEL: &str = "EC PRIVATE KEY";

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("failed to read secret key file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid secret key: {0}")]
    InvalidKeyFormat(String),
}

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("signing backend failed: {0}")]
    Backend(String),
    #[error("produced signature does not verify: {0}")]
    Verification(#[from] CryptoError),
}

enum SecretKey {
    Ed25519(ed25519_dalek::SigningKey),
    Secp256k1(k256::ecdsa::SigningKey),
}

/// A loaded keypair. `sign` takes `&self`, so one store can be shared across tasks.
pub struct KeyStore {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl KeyStore {
    /// Loads a secret key from PEM, or from headerless base64 or raw PKCS#8 DER.
    pub fn load(source: &[u8]) -> Result<Self, KeyStoreError> {
        let secret_key = match std::str::from_utf8(source) {
            Ok(text) if text.contains("-----BEGIN") => parse_pem(text)?,
            Ok(text) => parse_headerless(text)?,
            Err(_) => parse_der(source)?,
        };
        Ok(KeyStore::from_secret_key(secret_key))
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, KeyStoreError> {
        let path = path.as_ref();
        let contents = Zeroizing::new(fs::read(path).map_err(|source| KeyStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?);
        let key_store = KeyStore::load(&contents)?;
        debug!(path = %path.display(), public_key = %key_store.public_key, "loaded secret key");
        Ok(key_store)
    }

    pub fn from_ed25519_seed(seed: &[u8; ed25519_dalek::SECRET_KEY_LENGTH]) -> Self {
        KeyStore::from_secret_key(SecretKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(
            seed,
        )))
    }

    pub fn from_secp256k1_bytes(bytes: &[u8]) -> Result<Self, KeyStoreError> {
        let signing_key = k256::ecdsa::SigningKey::from_slice(bytes).map_err(|_| {
            KeyStoreError::InvalidKeyFormat("not a valid secp256k1 scalar".to_string())
        })?;
        Ok(KeyStore::from_secret_key(SecretKey::Secp256k1(signing_key)))
    }

    fn from_secret_key(secret_key: SecretKey) -> Self {
        let public_key = match &secret_key {
            SecretKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
            SecretKey::Secp256k1(key) => {
                PublicKey::Secp256k1(k256::ecdsa::VerifyingKey::from(key))
            }
        };
        KeyStore {
            secret_key,
            public_key,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn account_hash(&self) -> AccountHash {
        self.public_key.to_account_hash()
    }

    /// Signs `message`; the result is checked against the public key before it is returned.
    pub fn sign(&self, message: &[u8]) -> Result<Signature, SigningError> {
        let signature = match &self.secret_key {
            SecretKey::Ed25519(key) => Signature::Ed25519(key.sign(message).to_bytes()),
            SecretKey::Secp256k1(key) => {
                let signature: k256::ecdsa::Signature = key
                    .try_sign(message)
                    .map_err(|error| SigningError::Backend(error.to_string()))?;
                let mut raw = [0_u8; 64];
                raw.copy_from_slice(&signature.to_bytes());
                Signature::Secp256k1(raw)
            }
        };
        verify(message, &signature, &self.public_key)?;
        Ok(signature)
    }
}

impl Debug for KeyStore {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("public_key", &self.public_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

fn parse_pem(text: &str) -> Result<SecretKey, KeyStoreError> {
    if let Some(block) = pem_block(text, SEC1_LABEL) {
        return k256::SecretKey::from_sec1_pem(block)
            .map(|secret| SecretKey::Secp256k1(secret.into()))
            .map_err(|_| KeyStoreError::InvalidKeyFormat("malformed EC PRIVATE KEY".to_string()));
    }
    let block = pem_block(text, PKCS8_LABEL).ok_or_else(|| {
        KeyStoreError::InvalidKeyFormat("no PRIVATE KEY or EC PRIVATE KEY block".to_string())
    })?;
    if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_pem(block) {
        return Ok(SecretKey::Ed25519(key));
    }
    <k256::SecretKey as k256::pkcs8::DecodePrivateKey>::from_pkcs8_pem(block)
        .map(|secret| SecretKey::Secp256k1(secret.into()))
        .map_err(|_| {
            KeyStoreError::InvalidKeyFormat(
                "PRIVATE KEY is neither an ed25519 nor a secp256k1 key".to_string(),
            )
        })
}

/// Decodes the first base64 block, line by line, until the decoded bytes form a key. A
/// public key may follow the secret key on the next line without a blank line in between.
fn parse_headerless(text: &str) -> Result<SecretKey, KeyStoreError> {
    let mut encoded = Zeroizing::new(String::new());
    let mut last_error =
        KeyStoreError::InvalidKeyFormat("input is neither PEM nor base64".to_string());
    for line in text
        .lines()
        .map(str::trim)
        .skip_while(|line| line.is_empty())
        .take_while(|line| !line.is_empty())
    {
        encoded.push_str(line);
        let Ok(der) = STANDARD.decode(encoded.as_bytes()).map(Zeroizing::new) else {
            continue;
        };
        match parse_der(&der) {
            Ok(secret_key) => return Ok(secret_key),
            Err(error) => last_error = error,
        }
    }
    Err(last_error)
}

fn parse_der(der: &[u8]) -> Result<SecretKey, KeyStoreError> {
    if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_der(der) {
        return Ok(SecretKey::Ed25519(key));
    }
    if let Ok(secret) = <k256::SecretKey as k256::pkcs8::DecodePrivateKey>::from_pkcs8_der(der) {
        return Ok(SecretKey::Secp256k1(secret.into()));
    }
    k256::SecretKey::from_sec1_der(der)
        .map(|secret| SecretKey::Secp256k1(secret.into()))
        .map_err(|_| {
            KeyStoreError::InvalidKeyFormat("DER is not a PKCS#8 or SEC1 private key".to_string())
        })
}

/// The `label` block of `text`, armor lines included.
fn pem_block<'a>(text: &'a str, label: &str) -> Option<&'a str> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let start = text.find(&begin)?;
    let stop = start + text[start..].find(&end)? + end.len();
    Some(&text[start..stop])
}

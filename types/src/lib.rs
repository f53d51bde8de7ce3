#![deny(clippy::complexity)]
#![deny(clippy::cognitive_complexity)]
#![deny(clippy::too_many_lines)]

//! Data model of a Casper deploy: canonical encoding, hashing, keys, signatures and runtime
//! arguments.

pub mod bytesrepr;
mod cl_value;
mod crypto;
mod deploy;
mod digest;
mod executable_deploy_item;
mod key;
#[cfg(any(feature = "testing", test))]
pub mod testing;

pub use cl_value::{
    parse_session_arg, CLType, CLTyped, CLValue, NamedArg, RuntimeArgs, SessionArgError,
};
pub use crypto::{
    verify, AccountHash, CryptoError, PublicKey, Signature, ED25519_TAG, SECP256K1_TAG,
};
pub use deploy::{
    Approval, DeployBuildError, DeployBuilder, DeployHash, DeployHeader, DeployRequest,
    DeployValidationFailure, SignedDeploy, Timestamp, MAX_SERIALIZED_SIZE_OF_DEPLOY,
};
pub use digest::{Digest, DigestParseError};
pub use executable_deploy_item::{ExecutableDeployItem, ModuleBytes, ARG_AMOUNT};
pub use key::{Key, KeyFromStrError};
pub use primitive_types::{U256, U512};

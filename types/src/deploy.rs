use std::{
    fmt::{self, Display, Formatter},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use itertools::Itertools;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::{
    bytesrepr::{self, ToBytes, U64_SERIALIZED_LENGTH},
    crypto, CryptoError, Digest, ExecutableDeployItem, PublicKey, Signature,
};

/// The maximum permissible size in bytes of a Deploy when serialized via `ToBytes`.
///
/// Note: this should be kept in sync with the value of `[deploys.max_deploy_size]` in the
/// production chainspec.
pub const MAX_SERIALIZED_SIZE_OF_DEPLOY: u32 = 1_024 * 1_024;

/// Milliseconds since the Unix epoch.
#[derive(Copy, Clone, Default, Ord, PartialOrd, Eq, PartialEq, Hash, Debug)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Timestamp(millis)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    pub fn millis(&self) -> u64 {
        self.0
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Timestamp(self.0.saturating_add(millis))
    }

    /// Time left until `self`, or zero if it has passed.
    pub fn saturating_duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let system_time = UNIX_EPOCH + Duration::from_millis(self.0);
        write!(f, "{}", humantime::format_rfc3339_millis(system_time))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_string().serialize(serializer)
    }
}

impl ToBytes for Timestamp {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        self.0.write_bytes(writer)
    }

    fn serialized_length(&self) -> usize {
        U64_SERIALIZED_LENGTH
    }
}

/// A cryptographic hash uniquely identifying a deploy.
#[derive(
    Copy, Clone, Default, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize, Debug,
)]
pub struct DeployHash(Digest);

impl DeployHash {
    /// Returns a new `DeployHash`.
    pub fn new(digest: Digest) -> Self {
        DeployHash(digest)
    }

    /// Returns a copy of the wrapped `Digest`.
    pub fn inner(&self) -> Digest {
        self.0
    }
}

impl From<Digest> for DeployHash {
    fn from(digest: Digest) -> Self {
        Self(digest)
    }
}

impl From<DeployHash> for Digest {
    fn from(deploy_hash: DeployHash) -> Self {
        deploy_hash.0
    }
}

impl std::str::FromStr for DeployHash {
    type Err = crate::DigestParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        input.parse().map(DeployHash)
    }
}

impl Display for DeployHash {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl ToBytes for DeployHash {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        self.0.write_bytes(writer)
    }

    fn serialized_length(&self) -> usize {
        self.0.serialized_length()
    }
}

impl AsRef<[u8]> for DeployHash {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

/// The header portion of a deploy.
#[derive(Clone, Eq, PartialEq, Serialize, Debug)]
pub struct DeployHeader {
    account: PublicKey,
    timestamp: Timestamp,
    #[serde(serialize_with = "serialize_ttl")]
    ttl: Duration,
    gas_price: u64,
    body_hash: Digest,
    dependencies: Vec<DeployHash>,
    chain_name: String,
}

fn serialize_ttl<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    humantime::format_duration(*ttl)
        .to_string()
        .serialize(serializer)
}

impl DeployHeader {
    /// Returns the account within which the deploy will be run.
    pub fn account(&self) -> &PublicKey {
        &self.account
    }

    /// Returns the deploy creation timestamp.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns the duration for which the deploy will stay valid.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the price per gas unit for this deploy.
    pub fn gas_price(&self) -> u64 {
        self.gas_price
    }

    /// Returns the hash of the body of this deploy.
    pub fn body_hash(&self) -> Digest {
        self.body_hash
    }

    /// Other deploys that have to be run before this one.
    pub fn dependencies(&self) -> &[DeployHash] {
        &self.dependencies
    }

    /// Returns the chain name of the network the deploy is supposed to be run on.
    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }

    /// The instant after which the network drops the deploy if it has not been executed.
    pub fn expires_at(&self) -> Timestamp {
        self.timestamp.saturating_add(self.ttl)
    }
}

impl Display for DeployHeader {
    fn fmt(&self, formatter: &mut Formatter) -> fmt::Result {
        write!(
            formatter,
            "deploy header {{ account {}, timestamp {}, ttl {}, body hash {}, chain name {} }}",
            self.account,
            self.timestamp,
            humantime::format_duration(self.ttl),
            self.body_hash,
            self.chain_name,
        )
    }
}

impl ToBytes for DeployHeader {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        self.account.write_bytes(writer)?;
        self.timestamp.write_bytes(writer)?;
        ttl_millis(self.ttl).write_bytes(writer)?;
        self.gas_price.write_bytes(writer)?;
        self.body_hash.write_bytes(writer)?;
        self.dependencies.write_bytes(writer)?;
        self.chain_name.write_bytes(writer)
    }

    fn serialized_length(&self) -> usize {
        self.account.serialized_length()
            + self.timestamp.serialized_length()
            + U64_SERIALIZED_LENGTH
            + self.gas_price.serialized_length()
            + self.body_hash.serialized_length()
            + self.dependencies.serialized_length()
            + self.chain_name.serialized_length()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}

/// The signature of a deploy and the public key of the signer.
#[derive(Clone, Eq, PartialEq, Serialize, Debug)]
pub struct Approval {
    signer: PublicKey,
    signature: Signature,
}

impl Approval {
    pub fn new(signer: PublicKey, signature: Signature) -> Self {
        Self { signer, signature }
    }

    /// Returns the public key.
    pub fn signer(&self) -> &PublicKey {
        &self.signer
    }

    /// Returns the signature.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

impl ToBytes for Approval {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        self.signer.write_bytes(writer)?;
        self.signature.write_bytes(writer)
    }

    fn serialized_length(&self) -> usize {
        self.signer.serialized_length() + self.signature.serialized_length()
    }
}

/// Failure to assemble a deploy request.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeployBuildError {
    #[error("chain name must not be empty")]
    EmptyChainName,
    #[error("payment amount must be greater than zero")]
    ZeroPaymentAmount,
    #[error("failed to encode deploy: {0}")]
    Encoding(#[from] bytesrepr::Error),
}

/// A representation of the way in which a signed deploy failed validation checks.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum DeployValidationFailure {
    /// The deploy has no approvals.
    #[error("the deploy has no approvals")]
    EmptyApprovals,

    /// Invalid approval.
    #[error("the approval at index {index} is invalid: {error}")]
    InvalidApproval {
        /// The index of the approval at fault.
        index: usize,
        /// The approval validation error.
        error: CryptoError,
    },

    /// Deploy is too large.
    #[error("deploy size of {actual_deploy_size} bytes exceeds limit of {max_deploy_size}")]
    ExcessiveSize {
        /// The maximum permitted serialized deploy size, in bytes.
        max_deploy_size: u32,
        /// The serialized size of the deploy provided, in bytes.
        actual_deploy_size: usize,
    },

    #[error("failed to encode deploy: {0}")]
    Encoding(#[from] bytesrepr::Error),
}

/// An unsigned deploy. Its header and hash are fixed when it is built.
///
/// Construct one with [`DeployBuilder`].
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct DeployRequest {
    hash: DeployHash,
    header: DeployHeader,
    payment_amount: u64,
    payment: ExecutableDeployItem,
    session: ExecutableDeployItem,
}

impl DeployRequest {
    /// The default time-to-live for deploys, i.e. 30 minutes.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
    /// The default gas price for deploys, i.e. `1`.
    pub const DEFAULT_GAS_PRICE: u64 = 1;

    /// Returns the hash uniquely identifying this deploy.
    pub fn deploy_hash(&self) -> &DeployHash {
        &self.hash
    }

    /// Returns the header portion of the deploy.
    pub fn header(&self) -> &DeployHeader {
        &self.header
    }

    /// Returns the payment code of the deploy.
    pub fn payment(&self) -> &ExecutableDeployItem {
        &self.payment
    }

    /// Returns the session code of the deploy.
    pub fn session(&self) -> &ExecutableDeployItem {
        &self.session
    }

    pub fn payment_amount(&self) -> u64 {
        self.payment_amount
    }

    pub fn sender(&self) -> &PublicKey {
        &self.header.account
    }

    pub fn chain_name(&self) -> &str {
        &self.header.chain_name
    }

    /// The canonical bytes of the payment followed by the session; their hash is the body hash.
    pub fn body_bytes(&self) -> Result<Vec<u8>, bytesrepr::Error> {
        serialize_body(&self.payment, &self.session)
    }
}

/// Assembles a [`DeployRequest`] paid for with standard payment.
#[derive(Clone, Debug)]
pub struct DeployBuilder {
    chain_name: String,
    account: PublicKey,
    session: ExecutableDeployItem,
    payment_amount: u64,
    timestamp: Option<Timestamp>,
    ttl: Duration,
    gas_price: u64,
    dependencies: Vec<DeployHash>,
}

impl DeployBuilder {
    pub fn new(
        chain_name: impl Into<String>,
        account: PublicKey,
        session: ExecutableDeployItem,
    ) -> Self {
        DeployBuilder {
            chain_name: chain_name.into(),
            account,
            session,
            payment_amount: 0,
            timestamp: None,
            ttl: DeployRequest::DEFAULT_TTL,
            gas_price: DeployRequest::DEFAULT_GAS_PRICE,
            dependencies: vec![],
        }
    }

    /// Sets the standard payment amount in motes.
    pub fn with_payment_amount(mut self, payment_amount: u64) -> Self {
        self.payment_amount = payment_amount;
        self
    }

    /// Defaults to the time `build` is called.
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_gas_price(mut self, gas_price: u64) -> Self {
        self.gas_price = gas_price;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<DeployHash>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn build(self) -> Result<DeployRequest, DeployBuildError> {
        if self.chain_name.is_empty() {
            return Err(DeployBuildError::EmptyChainName);
        }
        if self.payment_amount == 0 {
            return Err(DeployBuildError::ZeroPaymentAmount);
        }
        let payment = ExecutableDeployItem::new_standard_payment(self.payment_amount)?;
        let body_hash = Digest::hash(serialize_body(&payment, &self.session)?);

        // Remove duplicates.
        let dependencies = self.dependencies.into_iter().unique().collect();
        let header = DeployHeader {
            account: self.account,
            timestamp: self.timestamp.unwrap_or_else(Timestamp::now),
            ttl: self.ttl,
            gas_price: self.gas_price,
            body_hash,
            dependencies,
            chain_name: self.chain_name,
        };
        let hash = DeployHash::new(Digest::hash(header.to_bytes()?));

        Ok(DeployRequest {
            hash,
            header,
            payment_amount: self.payment_amount,
            payment,
            session: self.session,
        })
    }
}

/// A signed item sent to the network used to request execution of Wasm.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct SignedDeploy {
    request: DeployRequest,
    approvals: Vec<Approval>,
}

impl SignedDeploy {
    /// Attaches `approvals` to `request`, checking every signature against the deploy hash.
    pub fn new(
        request: DeployRequest,
        approvals: Vec<Approval>,
    ) -> Result<Self, DeployValidationFailure> {
        let deploy = SignedDeploy {
            request,
            approvals,
        };
        deploy.verify()?;
        Ok(deploy)
    }

    /// Checks the approvals and the serialized size of the deploy.
    pub fn verify(&self) -> Result<(), DeployValidationFailure> {
        if self.approvals.is_empty() {
            return Err(DeployValidationFailure::EmptyApprovals);
        }
        for (index, approval) in self.approvals.iter().enumerate() {
            crypto::verify(self.request.hash, &approval.signature, &approval.signer)
                .map_err(|error| DeployValidationFailure::InvalidApproval { index, error })?;
        }
        let actual_deploy_size = self.serialized_length();
        if actual_deploy_size > MAX_SERIALIZED_SIZE_OF_DEPLOY as usize {
            return Err(DeployValidationFailure::ExcessiveSize {
                max_deploy_size: MAX_SERIALIZED_SIZE_OF_DEPLOY,
                actual_deploy_size,
            });
        }
        Ok(())
    }

    pub fn hash(&self) -> &DeployHash {
        &self.request.hash
    }

    pub fn header(&self) -> &DeployHeader {
        &self.request.header
    }

    pub fn request(&self) -> &DeployRequest {
        &self.request
    }

    pub fn approvals(&self) -> &[Approval] {
        &self.approvals
    }
}

impl ToBytes for SignedDeploy {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        self.request.hash.write_bytes(writer)?;
        self.request.header.write_bytes(writer)?;
        self.request.payment.write_bytes(writer)?;
        self.request.session.write_bytes(writer)?;
        self.approvals.write_bytes(writer)
    }

    fn serialized_length(&self) -> usize {
        self.request.hash.serialized_length()
            + self.request.header.serialized_length()
            + self.request.payment.serialized_length()
            + self.request.session.serialized_length()
            + self.approvals.serialized_length()
    }
}

impl Serialize for SignedDeploy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct DeployJson<'a> {
            hash: &'a DeployHash,
            header: &'a DeployHeader,
            payment: &'a ExecutableDeployItem,
            session: &'a ExecutableDeployItem,
            approvals: &'a [Approval],
        }

        DeployJson {
            hash: &self.request.hash,
            header: &self.request.header,
            payment: &self.request.payment,
            session: &self.request.session,
            approvals: &self.approvals,
        }
        .serialize(serializer)
    }
}

impl Display for SignedDeploy {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let header = &self.request.header;
        write!(
            formatter,
            "deploy {{ {}, account {}, timestamp {}, ttl {}, body hash {}, chain name {} }}",
            self.request.hash,
            header.account,
            header.timestamp,
            humantime::format_duration(header.ttl),
            header.body_hash,
            header.chain_name
        )
    }
}

fn serialize_body(
    payment: &ExecutableDeployItem,
    session: &ExecutableDeployItem,
) -> Result<Vec<u8>, bytesrepr::Error> {
    let mut buffer = Vec::with_capacity(payment.serialized_length() + session.serialized_length());
    payment.write_bytes(&mut buffer)?;
    session.write_bytes(&mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer as _, SigningKey};
    use serde_json::json;

    use super::*;
    use crate::RuntimeArgs;

    const TIMESTAMP: Timestamp = Timestamp::from_millis(1_704_067_200_000);

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[42; 32])
    }

    fn builder() -> DeployBuilder {
        let account = PublicKey::Ed25519(signing_key().verifying_key());
        let mut args = RuntimeArgs::new();
        args.insert("name", String::from("FerrumX")).unwrap();
        let session = ExecutableDeployItem::new_module_bytes(b"\0asm\x01\0\0\0".to_vec(), args);
        DeployBuilder::new("casper-test", account, session)
            .with_payment_amount(200_000_000_000)
            .with_timestamp(TIMESTAMP)
    }

    fn sign(request: DeployRequest) -> Result<SignedDeploy, DeployValidationFailure> {
        let key = signing_key();
        let signature = Signature::Ed25519(key.sign(request.deploy_hash().as_ref()).to_bytes());
        let approval = Approval::new(PublicKey::Ed25519(key.verifying_key()), signature);
        SignedDeploy::new(request, vec![approval])
    }

    #[test]
    fn should_hash_identical_requests_identically() {
        let first = builder().build().unwrap();
        let second = builder().build().unwrap();
        assert_eq!(first.header().to_bytes(), second.header().to_bytes());
        assert_eq!(first.deploy_hash(), second.deploy_hash());
        assert_eq!(first.body_bytes(), second.body_bytes());
    }

    #[test]
    fn should_derive_hashes_from_canonical_bytes() {
        let request = builder().build().unwrap();
        let body_hash = Digest::hash(request.body_bytes().unwrap());
        assert_eq!(request.header().body_hash(), body_hash);
        assert_eq!(
            request.deploy_hash().inner(),
            Digest::hash(request.header().to_bytes().unwrap())
        );

        let other = builder().with_gas_price(2).build().unwrap();
        assert_eq!(other.header().body_hash(), body_hash);
        assert_ne!(other.deploy_hash(), request.deploy_hash());
    }

    #[test]
    fn should_encode_header_fields_in_order() {
        let request = builder().build().unwrap();
        let bytes = request.header().to_bytes().unwrap();
        assert_eq!(bytes.len(), request.header().serialized_length());
        assert_eq!(bytes[0], crate::ED25519_TAG);
        assert_eq!(&bytes[33..41], &TIMESTAMP.millis().to_le_bytes());
        assert_eq!(&bytes[41..49], &1_800_000_u64.to_le_bytes());
        assert_eq!(&bytes[49..57], &1_u64.to_le_bytes());
        assert_eq!(&bytes[57..89], request.header().body_hash().as_ref());
        assert_eq!(&bytes[89..93], &[0, 0, 0, 0]);
        assert_eq!(&bytes[93..97], &11_u32.to_le_bytes());
        assert_eq!(&bytes[97..], b"casper-test");
    }

    #[test]
    fn should_deduplicate_dependencies() {
        let dependency = DeployHash::new(Digest::hash(b"dependency"));
        let request = builder()
            .with_dependencies(vec![dependency, dependency])
            .build()
            .unwrap();
        assert_eq!(request.header().dependencies(), &[dependency]);
    }

    #[test]
    fn should_reject_invalid_builder_input() {
        assert_eq!(
            builder().with_payment_amount(0).build(),
            Err(DeployBuildError::ZeroPaymentAmount)
        );
        let account = PublicKey::Ed25519(signing_key().verifying_key());
        let session = ExecutableDeployItem::new_module_bytes(vec![1], RuntimeArgs::new());
        assert_eq!(
            DeployBuilder::new("", account, session)
                .with_payment_amount(1)
                .build(),
            Err(DeployBuildError::EmptyChainName)
        );
    }

    #[test]
    fn should_accept_valid_approval_and_reject_foreign_signature() {
        let request = builder().build().unwrap();
        let deploy = sign(request.clone()).unwrap();
        assert_eq!(deploy.approvals().len(), 1);
        assert!(deploy.verify().is_ok());

        let foreign = SigningKey::from_bytes(&[7; 32]);
        let signature = Signature::Ed25519(foreign.sign(request.deploy_hash().as_ref()).to_bytes());
        let approval = Approval::new(PublicKey::Ed25519(signing_key().verifying_key()), signature);
        assert!(matches!(
            SignedDeploy::new(request.clone(), vec![approval]),
            Err(DeployValidationFailure::InvalidApproval { index: 0, .. })
        ));
        assert_eq!(
            SignedDeploy::new(request, vec![]),
            Err(DeployValidationFailure::EmptyApprovals)
        );
    }

    #[test]
    fn should_serialize_deploy_json() {
        let deploy = sign(builder().build().unwrap()).unwrap();
        let value = serde_json::to_value(&deploy).unwrap();

        assert_eq!(value["hash"], json!(deploy.hash().to_string()));
        assert_eq!(value["header"]["timestamp"], json!("2024-01-01T00:00:00.000Z"));
        assert_eq!(value["header"]["ttl"], json!("30m"));
        assert_eq!(value["header"]["gas_price"], json!(1));
        assert_eq!(value["header"]["chain_name"], json!("casper-test"));
        assert_eq!(value["header"]["dependencies"], json!([]));
        assert_eq!(
            value["header"]["account"],
            json!(deploy.header().account().to_hex())
        );
        assert_eq!(
            value["payment"]["ModuleBytes"]["args"][0][0],
            json!("amount")
        );
        assert_eq!(
            value["session"]["ModuleBytes"]["module_bytes"],
            json!("0061736d01000000")
        );
        assert!(value["approvals"][0]["signature"]
            .as_str()
            .unwrap()
            .starts_with("01"));
    }

    #[test]
    fn should_compute_expiry_from_timestamp_and_ttl() {
        let request = builder().with_ttl(Duration::from_secs(60)).build().unwrap();
        assert_eq!(
            request.header().expires_at(),
            Timestamp::from_millis(TIMESTAMP.millis() + 60_000)
        );
        assert_eq!(
            request
                .header()
                .expires_at()
                .saturating_duration_since(TIMESTAMP),
            Duration::from_secs(60)
        );
    }
}

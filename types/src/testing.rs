//! Testing utilities.
//!
//! Random signed deploys for exercising code that submits or tracks deploys.

use std::time::Duration;

use ed25519_dalek::{Signer as _, SigningKey};
use rand::Rng;

use crate::{
    Approval, DeployBuilder, ExecutableDeployItem, PublicKey, RuntimeArgs, Signature,
    SignedDeploy, Timestamp,
};

/// Creates a test deploy created at given instant and with given ttl, signed by a random key.
pub fn create_test_deploy<R: Rng>(
    timestamp: Timestamp,
    ttl: Duration,
    rng: &mut R,
) -> SignedDeploy {
    let signing_key = SigningKey::from_bytes(&rng.gen());
    let public_key = PublicKey::Ed25519(signing_key.verifying_key());

    let mut args = RuntimeArgs::new();
    args.insert("value", rng.gen::<u64>())
        .unwrap_or_else(|error| panic!("should encode test arg: {}", error));
    let session = ExecutableDeployItem::new_stored_contract_by_name(
        "casper-example",
        "example-entry-point",
        args,
    );
    let request = DeployBuilder::new("casper-example", public_key.clone(), session)
        .with_payment_amount(rng.gen_range(1..1_000_000))
        .with_gas_price(rng.gen_range(1..100))
        .with_timestamp(timestamp)
        .with_ttl(ttl)
        .build()
        .unwrap_or_else(|error| panic!("should build test deploy: {}", error));

    let signature = Signature::Ed25519(signing_key.sign(request.deploy_hash().as_ref()).to_bytes());
    SignedDeploy::new(request, vec![Approval::new(public_key, signature)])
        .unwrap_or_else(|error| panic!("should sign test deploy: {}", error))
}

/// Creates a random deploy that is considered expired.
pub fn create_expired_deploy<R: Rng>(now: Timestamp, rng: &mut R) -> SignedDeploy {
    let created = Timestamp::from_millis(now.millis().saturating_sub(20_000));
    create_test_deploy(created, Duration::from_secs(10), rng)
}

use serde::{Serialize, Serializer};

use primitive_types::U512;

use crate::{
    bytesrepr::{self, write_byte_string, ToBytes, U32_SERIALIZED_LENGTH},
    Digest, RuntimeArgs,
};

const MODULE_BYTES_TAG: u8 = 0;
const STORED_CONTRACT_BY_HASH_TAG: u8 = 1;
const STORED_CONTRACT_BY_NAME_TAG: u8 = 2;

/// Name of the payment amount argument of standard payment.
pub const ARG_AMOUNT: &str = "amount";

/// Compiled Wasm bytes, hex-encoded in JSON.
#[derive(Clone, Default, PartialEq, Eq, Hash, Debug)]
pub struct ModuleBytes(Vec<u8>);

impl ModuleBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        ModuleBytes(bytes)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ModuleBytes {
    fn from(bytes: Vec<u8>) -> Self {
        ModuleBytes(bytes)
    }
}

impl Serialize for ModuleBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        hex::encode(&self.0).serialize(serializer)
    }
}

/// The payment or session code of a deploy.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub enum ExecutableDeployItem {
    /// Raw bytes of compiled Wasm code, which must include a `call` entry point, and the arguments
    /// to call at runtime.
    ModuleBytes {
        module_bytes: ModuleBytes,
        args: RuntimeArgs,
    },
    /// A contract stored in global state, referenced by its "hash", along with the entry point and
    /// arguments to call at runtime.
    StoredContractByHash {
        #[serde(serialize_with = "serialize_raw_hash")]
        hash: Digest,
        entry_point: String,
        args: RuntimeArgs,
    },
    /// A contract stored in global state, referenced by a named key existing in the deploy's
    /// account context.
    StoredContractByName {
        name: String,
        entry_point: String,
        args: RuntimeArgs,
    },
}

fn serialize_raw_hash<S: Serializer>(hash: &Digest, serializer: S) -> Result<S::Ok, S::Error> {
    hash.to_hex().serialize(serializer)
}

impl ExecutableDeployItem {
    pub fn new_module_bytes(module_bytes: impl Into<ModuleBytes>, args: RuntimeArgs) -> Self {
        ExecutableDeployItem::ModuleBytes {
            module_bytes: module_bytes.into(),
            args,
        }
    }

    /// Standard payment: empty module bytes with a single `amount` argument.
    pub fn new_standard_payment<A: Into<U512>>(amount: A) -> Result<Self, bytesrepr::Error> {
        let mut args = RuntimeArgs::new();
        args.insert(ARG_AMOUNT, amount.into())?;
        Ok(ExecutableDeployItem::ModuleBytes {
            module_bytes: ModuleBytes::default(),
            args,
        })
    }

    pub fn new_stored_contract_by_hash(
        hash: Digest,
        entry_point: impl Into<String>,
        args: RuntimeArgs,
    ) -> Self {
        ExecutableDeployItem::StoredContractByHash {
            hash,
            entry_point: entry_point.into(),
            args,
        }
    }

    pub fn new_stored_contract_by_name(
        name: impl Into<String>,
        entry_point: impl Into<String>,
        args: RuntimeArgs,
    ) -> Self {
        ExecutableDeployItem::StoredContractByName {
            name: name.into(),
            entry_point: entry_point.into(),
            args,
        }
    }

    pub fn args(&self) -> &RuntimeArgs {
        match self {
            ExecutableDeployItem::ModuleBytes { args, .. }
            | ExecutableDeployItem::StoredContractByHash { args, .. }
            | ExecutableDeployItem::StoredContractByName { args, .. } => args,
        }
    }

    pub fn is_module_bytes(&self) -> bool {
        matches!(self, ExecutableDeployItem::ModuleBytes { .. })
    }

    fn tag(&self) -> u8 {
        match self {
            ExecutableDeployItem::ModuleBytes { .. } => MODULE_BYTES_TAG,
            ExecutableDeployItem::StoredContractByHash { .. } => STORED_CONTRACT_BY_HASH_TAG,
            ExecutableDeployItem::StoredContractByName { .. } => STORED_CONTRACT_BY_NAME_TAG,
        }
    }
}

impl ToBytes for ExecutableDeployItem {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        writer.push(self.tag());
        match self {
            ExecutableDeployItem::ModuleBytes { module_bytes, args } => {
                write_byte_string(module_bytes.as_slice(), writer)?;
                args.write_bytes(writer)
            }
            ExecutableDeployItem::StoredContractByHash {
                hash,
                entry_point,
                args,
            } => {
                hash.write_bytes(writer)?;
                entry_point.write_bytes(writer)?;
                args.write_bytes(writer)
            }
            ExecutableDeployItem::StoredContractByName {
                name,
                entry_point,
                args,
            } => {
                name.write_bytes(writer)?;
                entry_point.write_bytes(writer)?;
                args.write_bytes(writer)
            }
        }
    }

    fn serialized_length(&self) -> usize {
        1 + match self {
            ExecutableDeployItem::ModuleBytes { module_bytes, args } => {
                U32_SERIALIZED_LENGTH + module_bytes.len() + args.serialized_length()
            }
            ExecutableDeployItem::StoredContractByHash {
                hash,
                entry_point,
                args,
            } => {
                hash.serialized_length()
                    + entry_point.serialized_length()
                    + args.serialized_length()
            }
            ExecutableDeployItem::StoredContractByName {
                name,
                entry_point,
                args,
            } => {
                name.serialized_length()
                    + entry_point.serialized_length()
                    + args.serialized_length()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn should_encode_standard_payment() {
        let payment = ExecutableDeployItem::new_standard_payment(U512::from(1_u64)).unwrap();
        let mut expected = vec![MODULE_BYTES_TAG, 0, 0, 0, 0];
        // one arg named "amount"
        expected.extend([1, 0, 0, 0, 6, 0, 0, 0]);
        expected.extend(b"amount");
        // U512 value 1: length prefix 2, bytes [1, 1], type tag U512
        expected.extend([2, 0, 0, 0, 1, 1, 8]);
        assert_eq!(payment.to_bytes().unwrap(), expected);
        assert_eq!(payment.serialized_length(), expected.len());
    }

    #[test]
    fn should_serialize_module_bytes_json() {
        let session =
            ExecutableDeployItem::new_module_bytes(vec![0, 0x61, 0x73, 0x6d], RuntimeArgs::new());
        assert_eq!(
            serde_json::to_value(&session).unwrap(),
            json!({"ModuleBytes": {"module_bytes": "0061736d", "args": []}})
        );
    }

    #[test]
    fn should_serialize_stored_contract_by_hash() {
        let hash = Digest::from([0x11; 32]);
        let item =
            ExecutableDeployItem::new_stored_contract_by_hash(hash, "transfer", RuntimeArgs::new());
        let bytes = item.to_bytes().unwrap();
        assert_eq!(bytes[0], STORED_CONTRACT_BY_HASH_TAG);
        assert_eq!(&bytes[1..33], &[0x11; 32]);
        assert_eq!(bytes.len(), item.serialized_length());
        assert_eq!(
            serde_json::to_value(&item).unwrap()["StoredContractByHash"]["hash"],
            json!("11".repeat(32))
        );
    }
}

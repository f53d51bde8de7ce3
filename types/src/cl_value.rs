//! Typed runtime arguments passed to session code.

use std::fmt::{self, Display, Formatter};

use primitive_types::{U256, U512};
use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use thiserror::Error;

use crate::{
    bytesrepr::{self, write_byte_string, ToBytes, U32_SERIALIZED_LENGTH},
    Key, PublicKey,
};

const CL_TYPE_TAG_BOOL: u8 = 0;
const CL_TYPE_TAG_I32: u8 = 1;
const CL_TYPE_TAG_I64: u8 = 2;
const CL_TYPE_TAG_U8: u8 = 3;
const CL_TYPE_TAG_U32: u8 = 4;
const CL_TYPE_TAG_U64: u8 = 5;
const CL_TYPE_TAG_U128: u8 = 6;
const CL_TYPE_TAG_U256: u8 = 7;
const CL_TYPE_TAG_U512: u8 = 8;
const CL_TYPE_TAG_UNIT: u8 = 9;
const CL_TYPE_TAG_STRING: u8 = 10;
const CL_TYPE_TAG_KEY: u8 = 11;
const CL_TYPE_TAG_UREF: u8 = 12;
const CL_TYPE_TAG_BYTE_ARRAY: u8 = 15;
const CL_TYPE_TAG_PUBLIC_KEY: u8 = 22;

/// The type tag of a runtime argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum CLType {
    Bool,
    I32,
    I64,
    U8,
    U32,
    U64,
    U128,
    U256,
    U512,
    Unit,
    String,
    Key,
    URef,
    ByteArray(u32),
    PublicKey,
}

impl CLType {
    fn tag(&self) -> u8 {
        match self {
            CLType::Bool => CL_TYPE_TAG_BOOL,
            CLType::I32 => CL_TYPE_TAG_I32,
            CLType::I64 => CL_TYPE_TAG_I64,
            CLType::U8 => CL_TYPE_TAG_U8,
            CLType::U32 => CL_TYPE_TAG_U32,
            CLType::U64 => CL_TYPE_TAG_U64,
            CLType::U128 => CL_TYPE_TAG_U128,
            CLType::U256 => CL_TYPE_TAG_U256,
            CLType::U512 => CL_TYPE_TAG_U512,
            CLType::Unit => CL_TYPE_TAG_UNIT,
            CLType::String => CL_TYPE_TAG_STRING,
            CLType::Key => CL_TYPE_TAG_KEY,
            CLType::URef => CL_TYPE_TAG_UREF,
            CLType::ByteArray(_) => CL_TYPE_TAG_BYTE_ARRAY,
            CLType::PublicKey => CL_TYPE_TAG_PUBLIC_KEY,
        }
    }
}

impl ToBytes for CLType {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        writer.push(self.tag());
        if let CLType::ByteArray(length) = self {
            length.write_bytes(writer)?;
        }
        Ok(())
    }

    fn serialized_length(&self) -> usize {
        match self {
            CLType::ByteArray(_) => 1 + U32_SERIALIZED_LENGTH,
            _ => 1,
        }
    }
}

impl Display for CLType {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            CLType::ByteArray(length) => write!(f, "ByteArray({})", length),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Rust types with a fixed CL type.
pub trait CLTyped: ToBytes {
    fn cl_type() -> CLType;

    /// Human readable rendering sent alongside the bytes in JSON.
    fn parsed(&self) -> Value;
}

macro_rules! impl_cl_typed {
    ($ty:ty, $cl_type:expr, |$value:ident| $parsed:expr) => {
        impl CLTyped for $ty {
            fn cl_type() -> CLType {
                $cl_type
            }

            fn parsed(&self) -> Value {
                let $value = self;
                $parsed
            }
        }
    };
}

impl_cl_typed!(bool, CLType::Bool, |value| json!(value));
impl_cl_typed!(i32, CLType::I32, |value| json!(value));
impl_cl_typed!(i64, CLType::I64, |value| json!(value));
impl_cl_typed!(u8, CLType::U8, |value| json!(value));
impl_cl_typed!(u32, CLType::U32, |value| json!(value));
impl_cl_typed!(u64, CLType::U64, |value| json!(value));
impl_cl_typed!(u128, CLType::U128, |value| json!(value.to_string()));
impl_cl_typed!(U256, CLType::U256, |value| json!(value.to_string()));
impl_cl_typed!(U512, CLType::U512, |value| json!(value.to_string()));
impl_cl_typed!(String, CLType::String, |value| json!(value));
impl_cl_typed!(Key, CLType::Key, |value| json!(value.to_formatted_string()));
impl_cl_typed!(PublicKey, CLType::PublicKey, |value| json!(value.to_hex()));

/// A value together with its CL type, in canonical byte form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CLValue {
    cl_type: CLType,
    bytes: Vec<u8>,
    parsed: Value,
}

impl CLValue {
    pub fn from_t<T: CLTyped>(value: T) -> Result<Self, bytesrepr::Error> {
        Ok(CLValue {
            cl_type: T::cl_type(),
            bytes: value.to_bytes()?,
            parsed: value.parsed(),
        })
    }

    pub fn cl_type(&self) -> CLType {
        self.cl_type
    }

    /// The value's canonical bytes, without the type tag.
    pub fn inner_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn parsed(&self) -> &Value {
        &self.parsed
    }
}

impl ToBytes for CLValue {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        write_byte_string(&self.bytes, writer)?;
        self.cl_type.write_bytes(writer)
    }

    fn serialized_length(&self) -> usize {
        U32_SERIALIZED_LENGTH + self.bytes.len() + self.cl_type.serialized_length()
    }
}

impl Serialize for CLValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct CLValueJson<'a> {
            cl_type: &'a CLType,
            bytes: String,
            parsed: &'a Value,
        }

        CLValueJson {
            cl_type: &self.cl_type,
            bytes: hex::encode(&self.bytes),
            parsed: &self.parsed,
        }
        .serialize(serializer)
    }
}

/// A named runtime argument, serialized in JSON as a `[name, value]` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NamedArg(String, CLValue);

impl NamedArg {
    pub fn new(name: impl Into<String>, value: CLValue) -> Self {
        NamedArg(name.into(), value)
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    pub fn cl_value(&self) -> &CLValue {
        &self.1
    }
}

impl ToBytes for NamedArg {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        self.0.write_bytes(writer)?;
        self.1.write_bytes(writer)
    }

    fn serialized_length(&self) -> usize {
        self.0.serialized_length() + self.1.serialized_length()
    }
}

/// Ordered runtime arguments. Inserting an existing name replaces its value in place.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RuntimeArgs(Vec<NamedArg>);

impl RuntimeArgs {
    pub fn new() -> Self {
        RuntimeArgs::default()
    }

    pub fn insert<T: CLTyped>(
        &mut self,
        name: impl Into<String>,
        value: T,
    ) -> Result<(), bytesrepr::Error> {
        self.insert_cl_value(name, CLValue::from_t(value)?);
        Ok(())
    }

    pub fn insert_cl_value(&mut self, name: impl Into<String>, value: CLValue) {
        let name = name.into();
        match self.0.iter_mut().find(|arg| arg.0 == name) {
            Some(existing) => existing.1 = value,
            None => self.0.push(NamedArg(name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&CLValue> {
        self.0.iter().find(|arg| arg.0 == name).map(|arg| &arg.1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedArg> {
        self.0.iter()
    }
}

impl From<Vec<NamedArg>> for RuntimeArgs {
    fn from(args: Vec<NamedArg>) -> Self {
        let mut runtime_args = RuntimeArgs::new();
        for NamedArg(name, value) in args {
            runtime_args.insert_cl_value(name, value);
        }
        runtime_args
    }
}

impl ToBytes for RuntimeArgs {
    fn write_bytes(&self, writer: &mut Vec<u8>) -> Result<(), bytesrepr::Error> {
        self.0.write_bytes(writer)
    }

    fn serialized_length(&self) -> usize {
        self.0.serialized_length()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionArgError {
    #[error("session arg '{0}' must have the form name:type='value'")]
    Malformed(String),
    #[error("unsupported session arg type '{0}'")]
    UnsupportedType(String),
    #[error("invalid value for session arg '{name}' of type {cl_type}: {reason}")]
    InvalidValue {
        name: String,
        cl_type: String,
        reason: String,
    },
}

/// Parses a `casper-client` style session arg, e.g. `decimals:u8='11'`.
///
/// The value may be wrapped in single quotes; types are matched case-insensitively.
pub fn parse_session_arg(input: &str) -> Result<NamedArg, SessionArgError> {
    let malformed = || SessionArgError::Malformed(input.to_string());
    let (name, rest) = input.split_once(':').ok_or_else(malformed)?;
    let (type_name, raw_value) = rest.split_once('=').ok_or_else(malformed)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(malformed());
    }
    let raw_value = raw_value.trim();
    let value = raw_value
        .strip_prefix('\'')
        .and_then(|inner| inner.strip_suffix('\''))
        .unwrap_or(raw_value);

    let type_name = type_name.trim().to_ascii_lowercase();
    let invalid = |reason: String| SessionArgError::InvalidValue {
        name: name.to_string(),
        cl_type: type_name.clone(),
        reason,
    };
    let cl_value = match type_name.as_str() {
        "bool" => value
            .parse::<bool>()
            .map_err(|err| invalid(err.to_string()))
            .and_then(|parsed| to_cl_value(parsed, &invalid)),
        "i32" => parse_with(value, &invalid, str::parse::<i32>),
        "i64" => parse_with(value, &invalid, str::parse::<i64>),
        "u8" => parse_with(value, &invalid, str::parse::<u8>),
        "u32" => parse_with(value, &invalid, str::parse::<u32>),
        "u64" => parse_with(value, &invalid, str::parse::<u64>),
        "u128" => parse_with(value, &invalid, str::parse::<u128>),
        "u256" => parse_with(value, &invalid, U256::from_dec_str),
        "u512" => parse_with(value, &invalid, U512::from_dec_str),
        "string" => to_cl_value(value.to_string(), &invalid),
        "key" => parse_with(value, &invalid, str::parse::<Key>),
        "public_key" => parse_with(value, &invalid, str::parse::<PublicKey>),
        other => Err(SessionArgError::UnsupportedType(other.to_string())),
    }?;
    Ok(NamedArg::new(name, cl_value))
}

fn parse_with<'a, T, E, F>(
    value: &'a str,
    invalid: &dyn Fn(String) -> SessionArgError,
    parse: F,
) -> Result<CLValue, SessionArgError>
where
    T: CLTyped,
    E: Display,
    F: Fn(&'a str) -> Result<T, E>,
{
    let parsed = parse(value).map_err(|err| invalid(err.to_string()))?;
    to_cl_value(parsed, invalid)
}

fn to_cl_value<T: CLTyped>(
    value: T,
    invalid: &dyn Fn(String) -> SessionArgError,
) -> Result<CLValue, SessionArgError> {
    CLValue::from_t(value).map_err(|err| invalid(err.to_string()))
}

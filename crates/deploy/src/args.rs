//! Constructor and call arguments.
//!
//! Arguments are kept in a small typed form so they can be recorded verbatim in the manifest
//! and replayed to the verification service. ABI encoding goes through `alloy`'s dynamic ABI.

use std::fmt;

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes, U256, keccak256},
};
use serde::{Deserialize, Serialize};

/// A single ABI argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContractArg {
    Address(Address),
    Uint(U256),
    Bool(bool),
    String(String),
    Bytes32(B256),
    Array(Vec<ContractArg>),
}

impl ContractArg {
    pub fn to_sol_value(&self) -> DynSolValue {
        match self {
            Self::Address(address) => DynSolValue::Address(*address),
            Self::Uint(value) => DynSolValue::Uint(*value, 256),
            Self::Bool(value) => DynSolValue::Bool(*value),
            Self::String(value) => DynSolValue::String(value.clone()),
            Self::Bytes32(value) => DynSolValue::FixedBytes(*value, 32),
            Self::Array(items) => {
                DynSolValue::Array(items.iter().map(Self::to_sol_value).collect())
            }
        }
    }

    /// Build an address array argument.
    pub fn addresses(addresses: impl IntoIterator<Item = Address>) -> Self {
        Self::Array(addresses.into_iter().map(Self::Address).collect())
    }

    /// Build a string array argument.
    pub fn strings<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        Self::Array(
            values
                .into_iter()
                .map(|value| Self::String(value.into()))
                .collect(),
        )
    }
}

impl From<Address> for ContractArg {
    fn from(value: Address) -> Self {
        Self::Address(value)
    }
}

impl From<U256> for ContractArg {
    fn from(value: U256) -> Self {
        Self::Uint(value)
    }
}

impl From<u64> for ContractArg {
    fn from(value: u64) -> Self {
        Self::Uint(U256::from(value))
    }
}

impl From<&str> for ContractArg {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ContractArg {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<B256> for ContractArg {
    fn from(value: B256) -> Self {
        Self::Bytes32(value)
    }
}

impl fmt::Display for ContractArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{address}"),
            Self::Uint(value) => write!(f, "{value}"),
            Self::Bool(value) => write!(f, "{value}"),
            Self::String(value) => write!(f, "{value:?}"),
            Self::Bytes32(value) => write!(f, "{value}"),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// ABI-encode an argument list as a parameter block (constructor arguments, call data tail).
pub fn encode_args(args: &[ContractArg]) -> Vec<u8> {
    if args.is_empty() {
        return Vec::new();
    }

    DynSolValue::Tuple(args.iter().map(ContractArg::to_sol_value).collect()).abi_encode_params()
}

/// Compute the 4-byte selector of a function signature such as `transfer(address,uint256)`.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Build call data: selector followed by the encoded arguments.
pub fn encode_call(signature: &str, args: &[ContractArg]) -> Bytes {
    let mut data = selector(signature).to_vec();
    data.extend(encode_args(args));
    Bytes::from(data)
}

/// Role identifier as computed by OpenZeppelin `AccessControl` (`keccak256(name)`).
pub fn role_id(name: &str) -> B256 {
    keccak256(name.as_bytes())
}

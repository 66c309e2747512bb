//! Contract interface descriptors, derived once from ABI definitions.

use crate::errors::BridgeError;
use ethers::abi::{Abi, Event, Function, StateMutability, Token};
use ethers::types::{Address, Bytes, U256};
use std::collections::BTreeMap;
use std::fmt;

/// The Plasma Cash root-chain contract interface.
pub const ROOT_CHAIN_ABI: &str = include_str!("../contracts/RootChain.abi");
/// The ERC-721 token interface.
pub const ERC721_ABI: &str = include_str!("../contracts/ERC721.abi");
/// The ERC-20 token interface.
pub const ERC20_ABI: &str = include_str!("../contracts/ERC20.abi");

/// Whether a method changes contract state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Sent as a signed transaction
    Mutating,
    /// Executed as a plain call
    ReadOnly,
}

impl MethodKind {
    fn of(function: &Function) -> Self {
        match function.state_mutability {
            StateMutability::Pure | StateMutability::View => MethodKind::ReadOnly,
            StateMutability::NonPayable | StateMutability::Payable => MethodKind::Mutating,
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodKind::Mutating => f.write_str("mutating"),
            MethodKind::ReadOnly => f.write_str("read-only"),
        }
    }
}

/// Every method of a contract, tagged mutating or read-only.
///
/// Overloads share one name and one tag; the overload is picked by argument count.
#[derive(Clone, Debug)]
pub struct ContractInterfaceDescriptor {
    abi: Abi,
    methods: BTreeMap<String, MethodKind>,
}

impl ContractInterfaceDescriptor {
    /// Parses a JSON ABI.
    pub fn from_json(json: &str) -> Result<Self, BridgeError> {
        let abi: Abi = serde_json::from_str(json)
            .map_err(|e| BridgeError::AbiError(format!("Invalid ABI: {}", e)))?;
        Ok(Self::from_abi(abi))
    }

    /// Tags every function of an already parsed ABI.
    pub fn from_abi(abi: Abi) -> Self {
        let mut methods = BTreeMap::new();
        for function in abi.functions() {
            let kind = MethodKind::of(function);
            methods
                .entry(function.name.clone())
                .and_modify(|existing| {
                    if kind == MethodKind::Mutating {
                        *existing = MethodKind::Mutating;
                    }
                })
                .or_insert(kind);
        }
        Self { abi, methods }
    }

    /// The root-chain contract interface.
    pub fn root_chain() -> Result<Self, BridgeError> {
        Self::from_json(ROOT_CHAIN_ABI)
    }

    /// The ERC-721 interface.
    pub fn erc721() -> Result<Self, BridgeError> {
        Self::from_json(ERC721_ABI)
    }

    /// The ERC-20 interface.
    pub fn erc20() -> Result<Self, BridgeError> {
        Self::from_json(ERC20_ABI)
    }

    /// Returns the underlying ABI.
    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    /// Returns the tag of a method.
    pub fn kind(&self, method: &str) -> Result<MethodKind, BridgeError> {
        self.methods
            .get(method)
            .copied()
            .ok_or_else(|| BridgeError::UnknownMethod(method.to_string()))
    }

    /// Iterates over every method name and its tag.
    pub fn methods(&self) -> impl Iterator<Item = (&str, MethodKind)> {
        self.methods.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    /// Returns the overload of `method` taking `arity` arguments.
    pub fn function(&self, method: &str, arity: usize) -> Result<&Function, BridgeError> {
        let overloads = self
            .abi
            .functions_by_name(method)
            .map_err(|_| BridgeError::UnknownMethod(method.to_string()))?;
        overloads
            .iter()
            .find(|function| function.inputs.len() == arity)
            .ok_or_else(|| {
                BridgeError::AbiError(format!("{} has no overload taking {} arguments", method, arity))
            })
    }

    /// ABI-encodes a call.
    pub fn encode(&self, method: &str, args: &[Token]) -> Result<Bytes, BridgeError> {
        let function = self.function(method, args.len())?;
        Ok(function.encode_input(args)?.into())
    }

    /// Returns an event definition.
    pub fn event(&self, name: &str) -> Result<&Event, BridgeError> {
        self.abi
            .event(name)
            .map_err(|_| BridgeError::AbiError(format!("Unknown event: {}", name)))
    }
}

/// Sequential reader over decoded return values.
pub(crate) struct Outputs {
    method: &'static str,
    tokens: std::vec::IntoIter<Token>,
}

impl Outputs {
    pub(crate) fn new(method: &'static str, tokens: Vec<Token>) -> Self {
        Self { method, tokens: tokens.into_iter() }
    }

    fn next(&mut self, expected: &str) -> Result<Token, BridgeError> {
        self.tokens.next().ok_or_else(|| {
            BridgeError::DecodeError(format!("{} returned too few values, missing {}", self.method, expected))
        })
    }

    pub(crate) fn uint(&mut self) -> Result<U256, BridgeError> {
        let method = self.method;
        self.next("uint")?
            .into_uint()
            .ok_or_else(|| BridgeError::DecodeError(format!("{} returned a non-integer", method)))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, BridgeError> {
        let value = self.uint()?;
        if value > U256::from(u64::MAX) {
            return Err(BridgeError::DecodeError(format!(
                "{} returned {} which does not fit in 64 bits",
                self.method, value
            )));
        }
        Ok(value.low_u64())
    }

    pub(crate) fn address(&mut self) -> Result<Address, BridgeError> {
        let method = self.method;
        self.next("address")?
            .into_address()
            .ok_or_else(|| BridgeError::DecodeError(format!("{} returned a non-address", method)))
    }
}

//! The sandbox ABI: the fixed contract between the host, the loader binary
//! and the executor process.
//!
//! Everything in this module is part of a binary contract. Names must match
//! the loader's symbol table byte-for-byte, and the descriptor numbers are the
//! ones the executor opens without any negotiation.

use std::fmt;
use std::os::fd::RawFd;

use serde::{Deserialize, Serialize};

/// Import module name that every sandbox import must use.
pub const NAMESPACE: &str = "env";

/// ABI version exposed to modules via `__gate_abi_version`.
pub const ABI_VERSION: u64 = 0;

/// Maximum packet size exposed to modules via `__gate_max_packet_size`.
pub const MAX_PACKET_SIZE: u64 = 0x10000;

/// Global import carrying the ABI version.
pub const GLOBAL_ABI_VERSION: &str = "__gate_abi_version";

/// Global import carrying the maximum packet size.
pub const GLOBAL_MAX_PACKET_SIZE: &str = "__gate_max_packet_size";

/// Descriptor number of the sealed payload file inside the executor.
pub const PAYLOAD_FD: RawFd = 3;

/// Descriptor number of the loader binary inside the executor.
pub const LOADER_FD: RawFd = 4;

/// WebAssembly value types that can appear in import signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        })
    }
}

/// Function signature: parameter types and an optional result type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Signature {
    /// Parameter types, in order
    pub params: Vec<ValueType>,
    /// Result type, if any
    pub result: Option<ValueType>,
}

impl Signature {
    /// Create a signature.
    pub fn new(params: &[ValueType], result: Option<ValueType>) -> Self {
        Self {
            params: params.to_vec(),
            result,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", param)?;
        }
        f.write_str(")")?;
        if let Some(result) = self.result {
            write!(f, " -> {}", result)?;
        }
        Ok(())
    }
}

/// Loader entry points the sandbox ABI is made of.
///
/// The signature of each entry point is a property of the ABI; it is never
/// read from the loader binary.
pub const ENTRY_POINTS: &[(&str, &[ValueType], Option<ValueType>)] = &[
    ("__gate_get_abi_version", &[], Some(ValueType::I32)),
    ("__gate_get_max_packet_size", &[], Some(ValueType::I32)),
    ("__gate_get_arg", &[], Some(ValueType::I32)),
    ("__gate_get_page_size", &[], Some(ValueType::I32)),
    ("__gate_func_ptr", &[ValueType::I32], Some(ValueType::I32)),
    ("__gate_exit", &[ValueType::I32], None),
    ("__gate_recv_full", &[ValueType::I32, ValueType::I32], None),
    ("__gate_send_full", &[ValueType::I32, ValueType::I32], None),
];

/// Look up the ABI signature of an allow-listed entry point.
pub fn entry_point_signature(name: &str) -> Option<(&'static str, Signature)> {
    ENTRY_POINTS
        .iter()
        .find(|(entry, _, _)| *entry == name)
        .map(|(entry, params, result)| (*entry, Signature::new(params, *result)))
}

/// Values of the two ABI globals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbiConstants {
    /// Value of `__gate_abi_version`
    pub version: u64,
    /// Value of `__gate_max_packet_size`
    pub max_packet_size: u64,
}

impl Default for AbiConstants {
    fn default() -> Self {
        Self {
            version: ABI_VERSION,
            max_packet_size: MAX_PACKET_SIZE,
        }
    }
}

//! Error types for the sandbox crate.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::abi::{Signature, ValueType};

/// Sandbox error type
#[derive(Error, Debug)]
pub enum SandboxError {
    /// IO error (loader access, payload file construction)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Loader binary is not a readable ELF file with a symbol table
    #[error("loader format error: {0}")]
    LoaderFormat(String),

    /// Imported function does not exist in the sandbox ABI
    #[error("imported function not found: {module} {field} {signature}")]
    FunctionNotFound {
        /// Requested import module
        module: String,
        /// Requested import field
        field: String,
        /// Requested signature
        signature: Signature,
    },

    /// Imported function exists but the module expects another shape
    #[error("function {field} {expected} imported with wrong signature: {requested}")]
    WrongSignature {
        /// Requested import field
        field: String,
        /// Signature provided by the loader ABI
        expected: Signature,
        /// Signature requested by the module
        requested: Signature,
    },

    /// Imported global does not exist in the sandbox ABI
    #[error("imported global not found: {module} {field} {ty}")]
    GlobalNotFound {
        /// Requested import module
        module: String,
        /// Requested import field
        field: String,
        /// Requested value type
        ty: ValueType,
    },

    /// Module's initial memory does not fit under the requested ceiling
    #[error("initial memory size {init} exceeds maximum memory size {grow}")]
    MemoryLimit {
        /// Initial linear memory size of the module
        init: u32,
        /// Requested grow-memory ceiling
        grow: u32,
    },

    /// Compiled artifacts cannot be laid out
    #[error("invalid module artifacts: {0}")]
    InvalidArtifacts(String),

    /// Executor could not be started
    #[error("failed to start executor {path}: {source}")]
    Spawn {
        /// Executor path
        path: PathBuf,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Payload descriptor could not be delivered to the executor
    #[error("handshake with executor failed: {0}")]
    Handshake(#[source] std::io::Error),

    /// Executor could not be reaped
    #[error("waiting for executor failed: {0}")]
    Wait(#[source] std::io::Error),

    /// Executor terminated unsuccessfully
    #[error("executor {status}{}", .diagnosis.map(|d| format!(" ({d})")).unwrap_or_default())]
    ExitStatus {
        /// OS-level termination status
        status: ExitStatus,
        /// Loader diagnosis for well-known exit codes
        diagnosis: Option<&'static str>,
    },

    /// Executor exceeded its deadline and was killed
    #[error("executor killed after exceeding deadline of {0:?}")]
    Timeout(Duration),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl SandboxError {
    /// True for import failures caused by an ABI version mismatch rather than
    /// a missing capability.
    pub fn is_abi_mismatch(&self) -> bool {
        matches!(self, Self::WrongSignature { .. })
    }
}

/// Result type alias for sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

//! Import binding against the loader's capability surface.
//!
//! An [`Environment`] is built once per loader binary and shared by every run
//! that uses that loader. It answers the module compiler's import queries:
//!
//! - function imports resolve to entry point addresses inside the loader,
//!   provided the module asks for exactly the ABI signature;
//! - global imports resolve to the two ABI constants.
//!
//! The loader file stays open for the lifetime of the environment because the
//! executor inherits it by descriptor number ([`crate::abi::LOADER_FD`]).

mod symbols;

pub use symbols::{EntryPoint, SymbolTable};

use std::fs::File;
use std::io;
use std::os::fd::{IntoRawFd, OwnedFd};
use std::path::{Path, PathBuf};

use crate::abi::{self, AbiConstants, Signature, ValueType};
use crate::error::{Result, SandboxError};

/// Executor path, open loader binary and its resolved entry points.
#[derive(Debug)]
pub struct Environment {
    executor: PathBuf,
    loader: File,
    symbols: SymbolTable,
    abi: AbiConstants,
}

impl Environment {
    /// Open the loader binary and resolve the sandbox ABI entry points.
    pub fn new(executor: impl Into<PathBuf>, loader: impl AsRef<Path>) -> Result<Self> {
        let loader = loader.as_ref();
        let mut file = File::open(loader)?;
        let symbols = SymbolTable::read(&mut file)?;

        tracing::debug!(
            loader = %loader.display(),
            entry_points = symbols.len(),
            "loader symbols resolved"
        );
        for entry in symbols.iter() {
            tracing::trace!(name = entry.name, addr = entry.addr, signature = %entry.signature);
        }

        Ok(Self::from_parts(executor.into(), file, symbols))
    }

    pub(crate) fn from_parts(executor: PathBuf, loader: File, symbols: SymbolTable) -> Self {
        Self {
            executor,
            loader,
            symbols,
            abi: AbiConstants::default(),
        }
    }

    /// Builder: replace the values served for the ABI globals
    pub fn with_abi(mut self, abi: AbiConstants) -> Self {
        self.abi = abi;
        self
    }

    /// Resolve a function import to an address within the loader.
    pub fn import_function(&self, module: &str, field: &str, sig: &Signature) -> Result<u64> {
        if module == abi::NAMESPACE {
            if let Some(entry) = self.symbols.get(field) {
                if entry.signature != *sig {
                    return Err(SandboxError::WrongSignature {
                        field: field.to_string(),
                        expected: entry.signature.clone(),
                        requested: sig.clone(),
                    });
                }

                return Ok(entry.addr);
            }
        }

        Err(SandboxError::FunctionNotFound {
            module: module.to_string(),
            field: field.to_string(),
            signature: sig.clone(),
        })
    }

    /// Resolve a global import to its constant value.
    pub fn import_global(&self, module: &str, field: &str, ty: ValueType) -> Result<u64> {
        if module == abi::NAMESPACE {
            match field {
                abi::GLOBAL_ABI_VERSION => return Ok(self.abi.version),
                abi::GLOBAL_MAX_PACKET_SIZE => return Ok(self.abi.max_packet_size),
                _ => {}
            }
        }

        Err(SandboxError::GlobalNotFound {
            module: module.to_string(),
            field: field.to_string(),
            ty,
        })
    }

    /// Executor binary path.
    pub fn executor(&self) -> &Path {
        &self.executor
    }

    /// Open loader binary.
    pub fn loader(&self) -> &File {
        &self.loader
    }

    /// ABI global values.
    pub fn abi(&self) -> AbiConstants {
        self.abi
    }

    /// Look up a resolved entry point.
    pub fn entry_point(&self, name: &str) -> Option<&EntryPoint> {
        self.symbols.get(name)
    }

    /// Iterate over the resolved entry points.
    pub fn entry_points(&self) -> impl Iterator<Item = &EntryPoint> {
        self.symbols.iter()
    }

    /// Close the loader descriptor, reporting close errors.
    pub fn close(self) -> io::Result<()> {
        let fd = OwnedFd::from(self.loader);
        nix::unistd::close(fd.into_raw_fd()).map_err(io::Error::from)
    }
}

#[cfg(test)]
mod tests;

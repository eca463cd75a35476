//! Sandbox configuration.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::abi::AbiConstants;
use crate::error::{Result, SandboxError};
use crate::payload::{PayloadParams, DEFAULT_GROW_MEMORY_SIZE, DEFAULT_STACK_SIZE};
use crate::run::RunConfig;

/// Configuration for a sandbox instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Executor binary started for every run
    pub executor: Option<PathBuf>,

    /// Loader binary handed to the executor
    pub loader: Option<PathBuf>,

    /// Linear memory ceiling in bytes
    pub grow_memory_size: u32,

    /// Stack size in bytes
    pub stack_size: u32,

    /// Values served for the ABI globals
    pub abi: AbiConstants,

    /// Launch options
    pub run: RunConfig,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            executor: None,
            loader: None,
            grow_memory_size: DEFAULT_GROW_MEMORY_SIZE, // 16 MB
            stack_size: DEFAULT_STACK_SIZE,             // 64 KB
            abi: AbiConstants::default(),
            run: RunConfig::default(),
        }
    }
}

impl SandboxConfig {
    /// Parse a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SandboxError::ConfigError(e.to_string()))
    }

    /// Load a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| SandboxError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    /// Payload parameters derived from this configuration.
    pub fn payload_params(&self) -> PayloadParams {
        PayloadParams {
            grow_memory_size: self.grow_memory_size,
            stack_size: self.stack_size,
        }
    }

    /// Check that the configuration can produce a sandbox.
    pub fn validate(&self) -> Result<()> {
        if self.executor.as_deref().map_or(true, |p| p.as_os_str().is_empty()) {
            return Err(SandboxError::ConfigError("executor path is required".to_string()));
        }

        if self.loader.as_deref().map_or(true, |p| p.as_os_str().is_empty()) {
            return Err(SandboxError::ConfigError("loader path is required".to_string()));
        }

        if self.stack_size == 0 {
            return Err(SandboxError::ConfigError("stack size must be non-zero".to_string()));
        }

        Ok(())
    }
}

//! Sandbox implementation and builder.

use std::path::PathBuf;

use crate::abi::AbiConstants;
use crate::config::SandboxConfig;
use crate::env::Environment;
use crate::error::{Result, SandboxError};
use crate::payload::{Artifacts, Payload};
use crate::run;

/// A loader environment plus the parameters every run uses.
///
/// Building a sandbox opens the loader once; each [`Sandbox::run`] then seals
/// a fresh payload and launches a fresh executor.
#[derive(Debug)]
pub struct Sandbox {
    config: SandboxConfig,
    env: Environment,
}

impl Sandbox {
    /// Create a new sandbox builder
    pub fn builder() -> SandboxBuilder {
        SandboxBuilder::new()
    }

    /// Create a sandbox from a complete configuration
    pub fn from_config(config: SandboxConfig) -> Result<Self> {
        SandboxBuilder { config }.build()
    }

    /// Get the sandbox configuration
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Import binding surface for the module compiler
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Seal the module's runtime image and execute it.
    pub fn run(&self, artifacts: &Artifacts) -> Result<Vec<u8>> {
        let payload = Payload::build(artifacts, &self.config.payload_params())?;
        run::run(&self.env, payload, &self.config.run)
    }
}

/// Builder for sandbox configuration
#[derive(Debug, Clone, Default)]
pub struct SandboxBuilder {
    config: SandboxConfig,
}

impl SandboxBuilder {
    /// Create a new sandbox builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the executor binary
    pub fn executor(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.executor = Some(path.into());
        self
    }

    /// Set the loader binary
    pub fn loader(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.loader = Some(path.into());
        self
    }

    /// Set linear memory ceiling in bytes
    pub fn grow_memory_size(mut self, size: u32) -> Self {
        self.config.grow_memory_size = size;
        self
    }

    /// Set stack size in bytes
    pub fn stack_size(mut self, size: u32) -> Self {
        self.config.stack_size = size;
        self
    }

    /// Set run deadline in milliseconds (0 = unlimited)
    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.run.timeout_ms = ms;
        self
    }

    /// Pass executor stderr through
    pub fn inherit_stderr(mut self, inherit: bool) -> Self {
        self.config.run.inherit_stderr = inherit;
        self
    }

    /// Set values served for the ABI globals
    pub fn abi(mut self, abi: AbiConstants) -> Self {
        self.config.abi = abi;
        self
    }

    /// Build the sandbox
    pub fn build(self) -> Result<Sandbox> {
        self.config.validate()?;

        let env = match (&self.config.executor, &self.config.loader) {
            (Some(executor), Some(loader)) => Environment::new(executor.clone(), loader)?,
            _ => {
                return Err(SandboxError::ConfigError(
                    "executor and loader paths are required".to_string(),
                ))
            }
        };
        let env = env.with_abi(self.config.abi);

        Ok(Sandbox {
            config: self.config,
            env,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_default() {
        let builder = SandboxBuilder::new();
        assert_eq!(builder.config, SandboxConfig::default());
    }

    #[test]
    fn test_builder_chain() {
        let builder = Sandbox::builder()
            .executor("/usr/lib/gate/executor")
            .loader("/usr/lib/gate/loader")
            .grow_memory_size(1 << 20)
            .stack_size(1 << 16)
            .timeout_ms(500)
            .inherit_stderr(true);

        assert_eq!(builder.config.grow_memory_size, 1 << 20);
        assert_eq!(builder.config.stack_size, 1 << 16);
        assert_eq!(builder.config.run.timeout_ms, 500);
        assert!(builder.config.run.inherit_stderr);
    }

    #[test]
    fn test_missing_executor_error() {
        let result = Sandbox::builder().loader("/usr/lib/gate/loader").build();
        assert!(matches!(result, Err(SandboxError::ConfigError(_))));
    }

    #[test]
    fn test_missing_loader_error() {
        let result = Sandbox::builder().executor("/bin/true").build();
        assert!(matches!(result, Err(SandboxError::ConfigError(_))));
    }

    #[test]
    fn test_zero_stack_error() {
        let result = Sandbox::builder()
            .executor("/bin/true")
            .loader("/bin/true")
            .stack_size(0)
            .build();
        assert!(matches!(result, Err(SandboxError::ConfigError(_))));
    }

    #[test]
    fn test_unreadable_loader_error() {
        let result = Sandbox::builder()
            .executor("/bin/true")
            .loader("/nonexistent/gate/loader")
            .build();
        assert!(matches!(result, Err(SandboxError::Io(_))));
    }
}

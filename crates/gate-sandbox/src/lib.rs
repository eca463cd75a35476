//! # Gate Sandbox
//!
//! Host-side control plane for running compiled WebAssembly modules inside an
//! isolated executor process.
//!
//! The module itself is compiled elsewhere. This crate binds its imports to the
//! loader's fixed capability surface, lays its runtime image out in a sealed
//! anonymous memory file, and launches the executor that maps and runs it.
//!
//! ## Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Symbol resolution | [`env::SymbolTable`] | loader entry point addresses |
//! | Import binding | [`env::Environment`] | addresses and constants for the compiler |
//! | Image building | [`payload::Payload`] | sealed memfd + [`payload::PayloadDescriptor`] |
//! | Launch | [`run::run`] | captured executor output |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gate_sandbox::{Artifacts, Sandbox};
//!
//! let sandbox = Sandbox::builder()
//!     .executor("/usr/lib/gate/executor")
//!     .loader("/usr/lib/gate/loader")
//!     .stack_size(64 * 1024)
//!     .build()?;
//!
//! // Hand sandbox.environment() to the compiler for import binding, then:
//! let output = sandbox.run(&artifacts)?;
//! ```
//!
//! The executor is spawned with an empty environment, `/` as working directory,
//! and two inherited descriptors: the payload at [`abi::PAYLOAD_FD`] and the
//! loader at [`abi::LOADER_FD`]. Linux only.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod abi;
pub mod config;
pub mod env;
pub mod error;
pub mod payload;
pub mod run;
pub mod sandbox;

// Re-export main types
pub use abi::{AbiConstants, Signature, ValueType};
pub use config::SandboxConfig;
pub use env::Environment;
pub use error::{Result, SandboxError};
pub use payload::{Artifacts, Payload, PayloadDescriptor, PayloadParams};
pub use run::{run, RunConfig};
pub use sandbox::{Sandbox, SandboxBuilder};

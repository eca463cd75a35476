//! Sealed payload images.
//!
//! A payload is the runtime image of one compiled module, laid out in an
//! anonymous memory file that the executor maps at fixed addresses:
//!
//! | Segment | Offset | Size |
//! |---------|--------|------|
//! | read-only data | 0 | R = page-rounded rodata |
//! | code | R | T = page-rounded text |
//! | globals + linear memory | R+T | G = page-rounded (memory offset + grow memory size) |
//! | stack | R+T+G | stack size |
//!
//! Once built, the file is sealed against shrinking and growing, and the
//! [`PayloadDescriptor`] describing it is what the executor reads as its
//! handshake.

mod file;
mod layout;

pub use file::{SealableFile, SealedMemfd};
pub use layout::{host_page_size, round_to_page, Layout, PayloadDescriptor};

use std::io;
use std::os::fd::IntoRawFd;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SandboxError};

/// Offset of the bootstrap field within the data segment.
///
/// The module format reserves the 32-bit little-endian word at this offset for
/// the size of the linear memory contents that follow the globals. The runtime
/// uses it to initialise its stack pointer.
pub const BOOTSTRAP_FIELD_OFFSET: usize = 4;

/// Default linear memory ceiling (16 MiB).
pub const DEFAULT_GROW_MEMORY_SIZE: u32 = 16 * 1024 * 1024;

/// Default stack size (64 KiB).
pub const DEFAULT_STACK_SIZE: u32 = 64 * 1024;

/// Compiled module output.
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    /// Read-only data
    pub rodata: Vec<u8>,
    /// Machine code
    pub text: Vec<u8>,
    /// Globals followed by initial linear memory contents
    pub data: Vec<u8>,
    /// Offset within `data` where linear memory begins
    pub memory_offset: usize,
    /// Initial linear memory size declared by the module
    pub init_memory_size: u32,
}

impl Artifacts {
    /// Initial linear memory contents (the part of `data` after the globals).
    pub fn memory(&self) -> &[u8] {
        self.data.get(self.memory_offset..).unwrap_or_default()
    }
}

/// Execution parameters fixed at payload construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadParams {
    /// Linear memory ceiling in bytes
    pub grow_memory_size: u32,
    /// Stack size in bytes
    pub stack_size: u32,
}

impl Default for PayloadParams {
    fn default() -> Self {
        Self {
            grow_memory_size: DEFAULT_GROW_MEMORY_SIZE,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

/// A sealed payload file and its descriptor.
#[derive(Debug)]
pub struct Payload<F = SealedMemfd> {
    file: F,
    layout: Layout,
    descriptor: PayloadDescriptor,
}

impl Payload<SealedMemfd> {
    /// Build a payload in a new memfd.
    pub fn build(artifacts: &Artifacts, params: &PayloadParams) -> Result<Self> {
        Self::build_with(SealedMemfd::create, artifacts, params)
    }
}

impl<F: SealableFile> Payload<F> {
    /// Build a payload in a file obtained from `create`.
    ///
    /// `create` is only called once the parameters have been validated. If any
    /// later step fails the file is dropped (and closed) before returning.
    pub fn build_with(
        create: impl FnOnce() -> io::Result<F>,
        artifacts: &Artifacts,
        params: &PayloadParams,
    ) -> Result<Self> {
        let (layout, descriptor) = plan(artifacts, params)?;

        let mut file = create()?;
        fill(&mut file, &layout, artifacts)?;

        tracing::debug!(
            rodata = layout.rodata_size,
            text = layout.text_size,
            globals_memory = layout.globals_memory_size,
            stack = layout.stack_size,
            total = layout.total_size(),
            "payload sealed"
        );

        Ok(Self {
            file,
            layout,
            descriptor,
        })
    }

    /// Descriptor sent to the executor.
    pub fn descriptor(&self) -> &PayloadDescriptor {
        &self.descriptor
    }

    /// Segment geometry.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Backing file.
    pub fn file(&self) -> &F {
        &self.file
    }

    /// Close the backing file, reporting close errors.
    pub fn close(self) -> io::Result<()> {
        let fd = self.file.into_owned_fd();
        nix::unistd::close(fd.into_raw_fd()).map_err(io::Error::from)
    }
}

/// Compute the layout and descriptor a payload would have, without creating
/// any file.
pub fn plan(artifacts: &Artifacts, params: &PayloadParams) -> Result<(Layout, PayloadDescriptor)> {
    if artifacts.init_memory_size > params.grow_memory_size {
        return Err(SandboxError::MemoryLimit {
            init: artifacts.init_memory_size,
            grow: params.grow_memory_size,
        });
    }

    validate(artifacts, params)?;

    let layout = Layout::compute(
        host_page_size(),
        artifacts.rodata.len(),
        artifacts.text.len(),
        artifacts.memory_offset,
        params.grow_memory_size,
        params.stack_size,
    );
    let descriptor = PayloadDescriptor::new(
        &layout,
        artifacts.memory_offset,
        artifacts.init_memory_size,
        params.grow_memory_size,
    )?;

    Ok((layout, descriptor))
}

fn validate(artifacts: &Artifacts, params: &PayloadParams) -> Result<()> {
    if artifacts.memory_offset > artifacts.data.len() {
        return Err(SandboxError::InvalidArtifacts(format!(
            "memory offset {} is beyond data segment of {} bytes",
            artifacts.memory_offset,
            artifacts.data.len()
        )));
    }

    if artifacts.data.len() < BOOTSTRAP_FIELD_OFFSET + 4 {
        return Err(SandboxError::InvalidArtifacts(format!(
            "data segment of {} bytes has no room for the bootstrap field",
            artifacts.data.len()
        )));
    }

    if artifacts.memory().len() as u64 > u64::from(params.grow_memory_size) {
        return Err(SandboxError::InvalidArtifacts(format!(
            "{} bytes of initial memory contents exceed maximum memory size {}",
            artifacts.memory().len(),
            params.grow_memory_size
        )));
    }

    Ok(())
}

fn fill<F: SealableFile>(file: &mut F, layout: &Layout, artifacts: &Artifacts) -> io::Result<()> {
    file.write_at(&artifacts.rodata, 0)?;
    file.write_at(&artifacts.text, layout.text_offset())?;
    file.write_at(&artifacts.data, layout.data_offset())?;
    write_bootstrap_field(file, layout, artifacts.memory().len())?;

    file.truncate(layout.total_size())?;
    file.seal()
}

/// Store the linear memory contents size in the data segment's bootstrap field.
fn write_bootstrap_field<F: SealableFile>(file: &mut F, layout: &Layout, memory_len: usize) -> io::Result<()> {
    let mut field = [0u8; 4];
    LittleEndian::write_u32(&mut field, memory_len as u32);
    file.write_at(&field, layout.data_offset() + BOOTSTRAP_FIELD_OFFSET as u64)
}

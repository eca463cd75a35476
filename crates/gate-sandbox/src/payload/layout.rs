//! Payload geometry and the descriptor sent to the executor.

use std::io::{self, Read, Write};
use std::sync::OnceLock;

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SandboxError};

/// Host page size in bytes.
pub fn host_page_size() -> u32 {
    static PAGE_SIZE: OnceLock<u32> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf has no memory safety preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        u32::try_from(size).ok().filter(|s| s.is_power_of_two()).unwrap_or(4096)
    })
}

/// Round `size` up to a multiple of `page_size` (a power of two).
pub fn round_to_page(size: u64, page_size: u32) -> u64 {
    let mask = u64::from(page_size) - 1;
    (size + mask) & !mask
}

/// Segment geometry of a payload file.
///
/// ```text
/// 0            R             R+T                      R+T+G        total
/// | rodata ... | text ...    | globals | linear memory | stack       |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    /// Host page size
    pub page_size: u32,
    /// Page-rounded read-only data size (R)
    pub rodata_size: u64,
    /// Page-rounded code size (T)
    pub text_size: u64,
    /// Page-rounded size of globals plus linear memory up to its ceiling (G)
    pub globals_memory_size: u64,
    /// Stack size, not rounded
    pub stack_size: u64,
}

impl Layout {
    /// Compute the layout for the given segment lengths.
    pub fn compute(
        page_size: u32,
        rodata_len: usize,
        text_len: usize,
        memory_offset: usize,
        grow_memory_size: u32,
        stack_size: u32,
    ) -> Self {
        Self {
            page_size,
            rodata_size: round_to_page(rodata_len as u64, page_size),
            text_size: round_to_page(text_len as u64, page_size),
            globals_memory_size: round_to_page(
                memory_offset as u64 + u64::from(grow_memory_size),
                page_size,
            ),
            stack_size: u64::from(stack_size),
        }
    }

    /// File offset of the code segment.
    pub fn text_offset(&self) -> u64 {
        self.rodata_size
    }

    /// File offset of the data segment.
    pub fn data_offset(&self) -> u64 {
        self.rodata_size + self.text_size
    }

    /// File offset of the stack.
    pub fn stack_offset(&self) -> u64 {
        self.data_offset() + self.globals_memory_size
    }

    /// Exact size of the sealed file.
    pub fn total_size(&self) -> u64 {
        self.stack_offset() + self.stack_size
    }
}

/// Fixed-layout header describing a payload, sent as the executor handshake.
///
/// Seven native-endian `u32` fields, in declaration order. Reordering or
/// widening a field breaks every executor build.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDescriptor {
    /// Host page size
    pub page_size: u32,
    /// Page-rounded read-only data size
    pub rodata_size: u32,
    /// Page-rounded code size
    pub text_size: u32,
    /// Start of linear memory within the data segment (not rounded)
    pub memory_offset: u32,
    /// Initial linear memory size
    pub init_memory_size: u32,
    /// Linear memory ceiling
    pub grow_memory_size: u32,
    /// Stack size (not rounded)
    pub stack_size: u32,
}

impl PayloadDescriptor {
    /// Size of the encoded descriptor in bytes.
    pub const ENCODED_LEN: usize = 7 * 4;

    pub(crate) fn new(
        layout: &Layout,
        memory_offset: usize,
        init_memory_size: u32,
        grow_memory_size: u32,
    ) -> Result<Self> {
        let narrow = |value: u64, what: &str| {
            u32::try_from(value).map_err(|_| {
                SandboxError::InvalidArtifacts(format!("{} of {} bytes does not fit the descriptor", what, value))
            })
        };

        Ok(Self {
            page_size: layout.page_size,
            rodata_size: narrow(layout.rodata_size, "read-only data")?,
            text_size: narrow(layout.text_size, "code")?,
            memory_offset: narrow(memory_offset as u64, "memory offset")?,
            init_memory_size,
            grow_memory_size,
            stack_size: narrow(layout.stack_size, "stack")?,
        })
    }

    /// Write the descriptor in wire format.
    pub fn write_to<W: Write>(&self, mut w: W) -> io::Result<()> {
        w.write_u32::<NativeEndian>(self.page_size)?;
        w.write_u32::<NativeEndian>(self.rodata_size)?;
        w.write_u32::<NativeEndian>(self.text_size)?;
        w.write_u32::<NativeEndian>(self.memory_offset)?;
        w.write_u32::<NativeEndian>(self.init_memory_size)?;
        w.write_u32::<NativeEndian>(self.grow_memory_size)?;
        w.write_u32::<NativeEndian>(self.stack_size)
    }

    /// Encode the descriptor in wire format.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut buf = [0u8; Self::ENCODED_LEN];
        // Writing into a correctly sized slice cannot fail.
        let _ = self.write_to(&mut buf[..]);
        buf
    }

    /// Decode a descriptor from wire format, as an executor would.
    pub fn decode(mut bytes: &[u8]) -> io::Result<Self> {
        Ok(Self {
            page_size: bytes.read_u32::<NativeEndian>()?,
            rodata_size: bytes.read_u32::<NativeEndian>()?,
            text_size: bytes.read_u32::<NativeEndian>()?,
            memory_offset: bytes.read_u32::<NativeEndian>()?,
            init_memory_size: bytes.read_u32::<NativeEndian>()?,
            grow_memory_size: bytes.read_u32::<NativeEndian>()?,
            stack_size: bytes.read_u32::<NativeEndian>()?,
        })
    }

    /// Read a descriptor from a stream.
    pub fn read_from<R: Read>(mut r: R) -> io::Result<Self> {
        let mut buf = [0u8; Self::ENCODED_LEN];
        r.read_exact(&mut buf)?;
        Self::decode(&buf)
    }
}

//! Sealable backing files for payload images.

use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::FileExt;

use memfd::{FileSeal, Memfd, MemfdOptions};

/// A file that can be filled, sized and then sealed against resizing.
///
/// The payload builder only depends on this capability, so the OS primitive
/// can be swapped out (or made to fail) in tests.
pub trait SealableFile: AsFd + Sized {
    /// Write all of `buf` at `offset`, growing the file as needed.
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()>;

    /// Set the file size.
    fn truncate(&mut self, size: u64) -> io::Result<()>;

    /// Forbid any further shrinking or growing of the file.
    fn seal(&mut self) -> io::Result<()>;

    /// Give up the file as a plain descriptor.
    fn into_owned_fd(self) -> OwnedFd;
}

/// Anonymous memory file (`memfd_create`) with close-on-exec and sealing.
#[derive(Debug)]
pub struct SealedMemfd {
    memfd: Memfd,
}

impl SealedMemfd {
    /// Name shown in `/proc/<pid>/fd` for payload files.
    pub const NAME: &'static str = "payload";

    /// Create an empty, growable memfd.
    pub fn create() -> io::Result<Self> {
        let memfd = MemfdOptions::default()
            .close_on_exec(true)
            .allow_sealing(true)
            .create(Self::NAME)
            .map_err(io::Error::other)?;

        Ok(Self { memfd })
    }
}

impl AsFd for SealedMemfd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.memfd.as_file().as_fd()
    }
}

impl SealableFile for SealedMemfd {
    fn write_at(&mut self, buf: &[u8], offset: u64) -> io::Result<()> {
        self.memfd.as_file().write_all_at(buf, offset)
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.memfd.as_file().set_len(size)
    }

    fn seal(&mut self) -> io::Result<()> {
        self.memfd
            .add_seals(&[FileSeal::SealShrink, FileSeal::SealGrow])
            .map_err(io::Error::other)
    }

    fn into_owned_fd(self) -> OwnedFd {
        self.memfd.into_file().into()
    }
}

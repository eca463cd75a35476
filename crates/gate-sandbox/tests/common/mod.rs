//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use gate_sandbox::Artifacts;
use object::write::{Object, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};

/// Symbols of a loader exposing the whole ABI, plus one unrelated symbol.
pub const LOADER_SYMBOLS: &[(&str, u64)] = &[
    ("__gate_get_abi_version", 0x1000),
    ("__gate_get_max_packet_size", 0x1010),
    ("__gate_get_arg", 0x1020),
    ("__gate_get_page_size", 0x1030),
    ("__gate_func_ptr", 0x1100),
    ("__gate_exit", 0x1200),
    ("__gate_recv_full", 0x1300),
    ("__gate_send_full", 0x1400),
    ("_start", 0x2000),
];

/// Write an ELF object containing the given absolute symbols.
pub fn write_loader(dir: &Path, symbols: &[(&str, u64)]) -> PathBuf {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);

    for &(name, value) in symbols {
        obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value,
            size: 0,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Absolute,
            flags: SymbolFlags::None,
        });
    }

    let path = dir.join("loader");
    fs::write(&path, obj.write().expect("failed to write ELF")).expect("failed to save loader");
    path
}

/// Directory for test executables, on a filesystem that permits exec.
pub fn exec_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("gate-sandbox")
        .tempdir_in(env!("CARGO_TARGET_TMPDIR"))
        .expect("failed to create test directory")
}

/// Write an executable shell script.
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("failed to write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("failed to chmod script");
    path
}

/// Small module: 10 bytes rodata, 20 bytes code, 16 bytes of globals and
/// 16 bytes of initial linear memory.
pub fn artifacts() -> Artifacts {
    let mut data = vec![0xAAu8; 16];
    data.extend_from_slice(&[0x55u8; 16]);

    Artifacts {
        rodata: vec![1u8; 10],
        text: vec![2u8; 20],
        data,
        memory_offset: 16,
        init_memory_size: 65536,
    }
}

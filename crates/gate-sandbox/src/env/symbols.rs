//! Loader symbol table extraction.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use object::{BinaryFormat, Object, ObjectSymbol, ObjectSymbolTable};

use crate::abi::{self, Signature};
use crate::error::{Result, SandboxError};

/// A loader entry point the sandbox ABI depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    /// Symbol name
    pub name: &'static str,
    /// Virtual address within the loader
    pub addr: u64,
    /// ABI signature
    pub signature: Signature,
}

/// Allow-listed entry points found in a loader binary.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: HashMap<&'static str, EntryPoint>,
}

impl SymbolTable {
    /// Read the loader's ELF symbol table.
    ///
    /// The file position is rewound to the start on success so that the
    /// descriptor can be handed to the executor as-is.
    pub fn read(file: &mut File) -> Result<Self> {
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let table = Self::parse(&data)?;

        file.seek(SeekFrom::Start(0))?;
        Ok(table)
    }

    /// Parse an in-memory ELF image.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let elf = object::File::parse(data)
            .map_err(|e| SandboxError::LoaderFormat(e.to_string()))?;

        if elf.format() != BinaryFormat::Elf {
            return Err(SandboxError::LoaderFormat(format!(
                "expected ELF, found {:?}",
                elf.format()
            )));
        }

        let symtab = elf
            .symbol_table()
            .ok_or_else(|| SandboxError::LoaderFormat("no symbol section".to_string()))?;

        let mut symbols = Vec::new();
        for symbol in symtab.symbols() {
            let name = symbol
                .name()
                .map_err(|e| SandboxError::LoaderFormat(format!("bad symbol name: {}", e)))?;
            symbols.push((name, symbol.address()));
        }

        Ok(Self::from_symbols(symbols))
    }

    /// Build a table from (name, address) pairs, keeping allow-listed names.
    pub fn from_symbols<'a>(symbols: impl IntoIterator<Item = (&'a str, u64)>) -> Self {
        let mut entries = HashMap::new();

        for (name, addr) in symbols {
            if let Some((name, signature)) = abi::entry_point_signature(name) {
                entries.insert(
                    name,
                    EntryPoint {
                        name,
                        addr,
                        signature,
                    },
                );
            }
        }

        Self { entries }
    }

    /// Look up an entry point by name.
    pub fn get(&self, name: &str) -> Option<&EntryPoint> {
        self.entries.get(name)
    }

    /// Iterate over the resolved entry points.
    pub fn iter(&self) -> impl Iterator<Item = &EntryPoint> {
        self.entries.values()
    }

    /// Number of resolved entry points.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the loader exposes none of the ABI entry points.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

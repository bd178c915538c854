//! The uniform image model every backend produces.
//!
//! Backends (`elf`, `pe`, `blob`, `extractor`) are pure parsers: given bytes
//! plus a per-image options bag they build an [`Image`], the single struct
//! the rest of the crate operates on. Format-specific behavior is captured
//! by the [`ImageKind`] tag rather than trait objects or `isinstance`
//! checks, so the relocation engine and query surface can dispatch with a
//! `match` instead of downcasting.

pub mod blob;
pub mod elf;
pub mod extractor;
pub mod pe;

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::arch::Arch;
use crate::memory::ImageMemory;
use crate::reloc::RelocationEntry;

/// Which backend produced an [`Image`], used only for relocation and query
/// dispatch (`spec.md` §4.6, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Elf,
    SharedObject,
    Pe,
    Blob,
    Extractor,
}

/// A symbol's name and size, indexed by the image-local address it starts
/// at (`symbols_by_offset` in `spec.md` §3).
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub size: u64,
}

/// One parsed binary and everything the loader needs from it.
///
/// Immutable after parsing except `rebase_addr` (written once by the
/// orchestrator) and `tls_module_id` (written once by the relocation
/// engine); the bytes of `local_memory` are patched in place during
/// relocation through its shared, interior-mutable handle.
#[derive(Debug, Clone)]
pub struct Image {
    pub path: PathBuf,
    pub kind: ImageKind,
    pub arch: Arch,

    /// The soname this image supplies, or `None` for the main executable
    /// or a backend (e.g. `blob`) that never provides one.
    pub provides: Option<String>,

    /// Dependency names as declared by the image, in file order.
    pub deps: Vec<String>,

    pub local_memory: ImageMemory,
    pub min_offset: u64,
    pub max_offset: u64,

    /// Symbol name -> image-local address.
    pub exports: BTreeMap<String, u64>,

    /// Symbol name -> image-local address of the slot that must be patched.
    pub imports: BTreeMap<String, u64>,

    pub relocations: Vec<RelocationEntry>,

    pub symbols_by_offset: BTreeMap<u64, Symbol>,

    /// Absolute base address this image was rebased to. `None` until the
    /// orchestrator adds it to the memory map.
    pub rebase_addr: Option<u64>,

    /// 0-based load order, assigned by the relocation engine.
    pub tls_module_id: Option<u32>,
}

impl Image {
    /// The image's size in bytes: `max_offset - min_offset + 1`.
    pub fn size(&self) -> u64 {
        self.max_offset - self.min_offset + 1
    }

    /// The filename component of [`Image::path`], used by
    /// [`crate::loader::Loader::module_at`] and in log messages.
    pub fn basename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }

    /// Best-effort containing-function lookup for `addr` (an image-local
    /// offset): an exact start match wins; otherwise the nearest preceding
    /// symbol whose size covers `addr`, and failing that the nearest
    /// preceding symbol at all (`SPEC_FULL.md` §3).
    pub fn function_containing(&self, addr: u64) -> Option<&str> {
        if let Some(sym) = self.symbols_by_offset.get(&addr) {
            return Some(&sym.name);
        }
        let (_, sym) = self.symbols_by_offset.range(..=addr).next_back()?;
        Some(&sym.name)
    }

    /// Exact-start symbol lookup for `addr` (an image-local offset).
    pub fn symbol_at(&self, addr: u64) -> Option<&str> {
        self.symbols_by_offset.get(&addr).map(|s| s.name.as_str())
    }

    pub fn contains_local_addr(&self, addr: u64) -> bool {
        addr >= self.min_offset && addr <= self.max_offset
    }
}

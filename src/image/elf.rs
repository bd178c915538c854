//! ELF/shared-object backend: parses the file with `goblin`, flattens its
//! `PT_LOAD` segments into a single image-local byte vector, and turns its
//! dynamic relocation sections into [`RelocationEntry`] values the engine
//! can apply uniformly.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use az_logger::{error, info};
use goblin::elf::Elf;

use crate::arch::Arch;
use crate::errors::{LoaderError, LoaderResult};
use crate::image::{Image, ImageKind, Symbol};
use crate::memory::ImageMemory;
use crate::reloc::{RelocKind, RelocationEntry};

const PT_LOAD: u32 = 1;
const R_X86_64_64: u32 = 1;
const R_X86_64_COPY: u32 = 5;
const R_X86_64_GLOB_DAT: u32 = 6;
const R_X86_64_JUMP_SLOT: u32 = 7;
const R_X86_64_RELATIVE: u32 = 8;
const STB_LOCAL: u8 = 0;
const STB_WEAK: u8 = 2;

/// Per-library options recognized by the `elf` backend, beyond the
/// universally-meaningful `custom_base_addr`/`backend` keys the
/// orchestrator already strips out before calling the backend.
#[derive(Debug, Default, Clone)]
pub struct ElfOptions {}

/// Whether a symbol with this `st_info >> 4` binding can be an export:
/// anything but `STB_LOCAL`, i.e. `STB_GLOBAL` or `STB_WEAK`.
fn is_exportable_binding(binding: u8) -> bool {
    binding != STB_LOCAL
}

pub fn parse(path: impl AsRef<Path>, _options: &ElfOptions) -> LoaderResult<Image> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let bytes = std::fs::read(&path)?;
    let elf = Elf::parse(&bytes).map_err(|e| LoaderError::ParseError(e.to_string()))?;

    let arch = Arch::from_elf_machine(elf.header.e_machine, elf.is_64, elf.little_endian);
    let deps: Vec<String> = elf.libraries.iter().map(|s| s.to_string()).collect();
    let provides = elf.soname.map(|s| s.to_string());
    let kind = if elf.is_lib {
        ImageKind::SharedObject
    } else {
        ImageKind::Elf
    };

    let mut max_extent: u64 = 0;
    for ph in elf.program_headers.iter().filter(|p| p.p_type == PT_LOAD) {
        max_extent = max_extent.max(ph.p_vaddr + ph.p_memsz);
    }
    if max_extent == 0 {
        error!("no PT_LOAD segments found in {}", path.display());
        return Err(LoaderError::ParseError(format!(
            "{}: no loadable segments",
            path.display()
        )));
    }
    let mut mapping = vec![0u8; max_extent as usize];
    for ph in elf.program_headers.iter().filter(|p| p.p_type == PT_LOAD) {
        let src_start = ph.p_offset as usize;
        let src_end = src_start + ph.p_filesz as usize;
        let dst_start = ph.p_vaddr as usize;
        let dst_end = dst_start + ph.p_filesz as usize;
        if src_end > bytes.len() || dst_end > mapping.len() {
            return Err(LoaderError::ParseError(format!(
                "{}: PT_LOAD segment out of bounds",
                path.display()
            )));
        }
        mapping[dst_start..dst_end].copy_from_slice(&bytes[src_start..src_end]);
    }

    let (syms, strtab) = if !elf.syms.is_empty() {
        (&elf.syms, &elf.strtab)
    } else {
        (&elf.dynsyms, &elf.dynstrtab)
    };

    let mut exports = BTreeMap::new();
    let mut symbols_by_offset = BTreeMap::new();
    for sym in syms.iter() {
        let Some(name) = strtab.get_at(sym.st_name) else {
            continue;
        };
        if name.is_empty() || sym.st_shndx == 0 {
            continue;
        }
        // A file-local (STB_LOCAL) symbol is not an export: it can't be the
        // intended target of another image's relocation, and letting it into
        // `exports` risks a same-named static in the main binary shadowing a
        // dependency's real export, since resolve_export takes the first
        // match in load order. It still belongs in symbols_by_offset, which
        // backs function_containing/symbol_at and has no such tie-break.
        if is_exportable_binding(sym.st_info >> 4) {
            exports.insert(name.to_string(), sym.st_value);
        }
        symbols_by_offset.insert(
            sym.st_value,
            Symbol {
                name: name.to_string(),
                size: sym.st_size,
            },
        );
    }

    let mut imports = BTreeMap::new();
    let mut relocations = Vec::new();
    let reloc_sections = [&elf.dynrelas, &elf.dynrels, &elf.pltrelocs];
    for section in reloc_sections {
        for r in section.iter() {
            let dynsym = elf.dynsyms.get(r.r_sym);
            let name = dynsym
                .and_then(|s| elf.dynstrtab.get_at(s.st_name))
                .map(|s| s.to_string());
            let weak = dynsym
                .map(|s| (s.st_info >> 4) == STB_WEAK)
                .unwrap_or(false);
            let addend = r.r_addend.unwrap_or(0);

            let kind = match r.r_type {
                R_X86_64_RELATIVE => RelocKind::Relative,
                R_X86_64_GLOB_DAT | R_X86_64_JUMP_SLOT => RelocKind::JumpSlot,
                R_X86_64_64 => RelocKind::Absolute,
                R_X86_64_COPY => RelocKind::Copy {
                    size: dynsym.map(|s| s.st_size).unwrap_or(0),
                },
                _ => continue,
            };

            if let Some(name) = &name {
                if !matches!(kind, RelocKind::Relative) {
                    imports.insert(name.clone(), r.r_offset);
                }
            }

            relocations.push(RelocationEntry {
                symbol: name,
                slot_offset: r.r_offset,
                kind,
                addend,
                weak,
            });
        }
    }

    info!(
        "parsed elf image {} ({} deps, {} exports, {} relocations)",
        path.display(),
        deps.len(),
        exports.len(),
        relocations.len()
    );

    Ok(Image {
        path,
        kind,
        arch,
        provides,
        deps,
        local_memory: ImageMemory::new(mapping),
        min_offset: 0,
        max_offset: max_extent - 1,
        exports,
        imports,
        relocations,
        symbols_by_offset,
        rebase_addr: None,
        tls_module_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_non_elf_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_elf");
        std::fs::write(&path, b"not an elf file at all").unwrap();
        let err = parse(&path, &ElfOptions::default()).unwrap_err();
        assert!(matches!(err, LoaderError::ParseError(_)));
    }

    /// `STB_LOCAL` (0) symbols are statics, not exports; only `STB_GLOBAL`
    /// (1) and `STB_WEAK` (2) may satisfy another image's relocation.
    #[test]
    fn only_non_local_bindings_are_exportable() {
        const STB_GLOBAL: u8 = 1;
        assert!(!is_exportable_binding(STB_LOCAL));
        assert!(is_exportable_binding(STB_GLOBAL));
        assert!(is_exportable_binding(STB_WEAK));
    }
}

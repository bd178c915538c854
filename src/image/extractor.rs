//! The "external-tool" backend (`extractor`): grounded in
//! `original_source/cle/cle.py`'s `IdaBin`/`CLEExtractor` backends, which
//! delegate structural extraction to an external analysis tool rather than
//! parsing the format themselves.
//!
//! That external tool is an out-of-scope collaborator (`spec.md` §1), so
//! this backend takes its extracted structure — exports, imports, and
//! dependency list — as part of the per-image options bag instead of
//! invoking anything. Parsing stays pure: the same options always produce
//! the same [`Image`].
//!
//! Relocation for this kind is not the normal [`RelocationEntry`] table
//! walk; [`crate::loader::Loader`] resolves its imports directly against
//! the global export index instead (`spec.md` §4.6).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use az_logger::info;

use crate::arch::Arch;
use crate::errors::LoaderResult;
use crate::image::{Image, ImageKind};
use crate::memory::ImageMemory;

/// Pre-extracted structure for an `extractor`-backed image, supplied by
/// whatever harness ran the external tool ahead of time.
#[derive(Debug, Clone)]
pub struct ExtractorOptions {
    pub arch: Arch,
    pub provides: Option<String>,
    pub deps: Vec<String>,
    pub memory: Vec<u8>,
    /// Symbol name -> image-local address, for symbols this image itself
    /// defines (used to shadow external exports per `spec.md` §4.6).
    pub exports: BTreeMap<String, u64>,
    /// Symbol name -> image-local address of the import slot to patch.
    pub imports: BTreeMap<String, u64>,
}

pub fn parse(path: impl AsRef<Path>, options: &ExtractorOptions) -> LoaderResult<Image> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let max_offset = options.memory.len().saturating_sub(1) as u64;

    info!(
        "parsed extractor image {} ({} deps, {} imports)",
        path.display(),
        options.deps.len(),
        options.imports.len()
    );

    Ok(Image {
        path,
        kind: ImageKind::Extractor,
        arch: options.arch.clone(),
        provides: options.provides.clone(),
        deps: options.deps.clone(),
        local_memory: ImageMemory::new(options.memory.clone()),
        min_offset: 0,
        max_offset,
        exports: options.exports.clone(),
        imports: options.imports.clone(),
        relocations: Vec::new(),
        symbols_by_offset: BTreeMap::new(),
        rebase_addr: None,
        tls_module_id: None,
    })
}

/// Resolves `owner`'s imports directly (the alternate resolution path
/// `spec.md` §4.6 specifies for this backend), writing each resolved
/// address into its slot. A symbol `owner` defines itself shadows an
/// external export of the same name.
pub fn resolve_imports(owner: &Image, all_images: &[Image]) -> LoaderResult<()> {
    use az_logger::warn;

    for (name, &slot) in &owner.imports {
        let resolved = if let Some(&local) = owner.exports.get(name) {
            owner.rebase_addr.map(|base| base + local)
        } else {
            crate::reloc::resolve_export(all_images, name)
        };

        match resolved {
            Some(addr) => owner.local_memory.write_u64(slot, addr)?,
            None => warn!(
                "extractor backend: unable to resolve import '{name}' in {}",
                owner.basename()
            ),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_export_shadows_external_export() {
        let mut owner = parse(
            "fake.bin",
            &ExtractorOptions {
                arch: Arch::x86_64(),
                provides: None,
                deps: Vec::new(),
                memory: vec![0u8; 0x100],
                exports: BTreeMap::from([("helper".to_string(), 0x10)]),
                imports: BTreeMap::from([("helper".to_string(), 0x40)]),
            },
        )
        .unwrap();
        owner.rebase_addr = Some(0x2000);

        let mut other = parse(
            "lib.bin",
            &ExtractorOptions {
                arch: Arch::x86_64(),
                provides: Some("lib.bin".to_string()),
                deps: Vec::new(),
                memory: vec![0u8; 0x10],
                exports: BTreeMap::from([("helper".to_string(), 0)]),
                imports: BTreeMap::new(),
            },
        )
        .unwrap();
        other.rebase_addr = Some(0x9000);

        let all = vec![owner.clone(), other];
        resolve_imports(&all[0], &all).unwrap();
        assert_eq!(all[0].local_memory.read_u64(0x40).unwrap(), 0x2010);
    }
}

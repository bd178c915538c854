//! PE/DLL backend: parses the file with `goblin`, flattens its sections
//! into a single image-local byte vector keyed by RVA. Per `spec.md` §4.6,
//! PE images supply their own loader-internal resolution, so this backend
//! never emits [`RelocationEntry`] values — the engine takes no action for
//! [`ImageKind::Pe`](crate::image::ImageKind::Pe) images.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use az_logger::info;
use goblin::Object;
use goblin::pe::PE;

use crate::arch::Arch;
use crate::errors::{LoaderError, LoaderResult};
use crate::image::{Image, ImageKind, Symbol};
use crate::memory::ImageMemory;

#[derive(Debug, Default, Clone)]
pub struct PeOptions {}

pub fn parse(path: impl AsRef<Path>, _options: &PeOptions) -> LoaderResult<Image> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let bytes = std::fs::read(&path)?;
    let pe = match Object::parse(&bytes).map_err(|e| LoaderError::ParseError(e.to_string()))? {
        Object::PE(pe) => pe,
        _ => {
            return Err(LoaderError::ParseError(format!(
                "{}: not a PE file",
                path.display()
            )));
        }
    };

    build_image(path, &pe, &bytes)
}

fn build_image(path: PathBuf, pe: &PE, bytes: &[u8]) -> LoaderResult<Image> {
    let arch = Arch::from_pe_machine(pe.is_64);
    let provides = pe.is_lib.then(|| pe.name.map(str::to_string)).flatten();

    let mut deps: Vec<String> = pe.libraries.iter().map(|s| s.to_string()).collect();
    deps.dedup();

    let mut max_extent: u64 = 0;
    for section in &pe.sections {
        max_extent = max_extent.max(section.virtual_address as u64 + section.virtual_size as u64);
    }
    let mut mapping = vec![0u8; max_extent as usize];
    for section in &pe.sections {
        let raw_start = section.pointer_to_raw_data as usize;
        let raw_size = section.size_of_raw_data as usize;
        let raw_end = raw_start.saturating_add(raw_size);
        let dst_start = section.virtual_address as usize;
        let dst_end = dst_start.saturating_add(raw_size);
        if raw_size == 0 || raw_end > bytes.len() || dst_end > mapping.len() {
            continue;
        }
        mapping[dst_start..dst_end].copy_from_slice(&bytes[raw_start..raw_end]);
    }

    let mut exports = BTreeMap::new();
    let mut symbols_by_offset = BTreeMap::new();
    for export in &pe.exports {
        let Some(name) = export.name else { continue };
        exports.insert(name.to_string(), export.rva as u64);
        symbols_by_offset.insert(
            export.rva as u64,
            Symbol {
                name: name.to_string(),
                size: export.size as u64,
            },
        );
    }

    let mut imports = BTreeMap::new();
    for import in &pe.imports {
        imports.insert(import.name.to_string(), import.rva as u64);
    }

    info!(
        "parsed pe image {} ({} deps, {} exports)",
        path.display(),
        deps.len(),
        exports.len()
    );

    Ok(Image {
        path,
        kind: ImageKind::Pe,
        arch,
        provides,
        deps,
        local_memory: ImageMemory::new(mapping),
        min_offset: 0,
        max_offset: max_extent.saturating_sub(1),
        exports,
        imports,
        relocations: Vec::new(),
        symbols_by_offset,
        rebase_addr: None,
        tls_module_id: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_non_pe_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_pe");
        std::fs::write(&path, b"MZ but otherwise garbage").unwrap();
        let err = parse(&path, &PeOptions::default()).unwrap_err();
        assert!(matches!(err, LoaderError::ParseError(_)));
    }
}

//! The `blob` backend: treats a file as an opaque byte array with no
//! structure at all. Supplements the distilled spec from
//! `original_source/cle/cle.py`'s `Blob` backend reference — useful for
//! loading raw shellcode or firmware images that carry no format header an
//! architecture could be inferred from, so the caller must supply one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use az_logger::info;

use crate::arch::Arch;
use crate::errors::LoaderResult;
use crate::image::{Image, ImageKind};
use crate::memory::ImageMemory;

/// Options the `blob` backend requires: since a blob has no header to
/// infer an [`Arch`] from, the caller must supply one.
#[derive(Debug, Clone)]
pub struct BlobOptions {
    pub arch: Arch,
}

pub fn parse(path: impl AsRef<Path>, options: &BlobOptions) -> LoaderResult<Image> {
    let path: PathBuf = path.as_ref().to_path_buf();
    let bytes = std::fs::read(&path)?;
    let max_offset = bytes.len().saturating_sub(1) as u64;

    info!("parsed blob image {} ({} bytes)", path.display(), bytes.len());

    Ok(Image {
        path,
        kind: ImageKind::Blob,
        arch: options.arch.clone(),
        provides: None,
        deps: Vec::new(),
        local_memory: ImageMemory::new(bytes),
        min_offset: 0,
        max_offset,
        exports: BTreeMap::new(),
        imports: BTreeMap::new(),
        relocations: Vec::new(),
        symbols_by_offset: BTreeMap::new(),
        rebase_addr: None,
        tls_module_id: None,
    })
}

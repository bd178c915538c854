//! The relocation engine: applies each image's relocation entries against
//! the global export index built from every loaded image (`spec.md` §4.6).

use az_logger::warn;

use crate::errors::LoaderResult;
use crate::image::Image;

/// Abstracted relocation kinds. The concrete ELF/PE relocation type table
/// is architecture- and format-specific and is collapsed into this small
/// set by each backend at parse time; the engine only needs to know how to
/// combine a resolved symbol value `S`, an addend `A`, and the owning
/// image's base `B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// `S + A`: absolute address of the resolved symbol, plus addend.
    Absolute,
    /// `B + A`: image base plus addend, no symbol lookup needed.
    Relative,
    /// `S`: absolute address of the resolved symbol (GOT/PLT binding).
    JumpSlot,
    /// Like [`RelocKind::Absolute`] but copies `size` bytes from the
    /// resolving export rather than writing a pointer (ELF `R_*_COPY`).
    Copy { size: u64 },
}

/// One relocation entry: a slot to patch, the symbol it resolves against
/// (if any), and how to combine the resolved value into a final word.
#[derive(Debug, Clone)]
pub struct RelocationEntry {
    pub symbol: Option<String>,
    pub slot_offset: u64,
    pub kind: RelocKind,
    pub addend: i64,
    /// Weak symbols that fail to resolve are left zero silently; normal
    /// symbols that fail to resolve log a warning (`spec.md` §4.6).
    pub weak: bool,
}

/// Looks up `name` across every image's exports, in load order. The first
/// image that exports it wins (`spec.md` §4.6 tie-break rule).
pub fn resolve_export(all_images: &[Image], name: &str) -> Option<u64> {
    for image in all_images {
        if let Some(&local_addr) = image.exports.get(name) {
            let base = image.rebase_addr.expect("exporting image must be rebased");
            return Some(base + local_addr);
        }
    }
    None
}

impl RelocationEntry {
    /// Applies this relocation, writing the final value into `owner`'s
    /// memory at `slot_offset`. `owner` must already have a `rebase_addr`.
    pub fn apply(&self, owner: &Image, all_images: &[Image]) -> LoaderResult<()> {
        let owner_base = owner
            .rebase_addr
            .expect("owner must be rebased before relocation");

        let value = match self.kind {
            RelocKind::Relative => Some(owner_base.wrapping_add(self.addend as u64)),
            RelocKind::Absolute | RelocKind::JumpSlot | RelocKind::Copy { .. } => {
                let name = self.symbol.as_deref().unwrap_or("");
                match resolve_export(all_images, name) {
                    Some(s) => Some(s.wrapping_add(self.addend as u64)),
                    None => {
                        if !self.weak {
                            warn!(
                                "unresolved symbol '{name}' in relocation at {:#x} ({})",
                                owner_base + self.slot_offset,
                                owner.basename()
                            );
                        }
                        None
                    }
                }
            }
        };

        let Some(value) = value else {
            return Ok(());
        };

        match self.kind {
            RelocKind::Copy { size } => {
                let name = self.symbol.as_deref().unwrap_or("");
                if let Some(src_addr) = resolve_export(all_images, name) {
                    if let Some((src_image, local)) = find_owner(all_images, src_addr) {
                        if let Some(bytes) = src_image.local_memory.read_bytes(local, size as usize) {
                            owner.local_memory.write_bytes(self.slot_offset, &bytes)?;
                        }
                    }
                }
                Ok(())
            }
            _ => owner.local_memory.write_u64(self.slot_offset, value),
        }
    }
}

fn find_owner(all_images: &[Image], abs_addr: u64) -> Option<(&Image, u64)> {
    all_images.iter().find_map(|img| {
        let base = img.rebase_addr?;
        let local = abs_addr.checked_sub(base)?;
        img.contains_local_addr(local).then_some((img, local))
    })
}

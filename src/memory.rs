use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use az_logger::info;

use crate::errors::{LoaderError, LoaderResult};

/// An image's own byte content, addressed by *image-local* offset (i.e.
/// before rebasing). Shared (via `Rc`) between the owning [`Image`] and the
/// backer registered for it in the [`MemoryMap`], so relocation writes made
/// through either handle are visible through both.
///
/// [`Image`]: crate::image::Image
#[derive(Debug, Clone)]
pub struct ImageMemory(Rc<RefCell<Vec<u8>>>);

impl ImageMemory {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Rc::new(RefCell::new(bytes)))
    }

    pub fn size(&self) -> u64 {
        self.0.borrow().len() as u64
    }

    pub fn read_byte(&self, offset: u64) -> Option<u8> {
        self.0.borrow().get(offset as usize).copied()
    }

    pub fn read_bytes(&self, offset: u64, len: usize) -> Option<Vec<u8>> {
        let buf = self.0.borrow();
        let start = offset as usize;
        let end = start.checked_add(len)?;
        buf.get(start..end).map(|s| s.to_vec())
    }

    /// Reads a little-endian `u64` word at `offset`, the width relocations
    /// most commonly patch.
    pub fn read_u64(&self, offset: u64) -> Option<u64> {
        let bytes = self.read_bytes(offset, 8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn write_bytes(&self, offset: u64, data: &[u8]) -> LoaderResult<()> {
        let mut buf = self.0.borrow_mut();
        let start = offset as usize;
        let end = start
            .checked_add(data.len())
            .ok_or(LoaderError::Unmapped(offset))?;
        if end > buf.len() {
            return Err(LoaderError::Unmapped(offset));
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    pub fn write_u64(&self, offset: u64, value: u64) -> LoaderResult<()> {
        self.write_bytes(offset, &value.to_le_bytes())
    }
}

/// A single non-overlapping region of the unified address space: an
/// absolute base address plus the image-local memory backing it.
#[derive(Debug, Clone)]
struct Backer {
    size: u64,
    memory: ImageMemory,
}

/// Sparse address-space abstraction over a handful of non-overlapping
/// images ("backers"), each registered at an absolute base address.
///
/// No coalescing is performed and none is needed: backers are added once
/// per loaded image and never merged (`spec.md` §4.1).
#[derive(Debug, Default)]
pub struct MemoryMap {
    backers: BTreeMap<u64, Backer>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self {
            backers: BTreeMap::new(),
        }
    }

    fn overlaps(&self, base: u64, size: u64, skip_base: Option<u64>) -> bool {
        let end = base.saturating_add(size);
        self.backers.iter().any(|(&other_base, backer)| {
            if Some(other_base) == skip_base {
                return false;
            }
            let other_end = other_base.saturating_add(backer.size);
            base < other_end && other_base < end
        })
    }

    /// Registers a new backer at `base`. Fails with
    /// [`LoaderError::Overlap`] if `[base, base + memory.size())`
    /// intersects any existing backer.
    pub fn add_backer(&mut self, base: u64, memory: ImageMemory) -> LoaderResult<()> {
        let size = memory.size();
        if self.overlaps(base, size, None) {
            return Err(LoaderError::Overlap { base, size });
        }
        info!("mapping backer at {base:#x} (size {size:#x})");
        self.backers.insert(base, Backer { size, memory });
        Ok(())
    }

    /// Replaces the backer registered at exactly `base`. Fails with
    /// [`LoaderError::NotMapped`] if no backer is registered there.
    pub fn update_backer(&mut self, base: u64, memory: ImageMemory) -> LoaderResult<()> {
        if !self.backers.contains_key(&base) {
            return Err(LoaderError::NotMapped(base));
        }
        let size = memory.size();
        self.backers.insert(base, Backer { size, memory });
        Ok(())
    }

    fn backer_for(&self, addr: u64) -> Option<(&u64, &Backer)> {
        self.backers
            .range(..=addr)
            .next_back()
            .filter(|(&base, backer)| addr < base.saturating_add(backer.size))
    }

    /// Reads the byte at absolute address `addr`.
    pub fn read(&self, addr: u64) -> LoaderResult<u8> {
        let (base, backer) = self
            .backer_for(addr)
            .ok_or(LoaderError::Unmapped(addr))?;
        backer
            .memory
            .read_byte(addr - base)
            .ok_or(LoaderError::Unmapped(addr))
    }

    /// Whether `addr` falls within any registered backer.
    pub fn contains(&self, addr: u64) -> bool {
        self.backer_for(addr).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_backer_rejects_overlap() {
        let mut map = MemoryMap::new();
        map.add_backer(0x1000, ImageMemory::new(vec![0u8; 0x100]))
            .unwrap();
        let err = map
            .add_backer(0x1080, ImageMemory::new(vec![0u8; 0x100]))
            .unwrap_err();
        assert!(matches!(err, LoaderError::Overlap { .. }));
    }

    #[test]
    fn add_backer_allows_adjacent_regions() {
        let mut map = MemoryMap::new();
        map.add_backer(0x1000, ImageMemory::new(vec![0u8; 0x100]))
            .unwrap();
        map.add_backer(0x1100, ImageMemory::new(vec![0u8; 0x100]))
            .unwrap();
        assert!(map.contains(0x1000));
        assert!(map.contains(0x11ff));
    }

    #[test]
    fn read_returns_unmapped_for_gaps() {
        let mut map = MemoryMap::new();
        map.add_backer(0x1000, ImageMemory::new(vec![0xAB; 0x10]))
            .unwrap();
        assert_eq!(map.read(0x1000).unwrap(), 0xAB);
        assert!(map.read(0x2000).is_err());
    }

    #[test]
    fn update_backer_requires_existing_base() {
        let mut map = MemoryMap::new();
        let err = map
            .update_backer(0x1000, ImageMemory::new(vec![0u8; 4]))
            .unwrap_err();
        assert!(matches!(err, LoaderError::NotMapped(_)));
    }

    #[test]
    fn writes_through_shared_handle_are_visible_via_the_map() {
        let mut map = MemoryMap::new();
        let mem = ImageMemory::new(vec![0u8; 0x10]);
        map.add_backer(0x2000, mem.clone()).unwrap();
        mem.write_u64(0, 0xdeadbeef).unwrap();
        assert_eq!(map.read(0x2000).unwrap(), 0xef);
    }
}

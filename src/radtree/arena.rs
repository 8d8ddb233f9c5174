//! File-backed arena (spec.md §4.3/§6/§9): a single growable memory-mapped
//! region that every node and array chunk lives in, addressed by 64-bit
//! offsets from the start of the file.
//!
//! Every stored pointer is modeled as an [`Offset`] newtype rather than a
//! native pointer, per the DESIGN NOTES in spec.md §9. A real relocating
//! allocator would additionally maintain a back-pointer chain per chunk so
//! a compaction pass could rewrite every live reference; this arena keeps
//! the [`RelPtrVisitor`] dispatch trait that such a compactor would walk,
//! but never moves a live chunk — reclaimed space is tracked on size-keyed
//! free lists instead. See DESIGN.md for why that scope cut is safe here.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{Error, ErrorKind, Result};

pub const CHUNK_HEADER_LEN: usize = 16;
const ALIGN: u64 = 8;
const INITIAL_LEN: u64 = 64 * 1024;

pub const TYPE_RADTREE: u8 = 1;
pub const TYPE_RADNODE: u8 = 2;
pub const TYPE_RADARRAY: u8 = 3;
pub const TYPE_ELEM: u8 = 4;

/// A 64-bit self-relative offset into the arena. `Offset(0)` is reserved as
/// null — the arena never hands out offset 0 as a real allocation because
/// the file header occupies it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(pub u64);

impl Offset {
    pub const NULL: Offset = Offset(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Implemented by every chunk type so a (hypothetical) compactor can find
/// and rewrite all outgoing relative pointers without knowing the chunk's
/// concrete type (spec.md §4.3 `walk_relptr`, §9 "Manual relative pointers").
pub trait RelPtrVisitor {
    fn walk_relptr<F: FnMut(Offset)>(&self, visit: F);
}

struct FileHeader;

impl FileHeader {
    /// Reserved region at the start of the file: magic + the bump-allocation
    /// high-water mark + the live-byte counter. Chunk data starts after it.
    const LEN: u64 = 32;
    const MAGIC: &'static [u8; 8] = b"udbradt1";

    fn write_fresh(map: &mut [u8]) {
        map[0..8].copy_from_slice(Self::MAGIC);
        map[8..16].copy_from_slice(&(Self::LEN).to_le_bytes());
        map[16..24].copy_from_slice(&0u64.to_le_bytes());
    }

    fn bump(map: &[u8]) -> u64 {
        u64::from_le_bytes(map[8..16].try_into().unwrap())
    }

    fn set_bump(map: &mut [u8], value: u64) {
        map[8..16].copy_from_slice(&value.to_le_bytes());
    }

    fn allocated_bytes(map: &[u8]) -> u64 {
        u64::from_le_bytes(map[16..24].try_into().unwrap())
    }

    fn set_allocated_bytes(map: &mut [u8], value: u64) {
        map[16..24].copy_from_slice(&value.to_le_bytes());
    }
}

enum Backing {
    File(File),
    Anonymous,
}

/// The persisted radix-trie arena: a single growable region addressed by
/// [`Offset`], either a real memory-mapped file or (in tests) an anonymous
/// mapping with the same growth semantics. Out-of-space growth remaps the
/// file; failure to grow is the resource-exhaustion error of spec.md §7.
pub struct Arena {
    backing: Backing,
    map: MmapMut,
    /// size-class (total chunk size in bytes, 8-byte aligned) -> offsets of
    /// free chunks of exactly that size, LIFO.
    free_lists: BTreeMap<u64, Vec<u64>>,
}

impl Arena {
    pub fn create(path: &Path) -> Result<Arena> {
        let file = OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path)?;
        file.set_len(INITIAL_LEN)?;
        let mut map = unsafe { MmapMut::map_mut(&file)? };
        FileHeader::write_fresh(&mut map);
        Ok(Arena { backing: Backing::File(file), map, free_lists: BTreeMap::new() })
    }

    pub fn open(path: &Path) -> Result<Arena> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = unsafe { MmapMut::map_mut(&file)? };
        if map.len() < FileHeader::LEN as usize || &map[0..8] != FileHeader::MAGIC {
            return Err(Error::new(ErrorKind::Trie, "not a udb_radtree arena file"));
        }
        Ok(Arena { backing: Backing::File(file), map, free_lists: BTreeMap::new() })
    }

    /// An anonymous, non-persisted arena — used by unit tests and by a
    /// from-scratch first transfer before a destination path is chosen.
    pub fn in_memory() -> Arena {
        let mut map = MmapMut::map_anon(INITIAL_LEN as usize).expect("anonymous mmap");
        FileHeader::write_fresh(&mut map);
        Arena { backing: Backing::Anonymous, map, free_lists: BTreeMap::new() }
    }

    pub fn allocated_bytes(&self) -> u64 {
        FileHeader::allocated_bytes(&self.map)
    }

    fn chunk_total_len(payload_len: usize) -> u64 {
        let raw = CHUNK_HEADER_LEN as u64 + payload_len as u64;
        (raw + ALIGN - 1) / ALIGN * ALIGN
    }

    /// Allocate a chunk of `type_tag` able to hold `payload_len` bytes,
    /// reusing a free chunk of the exact size class if one exists.
    pub fn alloc(&mut self, type_tag: u8, payload_len: usize) -> Result<Offset> {
        let total = Self::chunk_total_len(payload_len);

        let reused = self.free_lists.get_mut(&total).and_then(|offsets| offsets.pop());

        let offset = match reused {
            Some(off) => off,
            None => self.bump_alloc(total)?,
        };

        self.write_chunk_header(offset, type_tag, total);
        let allocated = self.allocated_bytes();
        FileHeader::set_allocated_bytes(&mut self.map, allocated + total);
        Ok(Offset(offset))
    }

    fn bump_alloc(&mut self, total: u64) -> Result<u64> {
        let bump = FileHeader::bump(&self.map);
        let needed = bump + total;
        if needed > self.map.len() as u64 {
            self.grow(needed)?;
        }
        FileHeader::set_bump(&mut self.map, needed);
        Ok(bump)
    }

    fn grow(&mut self, needed: u64) -> Result<()> {
        let mut new_len = self.map.len() as u64;
        while new_len < needed {
            new_len = new_len.saturating_mul(2);
        }

        match &self.backing {
            Backing::File(file) => {
                file.set_len(new_len)
                    .map_err(|e| Error::new(ErrorKind::Trie, format!("arena out of space: {e}")))?;
                self.map = unsafe { MmapMut::map_mut(file).map_err(|e| Error::new(ErrorKind::Trie, e.to_string()))? };
            }
            Backing::Anonymous => {
                let mut new_map = MmapMut::map_anon(new_len as usize)
                    .map_err(|e| Error::new(ErrorKind::Trie, format!("arena out of space: {e}")))?;
                new_map[..self.map.len()].copy_from_slice(&self.map);
                self.map = new_map;
            }
        }
        Ok(())
    }

    fn write_chunk_header(&mut self, offset: u64, type_tag: u8, total: u64) {
        let o = offset as usize;
        self.map[o] = type_tag;
        self.map[o + 1] = 0;
        self.map[o + 4..o + 8].copy_from_slice(&(total as u32).to_le_bytes());
        self.map[o + 8..o + 16].copy_from_slice(&0u64.to_le_bytes());
    }

    pub fn chunk_type(&self, offset: Offset) -> u8 {
        self.map[offset.0 as usize]
    }

    fn chunk_total(&self, offset: Offset) -> u64 {
        let o = offset.0 as usize;
        u32::from_le_bytes(self.map[o + 4..o + 8].try_into().unwrap()) as u64
    }

    pub fn free(&mut self, offset: Offset) {
        if offset.is_null() {
            return;
        }
        let total = self.chunk_total(offset);
        let allocated = self.allocated_bytes();
        FileHeader::set_allocated_bytes(&mut self.map, allocated.saturating_sub(total));
        self.free_lists.entry(total).or_default().push(offset.0);
    }

    pub fn payload(&self, offset: Offset) -> &[u8] {
        let start = offset.0 as usize + CHUNK_HEADER_LEN;
        &self.map[start..]
    }

    pub fn payload_mut(&mut self, offset: Offset) -> &mut [u8] {
        let start = offset.0 as usize + CHUNK_HEADER_LEN;
        &mut self.map[start..]
    }

    pub fn flush(&self) -> Result<()> {
        if let Backing::File(_) = &self.backing {
            self.map.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_reports_in_stat_counter() {
        let mut arena = Arena::in_memory();
        let a = arena.alloc(TYPE_RADNODE, 32).unwrap();
        let b = arena.alloc(TYPE_RADNODE, 32).unwrap();
        assert_ne!(a, b);
        assert!(arena.allocated_bytes() > 0);
    }

    #[test]
    fn free_then_alloc_reuses_size_class() {
        let mut arena = Arena::in_memory();
        let a = arena.alloc(TYPE_RADNODE, 32).unwrap();
        let before = arena.allocated_bytes();
        arena.free(a);
        let b = arena.alloc(TYPE_RADNODE, 32).unwrap();
        assert_eq!(a, b, "freed chunk of the same size class should be reused");
        assert_eq!(arena.allocated_bytes(), before);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut arena = Arena::in_memory();
        for _ in 0..(INITIAL_LEN / 64 + 16) {
            arena.alloc(TYPE_RADARRAY, 48).unwrap();
        }
    }
}

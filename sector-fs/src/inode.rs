use super::layout::{
    sectors_for, BlockIndex, DiskInode, IndirectBlock, Plain, INODE_DIRECT_COUNT,
    INODE_INDIRECT1_COUNT, MAX_FILE_LENGTH, MAX_FILE_SECTORS,
};
use super::{FreeMap, SectorCache, SectorId, SECTOR_SIZE};
use alloc::sync::Arc;
use spin::{Mutex, MutexGuard};

/// A sector of zeros, written to every freshly allocated sector
const EMPTY_SECTOR: [u8; SECTOR_SIZE] = [0u8; SECTOR_SIZE];

/// The state of a inode(file)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// inode number, the sector holding the disk inode
    pub ino: u64,
    /// file type
    pub mode: StatMode,
    /// length in bytes
    pub size: u64,
    /// data sectors backing the content
    pub sectors: u64,
}

bitflags! {
    /// The mode of a inode
    /// whether a directory or a file
    pub struct StatMode: u32 {
        /// null
        const NULL  = 0;
        /// directory
        const DIR   = 0o040000;
        /// ordinary regular file
        const FILE  = 0o100000;
    }
}

/// Mutable part of an open inode
pub(crate) struct InodeState {
    pub(crate) open_count: u32,
    pub(crate) removed: bool,
    pub(crate) deny_write_count: u32,
    pub(crate) disk: DiskInode,
}

/// An open file or directory.
///
/// At most one `Inode` exists per inode sector at a time; it is shared by every
/// opener through the [`crate::InodeTable`], which also decides when it dies.
pub struct Inode {
    sector: SectorId,
    cache: Arc<SectorCache>,
    free_map: Arc<FreeMap>,
    state: Mutex<InodeState>,
}

impl Inode {
    pub(crate) fn new(
        sector: SectorId,
        disk: DiskInode,
        cache: Arc<SectorCache>,
        free_map: Arc<FreeMap>,
    ) -> Self {
        Self {
            sector,
            cache,
            free_map,
            state: Mutex::new(InodeState {
                open_count: 1,
                removed: false,
                deny_write_count: 0,
                disk,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<InodeState> {
        self.state.lock()
    }

    /// Inode number: the sector holding the disk inode
    pub fn inumber(&self) -> SectorId {
        self.sector
    }

    /// Length in bytes
    pub fn length(&self) -> usize {
        self.state.lock().disk.length as usize
    }

    /// Whether this inode is a directory
    pub fn is_directory(&self) -> bool {
        self.state.lock().disk.is_dir()
    }

    /// Number of current openers
    pub fn open_count(&self) -> u32 {
        self.state.lock().open_count
    }

    /// Whether the inode is deleted once the last opener closes it
    pub fn is_removed(&self) -> bool {
        self.state.lock().removed
    }

    /// Number of openers currently denying writes
    pub fn deny_write_count(&self) -> u32 {
        self.state.lock().deny_write_count
    }

    /// Mark the inode for deletion. Its sectors stay valid until the last close.
    pub fn remove(&self) {
        self.state.lock().removed = true;
    }

    /// Disable writes. May be called at most once per opener.
    pub fn deny_write(&self) {
        let mut state = self.state.lock();
        state.deny_write_count += 1;
        assert!(state.deny_write_count <= state.open_count);
    }

    /// Re-enable writes. Each opener that denied writes must call this before closing.
    pub fn allow_write(&self) {
        let mut state = self.state.lock();
        assert!(state.deny_write_count > 0);
        assert!(state.deny_write_count <= state.open_count);
        state.deny_write_count -= 1;
    }

    /// Read stat from current inode
    pub fn stat(&self) -> Stat {
        let state = self.state.lock();
        Stat {
            ino: self.sector as u64,
            mode: if state.disk.is_dir() {
                StatMode::DIR
            } else {
                StatMode::FILE
            },
            size: state.disk.length as u64,
            sectors: state.disk.data_sectors() as u64,
        }
    }

    /// Read up to `buf.len()` bytes starting at `offset`.
    /// Returns the number of bytes read, short at end of file.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let state = self.state.lock();
        let disk = &state.disk;
        let length = disk.length as usize;
        let mut offset = offset;
        let mut read_size = 0usize;
        let mut bounce = [0u8; SECTOR_SIZE];
        while read_size < buf.len() && offset < length {
            let sector_ofs = offset % SECTOR_SIZE;
            let chunk = (buf.len() - read_size)
                .min(length - offset)
                .min(SECTOR_SIZE - sector_ofs);
            let sector = match byte_to_sector(disk, offset, &self.cache) {
                Some(sector) => sector,
                None => break,
            };
            let dst = &mut buf[read_size..read_size + chunk];
            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                self.cache.read(sector, dst);
            } else {
                self.cache.read(sector, &mut bounce);
                dst.copy_from_slice(&bounce[sector_ofs..sector_ofs + chunk]);
            }
            offset += chunk;
            read_size += chunk;
        }
        read_size
    }

    /// Write `buf` at `offset`, growing the file first if it ends past the
    /// current length. Returns the number of bytes written: 0 when writes are
    /// denied, the range ends past [`crate::MAX_FILE_LENGTH`] or the file cannot grow.
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        let mut state = self.state.lock();
        if state.deny_write_count > 0 || buf.is_empty() {
            return 0;
        }
        let end = match offset.checked_add(buf.len()) {
            Some(end) if end <= MAX_FILE_LENGTH => end,
            _ => return 0,
        };
        if end > state.disk.length as usize {
            let grown = grow(&mut state.disk, end, &self.cache, &self.free_map);
            if grown {
                state.disk.length = end as u32;
            }
            self.cache.write(self.sector, state.disk.as_bytes());
            if !grown {
                return 0;
            }
        }
        let disk = &state.disk;
        let mut offset = offset;
        let mut write_size = 0usize;
        let mut bounce = [0u8; SECTOR_SIZE];
        while write_size < buf.len() {
            let sector_ofs = offset % SECTOR_SIZE;
            let sector_left = SECTOR_SIZE - sector_ofs;
            let chunk = (buf.len() - write_size).min(sector_left);
            let sector = match byte_to_sector(disk, offset, &self.cache) {
                Some(sector) => sector,
                None => break,
            };
            let src = &buf[write_size..write_size + chunk];
            if sector_ofs == 0 && chunk == SECTOR_SIZE {
                self.cache.write(sector, src);
            } else {
                // bytes around the chunk keep their old contents
                self.cache.read(sector, &mut bounce);
                bounce[sector_ofs..sector_ofs + chunk].copy_from_slice(src);
                self.cache.write(sector, &bounce);
            }
            offset += chunk;
            write_size += chunk;
        }
        write_size
    }

    /// Release every sector owned by the file, but not the inode sector itself
    pub(crate) fn shrink_to_zero(&self, state: &mut InodeState) {
        shrink_to_zero(&mut state.disk, &self.cache, &self.free_map);
    }
}

/// Sector holding byte `pos` of the file, `None` past end of file
fn byte_to_sector(disk: &DiskInode, pos: usize, cache: &SectorCache) -> Option<SectorId> {
    if pos >= disk.length as usize {
        return None;
    }
    logical_block(disk, pos / SECTOR_SIZE, cache)
}

fn read_indirect(sector: SectorId, cache: &SectorCache) -> IndirectBlock {
    let mut block: IndirectBlock = [0; INODE_INDIRECT1_COUNT];
    cache.read(sector, block.as_bytes_mut());
    block
}

/// Sector recorded for logical block `n`, `None` if unmapped or past capacity
pub(crate) fn logical_block(disk: &DiskInode, n: usize, cache: &SectorCache) -> Option<SectorId> {
    let sector = match BlockIndex::locate(n)? {
        BlockIndex::Direct(i) => disk.direct[i],
        BlockIndex::Indirect(i) => {
            if disk.indirect == 0 {
                return None;
            }
            read_indirect(disk.indirect, cache)[i]
        }
        BlockIndex::DoublyIndirect(first, second) => {
            if disk.doubly_indirect == 0 {
                return None;
            }
            let level1 = read_indirect(disk.doubly_indirect, cache)[first];
            if level1 == 0 {
                return None;
            }
            read_indirect(level1, cache)[second]
        }
    };
    (sector != 0).then(|| sector)
}

/// Allocate `*slot` if it is still unallocated, zero-filling the new sector
fn allocate_sector(slot: &mut SectorId, cache: &SectorCache, free_map: &FreeMap) -> bool {
    if *slot == 0 {
        match free_map.allocate(1) {
            Some(sector) => {
                cache.write(sector, &EMPTY_SECTOR);
                *slot = sector;
            }
            None => return false,
        }
    }
    true
}

/// Fill the first `count` pointers of the indirect block at `*slot`,
/// allocating the block itself first if needed.
/// Whatever was linked is written back even when allocation fails midway.
fn grow_indirect(
    slot: &mut SectorId,
    count: usize,
    cache: &SectorCache,
    free_map: &FreeMap,
) -> bool {
    if !allocate_sector(slot, cache, free_map) {
        return false;
    }
    let mut block = read_indirect(*slot, cache);
    let ok = block
        .iter_mut()
        .take(count)
        .all(|entry| allocate_sector(entry, cache, free_map));
    cache.write(*slot, block.as_bytes());
    ok
}

fn grow_doubly_indirect(
    slot: &mut SectorId,
    count: usize,
    cache: &SectorCache,
    free_map: &FreeMap,
) -> bool {
    if !allocate_sector(slot, cache, free_map) {
        return false;
    }
    let mut block = read_indirect(*slot, cache);
    let mut left = count;
    let mut ok = true;
    for entry in block.iter_mut() {
        if left == 0 {
            break;
        }
        let n = left.min(INODE_INDIRECT1_COUNT);
        if !grow_indirect(entry, n, cache, free_map) {
            ok = false;
            break;
        }
        left -= n;
    }
    cache.write(*slot, block.as_bytes());
    ok
}

/// Make sure every sector of the first `new_length` bytes is allocated.
///
/// Direct pointers are filled first, then the indirect range, then the
/// doubly-indirect range; index blocks are allocated on first use and every new
/// sector is zeroed. Existing sectors never move. On allocator exhaustion the
/// sectors allocated so far stay linked and `false` is returned.
pub(crate) fn grow(
    disk: &mut DiskInode,
    new_length: usize,
    cache: &SectorCache,
    free_map: &FreeMap,
) -> bool {
    if new_length > MAX_FILE_LENGTH {
        return false;
    }
    let mut left = sectors_for(new_length);
    debug!("grow inode to {} bytes ({} sectors)", new_length, left);

    let n = left.min(INODE_DIRECT_COUNT);
    if !disk
        .direct
        .iter_mut()
        .take(n)
        .all(|slot| allocate_sector(slot, cache, free_map))
    {
        return false;
    }
    left -= n;
    if left == 0 {
        return true;
    }

    let n = left.min(INODE_INDIRECT1_COUNT);
    if !grow_indirect(&mut disk.indirect, n, cache, free_map) {
        return false;
    }
    left -= n;
    if left == 0 {
        return true;
    }

    debug_assert!(left <= MAX_FILE_SECTORS - INODE_DIRECT_COUNT - INODE_INDIRECT1_COUNT);
    grow_doubly_indirect(&mut disk.doubly_indirect, left, cache, free_map)
}

fn release_indirect(sector: SectorId, cache: &SectorCache, free_map: &FreeMap) -> usize {
    let block = read_indirect(sector, cache);
    let mut released = 0;
    for entry in block.iter().filter(|entry| **entry != 0) {
        free_map.release(*entry, 1);
        released += 1;
    }
    free_map.release(sector, 1);
    released + 1
}

/// Release every sector owned by `disk` level by level and reset it to length 0.
/// Walks all non-zero pointers, so sectors linked by a failed grow are reclaimed too.
/// Returns the number of sectors released.
pub(crate) fn shrink_to_zero(
    disk: &mut DiskInode,
    cache: &SectorCache,
    free_map: &FreeMap,
) -> usize {
    let mut released = 0;
    for slot in disk.direct.iter_mut().filter(|slot| **slot != 0) {
        free_map.release(*slot, 1);
        *slot = 0;
        released += 1;
    }
    if disk.indirect != 0 {
        released += release_indirect(disk.indirect, cache, free_map);
        disk.indirect = 0;
    }
    if disk.doubly_indirect != 0 {
        let top = read_indirect(disk.doubly_indirect, cache);
        for level1 in top.iter().filter(|entry| **entry != 0) {
            released += release_indirect(*level1, cache, free_map);
        }
        free_map.release(disk.doubly_indirect, 1);
        released += 1;
        disk.doubly_indirect = 0;
    }
    disk.length = 0;
    debug!("shrink inode: released {} sectors", released);
    released
}

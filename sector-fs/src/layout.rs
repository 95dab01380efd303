use super::{SectorId, NAME_MAX, SECTOR_SIZE};
use core::fmt::{Debug, Formatter, Result};

/// Magic number for sanity check of the super block
const SFS_MAGIC: u32 = 0x5346_5331;
/// Identifies an inode sector
pub const INODE_MAGIC: u32 = 0x494e_4f44;
/// The max number of direct pointers
pub const INODE_DIRECT_COUNT: usize = 123;
/// The number of pointers in one indirect block
pub const INODE_INDIRECT1_COUNT: usize = SECTOR_SIZE / 4;
/// The number of sectors reachable through the doubly-indirect block
pub const INODE_INDIRECT2_COUNT: usize = INODE_INDIRECT1_COUNT * INODE_INDIRECT1_COUNT;
/// The upper bound of direct block index
const DIRECT_BOUND: usize = INODE_DIRECT_COUNT;
/// The upper bound of indirect block index
const INDIRECT1_BOUND: usize = DIRECT_BOUND + INODE_INDIRECT1_COUNT;
/// The upper bound of doubly-indirect block index
const INDIRECT2_BOUND: usize = INDIRECT1_BOUND + INODE_INDIRECT2_COUNT;
/// Largest number of data sectors one inode can address
pub const MAX_FILE_SECTORS: usize = INDIRECT2_BOUND;
/// Largest file length in bytes
pub const MAX_FILE_LENGTH: usize = MAX_FILE_SECTORS * SECTOR_SIZE;

/// Fixed-layout records that are copied to and from sectors byte for byte.
///
/// # Safety
/// Implementors must be `#[repr(C)]`, contain no padding-sensitive invariants
/// and accept every bit pattern.
pub unsafe trait Plain: Sized {
    /// View the record as raw bytes
    fn as_bytes(&self) -> &[u8] {
        unsafe {
            core::slice::from_raw_parts(
                self as *const Self as *const u8,
                core::mem::size_of::<Self>(),
            )
        }
    }
    /// View the record as mutable raw bytes
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe {
            core::slice::from_raw_parts_mut(
                self as *mut Self as *mut u8,
                core::mem::size_of::<Self>(),
            )
        }
    }
}

/// Super block of a volume, stored at the start of sector 0
#[repr(C)]
#[derive(Default)]
pub struct SuperBlock {
    magic: u32,
    /// Number of sectors on the device
    pub total_sectors: u32,
    /// First sector of the free map
    pub free_map_start: u32,
    /// Number of sectors of the free map
    pub free_map_sectors: u32,
}

unsafe impl Plain for SuperBlock {}

impl Debug for SuperBlock {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.debug_struct("SuperBlock")
            .field("total_sectors", &self.total_sectors)
            .field("free_map_start", &self.free_map_start)
            .field("free_map_sectors", &self.free_map_sectors)
            .finish()
    }
}

impl SuperBlock {
    /// Initialize a super block
    pub fn initialize(&mut self, total_sectors: u32, free_map_start: u32, free_map_sectors: u32) {
        *self = Self {
            magic: SFS_MAGIC,
            total_sectors,
            free_map_start,
            free_map_sectors,
        }
    }
    /// Check if a super block is valid using its magic
    pub fn is_valid(&self) -> bool {
        self.magic == SFS_MAGIC
    }
}

/// A indirect block
pub type IndirectBlock = [SectorId; INODE_INDIRECT1_COUNT];

unsafe impl Plain for IndirectBlock {}

/// Where a logical block of a file is recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIndex {
    /// `direct[i]`
    Direct(usize),
    /// entry `i` of the indirect block
    Indirect(usize),
    /// entry `second` of the block named by entry `first` of the doubly-indirect block
    DoublyIndirect(usize, usize),
}

impl BlockIndex {
    /// Translate logical block `n`; `None` past the layout's capacity
    pub fn locate(n: usize) -> Option<Self> {
        if n < DIRECT_BOUND {
            Some(BlockIndex::Direct(n))
        } else if n < INDIRECT1_BOUND {
            Some(BlockIndex::Indirect(n - DIRECT_BOUND))
        } else if n < INDIRECT2_BOUND {
            let last = n - INDIRECT1_BOUND;
            Some(BlockIndex::DoublyIndirect(
                last / INODE_INDIRECT1_COUNT,
                last % INODE_INDIRECT1_COUNT,
            ))
        } else {
            None
        }
    }
}

/// Number of data sectors needed to hold `length` bytes
pub fn sectors_for(length: usize) -> usize {
    (length + SECTOR_SIZE - 1) / SECTOR_SIZE
}

/// A disk inode, exactly one sector long
#[repr(C)]
pub struct DiskInode {
    /// Sectors of the first 123 logical blocks
    pub direct: [SectorId; INODE_DIRECT_COUNT],
    /// Indirect block, 0 until the 124th block is needed
    pub indirect: SectorId,
    /// Doubly-indirect block, 0 until the 252nd block is needed
    pub doubly_indirect: SectorId,
    is_directory: u32,
    /// File length in bytes
    pub length: u32,
    magic: u32,
}

unsafe impl Plain for DiskInode {}

impl Default for DiskInode {
    fn default() -> Self {
        Self {
            direct: [0; INODE_DIRECT_COUNT],
            indirect: 0,
            doubly_indirect: 0,
            is_directory: 0,
            length: 0,
            magic: 0,
        }
    }
}

impl DiskInode {
    /// Initialize an empty disk inode; sectors are linked in later as it grows
    pub fn initialize(&mut self, is_directory: bool) {
        *self = Self {
            is_directory: is_directory as u32,
            magic: INODE_MAGIC,
            ..Self::default()
        };
    }
    /// Whether this inode is a directory
    pub fn is_dir(&self) -> bool {
        self.is_directory != 0
    }
    /// Whether the sector carries the inode magic
    pub fn is_valid(&self) -> bool {
        self.magic == INODE_MAGIC
    }
    /// Return data sector number correspond to length
    pub fn data_sectors(&self) -> usize {
        sectors_for(self.length as usize)
    }
}

/// A directory entry
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirEntry {
    inode_sector: u32,
    name: [u8; NAME_MAX + 1],
    in_use: u8,
}

/// Size of a directory entry
pub const DIRENT_SIZE: usize = core::mem::size_of::<DirEntry>();

unsafe impl Plain for DirEntry {}

impl DirEntry {
    /// Create an empty directory entry
    pub fn empty() -> Self {
        Self {
            inode_sector: 0,
            name: [0u8; NAME_MAX + 1],
            in_use: 0,
        }
    }
    /// Create an in-use directory entry from name and inode sector.
    /// `name` must not exceed [`NAME_MAX`] bytes.
    pub fn new(name: &str, inode_sector: SectorId) -> Self {
        assert!(name.len() <= NAME_MAX);
        let mut bytes = [0u8; NAME_MAX + 1];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            inode_sector,
            name: bytes,
            in_use: 1,
        }
    }
    /// Entry 0 of a directory: records the parent's inode sector, never in use
    pub fn parent(inode_sector: SectorId) -> Self {
        Self {
            inode_sector,
            ..Self::empty()
        }
    }
    /// Name of the entry
    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|b| *b == 0).unwrap_or(NAME_MAX);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
    /// Inode sector of the entry
    pub fn inode_sector(&self) -> SectorId {
        self.inode_sector
    }
    /// Whether the slot holds a live entry
    pub fn is_in_use(&self) -> bool {
        self.in_use != 0
    }
    /// Free the slot, keeping the rest of the record
    pub fn clear(&mut self) {
        self.in_use = 0;
    }
}

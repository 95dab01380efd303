//! A sector-indexed file system engine isolated from the kernel.
//!
//! Layers, bottom up:
//! 1. [`BlockDevice`]: synchronous whole-sector I/O, provided by the user of the crate.
//! 2. [`SectorCache`]: fixed-size write-back cache with clock eviction; owns all device I/O.
//! 3. [`FreeMap`]: on-disk bitmap of free sectors.
//! 4. [`Inode`] / [`InodeTable`]: direct, indirect and doubly-indirect block index,
//!    byte-granular reads and writes, and the table of open inodes.
//! 5. [`Dir`] / [`FileSystem`]: directory entries, path resolution and the volume itself.
#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

extern crate alloc;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;

mod block_dev;
mod directory;
mod error;
mod free_map;
mod fs;
mod inode;
mod inode_table;
mod layout;
mod sector_cache;

#[cfg(test)]
mod ram_disk;

/// Use a sector size of 512 bytes
pub const SECTOR_SIZE: usize = 512;
/// Number of slots in a default sector cache
pub const CACHE_SIZE: usize = 64;
/// Well-known sector holding the root directory inode
pub const ROOT_DIR_SECTOR: SectorId = 1;
/// Initial number of entries in the root directory
pub const ROOT_DIR_ENTRIES: usize = 16;
/// Longest file name component, not counting the terminating nul
pub const NAME_MAX: usize = 14;

/// Index of a sector on the block device. Zero marks an unallocated pointer.
pub type SectorId = u32;

pub use block_dev::BlockDevice;
pub use directory::{split_path, Dir};
pub use error::{Error, Result};
pub use free_map::FreeMap;
pub use fs::FileSystem;
pub use inode::{Inode, Stat, StatMode};
pub use inode_table::InodeTable;
pub use layout::{
    BlockIndex, DirEntry, DiskInode, SuperBlock, DIRENT_SIZE, MAX_FILE_LENGTH, MAX_FILE_SECTORS,
};
pub use sector_cache::SectorCache;

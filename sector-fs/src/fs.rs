use super::layout::{Plain, SuperBlock};
use super::{
    split_path, BlockDevice, Dir, Error, FreeMap, Inode, InodeTable, Result, SectorCache,
    SectorId, DIRENT_SIZE, ROOT_DIR_ENTRIES, ROOT_DIR_SECTOR, SECTOR_SIZE,
};
use alloc::sync::Arc;

/// Sector holding the super block
const SUPER_BLOCK_SECTOR: SectorId = 0;
/// First sector of the free map, right after the root directory inode
const FREE_MAP_START: SectorId = ROOT_DIR_SECTOR + 1;

/// A mounted volume.
///
/// Disk layout: super block at sector 0, root directory inode at
/// [`ROOT_DIR_SECTOR`], then the free map, then inode and data sectors mixed.
pub struct FileSystem {
    cache: Arc<SectorCache>,
    free_map: Arc<FreeMap>,
    inodes: Arc<InodeTable>,
}

impl FileSystem {
    /// Format `block_device` as an empty volume of `total_sectors` sectors
    pub fn format(block_device: Arc<dyn BlockDevice>, total_sectors: u32) -> Result<Self> {
        let free_map_sectors = FreeMap::sectors_needed(total_sectors as usize) as u32;
        let reserved = FREE_MAP_START + free_map_sectors;
        if total_sectors <= reserved {
            return Err(Error::NoSpace);
        }
        info!("formatting {} sectors", total_sectors);
        let cache = Arc::new(SectorCache::new(block_device));

        let mut super_block = SuperBlock::default();
        super_block.initialize(total_sectors, FREE_MAP_START, free_map_sectors);
        let mut buf = [0u8; SECTOR_SIZE];
        buf[..core::mem::size_of::<SuperBlock>()].copy_from_slice(super_block.as_bytes());
        cache.write(SUPER_BLOCK_SECTOR, &buf);

        let free_map = Arc::new(FreeMap::create(
            Arc::clone(&cache),
            FREE_MAP_START,
            total_sectors as usize,
        ));
        free_map.reserve(SUPER_BLOCK_SECTOR, reserved as usize);

        let inodes = Arc::new(InodeTable::new(Arc::clone(&cache), Arc::clone(&free_map)));
        if !Dir::create(&inodes, ROOT_DIR_SECTOR, ROOT_DIR_ENTRIES) {
            return Err(Error::NoSpace);
        }
        cache.flush();
        Ok(Self {
            cache,
            free_map,
            inodes,
        })
    }

    /// Mount a volume written by [`FileSystem::format`]
    pub fn mount(block_device: Arc<dyn BlockDevice>) -> Result<Self> {
        let cache = Arc::new(SectorCache::new(block_device));
        let mut buf = [0u8; SECTOR_SIZE];
        cache.read(SUPER_BLOCK_SECTOR, &mut buf);
        let mut super_block = SuperBlock::default();
        let size = core::mem::size_of::<SuperBlock>();
        super_block.as_bytes_mut().copy_from_slice(&buf[..size]);
        if !super_block.is_valid() {
            return Err(Error::InvalidImage);
        }
        info!("mount {:?}", super_block);
        let free_map = Arc::new(FreeMap::open(
            Arc::clone(&cache),
            super_block.free_map_start,
            super_block.total_sectors as usize,
        ));
        let inodes = Arc::new(InodeTable::new(Arc::clone(&cache), Arc::clone(&free_map)));
        Ok(Self {
            cache,
            free_map,
            inodes,
        })
    }

    /// The root directory
    pub fn root_dir(&self) -> Dir {
        Dir::open_root(&self.inodes)
    }

    /// Open the directory containing the last component of `path`
    fn parent_of<'a>(&self, path: &'a str, cwd: Option<&Dir>) -> Result<(Dir, &'a str)> {
        let (dir_path, name) = split_path(path);
        let dir = match cwd {
            Some(cwd) => cwd.resolve(dir_path)?,
            None => self.root_dir().resolve(dir_path)?,
        };
        Ok((dir, name))
    }

    /// Open the directory named by `path`, relative to `cwd` or the root
    pub fn open_dir(&self, path: &str, cwd: Option<&Dir>) -> Result<Dir> {
        match cwd {
            Some(cwd) => cwd.resolve(path),
            None => self.root_dir().resolve(path),
        }
    }

    /// Create a file, or a directory if `is_dir`, of `initial_size` bytes at `path`.
    /// A new directory always holds at least its parent record.
    pub fn create(
        &self,
        path: &str,
        initial_size: usize,
        is_dir: bool,
        cwd: Option<&Dir>,
    ) -> Result<()> {
        let (dir, name) = self.parent_of(path, cwd)?;
        let sector = self.free_map.allocate(1).ok_or(Error::NoSpace)?;
        let created = if is_dir {
            Dir::create(&self.inodes, sector, initial_size / DIRENT_SIZE)
        } else {
            self.inodes.create(sector, initial_size, false)
        };
        if !created {
            self.free_map.release(sector, 1);
            return Err(Error::NoSpace);
        }
        let result = dir.add(name, sector, is_dir);
        if result.is_err() {
            let inode = self.inodes.open(sector);
            inode.remove();
            self.inodes.close(inode);
        }
        result
    }

    /// Open the file or directory at `path`. A removed inode does not open.
    pub fn open(&self, path: &str, cwd: Option<&Dir>) -> Result<Arc<Inode>> {
        if path.is_empty() {
            return Err(Error::NotFound);
        }
        let (dir, name) = self.parent_of(path, cwd)?;
        let inode = if name.is_empty() {
            self.inodes.reopen(dir.inode())
        } else {
            dir.lookup(name).ok_or(Error::NotFound)?
        };
        if inode.is_removed() {
            self.inodes.close(inode);
            return Err(Error::NotFound);
        }
        Ok(inode)
    }

    /// Close an inode returned by [`FileSystem::open`]
    pub fn close(&self, inode: Arc<Inode>) {
        self.inodes.close(inode);
    }

    /// Remove the entry at `path`; its sectors go back when the last opener closes it
    pub fn remove(&self, path: &str, cwd: Option<&Dir>) -> Result<()> {
        let (dir, name) = self.parent_of(path, cwd)?;
        dir.remove(name)
    }

    /// The table of open inodes
    pub fn inodes(&self) -> &Arc<InodeTable> {
        &self.inodes
    }

    /// The free map
    pub fn free_map(&self) -> &Arc<FreeMap> {
        &self.free_map
    }

    /// The sector cache
    pub fn cache(&self) -> &Arc<SectorCache> {
        &self.cache
    }

    /// Write every dirty cached sector back to the device
    pub fn sync(&self) {
        self.cache.flush();
    }

    /// Unmount: flush and retire the cache
    pub fn done(self) {
        let open = self.inodes.open_sectors();
        if !open.is_empty() {
            warn!("unmount with open inodes {:?}", open);
        }
        self.cache.terminate();
        info!("unmounted");
    }
}

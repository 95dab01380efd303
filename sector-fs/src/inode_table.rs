use super::inode::grow;
use super::layout::{DiskInode, Plain};
use super::{FreeMap, Inode, SectorCache, SectorId};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

/// Registry of open inodes, at most one [`Inode`] per inode sector.
///
/// `open` and `close` pair up per caller. The table keeps its own lock,
/// separate from the sector cache's, over lookup, open-count changes and
/// deferred deletion. Lock order is table, then inode, then free map, then cache.
pub struct InodeTable {
    cache: Arc<SectorCache>,
    free_map: Arc<FreeMap>,
    open_inodes: Mutex<BTreeMap<SectorId, Arc<Inode>>>,
}

impl InodeTable {
    /// An empty table over `cache`, allocating from `free_map`
    pub fn new(cache: Arc<SectorCache>, free_map: Arc<FreeMap>) -> Self {
        Self {
            cache,
            free_map,
            open_inodes: Mutex::new(BTreeMap::new()),
        }
    }

    /// Write a fresh disk inode of `length` bytes to `sector`, allocating and
    /// zeroing its data sectors. Returns `false` if the free map runs out;
    /// sectors allocated before that point are released again.
    pub fn create(&self, sector: SectorId, length: usize, is_directory: bool) -> bool {
        let mut disk = DiskInode::default();
        disk.initialize(is_directory);
        if !grow(&mut disk, length, &self.cache, &self.free_map) {
            super::inode::shrink_to_zero(&mut disk, &self.cache, &self.free_map);
            return false;
        }
        disk.length = length as u32;
        self.cache.write(sector, disk.as_bytes());
        debug!("create inode at sector {} ({} bytes, dir: {})", sector, length, is_directory);
        true
    }

    /// Open the inode stored at `sector`, sharing the existing `Inode` if one is open
    pub fn open(&self, sector: SectorId) -> Arc<Inode> {
        let mut open_inodes = self.open_inodes.lock();
        if let Some(inode) = open_inodes.get(&sector) {
            inode.lock().open_count += 1;
            return Arc::clone(inode);
        }
        let mut disk = DiskInode::default();
        self.cache.read(sector, disk.as_bytes_mut());
        if !disk.is_valid() {
            warn!("sector {} does not hold an inode", sector);
        }
        let inode = Arc::new(Inode::new(
            sector,
            disk,
            Arc::clone(&self.cache),
            Arc::clone(&self.free_map),
        ));
        open_inodes.insert(sector, Arc::clone(&inode));
        debug!("open inode {}", sector);
        inode
    }

    /// Open `inode` once more without a lookup
    pub fn reopen(&self, inode: &Arc<Inode>) -> Arc<Inode> {
        inode.lock().open_count += 1;
        Arc::clone(inode)
    }

    /// Drop one opener of `inode`. The last close unregisters it and, if it
    /// was removed, releases its data sectors and its own sector.
    ///
    /// An opener that denied writes must allow them again before closing, so
    /// the remaining openers always outnumber the denials.
    pub fn close(&self, inode: Arc<Inode>) {
        let mut open_inodes = self.open_inodes.lock();
        let mut state = inode.lock();
        assert!(state.open_count > 0);
        assert!(
            state.deny_write_count < state.open_count,
            "closing inode {} with {} write denials and {} openers",
            inode.inumber(),
            state.deny_write_count,
            state.open_count
        );
        state.open_count -= 1;
        if state.open_count > 0 {
            return;
        }
        open_inodes.remove(&inode.inumber());
        if state.removed {
            inode.shrink_to_zero(&mut state);
            self.free_map.release(inode.inumber(), 1);
            debug!("inode {} deleted", inode.inumber());
        } else {
            debug!("close inode {}", inode.inumber());
        }
    }

    /// The open `Inode` for `sector`, without opening it
    pub fn get(&self, sector: SectorId) -> Option<Arc<Inode>> {
        self.open_inodes.lock().get(&sector).cloned()
    }

    /// Sectors of every open inode
    pub fn open_sectors(&self) -> Vec<SectorId> {
        self.open_inodes.lock().keys().copied().collect()
    }

    /// The sector cache inodes of this table go through
    pub fn cache(&self) -> &Arc<SectorCache> {
        &self.cache
    }

    /// The free map inodes of this table allocate from
    pub fn free_map(&self) -> &Arc<FreeMap> {
        &self.free_map
    }
}

use super::layout::{DirEntry, Plain, DIRENT_SIZE};
use super::{Error, Inode, InodeTable, Result, SectorId, NAME_MAX};
use alloc::string::String;
use alloc::sync::Arc;

/// An open directory: a directory inode plus a `readdir` position.
///
/// Entry 0 of every directory records its parent's inode sector and is never
/// listed. Dropping a `Dir` closes its inode.
pub struct Dir {
    table: Arc<InodeTable>,
    inode: Arc<Inode>,
    pos: usize,
}

impl Dir {
    /// Create a directory inode at `sector` with room for `entry_cnt` entries.
    /// Entry 0 points back at `sector` until the directory is linked into a parent.
    pub fn create(table: &Arc<InodeTable>, sector: SectorId, entry_cnt: usize) -> bool {
        if !table.create(sector, entry_cnt * DIRENT_SIZE, true) {
            return false;
        }
        let dir = Self::open(table, table.open(sector));
        dir.inode.write_at(0, DirEntry::parent(sector).as_bytes()) == DIRENT_SIZE
    }

    /// Wrap an already opened directory inode, taking over its open reference
    pub fn open(table: &Arc<InodeTable>, inode: Arc<Inode>) -> Self {
        Self {
            table: Arc::clone(table),
            inode,
            pos: DIRENT_SIZE,
        }
    }

    /// Open the root directory
    pub fn open_root(table: &Arc<InodeTable>) -> Self {
        Self::open(table, table.open(crate::ROOT_DIR_SECTOR))
    }

    /// Open the same directory again with its own position
    pub fn reopen(&self) -> Self {
        Self::open(&self.table, self.table.reopen(&self.inode))
    }

    /// The directory's inode
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    fn entry_at(&self, ofs: usize) -> Option<DirEntry> {
        let mut entry = DirEntry::empty();
        (self.inode.read_at(ofs, entry.as_bytes_mut()) == DIRENT_SIZE).then(|| entry)
    }

    /// Find an in-use entry by name, returning it with its byte offset
    fn find(&self, name: &str) -> Option<(DirEntry, usize)> {
        let mut ofs = DIRENT_SIZE;
        while let Some(entry) = self.entry_at(ofs) {
            if entry.is_in_use() && entry.name() == name {
                return Some((entry, ofs));
            }
            ofs += DIRENT_SIZE;
        }
        None
    }

    /// Whether the directory holds no entries besides the parent record
    pub fn is_empty(&self) -> bool {
        let mut ofs = DIRENT_SIZE;
        while let Some(entry) = self.entry_at(ofs) {
            if entry.is_in_use() {
                return false;
            }
            ofs += DIRENT_SIZE;
        }
        true
    }

    /// Open the inode named `name`: `.` is this directory, `..` its parent.
    /// The caller owns the returned reference and closes it through the table.
    pub fn lookup(&self, name: &str) -> Option<Arc<Inode>> {
        match name {
            "." => Some(self.table.reopen(&self.inode)),
            ".." => {
                let parent = self.entry_at(0)?;
                Some(self.table.open(parent.inode_sector()))
            }
            _ => self
                .find(name)
                .map(|(entry, _)| self.table.open(entry.inode_sector())),
        }
    }

    /// Add an entry `name` for the inode at `sector`. For a directory child
    /// its entry 0 is pointed at this directory.
    ///
    /// The duplicate check and the slot write take the directory inode's lock
    /// separately, so two threads adding the same name at once may both
    /// succeed. Callers that race on one directory must serialize.
    pub fn add(&self, name: &str, sector: SectorId, is_dir: bool) -> Result<()> {
        if name.is_empty() || name.len() > NAME_MAX || name.contains('/') {
            return Err(Error::InvalidName);
        }
        if self.find(name).is_some() {
            return Err(Error::AlreadyExists);
        }
        if is_dir {
            let child = self.table.open(sector);
            let parent = DirEntry::parent(self.inode.inumber());
            let written = child.write_at(0, parent.as_bytes());
            self.table.close(child);
            if written != DIRENT_SIZE {
                return Err(Error::NoSpace);
            }
        }
        let mut ofs = DIRENT_SIZE;
        while let Some(entry) = self.entry_at(ofs) {
            if !entry.is_in_use() {
                break;
            }
            ofs += DIRENT_SIZE;
        }
        let entry = DirEntry::new(name, sector);
        if self.inode.write_at(ofs, entry.as_bytes()) != DIRENT_SIZE {
            return Err(Error::NoSpace);
        }
        debug!("dir {}: add {} -> {}", self.inode.inumber(), name, sector);
        Ok(())
    }

    /// Remove entry `name` and mark its inode removed. A directory must be
    /// empty. The inode's sectors are reclaimed when its last opener closes it.
    pub fn remove(&self, name: &str) -> Result<()> {
        let (mut entry, ofs) = self.find(name).ok_or(Error::NotFound)?;
        let inode = self.table.open(entry.inode_sector());
        let result = self.unlink(&mut entry, ofs, &inode);
        self.table.close(inode);
        result
    }

    fn unlink(&self, entry: &mut DirEntry, ofs: usize, inode: &Arc<Inode>) -> Result<()> {
        if inode.is_directory() {
            let child = Self::open(&self.table, self.table.reopen(inode));
            if !child.is_empty() {
                return Err(Error::DirectoryNotEmpty);
            }
        }
        entry.clear();
        if self.inode.write_at(ofs, entry.as_bytes()) != DIRENT_SIZE {
            return Err(Error::NoSpace);
        }
        inode.remove();
        debug!("dir {}: remove {}", self.inode.inumber(), entry.name());
        Ok(())
    }

    /// Name of the next in-use entry after the current position
    pub fn readdir(&mut self) -> Option<String> {
        while let Some(entry) = self.entry_at(self.pos) {
            self.pos += DIRENT_SIZE;
            if entry.is_in_use() {
                return Some(String::from(entry.name()));
            }
        }
        None
    }

    /// Walk `path` from `self` (relative) or from the root (absolute) and
    /// open the directory it names.
    pub fn resolve(&self, path: &str) -> Result<Dir> {
        let mut cur = if path.starts_with('/') {
            Self::open_root(&self.table)
        } else {
            self.reopen()
        };
        for name in path.split('/').filter(|name| !name.is_empty()) {
            let inode = cur.lookup(name).ok_or(Error::NotFound)?;
            if !inode.is_directory() {
                self.table.close(inode);
                return Err(Error::NotADirectory);
            }
            cur = Self::open(&self.table, inode);
        }
        if cur.inode.is_removed() {
            return Err(Error::NotFound);
        }
        Ok(cur)
    }
}

impl Drop for Dir {
    fn drop(&mut self) {
        self.table.close(Arc::clone(&self.inode));
    }
}

/// Split `path` into its directory part and final component.
/// Trailing slashes are ignored; `"/"` yields `("/", "")`.
pub fn split_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return (if path.is_empty() { "" } else { "/" }, "");
    }
    match trimmed.rfind('/') {
        Some(0) => ("/", &trimmed[1..]),
        Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram_disk::RamDisk;
    use crate::{FreeMap, SectorCache, ROOT_DIR_SECTOR};
    use alloc::vec::Vec;

    fn root_table() -> Arc<InodeTable> {
        let disk = Arc::new(RamDisk::new(1024));
        let cache = Arc::new(SectorCache::new(disk));
        let free_map = Arc::new(FreeMap::create(cache.clone(), 2, 1024));
        free_map.reserve(0, 3);
        let table = Arc::new(InodeTable::new(cache, free_map));
        assert!(Dir::create(&table, ROOT_DIR_SECTOR, 4));
        table
    }

    fn mkdir(table: &Arc<InodeTable>, parent: &Dir, name: &str) -> SectorId {
        let sector = table.free_map().allocate(1).unwrap();
        assert!(Dir::create(table, sector, 2));
        parent.add(name, sector, true).unwrap();
        sector
    }

    fn touch(table: &Arc<InodeTable>, parent: &Dir, name: &str) -> SectorId {
        let sector = table.free_map().allocate(1).unwrap();
        assert!(table.create(sector, 0, false));
        parent.add(name, sector, false).unwrap();
        sector
    }

    #[test]
    fn split_path_cases() {
        assert_eq!(split_path("/a/b/c"), ("/a/b", "c"));
        assert_eq!(split_path("/a"), ("/", "a"));
        assert_eq!(split_path("a"), ("", "a"));
        assert_eq!(split_path("a/b/"), ("a", "b"));
        assert_eq!(split_path("/"), ("/", ""));
        assert_eq!(split_path(""), ("", ""));
    }

    #[test]
    fn add_lookup_readdir() {
        let table = root_table();
        let mut root = Dir::open_root(&table);
        let a = touch(&table, &root, "a");
        let b = touch(&table, &root, "b");

        let inode = root.lookup("b").unwrap();
        assert_eq!(inode.inumber(), b);
        table.close(inode);
        assert!(root.lookup("c").is_none());

        let names: Vec<String> = core::iter::from_fn(|| root.readdir()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_bad_names() {
        let table = root_table();
        let root = Dir::open_root(&table);
        touch(&table, &root, "dup");
        assert_eq!(root.add("dup", 99, false), Err(Error::AlreadyExists));
        assert_eq!(root.add("", 99, false), Err(Error::InvalidName));
        assert_eq!(root.add("fifteen-chars!!", 99, false), Err(Error::InvalidName));
    }

    #[test]
    fn directory_grows_past_initial_entries() {
        let table = root_table();
        let mut root = Dir::open_root(&table);
        for i in 0..40 {
            touch(&table, &root, &alloc::format!("f{}", i));
        }
        assert_eq!(core::iter::from_fn(|| root.readdir()).count(), 40);
    }

    #[test]
    fn dot_and_dot_dot() {
        let table = root_table();
        let root = Dir::open_root(&table);
        let sub = mkdir(&table, &root, "sub");
        let sub_dir = root.resolve("sub").unwrap();
        assert_eq!(sub_dir.inode().inumber(), sub);

        let parent = sub_dir.lookup("..").unwrap();
        assert_eq!(parent.inumber(), ROOT_DIR_SECTOR);
        let this = sub_dir.lookup(".").unwrap();
        assert!(Arc::ptr_eq(&this, sub_dir.inode()));
        table.close(parent);
        table.close(this);

        let root_parent = root.lookup("..").unwrap();
        assert_eq!(root_parent.inumber(), ROOT_DIR_SECTOR);
        table.close(root_parent);
    }

    #[test]
    fn remove_refuses_non_empty_directory() {
        let table = root_table();
        let root = Dir::open_root(&table);
        mkdir(&table, &root, "d");
        {
            let d = root.resolve("/d").unwrap();
            touch(&table, &d, "inner");
        }
        assert_eq!(root.remove("d"), Err(Error::DirectoryNotEmpty));
        let d = root.resolve("d").unwrap();
        d.remove("inner").unwrap();
        drop(d);
        root.remove("d").unwrap();
        assert_eq!(root.remove("d"), Err(Error::NotFound));
    }

    #[test]
    fn removed_file_reclaimed_and_slot_reused() {
        let table = root_table();
        let root = Dir::open_root(&table);
        let free = table.free_map().free_count();
        let sector = touch(&table, &root, "gone");
        root.remove("gone").unwrap();
        assert!(!table.free_map().is_allocated(sector));
        assert_eq!(table.free_map().free_count(), free);

        let length = root.inode().length();
        touch(&table, &root, "again");
        assert_eq!(root.inode().length(), length);
    }

    #[test]
    fn resolve_errors() {
        let table = root_table();
        let root = Dir::open_root(&table);
        touch(&table, &root, "file");
        assert_eq!(root.resolve("missing").err(), Some(Error::NotFound));
        assert_eq!(root.resolve("file/x").err(), Some(Error::NotADirectory));
        assert_eq!(root.resolve("/").unwrap().inode().inumber(), ROOT_DIR_SECTOR);
    }

    #[test]
    fn dropping_dirs_closes_inodes() {
        let table = root_table();
        {
            let root = Dir::open_root(&table);
            mkdir(&table, &root, "x");
            let x = root.resolve("x").unwrap();
            let _again = x.reopen();
        }
        assert!(table.open_sectors().is_empty());
    }
}

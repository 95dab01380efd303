use super::{BlockDevice, SectorId, CACHE_SIZE, SECTOR_SIZE};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

/// One cached sector
struct CacheEntry {
    /// slot holds a loaded sector
    valid: bool,
    /// data differs from the device copy
    dirty: bool,
    /// second-chance bit, set on every access
    referenced: bool,
    /// underlying sector id
    sector: SectorId,
    /// cached sector data
    data: [u8; SECTOR_SIZE],
}

impl CacheEntry {
    fn empty() -> Self {
        Self {
            valid: false,
            dirty: false,
            referenced: false,
            sector: 0,
            data: [0u8; SECTOR_SIZE],
        }
    }

    /// Write the entry back if it is dirty
    fn flush(&mut self, block_device: &Arc<dyn BlockDevice>) {
        if self.dirty {
            trace!("sector cache: write back sector {}", self.sector);
            block_device.write_sector(self.sector, &self.data);
            self.dirty = false;
        }
    }
}

struct CacheSlots {
    entries: Vec<CacheEntry>,
    /// next slot the clock hand looks at
    clock: usize,
    /// cleared by `terminate`, set by `init`
    live: bool,
}

impl CacheSlots {
    fn lookup(&self, sector: SectorId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.valid && entry.sector == sector)
    }

    /// Second-chance scan from the clock hand. An invalid slot is taken at once;
    /// a referenced one loses its bit and is skipped; the first unreferenced
    /// valid slot is the victim. The hand stops just past the chosen slot.
    fn select_victim(&mut self, block_device: &Arc<dyn BlockDevice>) -> usize {
        let n = self.entries.len();
        loop {
            let idx = self.clock;
            self.clock = (idx + 1) % n;
            let entry = &mut self.entries[idx];
            if !entry.valid {
                return idx;
            }
            if entry.referenced {
                entry.referenced = false;
                continue;
            }
            trace!("sector cache: evict sector {} from slot {}", entry.sector, idx);
            entry.flush(block_device);
            entry.valid = false;
            return idx;
        }
    }

    /// Find the slot caching `sector`, loading it from the device on a miss
    fn get_slot(&mut self, sector: SectorId, block_device: &Arc<dyn BlockDevice>) -> usize {
        assert!(self.live, "sector cache used after terminate");
        if let Some(idx) = self.lookup(sector) {
            return idx;
        }
        let idx = self.select_victim(block_device);
        let entry = &mut self.entries[idx];
        block_device.read_sector(sector, &mut entry.data);
        entry.valid = true;
        entry.dirty = false;
        entry.sector = sector;
        trace!("sector cache: load sector {} into slot {}", sector, idx);
        idx
    }

    fn flush_all(&mut self, block_device: &Arc<dyn BlockDevice>) {
        for entry in self.entries.iter_mut().filter(|entry| entry.valid) {
            entry.flush(block_device);
        }
    }
}

/// Fixed-capacity write-back cache over a block device.
///
/// Every operation runs under one lock, covering lookup, eviction, write-back
/// and the copy in or out, so no caller can observe a half-updated slot.
/// Cached buffers never leave a call: data is always copied.
pub struct SectorCache {
    block_device: Arc<dyn BlockDevice>,
    slots: Mutex<CacheSlots>,
}

impl SectorCache {
    /// Create a cache of [`CACHE_SIZE`] sectors over `block_device`
    pub fn new(block_device: Arc<dyn BlockDevice>) -> Self {
        Self::with_capacity(block_device, CACHE_SIZE)
    }

    /// Create a cache holding at most `capacity` sectors
    pub fn with_capacity(block_device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        assert!(capacity > 0);
        let entries = (0..capacity).map(|_| CacheEntry::empty()).collect();
        Self {
            block_device,
            slots: Mutex::new(CacheSlots {
                entries,
                clock: 0,
                live: true,
            }),
        }
    }

    /// Copy sector `sector` into `buf`
    pub fn read(&self, sector: SectorId, buf: &mut [u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        let mut slots = self.slots.lock();
        let idx = slots.get_slot(sector, &self.block_device);
        let entry = &mut slots.entries[idx];
        buf.copy_from_slice(&entry.data);
        entry.referenced = true;
    }

    /// Replace the cached contents of sector `sector` with `buf`.
    /// The device copy is updated on eviction, `flush` or `terminate`.
    pub fn write(&self, sector: SectorId, buf: &[u8]) {
        assert_eq!(buf.len(), SECTOR_SIZE);
        let mut slots = self.slots.lock();
        let idx = slots.get_slot(sector, &self.block_device);
        let entry = &mut slots.entries[idx];
        entry.data.copy_from_slice(buf);
        entry.dirty = true;
        entry.referenced = true;
    }

    /// Write every dirty sector back to the device, keeping it cached
    pub fn flush(&self) {
        self.slots.lock().flush_all(&self.block_device);
    }

    /// Write every dirty sector back and retire the cache.
    /// Any later access panics until [`SectorCache::init`] is called.
    pub fn terminate(&self) {
        let mut slots = self.slots.lock();
        slots.flush_all(&self.block_device);
        slots.live = false;
        debug!("sector cache terminated");
    }

    /// Drop every cached sector without writing back and make the cache usable again
    pub fn init(&self) {
        let mut slots = self.slots.lock();
        for entry in slots.entries.iter_mut() {
            entry.valid = false;
            entry.dirty = false;
            entry.referenced = false;
        }
        slots.clock = 0;
        slots.live = true;
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.lock().entries.len()
    }

    /// Number of sectors currently cached
    pub fn len(&self) -> usize {
        self.slots.lock().entries.iter().filter(|entry| entry.valid).count()
    }

    /// Whether no sector is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `sector` is currently cached
    pub fn contains(&self, sector: SectorId) -> bool {
        self.slots.lock().lookup(sector).is_some()
    }

    /// The device behind this cache
    pub fn block_device(&self) -> &Arc<dyn BlockDevice> {
        &self.block_device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram_disk::RamDisk;

    fn cache_over(sectors: usize, capacity: usize) -> (Arc<RamDisk>, SectorCache) {
        let disk = Arc::new(RamDisk::new(sectors));
        let cache = SectorCache::with_capacity(disk.clone(), capacity);
        (disk, cache)
    }

    fn filled(byte: u8) -> [u8; SECTOR_SIZE] {
        [byte; SECTOR_SIZE]
    }

    #[test]
    fn read_returns_last_write() {
        let (_disk, cache) = cache_over(128, 8);
        for sector in 0..32u32 {
            cache.write(sector, &filled(sector as u8 + 1));
        }
        for sector in 0..32u32 {
            let mut buf = [0u8; SECTOR_SIZE];
            cache.read(sector, &mut buf);
            assert_eq!(buf, filled(sector as u8 + 1));
        }
    }

    #[test]
    fn miss_loads_from_device() {
        let (disk, cache) = cache_over(16, 4);
        disk.poke(7, &filled(0xab));
        let mut buf = [0u8; SECTOR_SIZE];
        cache.read(7, &mut buf);
        assert_eq!(buf, filled(0xab));
        assert_eq!(disk.reads(), 1);
        cache.read(7, &mut buf);
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn write_miss_fills_slot_first() {
        let (disk, cache) = cache_over(16, 4);
        cache.write(3, &filled(1));
        assert_eq!(disk.reads(), 1);
        assert!(disk.writes().is_empty());
    }

    #[test]
    fn capacity_bounds_valid_entries() {
        let (disk, cache) = cache_over(64, 4);
        for sector in 0..4u32 {
            cache.write(sector, &filled(sector as u8));
        }
        assert_eq!(cache.len(), 4);
        assert!(disk.writes().is_empty());

        cache.write(4, &filled(4));
        assert_eq!(cache.len(), 4);
        assert_eq!(disk.writes().len(), 1);
        let resident = (0..5u32).filter(|s| cache.contains(*s)).count();
        assert_eq!(resident, 4);
    }

    #[test]
    fn referenced_sector_survives_first_pass() {
        let (_disk, cache) = cache_over(64, 4);
        for sector in 0..4u32 {
            cache.write(sector, &filled(sector as u8));
        }
        let mut buf = [0u8; SECTOR_SIZE];
        cache.read(0, &mut buf);

        // every slot is referenced, so the hand clears all four bits on the
        // first pass and only then takes slot 0
        cache.write(4, &filled(4));
        assert!(!cache.contains(0));
        assert!(cache.contains(1) && cache.contains(2) && cache.contains(3));

        // now 1..3 are unreferenced and the hand sits on slot 1;
        // touching sector 1 gives it a second chance and sector 2 goes instead
        cache.read(1, &mut buf);
        cache.write(5, &filled(5));
        assert!(cache.contains(1));
        assert!(!cache.contains(2));
        assert!(cache.contains(3) && cache.contains(4) && cache.contains(5));
    }

    #[test]
    fn dirty_victim_written_back_once() {
        let (disk, cache) = cache_over(64, 4);
        for sector in 0..4u32 {
            cache.write(sector, &filled(0x10 + sector as u8));
        }
        cache.write(0, &filled(0x7f));
        let mut buf = [0u8; SECTOR_SIZE];
        cache.read(9, &mut buf);

        let writes = disk.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, 0);
        assert_eq!(writes[0].1, filled(0x7f));
        assert_eq!(disk.peek(0), filled(0x7f));
    }

    #[test]
    fn clean_victim_is_not_written() {
        let (disk, cache) = cache_over(64, 2);
        let mut buf = [0u8; SECTOR_SIZE];
        for sector in 0..10u32 {
            cache.read(sector, &mut buf);
        }
        assert!(disk.writes().is_empty());
    }

    #[test]
    fn terminate_flushes_every_dirty_entry() {
        let (disk, cache) = cache_over(64, 8);
        for sector in 10..15u32 {
            cache.write(sector, &filled(sector as u8));
        }
        cache.terminate();
        assert_eq!(disk.writes().len(), 5);
        for sector in 10..15u32 {
            assert_eq!(disk.peek(sector), filled(sector as u8));
        }
    }

    #[test]
    #[should_panic(expected = "after terminate")]
    fn use_after_terminate_panics() {
        let (_disk, cache) = cache_over(8, 2);
        cache.terminate();
        let mut buf = [0u8; SECTOR_SIZE];
        cache.read(0, &mut buf);
    }

    #[test]
    fn init_rearms_terminated_cache() {
        let (disk, cache) = cache_over(8, 2);
        cache.write(1, &filled(9));
        cache.terminate();
        cache.init();
        assert!(cache.is_empty());
        let mut buf = [0u8; SECTOR_SIZE];
        cache.read(1, &mut buf);
        assert_eq!(buf, filled(9));
        assert_eq!(disk.writes().len(), 1);
    }

    #[test]
    fn flush_keeps_entries_cached() {
        let (disk, cache) = cache_over(8, 4);
        cache.write(2, &filled(2));
        cache.flush();
        cache.flush();
        assert_eq!(disk.writes().len(), 1);
        assert!(cache.contains(2));
    }

    #[test]
    fn concurrent_writers_on_disjoint_sectors() {
        let (_disk, cache) = cache_over(256, 16);
        let cache = Arc::new(cache);
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for round in 0..20u32 {
                        let sector = t * 32 + round;
                        cache.write(sector, &filled((t * 31 + round) as u8));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let mut buf = [0u8; SECTOR_SIZE];
        for t in 0..8u32 {
            for round in 0..20u32 {
                cache.read(t * 32 + round, &mut buf);
                assert_eq!(buf, filled((t * 31 + round) as u8));
            }
        }
    }
}

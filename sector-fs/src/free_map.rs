use super::{SectorCache, SectorId, SECTOR_SIZE};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

/// Number of u64 words in one bitmap sector
const WORDS_PER_SECTOR: usize = SECTOR_SIZE / 8;
/// Number of bits in one bitmap sector
pub const SECTOR_BITS: usize = SECTOR_SIZE * 8;

/// Decompose a bit into (sector_pos, bits64_pos, inner_pos)
fn decomposition(bit: usize) -> (usize, usize, usize) {
    let sector_pos = bit / SECTOR_BITS;
    let bit = bit % SECTOR_BITS;
    (sector_pos, bit / 64, bit % 64)
}

/// Free-space bitmap with one bit per device sector, set when the sector is in use.
///
/// The bitmap is kept in memory and every change is written through the sector
/// cache to the run of sectors starting at `start_sector`.
pub struct FreeMap {
    cache: Arc<SectorCache>,
    start_sector: SectorId,
    /// meaningful bits, one per device sector
    total: usize,
    bits: Mutex<Vec<u64>>,
}

impl FreeMap {
    /// Number of bitmap sectors needed to track `total_sectors`
    pub fn sectors_needed(total_sectors: usize) -> usize {
        (total_sectors + SECTOR_BITS - 1) / SECTOR_BITS
    }

    /// An empty map for `total_sectors` sectors, written out immediately.
    /// The bitmap's own sectors are not reserved here.
    pub fn create(cache: Arc<SectorCache>, start_sector: SectorId, total_sectors: usize) -> Self {
        let words = Self::sectors_needed(total_sectors) * WORDS_PER_SECTOR;
        let free_map = Self {
            cache,
            start_sector,
            total: total_sectors,
            bits: Mutex::new(vec![0u64; words]),
        };
        {
            let bits = free_map.bits.lock();
            for sector_pos in 0..Self::sectors_needed(total_sectors) {
                free_map.store(&bits, sector_pos);
            }
        }
        free_map
    }

    /// Load a map written by [`FreeMap::create`]
    pub fn open(cache: Arc<SectorCache>, start_sector: SectorId, total_sectors: usize) -> Self {
        let sectors = Self::sectors_needed(total_sectors);
        let mut bits = vec![0u64; sectors * WORDS_PER_SECTOR];
        let mut buf = [0u8; SECTOR_SIZE];
        for (sector_pos, words) in bits.chunks_mut(WORDS_PER_SECTOR).enumerate() {
            cache.read(start_sector + sector_pos as SectorId, &mut buf);
            for (word, bytes) in words.iter_mut().zip(buf.chunks(8)) {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                *word = u64::from_le_bytes(raw);
            }
        }
        Self {
            cache,
            start_sector,
            total: total_sectors,
            bits: Mutex::new(bits),
        }
    }

    /// Write bitmap sector `sector_pos` through the cache
    fn store(&self, bits: &[u64], sector_pos: usize) {
        let mut buf = [0u8; SECTOR_SIZE];
        let words = &bits[sector_pos * WORDS_PER_SECTOR..(sector_pos + 1) * WORDS_PER_SECTOR];
        for (bytes, word) in buf.chunks_mut(8).zip(words) {
            bytes.copy_from_slice(&word.to_le_bytes());
        }
        self.cache
            .write(self.start_sector + sector_pos as SectorId, &buf);
    }

    fn test(bits: &[u64], bit: usize) -> bool {
        let (sector_pos, bits64_pos, inner_pos) = decomposition(bit);
        bits[sector_pos * WORDS_PER_SECTOR + bits64_pos] & (1u64 << inner_pos) != 0
    }

    /// Set or clear `count` bits from `first` and write back the touched sectors
    fn set_range(&self, bits: &mut [u64], first: usize, count: usize, used: bool) {
        for bit in first..first + count {
            let (sector_pos, bits64_pos, inner_pos) = decomposition(bit);
            let word = &mut bits[sector_pos * WORDS_PER_SECTOR + bits64_pos];
            if used {
                *word |= 1u64 << inner_pos;
            } else {
                *word &= !(1u64 << inner_pos);
            }
        }
        let (first_sector, _, _) = decomposition(first);
        let (last_sector, _, _) = decomposition(first + count - 1);
        for sector_pos in first_sector..=last_sector {
            self.store(bits, sector_pos);
        }
    }

    /// Allocate `count` consecutive free sectors and return the first one,
    /// or `None` when no such run exists.
    pub fn allocate(&self, count: usize) -> Option<SectorId> {
        assert!(count > 0);
        let mut bits = self.bits.lock();
        let first = if count == 1 {
            bits.iter()
                .enumerate()
                .find(|(_, bits64)| **bits64 != u64::MAX)
                .map(|(pos, bits64)| pos * 64 + bits64.trailing_ones() as usize)
                .filter(|bit| *bit < self.total)
        } else {
            let mut run = 0usize;
            let mut found = None;
            for bit in 0..self.total {
                if Self::test(&bits, bit) {
                    run = 0;
                } else {
                    run += 1;
                    if run == count {
                        found = Some(bit + 1 - count);
                        break;
                    }
                }
            }
            found
        };
        match first {
            Some(first) => {
                self.set_range(&mut bits, first, count, true);
                Some(first as SectorId)
            }
            None => {
                debug!("free map: no run of {} free sectors", count);
                None
            }
        }
    }

    /// Return `count` sectors starting at `sector` to the map
    pub fn release(&self, sector: SectorId, count: usize) {
        let first = sector as usize;
        assert!(first + count <= self.total);
        let mut bits = self.bits.lock();
        for bit in first..first + count {
            assert!(Self::test(&bits, bit), "releasing free sector {}", bit);
        }
        self.set_range(&mut bits, first, count, false);
    }

    /// Mark `count` sectors from `sector` as in use regardless of their state
    pub fn reserve(&self, sector: SectorId, count: usize) {
        let first = sector as usize;
        assert!(first + count <= self.total);
        let mut bits = self.bits.lock();
        self.set_range(&mut bits, first, count, true);
    }

    /// Whether `sector` is currently allocated
    pub fn is_allocated(&self, sector: SectorId) -> bool {
        Self::test(&self.bits.lock(), sector as usize)
    }

    /// Number of free sectors
    pub fn free_count(&self) -> usize {
        let bits = self.bits.lock();
        (0..self.total).filter(|bit| !Self::test(&bits, *bit)).count()
    }

    /// Number of sectors tracked
    pub fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram_disk::RamDisk;

    fn map_over(total: usize) -> (Arc<SectorCache>, FreeMap) {
        let disk = Arc::new(RamDisk::new(total));
        let cache = Arc::new(SectorCache::with_capacity(disk, 8));
        let free_map = FreeMap::create(cache.clone(), 0, total);
        (cache, free_map)
    }

    #[test]
    fn allocates_lowest_free_sector() {
        let (_cache, free_map) = map_over(64);
        free_map.reserve(0, 2);
        assert_eq!(free_map.allocate(1), Some(2));
        assert_eq!(free_map.allocate(1), Some(3));
        free_map.release(2, 1);
        assert_eq!(free_map.allocate(1), Some(2));
        assert_eq!(free_map.free_count(), 60);
    }

    #[test]
    fn contiguous_runs() {
        let (_cache, free_map) = map_over(64);
        free_map.reserve(0, 1);
        free_map.reserve(5, 1);
        assert_eq!(free_map.allocate(4), Some(1));
        assert_eq!(free_map.allocate(3), Some(6));
        free_map.release(1, 4);
        assert_eq!(free_map.allocate(5), Some(9));
    }

    #[test]
    fn exhaustion_reports_none() {
        let (_cache, free_map) = map_over(10);
        free_map.reserve(0, 1);
        for _ in 0..9 {
            assert!(free_map.allocate(1).is_some());
        }
        assert_eq!(free_map.allocate(1), None);
        assert_eq!(free_map.free_count(), 0);
    }

    #[test]
    #[should_panic(expected = "releasing free sector")]
    fn double_release_panics() {
        let (_cache, free_map) = map_over(16);
        let sector = free_map.allocate(1).unwrap();
        free_map.release(sector, 1);
        free_map.release(sector, 1);
    }

    #[test]
    fn survives_reopen() {
        let (cache, free_map) = map_over(5000);
        free_map.reserve(0, 2);
        free_map.reserve(4100, 3);
        let before = free_map.free_count();
        drop(free_map);
        let reopened = FreeMap::open(cache, 0, 5000);
        assert_eq!(reopened.free_count(), before);
        assert!(reopened.is_allocated(4101));
        assert!(!reopened.is_allocated(4103));
    }
}

//! In-memory block device for unit tests, recording every device access.

use crate::{BlockDevice, SectorId, SECTOR_SIZE};
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

pub struct RamDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
    reads: AtomicUsize,
    writes: Mutex<Vec<(SectorId, [u8; SECTOR_SIZE])>>,
}

impl RamDisk {
    pub fn new(sectors: usize) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; sectors]),
            reads: AtomicUsize::new(0),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Device reads so far
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Every device write so far, in order
    pub fn writes(&self) -> Vec<(SectorId, [u8; SECTOR_SIZE])> {
        self.writes.lock().clone()
    }

    /// Sector contents as stored on the device, bypassing any cache
    pub fn peek(&self, sector: SectorId) -> [u8; SECTOR_SIZE] {
        self.sectors.lock()[sector as usize]
    }

    /// Overwrite a sector on the device without recording a write
    pub fn poke(&self, sector: SectorId, data: &[u8; SECTOR_SIZE]) {
        self.sectors.lock()[sector as usize] = *data;
    }
}

impl BlockDevice for RamDisk {
    fn read_sector(&self, sector: SectorId, buf: &mut [u8]) {
        self.reads.fetch_add(1, Ordering::SeqCst);
        buf.copy_from_slice(&self.sectors.lock()[sector as usize]);
    }

    fn write_sector(&self, sector: SectorId, buf: &[u8]) {
        let mut data = [0u8; SECTOR_SIZE];
        data.copy_from_slice(buf);
        self.sectors.lock()[sector as usize] = data;
        self.writes.lock().push((sector, data));
    }
}

use crate::SectorId;
use core::any::Any;

/// Trait for block devices which reads and writes data in the unit of sectors.
///
/// Implementations are assumed reliable: an I/O failure is fatal and should panic
/// instead of returning.
pub trait BlockDevice: Send + Sync + Any {
    /// Read data from the sector `sector` into `buf`
    fn read_sector(&self, sector: SectorId, buf: &mut [u8]);
    /// Write data from `buf` into the sector `sector`
    fn write_sector(&self, sector: SectorId, buf: &[u8]);
}

/// The sector number to access ranging from 0 (the first sector) to n - 1 (the
/// last sector) where n is number of sectors available.
pub type SectorNumber = usize;

/// Raw sector device underneath the file system. Every transfer moves exactly one
/// sector; the file system never asks for partial sectors.
///
/// The interface keeps the shape of a simulated disk (read a sector, write a
/// sector) but reports failures through `std::io::Result` instead of aborting.
pub trait BlockStorage {
    /// The total number of sectors on the device.
    fn num_sectors(&self) -> usize;
    /// Reads sector number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a sector out of range, or into a buffer shorter than
    /// one sector, will return an error.
    fn read_sector(&mut self, sector: SectorNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified sector number.
    ///
    /// # Errors
    ///
    /// Attempting to write a sector out of range will return an error.
    fn write_sector(&mut self, sector: SectorNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;
}

use crate::alloc::Bitmap;
use crate::dir::Directory;
use crate::fs::{FsError, Result};
use crate::{MAX_FILE_SIZE, NUM_DIR_ENTRIES, NUM_SECTORS};

/// Sizing parameters of a file system. Nothing here is written to disk, so the
/// same geometry has to be supplied when formatting and when mounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Sectors covered by the free map; may be less than the device holds.
    pub num_sectors: usize,
    /// Slots in every directory, the root included.
    pub dir_entries: usize,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            num_sectors: NUM_SECTORS,
            dir_entries: NUM_DIR_ENTRIES,
        }
    }
}

impl Geometry {
    pub fn new(num_sectors: usize, dir_entries: usize) -> Self {
        Self {
            num_sectors,
            dir_entries,
        }
    }

    /// Size of the bitmap file in bytes.
    pub fn free_map_size(&self) -> usize {
        Bitmap::byte_len_for(self.num_sectors)
    }

    /// Size of every directory file in bytes.
    pub fn directory_size(&self) -> usize {
        Directory::byte_len_for(self.dir_entries)
    }

    /// Checks that the geometry fits on a device of `device_sectors` sectors and
    /// that the bitmap and directory files can each be described by one header.
    pub fn validate(&self, device_sectors: usize) -> Result<()> {
        // Two bootstrap headers plus at least one data sector each for the bitmap
        // and the root directory.
        if self.num_sectors < 4 {
            return Err(FsError::InvalidGeometry(format!(
                "{} sectors cannot hold the bootstrap files",
                self.num_sectors
            )));
        }
        if self.num_sectors > device_sectors {
            return Err(FsError::InvalidGeometry(format!(
                "{} sectors requested but the device has {}",
                self.num_sectors, device_sectors
            )));
        }
        if self.num_sectors > u32::MAX as usize {
            return Err(FsError::InvalidGeometry(
                "sector numbers must fit in 32 bits".to_string(),
            ));
        }
        if self.dir_entries == 0 {
            return Err(FsError::InvalidGeometry(
                "directories need at least one slot".to_string(),
            ));
        }
        if self.free_map_size() > MAX_FILE_SIZE {
            return Err(FsError::InvalidGeometry(format!(
                "bitmap of {} bytes exceeds the largest file",
                self.free_map_size()
            )));
        }
        if self.directory_size() > MAX_FILE_SIZE {
            return Err(FsError::InvalidGeometry(format!(
                "{} directory slots exceed the largest file",
                self.dir_entries
            )));
        }
        Ok(())
    }
}

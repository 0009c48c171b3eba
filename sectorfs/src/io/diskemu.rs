use super::block::{BlockStorage, SectorNumber};
use crate::SECTOR_SIZE;
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};

/// Emulates a sector-addressed disk in userspace using a host file as backing
/// storage. This is only meant to be used for file system development and testing.
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a sector.
    fd: File,
    /// The total number of sectors available in the file store.
    sector_count: usize,
}

impl FileBlockEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, sector: SectorNumber) -> std::io::Result<()> {
        if sector >= self.sector_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("sector {} out of range", sector),
            ));
        }
        Ok(())
    }
}

impl BlockStorage for FileBlockEmulator {
    fn num_sectors(&self) -> usize {
        self.sector_count
    }

    fn read_sector(&mut self, sector: SectorNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(sector)?;
        if buf.len() < SECTOR_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read sector",
            ));
        }
        self.fd
            .seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;
        // Limit the read to just the sector specified.
        self.fd.read_exact(&mut buf[..SECTOR_SIZE])
    }

    /// This method truncates writes that exceed the sector size. Shorter buffers
    /// only overwrite the leading bytes of the sector.
    fn write_sector(&mut self, sector: SectorNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(sector)?;
        self.fd
            .seek(SeekFrom::Start((sector * SECTOR_SIZE) as u64))?;

        let max = buf.len().min(SECTOR_SIZE);
        self.fd.write_all(&buf[0..max])
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()?;
        Ok(())
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    sector_count: usize,
    clear: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            sector_count: crate::NUM_SECTORS,
            clear: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired sectors in the device.
    pub fn with_sector_count(mut self, sectors: usize) -> Self {
        self.sector_count = sectors;
        self
    }

    /// Whether the backing file is zeroed when the emulator is built. Defaults to
    /// true; pass false to reattach to a disk that already holds a file system.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// This builder assumes ownership of the file descriptor used and, unless told
    /// otherwise, does destructive things to prepare the file for use. Ownership
    /// of the file is transferred to the emulator meaning this builder can only
    /// be used to create one emulator.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.sector_count == 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "a disk needs at least one sector",
            ));
        }
        if self.clear {
            self.zero_sectors()?;
        } else {
            let expected = (self.sector_count * SECTOR_SIZE) as u64;
            if self.fd.metadata()?.len() < expected {
                return Err(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "disk image is smaller than the requested sector count",
                ));
            }
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            sector_count: self.sector_count,
        })
    }

    fn zero_sectors(&mut self) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(0))?;
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk", buffering each write to prevent excessive syscalls.
        let zeroes = [0x00; SECTOR_SIZE];
        for _ in 0..self.sector_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emulator(sectors: usize) -> FileBlockEmulator {
        let fs_block = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(fs_block)
            .with_sector_count(sectors)
            .build()
            .expect("failed to allocate file block")
    }

    #[test]
    fn file_emulator_allocates_correct_num_bytes() {
        let mut disk_emu = emulator(4);
        disk_emu.sync_disk().unwrap();
        assert_eq!(
            disk_emu.into_file().metadata().unwrap().len(),
            4 * SECTOR_SIZE as u64
        );
    }

    #[test]
    fn can_read_and_write_sectors() {
        let mut disk_emu = emulator(4);

        // Fill a sector with a non-zero character.
        let sector = vec![0x55; SECTOR_SIZE];
        disk_emu.write_sector(2, &sector).unwrap();
        disk_emu.sync_disk().unwrap();

        let mut read_sector = vec![0x00; SECTOR_SIZE];
        // Read a different sector.
        disk_emu.read_sector(3, &mut read_sector).unwrap();
        assert_eq!(read_sector, vec![0x00; SECTOR_SIZE]);

        // Read the sector with data.
        let mut filled = vec![0x00; SECTOR_SIZE];
        disk_emu.read_sector(2, &mut filled).unwrap();
        assert_eq!(filled, vec![0x55; SECTOR_SIZE]);
    }

    #[test]
    fn can_read_and_write_start_and_end_sectors() {
        let mut disk_emu = emulator(2);

        disk_emu.write_sector(0, &[0x11; SECTOR_SIZE]).unwrap();
        disk_emu.write_sector(1, &[0x22; SECTOR_SIZE]).unwrap();

        let mut read_sector = vec![0x00; SECTOR_SIZE];
        disk_emu.read_sector(0, &mut read_sector).unwrap();
        assert_eq!(read_sector, vec![0x11; SECTOR_SIZE]);
        disk_emu.read_sector(1, &mut read_sector).unwrap();
        assert_eq!(read_sector, vec![0x22; SECTOR_SIZE]);
    }

    #[test]
    fn access_beyond_range_returns_error() {
        let mut disk_emu = emulator(1);

        let wresult = disk_emu.write_sector(1, &[0x55; SECTOR_SIZE]);
        assert_eq!(wresult.unwrap_err().kind(), ErrorKind::InvalidInput);

        let mut buf = vec![0; SECTOR_SIZE];
        assert!(disk_emu.read_sector(1, &mut buf).is_err());
    }

    #[test]
    fn short_read_buffer_is_rejected() {
        let mut disk_emu = emulator(1);
        let mut buf = vec![0; SECTOR_SIZE / 2];
        assert!(disk_emu.read_sector(0, &mut buf).is_err());
    }

    #[test]
    fn writing_partial_sector_keeps_the_tail() {
        let mut disk_emu = emulator(1);
        disk_emu.write_sector(0, &[0x55; SECTOR_SIZE]).unwrap();

        // Fill half the sector with new data.
        disk_emu.write_sector(0, &[0xAA; SECTOR_SIZE / 2]).unwrap();

        let mut buf = vec![0; SECTOR_SIZE];
        disk_emu.read_sector(0, &mut buf).unwrap();
        assert_eq!(&buf[..SECTOR_SIZE / 2], &[0xAA; SECTOR_SIZE / 2][..]);
        assert_eq!(&buf[SECTOR_SIZE / 2..], &[0x55; SECTOR_SIZE / 2][..]);
    }

    #[test]
    fn reattaching_without_clear_preserves_contents() {
        let disk = tempfile::NamedTempFile::new().unwrap();
        let mut first = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_sector_count(2)
            .build()
            .unwrap();
        first.write_sector(1, &[0x42; SECTOR_SIZE]).unwrap();
        first.sync_disk().unwrap();

        let mut second = FileBlockEmulatorBuilder::from(disk.reopen().unwrap())
            .with_sector_count(2)
            // Don't reset initialized disk.
            .clear_medium(false)
            .build()
            .unwrap();
        let mut buf = vec![0; SECTOR_SIZE];
        second.read_sector(1, &mut buf).unwrap();
        assert_eq!(buf, vec![0x42; SECTOR_SIZE]);
    }
}

use crate::fs::Result;
use crate::io::{BlockStorage, SectorNumber};
use crate::node::FileHeader;
use crate::SECTOR_SIZE;

/// A file opened through its header sector. Reads and writes are translated into
/// whole-sector transfers using the header's sector list.
///
/// Files have the length they were created with; transfers past the end are
/// truncated rather than growing the file.
#[derive(Debug, Clone)]
pub struct OpenFile {
    header_sector: SectorNumber,
    header: FileHeader,
    position: usize,
}

impl OpenFile {
    /// Opens the file whose header lives at `header_sector`.
    pub fn open<D: BlockStorage>(dev: &mut D, header_sector: SectorNumber) -> Result<Self> {
        let header = FileHeader::fetch_from(dev, header_sector)?;
        Ok(Self::with_header(header_sector, header))
    }

    /// Wraps a header already in memory, skipping the disk read.
    pub(crate) fn with_header(header_sector: SectorNumber, header: FileHeader) -> Self {
        Self {
            header_sector,
            header,
            position: 0,
        }
    }

    pub fn header_sector(&self) -> SectorNumber {
        self.header_sector
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    pub fn length(&self) -> usize {
        self.header.byte_length()
    }

    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    /// Reads from the current position and advances it by the bytes read.
    pub fn read<D: BlockStorage>(&mut self, dev: &mut D, buf: &mut [u8]) -> Result<usize> {
        let read = self.read_at(dev, buf, self.position)?;
        self.position += read;
        Ok(read)
    }

    /// Writes at the current position and advances it by the bytes written.
    pub fn write<D: BlockStorage>(&mut self, dev: &mut D, buf: &[u8]) -> Result<usize> {
        let written = self.write_at(dev, buf, self.position)?;
        self.position += written;
        Ok(written)
    }

    /// Reads up to `buf.len()` bytes starting at `position`. Returns how many bytes
    /// were read, which is short when the request runs past the end of the file.
    pub fn read_at<D: BlockStorage>(
        &self,
        dev: &mut D,
        buf: &mut [u8],
        position: usize,
    ) -> Result<usize> {
        let count = self.clamp(buf.len(), position);
        if count == 0 {
            return Ok(0);
        }

        let mut sector_buf = [0; SECTOR_SIZE];
        let mut done = 0;
        while done < count {
            let offset = position + done;
            let in_sector = offset % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - in_sector).min(count - done);

            dev.read_sector(self.header.byte_to_sector(offset), &mut sector_buf)?;
            buf[done..done + chunk].copy_from_slice(&sector_buf[in_sector..in_sector + chunk]);
            done += chunk;
        }
        Ok(count)
    }

    /// Writes up to `buf.len()` bytes starting at `position`. Sectors only partly
    /// covered by the write are read first so their other bytes survive.
    pub fn write_at<D: BlockStorage>(
        &self,
        dev: &mut D,
        buf: &[u8],
        position: usize,
    ) -> Result<usize> {
        let count = self.clamp(buf.len(), position);
        if count == 0 {
            return Ok(0);
        }

        let mut sector_buf = [0; SECTOR_SIZE];
        let mut done = 0;
        while done < count {
            let offset = position + done;
            let in_sector = offset % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - in_sector).min(count - done);
            let sector = self.header.byte_to_sector(offset);

            if chunk < SECTOR_SIZE {
                dev.read_sector(sector, &mut sector_buf)?;
            }
            sector_buf[in_sector..in_sector + chunk].copy_from_slice(&buf[done..done + chunk]);
            dev.write_sector(sector, &sector_buf)?;
            done += chunk;
        }
        Ok(count)
    }

    fn clamp(&self, requested: usize, position: usize) -> usize {
        let length = self.length();
        if position >= length {
            return 0;
        }
        requested.min(length - position)
    }
}

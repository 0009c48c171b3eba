use std::fmt;
use std::mem;

use byteorder::LittleEndian;
use log::debug;
use zerocopy::byteorder::U32;
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

use crate::alloc::Bitmap;
use crate::fs::{FsError, Result};
use crate::io::{BlockStorage, SectorNumber};
use crate::{MAX_FILE_SIZE, NUM_DIRECT, SECTOR_SIZE};

#[repr(C)]
#[derive(AsBytes, FromBytes, Unaligned, Copy, Clone)]
/// On-disk image of a header. This structure __must be exactly one sector.__
struct RawHeader {
    /// The total size of the file in bytes.
    num_bytes: U32<LittleEndian>,
    /// The number of data sectors in use; always `ceil(num_bytes / SECTOR_SIZE)`.
    num_sectors: U32<LittleEndian>,
    /// Data sectors in logical order. Slots past `num_sectors` are zero.
    data_sectors: [U32<LittleEndian>; NUM_DIRECT],
}

const _: () = assert!(mem::size_of::<RawHeader>() == SECTOR_SIZE);

/// Describes where a file's bytes live on disk: its length and the flat list of
/// data sectors, in logical order. Headers of files and directories are identical;
/// only the entry that names them knows which is which.
///
/// Files never grow, so the sector list is fixed by [`FileHeader::allocate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    num_bytes: usize,
    data_sectors: Vec<SectorNumber>,
}

impl FileHeader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims enough free sectors in `free_map` to hold `file_size` bytes.
    ///
    /// Nothing is claimed when the disk does not have enough free sectors. The
    /// caller owns `free_map` and decides whether the claims are ever persisted.
    pub fn allocate(&mut self, free_map: &mut Bitmap, file_size: usize) -> Result<()> {
        if file_size > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge(file_size));
        }
        let needed = Self::sectors_for(file_size);
        if free_map.num_clear() < needed {
            debug!(
                "need {} sectors for {} bytes, only {} free",
                needed,
                file_size,
                free_map.num_clear()
            );
            return Err(FsError::NoSpace);
        }

        self.num_bytes = file_size;
        self.data_sectors = Vec::with_capacity(needed);
        for _ in 0..needed {
            let sector = free_map.find_and_set().ok_or(FsError::NoSpace)?;
            self.data_sectors.push(sector);
        }
        Ok(())
    }

    /// Returns every data sector back to `free_map`, which must be the map the
    /// sectors were claimed from.
    pub fn deallocate(&self, free_map: &mut Bitmap) {
        for &sector in &self.data_sectors {
            free_map.clear(sector);
        }
    }

    /// Reads the header stored at `sector`. A header naming data sectors past the
    /// end of `dev` is rejected as corrupt.
    pub fn fetch_from<D: BlockStorage>(dev: &mut D, sector: SectorNumber) -> Result<Self> {
        let mut buf = [0; SECTOR_SIZE];
        dev.read_sector(sector, &mut buf)?;
        let hdr = Self::parse(&buf)?;
        if let Some(&bad) = hdr.data_sectors.iter().find(|&&s| s >= dev.num_sectors()) {
            return Err(FsError::CorruptHeader(format!(
                "sector {} maps data sector {} on a disk of {}",
                sector,
                bad,
                dev.num_sectors()
            )));
        }
        Ok(hdr)
    }

    /// Writes the header to `sector`.
    pub fn write_back<D: BlockStorage>(&self, dev: &mut D, sector: SectorNumber) -> Result<()> {
        dev.write_sector(sector, &self.serialize())?;
        Ok(())
    }

    /// Decodes a header from one sector. A zeroed sector decodes to an empty header.
    ///
    /// Fails when the sector count is more than fits or disagrees with the length.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        assert_eq!(buf.len(), SECTOR_SIZE, "Length of buffer to parse must equal sector size.");
        let raw = *LayoutVerified::<_, RawHeader>::new_unaligned(buf)
            .expect("header record spans exactly one sector");

        let num_bytes = raw.num_bytes.get() as usize;
        let num_sectors = raw.num_sectors.get() as usize;
        if num_sectors > NUM_DIRECT {
            return Err(FsError::CorruptHeader(format!(
                "claims {} sectors, at most {} fit",
                num_sectors, NUM_DIRECT
            )));
        }
        if num_sectors != Self::sectors_for(num_bytes) {
            return Err(FsError::CorruptHeader(format!(
                "{} sectors cannot hold exactly {} bytes",
                num_sectors, num_bytes
            )));
        }
        Ok(Self {
            num_bytes,
            data_sectors: raw.data_sectors[..num_sectors]
                .iter()
                .map(|s| s.get() as SectorNumber)
                .collect(),
        })
    }

    /// Encodes the header into exactly one sector.
    pub fn serialize(&self) -> [u8; SECTOR_SIZE] {
        assert!(self.data_sectors.len() <= NUM_DIRECT, "header overflows its sector");
        let mut raw = RawHeader {
            num_bytes: U32::new(self.num_bytes as u32),
            num_sectors: U32::new(self.data_sectors.len() as u32),
            data_sectors: [U32::new(0); NUM_DIRECT],
        };
        for (slot, &sector) in raw.data_sectors.iter_mut().zip(&self.data_sectors) {
            *slot = U32::new(sector as u32);
        }

        let mut buf = [0; SECTOR_SIZE];
        buf.copy_from_slice(raw.as_bytes());
        buf
    }

    pub fn byte_length(&self) -> usize {
        self.num_bytes
    }

    pub fn num_sectors(&self) -> usize {
        self.data_sectors.len()
    }

    pub fn sectors(&self) -> &[SectorNumber] {
        &self.data_sectors
    }

    /// The physical sector backing logical sector `index` of the file.
    pub fn sector_at(&self, index: usize) -> SectorNumber {
        self.data_sectors[index]
    }

    /// The physical sector holding byte `offset` of the file.
    pub fn byte_to_sector(&self, offset: usize) -> SectorNumber {
        self.sector_at(offset / SECTOR_SIZE)
    }

    fn sectors_for(size: usize) -> usize {
        (size + SECTOR_SIZE - 1) / SECTOR_SIZE
    }
}

impl fmt::Display for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FileHeader contents.  File size: {}.  File blocks:",
            self.num_bytes
        )?;
        for sector in &self.data_sectors {
            write!(f, " {}", sector)?;
        }
        writeln!(f)
    }
}

use std::fmt;

use crate::file::OpenFile;
use crate::fs::Result;
use crate::io::{BlockStorage, SectorNumber};

const BITS_IN_BYTE: usize = 8;

#[derive(Debug, PartialEq)]
pub enum State {
    Free,
    Used,
}

/// Tracks which sectors of the disk are allocated, one bit per sector. Bit `i`
/// lives in byte `i / 8` at position `i % 8`.
///
/// The map is purely in memory. It is loaded from the bitmap file at the start of
/// an operation and only written back once the whole operation has succeeded, so
/// a failed operation can simply drop its copy.
#[derive(Clone, PartialEq)]
pub struct Bitmap {
    num_bits: usize,
    bits: Vec<u8>,
}

impl Bitmap {
    /// A bitmap over `num_bits` sectors, all free.
    pub fn new(num_bits: usize) -> Self {
        Self {
            num_bits,
            bits: vec![0; Self::byte_len_for(num_bits)],
        }
    }

    /// Bytes needed to persist a bitmap over `num_bits` sectors.
    pub fn byte_len_for(num_bits: usize) -> usize {
        (num_bits + BITS_IN_BYTE - 1) / BITS_IN_BYTE
    }

    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    pub fn byte_len(&self) -> usize {
        self.bits.len()
    }

    pub fn get(&self, sector: SectorNumber) -> State {
        assert!(sector < self.num_bits, "sector {} outside bitmap", sector);
        let mask = 1_u8 << (sector % BITS_IN_BYTE);
        match self.bits[sector / BITS_IN_BYTE] & mask {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn is_set(&self, sector: SectorNumber) -> bool {
        self.get(sector) == State::Used
    }

    /// Forces a sector to the allocated state.
    pub fn mark(&mut self, sector: SectorNumber) {
        assert!(sector < self.num_bits, "sector {} outside bitmap", sector);
        self.bits[sector / BITS_IN_BYTE] |= 1 << (sector % BITS_IN_BYTE);
    }

    /// Returns a sector to the free pool. Clearing a sector that is not allocated
    /// means some header or directory is corrupt, so it panics.
    pub fn clear(&mut self, sector: SectorNumber) {
        assert!(
            self.is_set(sector),
            "clearing sector {} which is not allocated",
            sector
        );
        self.bits[sector / BITS_IN_BYTE] &= !(1 << (sector % BITS_IN_BYTE));
    }

    /// Claims the lowest numbered free sector, or `None` when the disk is full.
    pub fn find_and_set(&mut self) -> Option<SectorNumber> {
        let sector = (0..self.num_bits).find(|&i| !self.is_set(i))?;
        self.mark(sector);
        Some(sector)
    }

    pub fn num_clear(&self) -> usize {
        (0..self.num_bits).filter(|&i| !self.is_set(i)).count()
    }

    /// Allocated sectors in ascending order.
    pub fn allocated(&self) -> impl Iterator<Item = SectorNumber> + '_ {
        (0..self.num_bits).filter(move |&i| self.is_set(i))
    }

    /// Replaces the contents with a persisted image. Bits past `num_bits` in the
    /// final byte are ignored.
    pub fn parse(&mut self, buf: &[u8]) {
        assert_eq!(buf.len(), self.bits.len(), "bitmap image has wrong length");
        self.bits.copy_from_slice(buf);
        let tail = self.num_bits % BITS_IN_BYTE;
        if tail != 0 {
            let last = self.bits.len() - 1;
            self.bits[last] &= (1 << tail) - 1;
        }
    }

    pub fn serialize(&self) -> &[u8] {
        &self.bits
    }

    /// Loads the whole map from the bitmap file.
    pub fn fetch_from<D: BlockStorage>(&mut self, file: &OpenFile, dev: &mut D) -> Result<()> {
        let mut buf = vec![0; self.byte_len()];
        let read = file.read_at(dev, &mut buf, 0)?;
        debug_assert_eq!(read, buf.len());
        self.parse(&buf);
        Ok(())
    }

    /// Flushes the whole map to the bitmap file.
    pub fn write_back<D: BlockStorage>(&self, file: &OpenFile, dev: &mut D) -> Result<()> {
        let written = file.write_at(dev, self.serialize(), 0)?;
        debug_assert_eq!(written, self.byte_len());
        Ok(())
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("num_bits", &self.num_bits)
            .field("num_clear", &self.num_clear())
            .finish()
    }
}

impl fmt::Display for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap set:")?;
        for sector in self.allocated() {
            write!(f, " {},", sector)?;
        }
        writeln!(f)
    }
}

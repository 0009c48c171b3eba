use std::fmt;
use std::mem;

use byteorder::LittleEndian;
use log::debug;
use zerocopy::byteorder::U32;
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

use crate::alloc::Bitmap;
use crate::file::OpenFile;
use crate::fs::{FsError, Result};
use crate::io::{BlockStorage, SectorNumber};
use crate::node::FileHeader;
use crate::{FILE_NAME_MAX_LEN, PATH_SEPARATOR};

#[repr(C)]
#[derive(AsBytes, FromBytes, Unaligned, Copy, Clone)]
/// On-disk image of one directory slot.
struct RawEntry {
    in_use: u8,
    is_dir: u8,
    _pad: [u8; 2],
    /// Sector holding the entry's file header.
    sector: U32<LittleEndian>,
    /// NUL padded; the final byte is always NUL.
    name: [u8; FILE_NAME_MAX_LEN + 1],
    _pad_tail: [u8; 2],
}

/// Bytes taken by one directory slot on disk.
pub const DIR_ENTRY_SIZE: usize = mem::size_of::<RawEntry>();

/// An in-use directory slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    name: String,
    sector: SectorNumber,
    is_dir: bool,
}

impl DirectoryEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sector holding the header of the file or directory this entry names.
    pub fn sector(&self) -> SectorNumber {
        self.sector
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn decode(raw: &RawEntry) -> Option<Self> {
        if raw.in_use == 0 {
            return None;
        }
        let len = raw.name.iter().position(|&c| c == 0).unwrap_or(FILE_NAME_MAX_LEN);
        Some(Self {
            name: String::from_utf8_lossy(&raw.name[..len]).into_owned(),
            sector: raw.sector.get() as SectorNumber,
            is_dir: raw.is_dir != 0,
        })
    }

    fn encode(slot: Option<&Self>) -> RawEntry {
        let mut raw = RawEntry {
            in_use: 0,
            is_dir: 0,
            _pad: [0; 2],
            sector: U32::new(0),
            name: [0; FILE_NAME_MAX_LEN + 1],
            _pad_tail: [0; 2],
        };
        if let Some(entry) = slot {
            let bytes = entry.name.as_bytes();
            let bytes = &bytes[..bytes.len().min(FILE_NAME_MAX_LEN)];
            raw.in_use = 1;
            raw.is_dir = entry.is_dir as u8;
            raw.sector = U32::new(entry.sector as u32);
            raw.name[..bytes.len()].copy_from_slice(bytes);
        }
        raw
    }
}

/// One line of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    /// Nesting below the listed directory; its own entries are at depth 0.
    pub depth: usize,
    pub is_dir: bool,
    pub sector: SectorNumber,
}

/// A fixed number of name slots mapping names to header sectors.
///
/// A directory is stored as an ordinary file holding every slot in order, so
/// subdirectories use exactly the same representation as the root. The slot
/// count never changes after construction; a full directory refuses new entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    table: Vec<Option<DirectoryEntry>>,
}

impl Directory {
    /// An empty directory with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            table: vec![None; capacity],
        }
    }

    /// Reads the directory stored in the file whose header is at `header_sector`.
    pub fn load<D: BlockStorage>(
        dev: &mut D,
        header_sector: SectorNumber,
        capacity: usize,
    ) -> Result<Self> {
        let file = OpenFile::open(dev, header_sector)?;
        let mut directory = Self::new(capacity);
        directory.fetch_from(&file, dev)?;
        Ok(directory)
    }

    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    /// Size of the directory file.
    pub fn byte_len(&self) -> usize {
        Self::byte_len_for(self.capacity())
    }

    pub fn byte_len_for(capacity: usize) -> usize {
        capacity * DIR_ENTRY_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Replaces every slot with the records in `buf`.
    pub fn parse(&mut self, buf: &[u8]) {
        assert_eq!(buf.len(), self.byte_len(), "directory image has wrong length");
        let records = LayoutVerified::<_, [RawEntry]>::new_slice_unaligned(buf)
            .expect("directory image is a whole number of records");
        for (slot, raw) in self.table.iter_mut().zip(records.iter()) {
            *slot = DirectoryEntry::decode(raw);
        }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.byte_len());
        for slot in &self.table {
            buf.extend_from_slice(DirectoryEntry::encode(slot.as_ref()).as_bytes());
        }
        buf
    }

    /// Loads every slot from the directory file.
    pub fn fetch_from<D: BlockStorage>(&mut self, file: &OpenFile, dev: &mut D) -> Result<()> {
        let mut buf = vec![0; self.byte_len()];
        let read = file.read_at(dev, &mut buf, 0)?;
        debug_assert_eq!(read, buf.len());
        self.parse(&buf);
        Ok(())
    }

    /// Flushes every slot to the directory file.
    pub fn write_back<D: BlockStorage>(&self, file: &OpenFile, dev: &mut D) -> Result<()> {
        let written = file.write_at(dev, &self.serialize(), 0)?;
        debug_assert_eq!(written, self.byte_len());
        Ok(())
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        self.table
            .iter()
            .position(|slot| matches!(slot, Some(entry) if entry.name == name))
    }

    /// The in-use entry called `name`.
    pub fn entry(&self, name: &str) -> Option<&DirectoryEntry> {
        self.find_index(name).and_then(|i| self.table[i].as_ref())
    }

    /// The header sector of `name`, if present.
    pub fn find(&self, name: &str) -> Option<SectorNumber> {
        self.entry(name).map(DirectoryEntry::sector)
    }

    /// Whether `name` is a subdirectory. Absent names are not directories.
    pub fn is_directory(&self, name: &str) -> bool {
        self.entry(name).map_or(false, DirectoryEntry::is_dir)
    }

    /// Stores `name` in the lowest free slot.
    pub fn add(&mut self, name: &str, sector: SectorNumber, is_dir: bool) -> Result<()> {
        if name.is_empty() || name.contains(PATH_SEPARATOR) || name.contains('\0') {
            return Err(FsError::InvalidName(name.to_string()));
        }
        if name.len() > FILE_NAME_MAX_LEN {
            return Err(FsError::NameTooLong(name.to_string()));
        }
        if self.find_index(name).is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }

        let slot = self
            .table
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(FsError::DirectoryFull)?;
        *slot = Some(DirectoryEntry {
            name: name.to_string(),
            sector,
            is_dir,
        });
        Ok(())
    }

    /// Frees the slot holding `name`. The entry's sectors are left to the caller.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let index = self
            .find_index(name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        self.table[index] = None;
        Ok(())
    }

    /// Returns the header and data sectors of everything below this directory to
    /// `free_map`, descending into subdirectories first. The directory's own
    /// sectors belong to whoever holds its entry.
    pub fn recursive_remove<D: BlockStorage>(
        &self,
        free_map: &mut Bitmap,
        dev: &mut D,
    ) -> Result<()> {
        for entry in self.entries() {
            if entry.is_dir {
                let sub = Directory::load(dev, entry.sector, self.capacity())?;
                sub.recursive_remove(free_map, dev)?;
            }
            debug!("reclaiming {} (header sector {})", entry.name, entry.sector);
            let hdr = FileHeader::fetch_from(dev, entry.sector)?;
            hdr.deallocate(free_map);
            free_map.clear(entry.sector);
        }
        Ok(())
    }

    /// In-use entries in slot order.
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> + '_ {
        self.table.iter().filter_map(Option::as_ref)
    }

    /// Names of in-use entries in slot order.
    pub fn list(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries().map(DirectoryEntry::name)
    }

    /// Walks this directory and every subdirectory below it, depth first, in slot
    /// order. Subdirectories are read from disk as the walk reaches them.
    pub fn recursive_list<'d, D: BlockStorage>(
        &self,
        dev: &'d mut D,
        depth: usize,
    ) -> RecursiveList<'d, D> {
        RecursiveList::new(dev, self.clone(), depth, true)
    }
}

impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Directory contents:")?;
        for entry in self.entries() {
            writeln!(
                f,
                "Name: {}, Sector: {}, {}",
                entry.name,
                entry.sector,
                if entry.is_dir { "directory" } else { "file" }
            )?;
        }
        Ok(())
    }
}

/// Lazy listing over a directory tree. Each call to `next` reads at most one
/// subdirectory from disk.
pub struct RecursiveList<'d, D: BlockStorage> {
    dev: &'d mut D,
    /// Directories being walked with the next slot to visit and their depth.
    stack: Vec<(Directory, usize, usize)>,
    descend: bool,
}

impl<'d, D: BlockStorage> RecursiveList<'d, D> {
    pub(crate) fn new(dev: &'d mut D, root: Directory, depth: usize, descend: bool) -> Self {
        Self {
            dev,
            stack: vec![(root, 0, depth)],
            descend,
        }
    }
}

impl<'d, D: BlockStorage> Iterator for RecursiveList<'d, D> {
    type Item = Result<ListEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (entry, depth, capacity) = {
                let (dir, next_slot, depth) = self.stack.last_mut()?;
                if *next_slot >= dir.capacity() {
                    self.stack.pop();
                    continue;
                }
                let slot = *next_slot;
                *next_slot += 1;
                match &dir.table[slot] {
                    Some(entry) => (entry.clone(), *depth, dir.capacity()),
                    None => continue,
                }
            };

            if self.descend && entry.is_dir {
                match Directory::load(&mut *self.dev, entry.sector, capacity) {
                    Ok(sub) => self.stack.push((sub, 0, depth + 1)),
                    Err(e) => {
                        self.stack.clear();
                        return Some(Err(e));
                    }
                }
            }
            return Some(Ok(ListEntry {
                name: entry.name,
                depth,
                is_dir: entry.is_dir,
                sector: entry.sector,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
    use crate::SECTOR_SIZE;

    #[test]
    fn entry_record_is_twenty_bytes() {
        assert_eq!(DIR_ENTRY_SIZE, 20);
        assert_eq!(Directory::new(10).byte_len(), 200);
    }

    #[test]
    fn add_then_find() {
        let mut dir = Directory::new(4);
        dir.add("a", 7, false).unwrap();
        dir.add("sub", 9, true).unwrap();

        assert_eq!(dir.find("a"), Some(7));
        assert_eq!(dir.find("sub"), Some(9));
        assert!(dir.is_directory("sub"));
        assert!(!dir.is_directory("a"));
        assert_eq!(dir.find("missing"), None);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut dir = Directory::new(4);
        dir.add("a", 7, false).unwrap();

        let err = dir.add("a", 8, true).unwrap_err();

        assert!(matches!(err, FsError::AlreadyExists(_)));
        assert_eq!(dir.find("a"), Some(7));
    }

    #[test]
    fn removed_names_are_not_found() {
        let mut dir = Directory::new(4);
        dir.add("a", 7, false).unwrap();

        dir.remove("a").unwrap();

        assert_eq!(dir.find("a"), None);
        assert!(matches!(dir.remove("a"), Err(FsError::NotFound(_))));
    }

    #[test]
    fn names_are_bounded() {
        let mut dir = Directory::new(4);
        assert!(dir.add("ninechars", 2, false).is_ok());
        assert!(matches!(
            dir.add("tenchars!!", 3, false),
            Err(FsError::NameTooLong(_))
        ));
        assert!(matches!(dir.add("", 3, false), Err(FsError::InvalidName(_))));
        assert!(matches!(dir.add("a/b", 3, false), Err(FsError::InvalidName(_))));
    }

    #[test]
    fn full_directory_refuses_entries_until_a_slot_frees() {
        let mut dir = Directory::new(3);
        dir.add("a", 2, false).unwrap();
        dir.add("b", 3, false).unwrap();
        dir.add("c", 4, false).unwrap();

        assert!(matches!(dir.add("d", 5, false), Err(FsError::DirectoryFull)));

        dir.remove("b").unwrap();
        dir.add("d", 5, false).unwrap();
        // The freed middle slot is reused.
        assert_eq!(dir.list().collect::<Vec<_>>(), vec!["a", "d", "c"]);
        assert!(matches!(dir.add("e", 6, false), Err(FsError::DirectoryFull)));
    }

    #[test]
    fn listing_follows_slot_order_and_skips_free_slots() {
        let mut dir = Directory::new(5);
        for (i, name) in ["e", "d", "c", "b"].iter().enumerate() {
            dir.add(name, i + 2, false).unwrap();
        }
        dir.remove("d").unwrap();

        assert_eq!(dir.list().collect::<Vec<_>>(), vec!["e", "c", "b"]);
        // Listing can be repeated.
        assert_eq!(dir.list().count(), 3);
    }

    #[test]
    fn can_encode_and_decode_directories() {
        let mut dir = Directory::new(10);
        dir.add("kernel", 12, false).unwrap();
        dir.add("home", 40, true).unwrap();
        dir.add("ninechars", 1000, false).unwrap();
        dir.remove("kernel").unwrap();

        let encoded = dir.serialize();
        assert_eq!(encoded.len(), 200);

        let mut parsed = Directory::new(10);
        parsed.parse(&encoded);
        assert_eq!(parsed, dir);
        assert_eq!(parsed.entry("home").unwrap().sector(), 40);
    }

    #[test]
    fn entry_layout_is_stable() {
        let mut dir = Directory::new(1);
        dir.add("ab", 0x0102, true).unwrap();

        let encoded = dir.serialize();

        assert_eq!(&encoded[0..4], &[1, 1, 0, 0]);
        assert_eq!(&encoded[4..8], &[0x02, 0x01, 0, 0]);
        assert_eq!(&encoded[8..11], b"ab\0");
    }

    fn test_device() -> FileBlockEmulator {
        FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
            .with_sector_count(64)
            .build()
            .unwrap()
    }

    /// Writes `dir` into a freshly allocated directory file, returning its header sector.
    fn store(dev: &mut FileBlockEmulator, map: &mut Bitmap, dir: &Directory) -> SectorNumber {
        let sector = map.find_and_set().unwrap();
        let mut hdr = FileHeader::new();
        hdr.allocate(map, dir.byte_len()).unwrap();
        hdr.write_back(dev, sector).unwrap();
        dir.write_back(&OpenFile::with_header(sector, hdr), dev).unwrap();
        sector
    }

    fn store_file(dev: &mut FileBlockEmulator, map: &mut Bitmap, size: usize) -> SectorNumber {
        let sector = map.find_and_set().unwrap();
        let mut hdr = FileHeader::new();
        hdr.allocate(map, size).unwrap();
        hdr.write_back(dev, sector).unwrap();
        sector
    }

    #[test]
    fn directory_round_trips_through_its_file() {
        let mut dev = test_device();
        let mut map = Bitmap::new(64);
        let mut dir = Directory::new(10);
        dir.add("x", 33, false).unwrap();

        let sector = store(&mut dev, &mut map, &dir);

        assert_eq!(Directory::load(&mut dev, sector, 10).unwrap(), dir);
    }

    #[test]
    fn recursive_list_descends_with_depth() {
        let mut dev = test_device();
        let mut map = Bitmap::new(64);

        let mut inner = Directory::new(4);
        inner.add("g", store_file(&mut dev, &mut map, 10), false).unwrap();
        let inner_sector = store(&mut dev, &mut map, &inner);

        let mut top = Directory::new(4);
        top.add("f", store_file(&mut dev, &mut map, 20), false).unwrap();
        top.add("sub", inner_sector, true).unwrap();
        top.add("h", store_file(&mut dev, &mut map, 0), false).unwrap();

        let listed: Vec<(String, usize)> = top
            .recursive_list(&mut dev, 0)
            .map(|e| e.map(|e| (e.name, e.depth)))
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(
            listed,
            vec![
                ("f".to_string(), 0),
                ("sub".to_string(), 0),
                ("g".to_string(), 1),
                ("h".to_string(), 0),
            ]
        );
    }

    #[test]
    fn recursive_remove_frees_the_whole_subtree() {
        let mut dev = test_device();
        let mut map = Bitmap::new(64);
        map.mark(0);
        map.mark(1);
        let baseline = map.clone();

        let mut inner = Directory::new(4);
        inner.add("g", store_file(&mut dev, &mut map, 10), false).unwrap();
        let inner_sector = store(&mut dev, &mut map, &inner);

        let mut top = Directory::new(4);
        top.add("f", store_file(&mut dev, &mut map, 2 * SECTOR_SIZE), false).unwrap();
        top.add("sub", inner_sector, true).unwrap();

        top.recursive_remove(&mut map, &mut dev).unwrap();

        assert!(map == baseline);
    }

    #[test]
    fn display_shows_entries() {
        let mut dir = Directory::new(2);
        dir.add("a", 5, false).unwrap();
        assert_eq!(
            dir.to_string(),
            "Directory contents:\nName: a, Sector: 5, file\n"
        );
    }
}

use std::io::Write;

use log::{debug, info, warn};
use thiserror::Error;

use crate::alloc::Bitmap;
use crate::dir::{Directory, RecursiveList};
use crate::file::OpenFile;
use crate::geometry::Geometry;
use crate::io::BlockStorage;
use crate::node::FileHeader;
use crate::{FREE_MAP_SECTOR, PATH_SEPARATOR, ROOT_DIR_SECTOR};

#[derive(Error, Debug)]
pub enum FsError {
    #[error("no such file or directory: {0}")]
    NotFound(String),
    #[error("not a directory: {0}")]
    NotADirectory(String),
    #[error("name already exists: {0}")]
    AlreadyExists(String),
    #[error("directory has no free slot")]
    DirectoryFull,
    #[error("name too long: {0}")]
    NameTooLong(String),
    #[error("invalid name: {0:?}")]
    InvalidName(String),
    #[error("not enough free sectors")]
    NoSpace,
    #[error("file of {0} bytes exceeds the largest file a header can map")]
    FileTooLarge(usize),
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    #[error("disk does not hold a file system with this geometry")]
    Unformatted,
    #[error("corrupt file header: {0}")]
    CorruptHeader(String),
    #[error("no open file with id {0}")]
    BadHandle(i32),
    #[error("every open file id is in use")]
    TooManyOpenFiles,
    #[error("disk I/O failed")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// Splits a path into its non-empty segments. Resolution always starts at the
/// root, so a leading separator is optional.
fn split_path(path: &str) -> Vec<&str> {
    path.split(PATH_SEPARATOR).filter(|s| !s.is_empty()).collect()
}

/// Splits a path into the directories to walk and the final name.
fn split_target(path: &str) -> Result<(Vec<&str>, &str)> {
    let mut segments = split_path(path);
    let name = segments
        .pop()
        .ok_or_else(|| FsError::InvalidPath(path.to_string()))?;
    Ok((segments, name))
}

/// Names files and directories on a sector device.
///
/// The bitmap file and the root directory file stay open for the life of the file
/// system. Every operation loads its own copy of the bitmap and of the directory
/// it changes, and writes them back only once the whole operation has succeeded;
/// a failed operation drops its copies and leaves the disk as it was.
///
/// Operations are not atomic with respect to crashes: a crash between the writes
/// of one operation can leave the bitmap and a directory disagreeing.
pub struct FileSystem<D: BlockStorage> {
    dev: D,
    geometry: Geometry,
    free_map_file: OpenFile,
    directory_file: OpenFile,
}

impl<D: BlockStorage> FileSystem<D> {
    /// Writes an empty file system onto `dev`, destroying whatever it held.
    ///
    /// # Layout
    /// The headers of the bitmap file and the root directory file go to their
    /// well-known sectors first; only then can the two files be opened and their
    /// contents written through the normal file path.
    pub fn format(mut dev: D, geometry: Geometry) -> Result<Self> {
        geometry.validate(dev.num_sectors())?;
        info!(
            "Formatting {} sectors with {} entries per directory.",
            geometry.num_sectors, geometry.dir_entries
        );

        let mut free_map = Bitmap::new(geometry.num_sectors);
        let directory = Directory::new(geometry.dir_entries);
        free_map.mark(FREE_MAP_SECTOR);
        free_map.mark(ROOT_DIR_SECTOR);

        let mut map_hdr = FileHeader::new();
        map_hdr.allocate(&mut free_map, geometry.free_map_size())?;
        let mut dir_hdr = FileHeader::new();
        dir_hdr.allocate(&mut free_map, geometry.directory_size())?;

        debug!("Writing headers back to disk.");
        map_hdr.write_back(&mut dev, FREE_MAP_SECTOR)?;
        dir_hdr.write_back(&mut dev, ROOT_DIR_SECTOR)?;

        let free_map_file = OpenFile::open(&mut dev, FREE_MAP_SECTOR)?;
        let directory_file = OpenFile::open(&mut dev, ROOT_DIR_SECTOR)?;

        debug!("Writing bitmap and directory back to disk.");
        free_map.write_back(&free_map_file, &mut dev)?;
        directory.write_back(&directory_file, &mut dev)?;
        dev.sync_disk()?;

        Ok(Self {
            dev,
            geometry,
            free_map_file,
            directory_file,
        })
    }

    /// Attaches to a disk formatted with the same geometry.
    pub fn mount(mut dev: D, geometry: Geometry) -> Result<Self> {
        geometry.validate(dev.num_sectors())?;

        let bootstrap = OpenFile::open(&mut dev, FREE_MAP_SECTOR)
            .and_then(|free_map| Ok((free_map, OpenFile::open(&mut dev, ROOT_DIR_SECTOR)?)));
        let (free_map_file, directory_file) = match bootstrap {
            Ok(files) => files,
            Err(FsError::CorruptHeader(reason)) => {
                warn!("Bootstrap header is corrupt: {}.", reason);
                return Err(FsError::Unformatted);
            }
            Err(e) => return Err(e),
        };
        let outside = free_map_file
            .header()
            .sectors()
            .iter()
            .chain(directory_file.header().sectors())
            .any(|&s| s >= geometry.num_sectors);
        if outside
            || free_map_file.length() != geometry.free_map_size()
            || directory_file.length() != geometry.directory_size()
        {
            warn!(
                "Bootstrap headers describe {} and {} bytes, expected {} and {}.",
                free_map_file.length(),
                directory_file.length(),
                geometry.free_map_size(),
                geometry.directory_size()
            );
            return Err(FsError::Unformatted);
        }
        debug!("Mounted file system of {} sectors.", geometry.num_sectors);

        Ok(Self {
            dev,
            geometry,
            free_map_file,
            directory_file,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Returns ownership of the underlying device to the caller.
    pub fn into_device(self) -> D {
        self.dev
    }

    /// The free map as currently persisted.
    pub fn free_map(&mut self) -> Result<Bitmap> {
        let mut free_map = Bitmap::new(self.geometry.num_sectors);
        free_map.fetch_from(&self.free_map_file, &mut self.dev)?;
        Ok(free_map)
    }

    fn root(&mut self) -> Result<Directory> {
        let mut directory = Directory::new(self.geometry.dir_entries);
        directory.fetch_from(&self.directory_file, &mut self.dev)?;
        Ok(directory)
    }

    /// Walks `segments` from the root. Every segment must name a directory. Returns
    /// the directory reached together with the file it is stored in.
    fn walk(&mut self, segments: &[&str]) -> Result<(Directory, OpenFile)> {
        let mut file = self.directory_file.clone();
        let mut directory = self.root()?;

        for &segment in segments {
            let entry = directory
                .entry(segment)
                .ok_or_else(|| FsError::NotFound(segment.to_string()))?;
            if !entry.is_dir() {
                return Err(FsError::NotADirectory(segment.to_string()));
            }
            let sector = entry.sector();
            debug!("Descending into {} (header sector {}).", segment, sector);

            file = OpenFile::open(&mut self.dev, sector)?;
            directory = Directory::new(self.geometry.dir_entries);
            directory.fetch_from(&file, &mut self.dev)?;
        }
        Ok((directory, file))
    }

    /// Creates a file of `size` bytes. Files never grow, so this is all the space
    /// the file will ever have.
    pub fn create(&mut self, path: &str, size: usize) -> Result<()> {
        info!("Creating file {} size {}.", path, size);
        self.create_entry(path, size, false)
    }

    /// Creates an empty subdirectory.
    pub fn create_directory(&mut self, path: &str) -> Result<()> {
        info!("Creating directory {}.", path);
        let size = self.geometry.directory_size();
        self.create_entry(path, size, true)
    }

    fn create_entry(&mut self, path: &str, size: usize, is_dir: bool) -> Result<()> {
        let (parents, name) = split_target(path)?;
        let (mut directory, dir_file) = self.walk(&parents)?;
        if directory.find(name).is_some() {
            return Err(FsError::AlreadyExists(name.to_string()));
        }

        let mut free_map = self.free_map()?;
        // Sector for the new header.
        let sector = free_map.find_and_set().ok_or(FsError::NoSpace)?;
        directory.add(name, sector, is_dir)?;
        let mut hdr = FileHeader::new();
        hdr.allocate(&mut free_map, size)?;

        // Everything worked, flush all changes back to disk.
        hdr.write_back(&mut self.dev, sector)?;
        if is_dir {
            // The data sectors may hold anything; give the new directory empty slots.
            let sub_file = OpenFile::with_header(sector, hdr);
            Directory::new(self.geometry.dir_entries).write_back(&sub_file, &mut self.dev)?;
        }
        directory.write_back(&dir_file, &mut self.dev)?;
        free_map.write_back(&self.free_map_file, &mut self.dev)?;
        self.dev.sync_disk()?;
        Ok(())
    }

    /// Opens a file or directory. The empty path (or `/`) opens the root directory.
    pub fn open(&mut self, path: &str) -> Result<OpenFile> {
        debug!("Opening file {}.", path);
        let mut segments = split_path(path);
        let name = match segments.pop() {
            Some(name) => name,
            None => return Ok(self.directory_file.clone()),
        };

        let (directory, _) = self.walk(&segments)?;
        let sector = directory
            .find(name)
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;
        OpenFile::open(&mut self.dev, sector)
    }

    /// Deletes a file or directory and returns its sectors to the free map.
    ///
    /// With `recursive`, everything below a directory is reclaimed first. Without
    /// it a directory is removed like a file: its own sectors are freed but those
    /// of anything still inside it stay allocated.
    pub fn remove(&mut self, path: &str, recursive: bool) -> Result<()> {
        info!("Removing {}{}.", path, if recursive { " recursively" } else { "" });
        let (parents, name) = split_target(path)?;
        let (mut directory, dir_file) = self.walk(&parents)?;
        let entry = directory
            .entry(name)
            .cloned()
            .ok_or_else(|| FsError::NotFound(name.to_string()))?;

        let mut free_map = self.free_map()?;
        if entry.is_dir() {
            let sub = Directory::load(&mut self.dev, entry.sector(), self.geometry.dir_entries)?;
            if recursive {
                sub.recursive_remove(&mut free_map, &mut self.dev)?;
            } else if !sub.is_empty() {
                warn!(
                    "Removing non-empty directory {} without recursion; its entries stay allocated.",
                    path
                );
            }
        }

        let hdr = FileHeader::fetch_from(&mut self.dev, entry.sector())?;
        hdr.deallocate(&mut free_map);
        free_map.clear(entry.sector());
        directory.remove(name)?;

        free_map.write_back(&self.free_map_file, &mut self.dev)?;
        directory.write_back(&dir_file, &mut self.dev)?;
        self.dev.sync_disk()?;
        Ok(())
    }

    /// Lists the directory at `path` in slot order. With `recursive` the listing
    /// descends into every subdirectory, one depth level per nesting.
    pub fn list(&mut self, path: &str, recursive: bool) -> Result<RecursiveList<'_, D>> {
        let segments = split_path(path);
        let (directory, _) = self.walk(&segments)?;
        Ok(RecursiveList::new(&mut self.dev, directory, 0, recursive))
    }

    /// Reads from an open file at its current position.
    pub fn read(&mut self, file: &mut OpenFile, buf: &mut [u8]) -> Result<usize> {
        file.read(&mut self.dev, buf)
    }

    /// Writes to an open file at its current position.
    pub fn write(&mut self, file: &mut OpenFile, buf: &[u8]) -> Result<usize> {
        let written = file.write(&mut self.dev, buf)?;
        self.dev.sync_disk()?;
        Ok(written)
    }

    /// Dumps the bootstrap headers, the free map and the root directory with the
    /// header of every entry in it.
    pub fn print<W: Write>(&mut self, out: &mut W) -> Result<()> {
        writeln!(out, "Bit map file header:")?;
        write!(out, "{}", self.free_map_file.header())?;
        writeln!(out, "Directory file header:")?;
        write!(out, "{}", self.directory_file.header())?;

        let free_map = self.free_map()?;
        write!(out, "{}", free_map)?;

        let directory = self.root()?;
        write!(out, "{}", directory)?;
        for entry in directory.entries() {
            let hdr = FileHeader::fetch_from(&mut self.dev, entry.sector())?;
            write!(out, "{}: {}", entry.name(), hdr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
    use crate::{ListEntry, NUM_SECTORS, SECTOR_SIZE};

    fn create_test_device() -> FileBlockEmulator {
        let dev = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(dev)
            .with_sector_count(NUM_SECTORS)
            .build()
            .expect("Could not initialize disk emulator.")
    }

    fn formatted() -> FileSystem<FileBlockEmulator> {
        FileSystem::format(create_test_device(), Geometry::default()).unwrap()
    }

    fn names(fs: &mut FileSystem<FileBlockEmulator>, path: &str, recursive: bool) -> Vec<String> {
        fs.list(path, recursive)
            .unwrap()
            .map(|e| e.unwrap().name)
            .collect()
    }

    #[test]
    fn format_reserves_bootstrap_sectors() {
        let mut fs = formatted();
        let free_map = fs.free_map().unwrap();

        // Two headers, one bitmap sector, two root directory sectors.
        assert_eq!(free_map.allocated().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(names(&mut fs, "/", false).is_empty());
    }

    #[test]
    fn create_allocates_header_then_data() {
        let mut fs = formatted();

        fs.create("/a", 2 * SECTOR_SIZE).unwrap();

        let file = fs.open("/a").unwrap();
        assert_eq!(file.header_sector(), 5);
        assert_eq!(file.header().sectors(), &[6, 7]);
        assert_eq!(fs.free_map().unwrap().num_clear(), NUM_SECTORS - 8);
    }

    #[test]
    fn path_resolution_through_subdirectories() {
        let mut fs = formatted();
        fs.create_directory("/a").unwrap();
        fs.create("/a/b", 100).unwrap();

        assert!(matches!(fs.create("/a/b", 50), Err(FsError::AlreadyExists(_))));
        assert_eq!(fs.open("/a/b").unwrap().length(), 100);
        assert!(matches!(fs.open("/a/c"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.create("/x/y", 10), Err(FsError::NotFound(_))));
        assert!(matches!(
            fs.create("/a/b/c", 10),
            Err(FsError::NotADirectory(_))
        ));
    }

    #[test]
    fn failed_create_leaves_disk_untouched() {
        let mut fs = formatted();
        let before = fs.free_map().unwrap();

        assert!(matches!(
            fs.create("/big", crate::MAX_FILE_SIZE + 1),
            Err(FsError::FileTooLarge(_))
        ));
        assert!(matches!(fs.create("/toolongname", 10), Err(FsError::NameTooLong(_))));

        assert!(fs.free_map().unwrap() == before);
        assert!(names(&mut fs, "/", false).is_empty());
    }

    #[test]
    fn root_paths_are_not_valid_targets() {
        let mut fs = formatted();
        assert!(matches!(fs.create("/", 10), Err(FsError::InvalidPath(_))));
        assert!(matches!(fs.remove("", false), Err(FsError::InvalidPath(_))));
        assert_eq!(fs.open("/").unwrap().header_sector(), ROOT_DIR_SECTOR);
    }

    #[test]
    fn subdirectories_start_empty() {
        let mut fs = formatted();
        fs.create_directory("/d").unwrap();
        fs.create_directory("/d/e").unwrap();

        assert!(names(&mut fs, "/d/e", false).is_empty());
        assert_eq!(names(&mut fs, "/d", false), vec!["e"]);
    }

    #[test]
    fn remove_reclaims_file_sectors() {
        let mut fs = formatted();
        let before = fs.free_map().unwrap();
        fs.create("/f", 3 * SECTOR_SIZE).unwrap();

        fs.remove("/f", false).unwrap();

        assert!(fs.free_map().unwrap() == before);
        assert!(matches!(fs.open("/f"), Err(FsError::NotFound(_))));
        assert!(matches!(fs.remove("/f", false), Err(FsError::NotFound(_))));
    }

    #[test]
    fn recursive_remove_reclaims_subtree() {
        let mut fs = formatted();
        let before = fs.free_map().unwrap();
        fs.create_directory("/d").unwrap();
        fs.create("/d/f", 20).unwrap();
        fs.create_directory("/d/sub").unwrap();
        fs.create("/d/sub/g", 10).unwrap();

        fs.remove("/d", true).unwrap();

        assert!(fs.free_map().unwrap() == before);
        assert!(names(&mut fs, "/", false).is_empty());
    }

    #[test]
    fn plain_remove_of_directory_orphans_its_contents() {
        let mut fs = formatted();
        fs.create_directory("/d").unwrap();
        fs.create("/d/f", 20).unwrap();
        let f_sectors = {
            let f = fs.open("/d/f").unwrap();
            let mut sectors = f.header().sectors().to_vec();
            sectors.push(f.header_sector());
            sectors
        };

        fs.remove("/d", false).unwrap();

        let free_map = fs.free_map().unwrap();
        assert!(names(&mut fs, "/", false).is_empty());
        assert!(f_sectors.iter().all(|&s| free_map.is_set(s)));
    }

    #[test]
    fn recursive_list_reports_depth() {
        let mut fs = formatted();
        fs.create_directory("/d").unwrap();
        fs.create("/d/f", 20).unwrap();
        fs.create_directory("/d/sub").unwrap();
        fs.create("/d/sub/g", 10).unwrap();
        fs.create("/top", 1).unwrap();

        let listed: Vec<ListEntry> = fs
            .list("/", true)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let shape: Vec<(&str, usize, bool)> = listed
            .iter()
            .map(|e| (e.name.as_str(), e.depth, e.is_dir))
            .collect();

        assert_eq!(
            shape,
            vec![
                ("d", 0, true),
                ("f", 1, false),
                ("sub", 1, true),
                ("g", 2, false),
                ("top", 0, false),
            ]
        );
        assert_eq!(names(&mut fs, "/d", false), vec!["f", "sub"]);
    }

    #[test]
    fn listing_a_file_is_an_error() {
        let mut fs = formatted();
        fs.create("/f", 1).unwrap();
        assert!(matches!(fs.list("/f", false), Err(FsError::NotADirectory(_))));
        assert!(matches!(fs.list("/nope", false), Err(FsError::NotFound(_))));
    }

    #[test]
    fn file_contents_survive_reopen() {
        let mut fs = formatted();
        fs.create_directory("/docs").unwrap();
        fs.create("/docs/note", 300).unwrap();

        let mut file = fs.open("/docs/note").unwrap();
        let text = vec![b'z'; 300];
        assert_eq!(fs.write(&mut file, &text).unwrap(), 300);

        let mut again = fs.open("/docs/note").unwrap();
        let mut buf = vec![0; 400];
        assert_eq!(fs.read(&mut again, &mut buf).unwrap(), 300);
        assert_eq!(&buf[..300], &text[..]);
    }

    #[test]
    fn print_dumps_bootstrap_state() {
        let mut fs = formatted();
        fs.create("/a", 10).unwrap();

        let mut out = Vec::new();
        fs.print(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.starts_with("Bit map file header:\nFileHeader contents.  File size: 128."));
        assert!(out.contains("Bitmap set: 0, 1, 2, 3, 4, 5, 6,"));
        assert!(out.contains("Name: a, Sector: 5, file"));
    }
}

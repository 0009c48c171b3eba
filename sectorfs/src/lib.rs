//! A small hierarchical file system laid out on a flat array of fixed-size sectors.
//!
//! # Layout
//! ======================================================================
//! | Bitmap header (0) | Root dir header (1) | Bitmap | Root dir | Data ... |
//! ======================================================================
//!
//! The free-sector bitmap and the root directory are themselves ordinary files
//! whose headers live at two well-known sectors, so they can be found on mount.
//! Every other file or directory is reached by walking directories from the root.

mod alloc;
mod dir;
mod file;
mod fs;
mod geometry;
pub mod io;
mod node;
mod syscall;

pub use crate::alloc::{Bitmap, State};
pub use crate::dir::{Directory, DirectoryEntry, ListEntry, RecursiveList};
pub use crate::file::OpenFile;
pub use crate::fs::{FileSystem, FsError, Result};
pub use crate::geometry::Geometry;
pub use crate::node::FileHeader;
pub use crate::syscall::{FileTable, Kernel, OpenFileId};

/// Bytes per disk sector.
pub const SECTOR_SIZE: usize = 128;
/// Sectors on the default disk: 32 tracks of 32 sectors.
pub const NUM_SECTORS: usize = 32 * 32;

/// Sector holding the header of the free-sector bitmap file.
pub const FREE_MAP_SECTOR: usize = 0;
/// Sector holding the header of the root directory file.
pub const ROOT_DIR_SECTOR: usize = 1;

/// Default number of entry slots in every directory.
pub const NUM_DIR_ENTRIES: usize = 10;
/// Longest name a directory entry can hold, in bytes.
pub const FILE_NAME_MAX_LEN: usize = 9;

/// Sector numbers that fit in a header after the two length fields.
pub const NUM_DIRECT: usize = (SECTOR_SIZE - 2 * 4) / 4;
/// Largest file a single header can describe.
pub const MAX_FILE_SIZE: usize = NUM_DIRECT * SECTOR_SIZE;

/// Separator between path segments.
pub const PATH_SEPARATOR: char = '/';

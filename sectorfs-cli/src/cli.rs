use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "Inspect and modify a sectorfs disk image")]
pub struct Cli {
    /// Disk image backing the file system
    #[arg(long, short, default_value = "DISK")]
    pub disk: PathBuf,

    /// Sectors on the disk
    #[arg(long, default_value_t = sectorfs::NUM_SECTORS)]
    pub sectors: usize,

    /// Slots in every directory
    #[arg(long, default_value_t = sectorfs::NUM_DIR_ENTRIES)]
    pub dir_entries: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the disk image and write an empty file system onto it
    Format,
    /// Create a file of a fixed size
    Create { path: String, size: usize },
    /// Create an empty directory
    Mkdir { path: String },
    /// Copy a host file into a new file of the same size
    Put { source: PathBuf, path: String },
    /// Print a file's contents
    Cat { path: String },
    /// Remove a file or directory
    Rm {
        /// Remove everything below a directory too
        #[arg(long, short)]
        recursive: bool,
        path: String,
    },
    /// List a directory
    Ls {
        /// Descend into subdirectories
        #[arg(long, short)]
        recursive: bool,
        #[arg(default_value = "/")]
        path: String,
    },
    /// Dump the bitmap and root directory
    Dump,
}

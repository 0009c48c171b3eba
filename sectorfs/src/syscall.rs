use std::collections::BTreeMap;

use log::warn;

use crate::file::OpenFile;
use crate::fs::{FileSystem, FsError, Result};
use crate::io::BlockStorage;

/// Identifies an open file to user programs. Zero is never issued so it can mean
/// failure at the call boundary.
pub type OpenFileId = i32;

/// Open files keyed by the id handed out for them.
#[derive(Debug, Default)]
pub struct FileTable {
    files: BTreeMap<OpenFileId, OpenFile>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `file` under the lowest unused id. Fails when every id is taken.
    pub fn insert(&mut self, file: OpenFile) -> Result<OpenFileId> {
        let id = (1..=OpenFileId::MAX)
            .find(|id| !self.files.contains_key(id))
            .ok_or(FsError::TooManyOpenFiles)?;
        self.files.insert(id, file);
        Ok(id)
    }

    pub fn get_mut(&mut self, id: OpenFileId) -> Result<&mut OpenFile> {
        self.files.get_mut(&id).ok_or(FsError::BadHandle(id))
    }

    pub fn remove(&mut self, id: OpenFileId) -> Result<OpenFile> {
        self.files.remove(&id).ok_or(FsError::BadHandle(id))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// The calls user programs make against the file system. Results are flattened
/// to the plain values a system call returns; the reason for a failure is logged.
pub struct Kernel<D: BlockStorage> {
    fs: FileSystem<D>,
    files: FileTable,
}

impl<D: BlockStorage> Kernel<D> {
    pub fn new(fs: FileSystem<D>) -> Self {
        Self {
            fs,
            files: FileTable::new(),
        }
    }

    pub fn file_system(&mut self) -> &mut FileSystem<D> {
        &mut self.fs
    }

    pub fn open_files(&self) -> &FileTable {
        &self.files
    }

    pub fn into_file_system(self) -> FileSystem<D> {
        self.fs
    }

    /// Returns 1 when the file was created, 0 otherwise.
    pub fn create(&mut self, name: &str, size: usize) -> i32 {
        succeeded("create", name, self.fs.create(name, size)) as i32
    }

    /// Returns 1 when the directory was created, 0 otherwise.
    pub fn create_dir(&mut self, name: &str) -> i32 {
        succeeded("mkdir", name, self.fs.create_directory(name)) as i32
    }

    /// Returns the id of the opened file, or 0 when it cannot be opened.
    pub fn open(&mut self, name: &str) -> OpenFileId {
        match self.fs.open(name).and_then(|file| self.files.insert(file)) {
            Ok(id) => id,
            Err(e) => {
                warn!("open {}: {}", name, e);
                0
            }
        }
    }

    /// Returns the number of bytes read, or -1 on failure.
    pub fn read(&mut self, id: OpenFileId, buf: &mut [u8]) -> i32 {
        let fs = &mut self.fs;
        let result = self.files.get_mut(id).and_then(|file| fs.read(file, buf));
        transferred("read", id, result)
    }

    /// Returns the number of bytes written, or -1 on failure.
    pub fn write(&mut self, id: OpenFileId, buf: &[u8]) -> i32 {
        let fs = &mut self.fs;
        let result = self.files.get_mut(id).and_then(|file| fs.write(file, buf));
        transferred("write", id, result)
    }

    /// Returns 1 when `id` was open, 0 otherwise.
    pub fn close(&mut self, id: OpenFileId) -> i32 {
        succeeded("close", &id.to_string(), self.files.remove(id).map(drop)) as i32
    }

    /// Returns 1 when the entry was removed, 0 otherwise.
    pub fn remove(&mut self, name: &str, recursive: bool) -> i32 {
        succeeded("remove", name, self.fs.remove(name, recursive)) as i32
    }

    /// Renders the listing of `name` one entry per line, subdirectory contents
    /// indented by nesting depth. An unlistable path gives no lines.
    pub fn list(&mut self, name: &str, recursive: bool) -> Vec<String> {
        let lines = self.fs.list(name, recursive).and_then(|entries| {
            entries
                .map(|entry| {
                    entry.map(|e| {
                        format!(
                            "{}[{}] {}",
                            "    ".repeat(e.depth),
                            if e.is_dir { 'D' } else { 'F' },
                            e.name
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()
        });
        match lines {
            Ok(lines) => lines,
            Err(e) => {
                warn!("list {}: {}", name, e);
                Vec::new()
            }
        }
    }
}

fn succeeded(call: &str, target: &str, result: Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!("{} {}: {}", call, target, e);
            false
        }
    }
}

fn transferred(call: &str, id: OpenFileId, result: Result<usize>) -> i32 {
    match result {
        Ok(n) => n as i32,
        Err(e) => {
            warn!("{} on file {}: {}", call, id, e);
            -1
        }
    }
}

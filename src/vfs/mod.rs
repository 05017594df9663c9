//! Virtual File System
//!
//! Every program run gets a fresh sandbox filesystem. Files survive from one
//! command to the next only as `VirtualFile` snapshots: written into the
//! sandbox before a run, collected from it afterwards.
//!
//! Design: trait-based abstraction, keeping it simple.

pub mod memory;

pub use memory::MemoryFs;

use serde::{Deserialize, Serialize};
use std::io;

/// A file handle
pub type FileHandle = usize;

/// File open modes
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
    pub append: bool,
    /// Fail if the file already exists
    pub exclusive: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            create: false,
            truncate: false,
            append: false,
            exclusive: false,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }
}

/// File metadata
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub size: u64,
    pub is_dir: bool,
    pub is_file: bool,
    /// Modification time in milliseconds since epoch
    pub mtime: u64,
}

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// A file carried between runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFile {
    /// Absolute POSIX-style path
    pub path: String,
    /// Milliseconds since epoch of the last modification
    pub timestamp: u64,
    pub bytes: Vec<u8>,
}

impl VirtualFile {
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            timestamp: crate::platform::now_ms(),
            bytes: bytes.into(),
        }
    }

    /// Contents as text, lossy
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// The FileSystem trait - implement this for different backends
pub trait FileSystem {
    /// Open a file, returning a handle
    fn open(&mut self, path: &str, options: OpenOptions) -> io::Result<FileHandle>;

    /// Close a file handle
    fn close(&mut self, handle: FileHandle) -> io::Result<()>;

    /// Read from a file
    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> io::Result<usize>;

    /// Write to a file
    fn write(&mut self, handle: FileHandle, buf: &[u8]) -> io::Result<usize>;

    /// Seek within a file
    fn seek(&mut self, handle: FileHandle, pos: io::SeekFrom) -> io::Result<u64>;

    /// Get file metadata
    fn metadata(&self, path: &str) -> io::Result<Metadata>;

    /// Get metadata for an open file handle
    fn fstat(&self, handle: FileHandle) -> io::Result<Metadata>;

    /// Create a directory
    fn create_dir(&mut self, path: &str) -> io::Result<()>;

    /// Read directory contents, sorted by name
    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>>;

    /// Remove a file
    fn remove_file(&mut self, path: &str) -> io::Result<()>;

    /// Remove an empty directory
    fn remove_dir(&mut self, path: &str) -> io::Result<()>;

    /// Rename/move a file or directory
    fn rename(&mut self, from: &str, to: &str) -> io::Result<()>;

    /// Check if path exists
    fn exists(&self, path: &str) -> bool;
}

/// Normalize a path: absolute, `.`/`..` resolved, no trailing slash
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            part => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Join a (possibly relative) path onto a base directory and normalize
pub fn join_path(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize_path(path)
    } else {
        normalize_path(&format!("{}/{}", base, path))
    }
}

/// Convenience wrapper for reading an entire file
pub fn read_file<F: FileSystem>(fs: &mut F, path: &str) -> io::Result<Vec<u8>> {
    let meta = fs.metadata(path)?;
    let handle = fs.open(path, OpenOptions::new().read(true))?;
    let mut buf = vec![0u8; meta.size as usize];
    let result = fs.read(handle, &mut buf);
    fs.close(handle)?;
    let n = result?;
    buf.truncate(n);
    Ok(buf)
}

/// Convenience wrapper for replacing a file's contents
pub fn write_file<F: FileSystem>(fs: &mut F, path: &str, content: &[u8]) -> io::Result<()> {
    let handle = fs.open(
        path,
        OpenOptions::new().write(true).create(true).truncate(true),
    )?;
    let result = fs.write(handle, content);
    fs.close(handle)?;
    result.map(|_| ())
}

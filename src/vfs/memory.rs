//! In-memory filesystem implementation
//!
//! Simple, fast, ephemeral. One instance backs exactly one program run:
//! it is seeded from the caller's `VirtualFile` snapshot and walked again
//! when the program is done.

use super::{DirEntry, FileHandle, FileSystem, Metadata, OpenOptions, VirtualFile, normalize_path};
use crate::platform::now_ms;
use slab::Slab;
use std::collections::BTreeMap;
use std::io::{self, SeekFrom};

/// Character devices that can be mounted into the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Stdin,
    Stdout,
    Stderr,
    /// Combined interactive device: reads from stdin, writes to stdout
    Tty,
}

/// A file's contents and position
struct OpenFile {
    path: String,
    position: u64,
    readable: bool,
    writable: bool,
    append: bool,
}

/// A stored file, directory or device
#[derive(Clone)]
enum Node {
    File { data: Vec<u8>, mtime: u64 },
    Directory { mtime: u64 },
    Device(Device),
}

/// In-memory filesystem
pub struct MemoryFs {
    /// All nodes, keyed by normalized path
    nodes: BTreeMap<String, Node>,
    /// Open file handles
    handles: Slab<OpenFile>,
}

fn not_found(what: &str, path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{} not found: {}", what, path))
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.to_string())
}

impl MemoryFs {
    pub fn new() -> Self {
        let mut fs = Self {
            nodes: BTreeMap::new(),
            handles: Slab::new(),
        };
        // Root directory always exists
        fs.nodes
            .insert("/".to_string(), Node::Directory { mtime: now_ms() });
        fs
    }

    /// Get parent directory of a normalized path
    fn parent_path(path: &str) -> Option<String> {
        if path == "/" {
            return None;
        }
        let idx = path.rfind('/')?;
        if idx == 0 {
            Some("/".to_string())
        } else {
            Some(path[..idx].to_string())
        }
    }

    /// Ensure the parent directory exists
    fn ensure_parent(&self, path: &str) -> io::Result<()> {
        if let Some(parent) = Self::parent_path(path) {
            match self.nodes.get(&parent) {
                Some(Node::Directory { .. }) => {}
                Some(_) => return Err(invalid("parent is not a directory")),
                None => return Err(not_found("parent directory", &parent)),
            }
        }
        Ok(())
    }

    /// Prefix under which the children of `path` are stored
    fn child_prefix(path: &str) -> String {
        if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        }
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = Self::child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .any(|(p, _)| p != path)
    }

    /// Create a directory and all missing parents
    pub fn create_dir_all(&mut self, path: &str) -> io::Result<()> {
        let path = normalize_path(path);
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            match self.nodes.get(&current) {
                Some(Node::Directory { .. }) => {}
                Some(_) => return Err(invalid("path component is not a directory")),
                None => {
                    self.nodes
                        .insert(current.clone(), Node::Directory { mtime: now_ms() });
                }
            }
        }
        Ok(())
    }

    /// Mount a character device at `path` (parents are created)
    pub fn mount_device(&mut self, path: &str, device: Device) -> io::Result<()> {
        let path = normalize_path(path);
        if let Some(parent) = Self::parent_path(&path) {
            self.create_dir_all(&parent)?;
        }
        self.nodes.insert(path, Node::Device(device));
        Ok(())
    }

    /// Device mounted at `path`, if any
    pub fn device(&self, path: &str) -> Option<Device> {
        match self.nodes.get(&normalize_path(path)) {
            Some(Node::Device(device)) => Some(*device),
            _ => None,
        }
    }

    /// Resolved path of an open handle
    pub fn handle_path(&self, handle: FileHandle) -> io::Result<String> {
        self.handles
            .get(handle)
            .map(|f| f.path.clone())
            .ok_or_else(|| invalid("Invalid file handle"))
    }

    /// Resize an open file, zero-filling when growing
    pub fn set_len(&mut self, handle: FileHandle, size: u64) -> io::Result<()> {
        let path = self.handle_path(handle)?;
        match self.nodes.get_mut(&path) {
            Some(Node::File { data, mtime }) => {
                data.resize(size as usize, 0);
                *mtime = now_ms();
                Ok(())
            }
            _ => Err(not_found("File", &path)),
        }
    }

    /// Write a snapshot into the tree, creating parent directories.
    ///
    /// Files that cannot be written (e.g. a directory sits at the path) are
    /// logged and skipped.
    pub fn load(&mut self, files: &[VirtualFile]) {
        for file in files {
            let path = normalize_path(&file.path);
            let result = Self::parent_path(&path)
                .map_or(Ok(()), |parent| self.create_dir_all(&parent))
                .and_then(|()| match self.nodes.get(&path) {
                    Some(Node::Directory { .. }) | Some(Node::Device(_)) => {
                        Err(invalid("not a regular file"))
                    }
                    _ => Ok(()),
                });

            match result {
                Ok(()) => {
                    self.nodes.insert(
                        path,
                        Node::File {
                            data: file.bytes.clone(),
                            mtime: file.timestamp,
                        },
                    );
                }
                Err(e) => crate::console_log!("[vfs] skipping {}: {}", file.path, e),
            }
        }
    }

    /// Full snapshot of all regular files, sorted by path.
    ///
    /// Paths in `exclude` are left out.
    pub fn snapshot(&self, exclude: &[&str]) -> Vec<VirtualFile> {
        self.nodes
            .iter()
            .filter(|(path, _)| !exclude.contains(&path.as_str()))
            .filter_map(|(path, node)| match node {
                Node::File { data, mtime } => Some(VirtualFile {
                    path: path.clone(),
                    timestamp: *mtime,
                    bytes: data.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemoryFs {
    fn open(&mut self, path: &str, options: OpenOptions) -> io::Result<FileHandle> {
        let path = normalize_path(path);

        match self.nodes.get_mut(&path) {
            None if !options.create => return Err(not_found("File", &path)),
            None => {
                self.ensure_parent(&path)?;
                self.nodes.insert(
                    path.clone(),
                    Node::File {
                        data: Vec::new(),
                        mtime: now_ms(),
                    },
                );
            }
            Some(_) if options.create && options.exclusive => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("File exists: {}", path),
                ));
            }
            Some(Node::Directory { .. }) => {
                return Err(io::Error::new(
                    io::ErrorKind::IsADirectory,
                    "Cannot open directory as file",
                ));
            }
            Some(Node::Device(_)) => return Err(invalid("Cannot open device as file")),
            Some(Node::File { data, mtime }) => {
                if options.truncate {
                    data.clear();
                    *mtime = now_ms();
                }
            }
        }

        let handle = self.handles.insert(OpenFile {
            path,
            position: 0,
            readable: options.read,
            writable: options.write || options.append,
            append: options.append,
        });

        Ok(handle)
    }

    fn close(&mut self, handle: FileHandle) -> io::Result<()> {
        if self.handles.contains(handle) {
            self.handles.remove(handle);
            Ok(())
        } else {
            Err(invalid("Invalid file handle"))
        }
    }

    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> io::Result<usize> {
        let file = self
            .handles
            .get_mut(handle)
            .ok_or_else(|| invalid("Invalid file handle"))?;

        if !file.readable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "File not opened for reading",
            ));
        }

        let data = match self.nodes.get(&file.path) {
            Some(Node::File { data, .. }) => data,
            _ => return Err(not_found("File", &file.path)),
        };

        let position = (file.position as usize).min(data.len());
        let to_read = buf.len().min(data.len() - position);
        buf[..to_read].copy_from_slice(&data[position..position + to_read]);
        file.position += to_read as u64;

        Ok(to_read)
    }

    fn write(&mut self, handle: FileHandle, buf: &[u8]) -> io::Result<usize> {
        let file = self
            .handles
            .get_mut(handle)
            .ok_or_else(|| invalid("Invalid file handle"))?;

        if !file.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "File not opened for writing",
            ));
        }

        let (data, mtime) = match self.nodes.get_mut(&file.path) {
            Some(Node::File { data, mtime }) => (data, mtime),
            _ => return Err(not_found("File", &file.path)),
        };

        if file.append {
            file.position = data.len() as u64;
        }
        let position = file.position as usize;

        // Extend file if necessary
        if position + buf.len() > data.len() {
            data.resize(position + buf.len(), 0);
        }
        data[position..position + buf.len()].copy_from_slice(buf);
        *mtime = now_ms();
        file.position += buf.len() as u64;

        Ok(buf.len())
    }

    fn seek(&mut self, handle: FileHandle, pos: SeekFrom) -> io::Result<u64> {
        let file = self
            .handles
            .get_mut(handle)
            .ok_or_else(|| invalid("Invalid file handle"))?;

        let size = match self.nodes.get(&file.path) {
            Some(Node::File { data, .. }) => data.len() as i64,
            _ => return Err(not_found("File", &file.path)),
        };

        let new_pos = match pos {
            SeekFrom::Start(n) => Some(n as i64),
            SeekFrom::End(n) => size.checked_add(n),
            SeekFrom::Current(n) => (file.position as i64).checked_add(n),
        };

        match new_pos {
            Some(p) if p >= 0 => {
                file.position = p as u64;
                Ok(file.position)
            }
            _ => Err(invalid("Seek to a negative position")),
        }
    }

    fn metadata(&self, path: &str) -> io::Result<Metadata> {
        let path = normalize_path(path);

        match self.nodes.get(&path) {
            Some(Node::File { data, mtime }) => Ok(Metadata {
                size: data.len() as u64,
                is_dir: false,
                is_file: true,
                mtime: *mtime,
            }),
            Some(Node::Directory { mtime }) => Ok(Metadata {
                size: 0,
                is_dir: true,
                is_file: false,
                mtime: *mtime,
            }),
            Some(Node::Device(_)) => Ok(Metadata::default()),
            None => Err(not_found("Path", &path)),
        }
    }

    fn fstat(&self, handle: FileHandle) -> io::Result<Metadata> {
        let path = self.handle_path(handle)?;
        self.metadata(&path)
    }

    fn create_dir(&mut self, path: &str) -> io::Result<()> {
        let path = normalize_path(path);

        if self.nodes.contains_key(&path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "Path already exists",
            ));
        }

        self.ensure_parent(&path)?;
        self.nodes.insert(path, Node::Directory { mtime: now_ms() });
        Ok(())
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let path = normalize_path(path);

        match self.nodes.get(&path) {
            Some(Node::Directory { .. }) => {}
            Some(_) => return Err(invalid("Not a directory")),
            None => return Err(not_found("Directory", &path)),
        }

        let prefix = Self::child_prefix(&path);
        let entries = self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter_map(|(p, node)| {
                let relative = &p[prefix.len()..];
                if relative.is_empty() || relative.contains('/') {
                    return None; // self or not a direct child
                }
                Some(DirEntry {
                    name: relative.to_string(),
                    is_dir: matches!(node, Node::Directory { .. }),
                })
            })
            .collect();

        Ok(entries)
    }

    fn remove_file(&mut self, path: &str) -> io::Result<()> {
        let path = normalize_path(path);

        match self.nodes.get(&path) {
            Some(Node::File { .. }) => {
                self.nodes.remove(&path);
                Ok(())
            }
            Some(Node::Directory { .. }) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                "Cannot remove directory with remove_file",
            )),
            Some(Node::Device(_)) => Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "Cannot remove device",
            )),
            None => Err(not_found("File", &path)),
        }
    }

    fn remove_dir(&mut self, path: &str) -> io::Result<()> {
        let path = normalize_path(path);

        if path == "/" {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "Cannot remove root directory",
            ));
        }

        match self.nodes.get(&path) {
            Some(Node::Directory { .. }) => {
                if self.has_children(&path) {
                    return Err(io::Error::new(
                        io::ErrorKind::DirectoryNotEmpty,
                        "Directory not empty",
                    ));
                }
                self.nodes.remove(&path);
                Ok(())
            }
            Some(_) => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                "Not a directory",
            )),
            None => Err(not_found("Directory", &path)),
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        let from = normalize_path(from);
        let to = normalize_path(to);

        if from == to {
            return Ok(());
        }
        if !self.nodes.contains_key(&from) {
            return Err(not_found("Path", &from));
        }
        if to.starts_with(&Self::child_prefix(&from)) {
            return Err(invalid("Cannot move a directory into itself"));
        }
        self.ensure_parent(&to)?;
        if let Some(Node::Directory { .. }) = self.nodes.get(&to) {
            if self.has_children(&to) {
                return Err(io::Error::new(
                    io::ErrorKind::DirectoryNotEmpty,
                    "Target directory not empty",
                ));
            }
        }

        // Move the node and everything below it
        let prefix = Self::child_prefix(&from);
        let moved: Vec<String> = self
            .nodes
            .keys()
            .filter(|p| **p == from || p.starts_with(&prefix))
            .cloned()
            .collect();

        for old in moved {
            if let Some(node) = self.nodes.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                self.nodes.insert(new, node);
            }
        }

        // Keep open handles pointing at the moved files
        for (_, file) in self.handles.iter_mut() {
            if file.path == from || file.path.starts_with(&prefix) {
                file.path = format!("{}{}", to, &file.path[from.len()..]);
            }
        }

        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(&normalize_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{read_file, write_file};

    // ============ File Operations ============

    #[test]
    fn test_basic_file_ops() {
        let mut fs = MemoryFs::new();

        let handle = fs
            .open("/test.txt", OpenOptions::new().write(true).create(true))
            .unwrap();
        fs.write(handle, b"hello world").unwrap();
        fs.close(handle).unwrap();

        let handle = fs.open("/test.txt", OpenOptions::new().read(true)).unwrap();
        let mut buf = [0u8; 11];
        let n = fs.read(handle, &mut buf).unwrap();
        assert_eq!(n, 11);
        assert_eq!(&buf, b"hello world");
        fs.close(handle).unwrap();
    }

    #[test]
    fn test_append_mode() {
        let mut fs = MemoryFs::new();
        write_file(&mut fs, "/log", b"a").unwrap();

        let handle = fs.open("/log", OpenOptions::new().append(true)).unwrap();
        fs.write(handle, b"b").unwrap();
        fs.close(handle).unwrap();

        assert_eq!(read_file(&mut fs, "/log").unwrap(), b"ab");
    }

    #[test]
    fn test_exclusive_create_fails_on_existing() {
        let mut fs = MemoryFs::new();
        write_file(&mut fs, "/x", b"1").unwrap();
        let result = fs.open("/x", OpenOptions::new().create(true).exclusive(true));
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_open_without_parent_fails() {
        let mut fs = MemoryFs::new();
        let result = fs.open("/missing/x", OpenOptions::new().write(true).create(true));
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_seek_negative_rejected() {
        let mut fs = MemoryFs::new();
        write_file(&mut fs, "/x", b"abc").unwrap();
        let handle = fs.open("/x", OpenOptions::new()).unwrap();
        assert_eq!(fs.seek(handle, SeekFrom::End(-1)).unwrap(), 2);
        assert!(fs.seek(handle, SeekFrom::Current(-5)).is_err());
    }

    // ============ Directories ============

    #[test]
    fn test_read_dir_direct_children_sorted() {
        let mut fs = MemoryFs::new();
        fs.create_dir_all("/a/b").unwrap();
        write_file(&mut fs, "/a/z.txt", b"").unwrap();
        write_file(&mut fs, "/a/b/deep.txt", b"").unwrap();

        let names: Vec<_> = fs
            .read_dir("/a")
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["b", "z.txt"]);
    }

    #[test]
    fn test_remove_dir_requires_empty() {
        let mut fs = MemoryFs::new();
        fs.create_dir_all("/d").unwrap();
        write_file(&mut fs, "/d/f", b"").unwrap();
        assert!(fs.remove_dir("/d").is_err());
        fs.remove_file("/d/f").unwrap();
        fs.remove_dir("/d").unwrap();
        assert!(!fs.exists("/d"));
    }

    #[test]
    fn test_rename_moves_subtree() {
        let mut fs = MemoryFs::new();
        fs.create_dir_all("/src/inner").unwrap();
        write_file(&mut fs, "/src/inner/f", b"x").unwrap();

        fs.rename("/src", "/dst").unwrap();
        assert!(!fs.exists("/src"));
        assert_eq!(read_file(&mut fs, "/dst/inner/f").unwrap(), b"x");
    }

    #[test]
    fn test_rename_into_itself_rejected() {
        let mut fs = MemoryFs::new();
        fs.create_dir_all("/a").unwrap();
        assert!(fs.rename("/a", "/a/b").is_err());
    }

    // ============ Snapshots ============

    #[test]
    fn test_load_creates_parents_and_keeps_timestamp() {
        let mut fs = MemoryFs::new();
        let file = VirtualFile {
            path: "/home/user/notes.txt".to_string(),
            timestamp: 42,
            bytes: b"note".to_vec(),
        };
        fs.load(std::slice::from_ref(&file));

        assert!(fs.metadata("/home/user").unwrap().is_dir);
        assert_eq!(fs.snapshot(&[]), vec![file]);
    }

    #[test]
    fn test_snapshot_skips_devices_and_excluded() {
        let mut fs = MemoryFs::new();
        fs.mount_device("/dev/tty", Device::Tty).unwrap();
        write_file(&mut fs, "/dev/stdout", b"not a device").unwrap();
        write_file(&mut fs, "/b.txt", b"b").unwrap();
        write_file(&mut fs, "/a.txt", b"a").unwrap();

        let paths: Vec<_> = fs
            .snapshot(&["/dev/stdout"])
            .into_iter()
            .map(|f| f.path)
            .collect();
        assert_eq!(paths, vec!["/a.txt", "/b.txt"]);
        assert_eq!(fs.device("/dev/tty"), Some(Device::Tty));
    }

    #[test]
    fn test_load_skips_directory_collision() {
        let mut fs = MemoryFs::new();
        fs.create_dir_all("/taken").unwrap();
        fs.load(&[VirtualFile::new("/taken", b"x".to_vec())]);
        assert!(fs.metadata("/taken").unwrap().is_dir);
    }
}

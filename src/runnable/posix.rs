//! POSIX-subset program ABI
//!
//! A module targeting this ABI imports a small syscall table from the
//! `env` namespace and exports its linear memory plus an entry point.
//!
//! ## Required Exports
//!
//! | Export   | Type                             | Description                    |
//! |----------|----------------------------------|--------------------------------|
//! | `memory` | Memory                           | Linear memory for data exchange|
//! | `main`   | `(argc: i32, argv: i32) -> i32`  | Entry point, returns exit code |
//!
//! Modules without `main` may export `_start` instead; they receive no
//! arguments and exit with 0 unless they call `exit`.
//!
//! ## Syscall Imports
//!
//! ```text
//! read(fd, buf_ptr, len) -> i32            bytes read, 0 = EOF
//! write(fd, buf_ptr, len) -> i32           bytes written
//! open(path_ptr, path_len, flags) -> i32   fd >= 3
//!   flags: 0 = read, 1 = write, 2 = read+write, 4 = create, 8 = truncate, 16 = append
//! close(fd) -> i32
//! seek(fd, offset: i64, whence) -> i64     0 = set, 1 = current, 2 = end
//! stat(path_ptr, path_len, stat_buf) -> i32
//!   stat_buf is 32 bytes: size u32, is_dir u32, mtime u64, ctime u64, reserved u64
//! mkdir(path_ptr, path_len) -> i32
//! readdir(path_ptr, path_len, buf_ptr, buf_len) -> i32
//!   null-terminated names, concatenated; returns bytes written
//! rmdir(path_ptr, path_len) -> i32
//! unlink(path_ptr, path_len) -> i32
//! rename(from_ptr, from_len, to_ptr, to_len) -> i32
//! exit(code)                               never returns
//! getenv(name_ptr, name_len, buf_ptr, buf_len) -> i32   0 = not found
//! getcwd(buf_ptr, buf_len) -> i32
//! ```
//!
//! Negative return values are [`Errno`] codes.
//!
//! ## Memory Layout for Arguments
//!
//! argv strings and the pointer array are written just below the end of
//! linear memory before `main` is called:
//!
//! ```text
//! Example for "cat file.txt" at some address A:
//!   A+0:  "cat\0"         (4 bytes)
//!   A+4:  "file.txt\0"    (9 bytes)
//!   A+13: ptr to A+0      (i32) <- argv points here
//!   A+17: ptr to A+4      (i32)
//!   A+21: 0               (null terminator)
//! ```

use super::stdin::{StdinPolicy, StdinSource};
use super::{RunHandler, RunRequest, default_env, report};
use crate::vfs::{FileHandle, FileSystem, MemoryFs, Metadata, OpenOptions, join_path};
use crate::wasm::{
    CompiledModule, EntryCall, Engine, GuestMemory, HostAbi, HostTrap, HostVal, ImportSig,
    ValKind, WasmError, WasmResult,
};
use bytemuck::{Pod, Zeroable};
use slab::Slab;
use std::cell::RefCell;
use std::io::{self, SeekFrom};
use std::rc::Rc;

/// Import module namespace
pub const IMPORT_NAMESPACE: &str = "env";

/// Standard file descriptors
pub mod fd {
    pub const STDIN: i32 = 0;
    pub const STDOUT: i32 = 1;
    pub const STDERR: i32 = 2;
    /// First descriptor handed out by `open`
    pub const FIRST_FILE: i32 = 3;
}

const I: ValKind = ValKind::I32;

const fn env(name: &'static str, params: &'static [ValKind], result: Option<ValKind>) -> ImportSig {
    ImportSig {
        module: IMPORT_NAMESPACE,
        name,
        params,
        result,
    }
}

const IMPORTS: &[ImportSig] = &[
    env("read", &[I, I, I], Some(I)),
    env("write", &[I, I, I], Some(I)),
    env("open", &[I, I, I], Some(I)),
    env("close", &[I], Some(I)),
    env("seek", &[I, ValKind::I64, I], Some(ValKind::I64)),
    env("exit", &[I], None),
    env("getenv", &[I, I, I, I], Some(I)),
    env("getcwd", &[I, I], Some(I)),
    env("stat", &[I, I, I], Some(I)),
    env("mkdir", &[I, I], Some(I)),
    env("readdir", &[I, I, I, I], Some(I)),
    env("rmdir", &[I, I], Some(I)),
    env("unlink", &[I, I], Some(I)),
    env("rename", &[I, I, I, I], Some(I)),
];

/// Bits of the `open` flag word; 0 opens read-only
mod open_flag {
    pub const WRITE: i32 = 1;
    pub const READ_WRITE: i32 = 2;
    pub const CREATE: i32 = 4;
    pub const TRUNCATE: i32 = 8;
    pub const APPEND: i32 = 16;
}

fn open_options(flags: i32) -> OpenOptions {
    let read_write = flags & open_flag::READ_WRITE != 0;
    let write = read_write || flags & open_flag::WRITE != 0;
    OpenOptions::new()
        .read(read_write || !write)
        .write(write)
        .create(flags & open_flag::CREATE != 0)
        .truncate(flags & open_flag::TRUNCATE != 0)
        .append(flags & open_flag::APPEND != 0)
}

/// Negative syscall results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Errno {
    NotFound = -2,
    PermissionDenied = -3,
    AlreadyExists = -4,
    NotADirectory = -5,
    IsADirectory = -6,
    /// Bad argument, including guest buffers outside linear memory
    InvalidArgument = -7,
    /// The result does not fit the guest buffer
    NoSpace = -8,
    Io = -9,
    BadFd = -10,
    NotEmpty = -11,
}

impl Errno {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<io::Error> for Errno {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::AlreadyExists => Self::AlreadyExists,
            io::ErrorKind::NotADirectory => Self::NotADirectory,
            io::ErrorKind::IsADirectory => Self::IsADirectory,
            io::ErrorKind::InvalidInput => Self::InvalidArgument,
            io::ErrorKind::DirectoryNotEmpty => Self::NotEmpty,
            _ => Self::Io,
        }
    }
}

/// Record written by `stat` (32 bytes, little-endian)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct StatRecord {
    size: u32,
    is_dir: u32,
    /// Unix seconds
    mtime: u64,
    ctime: u64,
    reserved: u64,
}

impl From<&Metadata> for StatRecord {
    fn from(meta: &Metadata) -> Self {
        let seconds = meta.mtime / 1000;
        Self {
            // Saturates past 4 GiB
            size: u32::try_from(meta.size).unwrap_or(u32::MAX),
            is_dir: meta.is_dir.into(),
            mtime: seconds,
            ctime: seconds,
            reserved: 0,
        }
    }
}

/// Bytes needed for [`argv_block`]
fn argv_block_len(args: &[String]) -> usize {
    args.iter().map(|a| a.len() + 1).sum::<usize>() + (args.len() + 1) * 4
}

/// argv for `main`, to be placed at `base`: the NUL-terminated strings,
/// then the pointer array with its null entry. Returns the bytes and argv.
fn argv_block(args: &[String], base: u32) -> (Vec<u8>, u32) {
    let mut bytes = Vec::with_capacity(argv_block_len(args));
    let mut pointers = Vec::with_capacity(args.len() + 1);
    for arg in args {
        pointers.push(base + bytes.len() as u32);
        bytes.extend_from_slice(arg.as_bytes());
        bytes.push(0);
    }
    pointers.push(0);

    let argv = base + bytes.len() as u32;
    for pointer in pointers {
        bytes.extend_from_slice(&pointer.to_le_bytes());
    }
    (bytes, argv)
}

/// A syscall that cannot complete: report an error code or unwind the guest
enum SysFail {
    Errno(Errno),
    Trap(HostTrap),
}

impl From<Errno> for SysFail {
    fn from(err: Errno) -> Self {
        Self::Errno(err)
    }
}

impl From<io::Error> for SysFail {
    fn from(err: io::Error) -> Self {
        Self::Errno(err.into())
    }
}

impl From<WasmError> for SysFail {
    fn from(_: WasmError) -> Self {
        Self::Errno(Errno::InvalidArgument)
    }
}

impl From<HostTrap> for SysFail {
    fn from(trap: HostTrap) -> Self {
        Self::Trap(trap)
    }
}

type SysResult<T> = Result<T, SysFail>;

/// Per-run state behind the syscall table
struct PosixHost<H> {
    handler: H,
    fs: MemoryFs,
    /// Open files; descriptor = key + `fd::FIRST_FILE`
    files: Slab<FileHandle>,
    stdin: StdinSource,
    argv: Vec<String>,
    env: Vec<(String, String)>,
    cwd: String,
}

impl<H: RunHandler> PosixHost<H> {
    fn handle(&self, fd_num: i32) -> SysResult<FileHandle> {
        let key = fd_num
            .checked_sub(fd::FIRST_FILE)
            .filter(|k| *k >= 0)
            .ok_or(Errno::BadFd)?;
        self.files
            .get(key as usize)
            .copied()
            .ok_or(SysFail::Errno(Errno::BadFd))
    }

    fn path(&self, mem: &dyn GuestMemory, ptr: HostVal, len: HostVal) -> SysResult<String> {
        let raw = mem.read_str(ptr.ptr(), len.ptr())?;
        Ok(join_path(&self.cwd, &raw))
    }

    fn sys_read(&mut self, fd_num: i32, ptr: u32, len: u32, mem: &mut dyn GuestMemory) -> SysResult<i32> {
        mem.check(ptr, len)?;
        let data = match fd_num {
            fd::STDIN => self.stdin.read(&mut self.handler, len as usize)?,
            fd::STDOUT | fd::STDERR => return Err(Errno::InvalidArgument.into()),
            _ => {
                let handle = self.handle(fd_num)?;
                let mut buf = vec![0u8; len as usize];
                let n = self.fs.read(handle, &mut buf)?;
                buf.truncate(n);
                buf
            }
        };
        mem.write(ptr, &data)?;
        Ok(data.len() as i32)
    }

    fn sys_write(&mut self, fd_num: i32, ptr: u32, len: u32, mem: &mut dyn GuestMemory) -> SysResult<i32> {
        let data = mem.read(ptr, len)?;
        match fd_num {
            fd::STDOUT => self.handler.stdout(&data),
            fd::STDERR => self.handler.stderr(&data),
            fd::STDIN => return Err(Errno::InvalidArgument.into()),
            _ => {
                let handle = self.handle(fd_num)?;
                self.fs.write(handle, &data)?;
            }
        }
        Ok(data.len() as i32)
    }

    fn sys_open(&mut self, path: &str, flags: i32) -> SysResult<i32> {
        let handle = self.fs.open(path, open_options(flags))?;
        let key = self.files.insert(handle);
        Ok(key as i32 + fd::FIRST_FILE)
    }

    fn sys_close(&mut self, fd_num: i32) -> SysResult<i32> {
        if (fd::STDIN..=fd::STDERR).contains(&fd_num) {
            return Ok(0);
        }
        let handle = self.handle(fd_num)?;
        self.files.remove((fd_num - fd::FIRST_FILE) as usize);
        self.fs.close(handle)?;
        Ok(0)
    }

    fn sys_seek(&mut self, fd_num: i32, offset: i64, whence: i32) -> SysResult<i64> {
        let handle = self.handle(fd_num)?;
        let pos = match whence {
            0 if offset >= 0 => SeekFrom::Start(offset as u64),
            1 => SeekFrom::Current(offset),
            2 => SeekFrom::End(offset),
            _ => return Err(Errno::InvalidArgument.into()),
        };
        Ok(self.fs.seek(handle, pos)? as i64)
    }

    /// Copy `value` into a guest buffer, truncating to its size
    fn copy_out(mem: &mut dyn GuestMemory, ptr: u32, cap: u32, value: &[u8]) -> SysResult<i32> {
        let n = value.len().min(cap as usize);
        mem.write(ptr, &value[..n])?;
        Ok(n as i32)
    }

    fn sys_getenv(&self, name: &str, ptr: u32, cap: u32, mem: &mut dyn GuestMemory) -> SysResult<i32> {
        match self.env.iter().find(|(k, _)| k == name) {
            Some((_, value)) => Self::copy_out(mem, ptr, cap, value.as_bytes()),
            None => Ok(0),
        }
    }

    fn sys_getcwd(&self, ptr: u32, cap: u32, mem: &mut dyn GuestMemory) -> SysResult<i32> {
        if self.cwd.len() > cap as usize {
            return Err(Errno::NoSpace.into());
        }
        Self::copy_out(mem, ptr, cap, self.cwd.as_bytes())
    }

    fn sys_stat(&self, path: &str, ptr: u32, mem: &mut dyn GuestMemory) -> SysResult<i32> {
        let stat = StatRecord::from(&self.fs.metadata(path)?);
        mem.write(ptr, bytemuck::bytes_of(&stat))?;
        Ok(0)
    }

    fn sys_readdir(&self, path: &str, ptr: u32, cap: u32, mem: &mut dyn GuestMemory) -> SysResult<i32> {
        let mut out = Vec::new();
        for entry in self.fs.read_dir(path)? {
            if out.len() + entry.name.len() + 1 > cap as usize {
                break;
            }
            out.extend_from_slice(entry.name.as_bytes());
            out.push(0);
        }
        mem.write(ptr, &out)?;
        Ok(out.len() as i32)
    }

    fn dispatch(&mut self, name: &str, args: &[HostVal], mem: &mut dyn GuestMemory) -> SysResult<HostVal> {
        let arg = |i: usize| args.get(i).copied().unwrap_or(HostVal::I32(0));
        let int = |i: usize| arg(i).i32();
        let ptr = |i: usize| arg(i).ptr();

        let code = match name {
            "read" => self.sys_read(int(0), ptr(1), ptr(2), mem)?,
            "write" => self.sys_write(int(0), ptr(1), ptr(2), mem)?,
            "open" => {
                let path = self.path(mem, arg(0), arg(1))?;
                self.sys_open(&path, int(2))?
            }
            "close" => self.sys_close(int(0))?,
            "seek" => return Ok(HostVal::I64(self.sys_seek(int(0), arg(1).i64(), int(2))?)),
            "exit" => return Err(HostTrap::Exit(int(0)).into()),
            "getenv" => {
                let name = mem.read_str(ptr(0), ptr(1))?;
                self.sys_getenv(&name, ptr(2), ptr(3), mem)?
            }
            "getcwd" => self.sys_getcwd(ptr(0), ptr(1), mem)?,
            "stat" => {
                let path = self.path(mem, arg(0), arg(1))?;
                self.sys_stat(&path, ptr(2), mem)?
            }
            "mkdir" => {
                let path = self.path(mem, arg(0), arg(1))?;
                self.fs.create_dir(&path)?;
                0
            }
            "readdir" => {
                let path = self.path(mem, arg(0), arg(1))?;
                self.sys_readdir(&path, ptr(2), ptr(3), mem)?
            }
            "rmdir" => {
                let path = self.path(mem, arg(0), arg(1))?;
                self.fs.remove_dir(&path)?;
                0
            }
            "unlink" => {
                let path = self.path(mem, arg(0), arg(1))?;
                self.fs.remove_file(&path)?;
                0
            }
            "rename" => {
                let from = self.path(mem, arg(0), arg(1))?;
                let to = self.path(mem, arg(2), arg(3))?;
                self.fs.rename(&from, &to)?;
                0
            }
            _ => return Err(HostTrap::Fault(format!("unknown syscall {}", name)).into()),
        };
        Ok(HostVal::I32(code))
    }
}

impl<H: RunHandler> HostAbi for PosixHost<H> {
    fn imports(&self) -> &'static [ImportSig] {
        IMPORTS
    }

    fn call(
        &mut self,
        index: usize,
        args: &[HostVal],
        mem: &mut dyn GuestMemory,
    ) -> Result<Option<HostVal>, HostTrap> {
        let sig = IMPORTS
            .get(index)
            .ok_or_else(|| HostTrap::Fault(format!("no syscall #{}", index)))?;

        match self.dispatch(sig.name, args, mem) {
            Ok(value) => Ok(Some(value)),
            Err(SysFail::Errno(err)) => Ok(Some(match sig.result {
                Some(ValKind::I64) => HostVal::I64(err.code() as i64),
                _ => HostVal::I32(err.code()),
            })),
            Err(SysFail::Trap(trap)) => Err(trap),
        }
    }

    fn entry(
        &mut self,
        has_export: &dyn Fn(&str) -> bool,
        mem: &mut dyn GuestMemory,
    ) -> WasmResult<EntryCall> {
        if !has_export("main") {
            return if has_export("_start") {
                Ok(EntryCall {
                    name: "_start",
                    args: vec![],
                })
            } else {
                Err(WasmError::MissingExport { name: "main" })
            };
        }

        let total = argv_block_len(&self.argv);
        let size = mem.size();

        if size == 0 {
            return Err(WasmError::MissingExport { name: "memory" });
        }
        if total > size {
            return Err(WasmError::MemoryAccessOutOfBounds {
                address: 0,
                size: total as u32,
                memory_size: size as u32,
            });
        }

        // Keep the block 16-byte aligned
        let base = ((size - total) & !15) as u32;
        let (bytes, argv) = argv_block(&self.argv, base);
        mem.write(base, &bytes)?;

        Ok(EntryCall {
            name: "main",
            args: vec![HostVal::I32(self.argv.len() as i32), HostVal::I32(argv as i32)],
        })
    }
}

/// Runs modules built against the POSIX-subset ABI
#[derive(Clone)]
pub struct PosixRunnable {
    engine: Engine,
    module: CompiledModule,
}

impl PosixRunnable {
    pub fn new(engine: Engine, module: CompiledModule) -> Self {
        Self { engine, module }
    }

    pub fn run<H: RunHandler + 'static>(&self, request: RunRequest, handler: H) {
        let mut fs = MemoryFs::new();
        fs.load(&request.files);

        let host = Rc::new(RefCell::new(PosixHost {
            handler,
            fs,
            files: Slab::new(),
            stdin: StdinSource::new(StdinPolicy::Stream, request.stdin.clone()),
            argv: request.argv(),
            env: default_env(),
            cwd: "/".to_string(),
        }));

        let outcome = self.engine.execute(&self.module, Rc::clone(&host));

        let mut guard = host.borrow_mut();
        let state = &mut *guard;
        let files = state.fs.snapshot(&[]);
        report(&mut state.handler, outcome, files);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::{AbiKind, HeadlessOutput, RunError, Runnable};
    use futures::executor::block_on;

    fn headless(wat: &str, stdin: Option<&str>) -> HeadlessOutput {
        let engine = Engine::new().unwrap();
        let module = block_on(engine.compile(&wat::parse_str(wat).unwrap())).unwrap();
        let request = RunRequest::new("prog", vec![]).with_stdin(stdin.map(str::to_string));
        Runnable::new(engine, module, AbiKind::Posix, None).run_headless(request)
    }

    /// Copies one read of stdin to stdout, returns the size of the next read
    const READ_TWICE: &str = r#"(module
        (import "env" "read" (func $read (param i32 i32 i32) (result i32)))
        (import "env" "write" (func $write (param i32 i32 i32) (result i32)))
        (memory (export "memory") 1)
        (func (export "main") (param i32 i32) (result i32)
            (drop (call $write (i32.const 1) (i32.const 64)
                (call $read (i32.const 0) (i32.const 64) (i32.const 256))))
            (call $read (i32.const 0) (i32.const 64) (i32.const 256))))"#;

    /// Writes "hello" to notes.txt, returns the first failing result
    const WRITE_NOTES: &str = r#"(module
        (import "env" "open" (func $open (param i32 i32 i32) (result i32)))
        (import "env" "write" (func $write (param i32 i32 i32) (result i32)))
        (import "env" "close" (func $close (param i32) (result i32)))
        (memory (export "memory") 1)
        (data (i32.const 100) "notes.txt")
        (data (i32.const 120) "hello")
        (func (export "main") (param i32 i32) (result i32)
            (local $fd i32)
            (local.set $fd (call $open (i32.const 100) (i32.const 9) (i32.const 5)))
            (if (i32.lt_s (local.get $fd) (i32.const 0)) (then (return (local.get $fd))))
            (drop (call $write (local.get $fd) (i32.const 120) (i32.const 5)))
            (call $close (local.get $fd))))"#;

    /// Reads into a buffer that runs past the end of memory
    const OVERSIZE_READ: &str = r#"(module
        (import "env" "read" (func $read (param i32 i32 i32) (result i32)))
        (memory (export "memory") 1)
        (func (export "main") (param i32 i32) (result i32)
            (call $read (i32.const 0) (i32.const 64) (i32.const 0x7fffffff))))"#;

    // ============ Stdin ============

    #[test]
    fn test_preset_stdin_then_eof() {
        let out = headless(READ_TWICE, Some("ab"));
        assert_eq!(out.stdout, "ab\n");
        assert_eq!(out.error, None);
    }

    #[test]
    fn test_read_past_memory_is_invalid_argument() {
        let out = headless(OVERSIZE_READ, Some("ab"));
        assert_eq!(out.error, Some(RunError::Exit(Errno::InvalidArgument.code())));
    }

    // ============ Files ============

    #[test]
    fn test_written_file_in_snapshot() {
        let out = headless(WRITE_NOTES, None);
        assert_eq!(out.error, None);
        let notes = out.files.iter().find(|f| f.path == "/notes.txt").unwrap();
        assert_eq!(notes.bytes, b"hello");
    }

    #[test]
    fn test_open_options_from_flags() {
        let read_only = open_options(0);
        assert!(read_only.read && !read_only.write);

        let create_write = open_options(open_flag::WRITE | open_flag::CREATE);
        assert!(create_write.write && create_write.create && !create_write.read);

        let append = open_options(open_flag::READ_WRITE | open_flag::APPEND);
        assert!(append.read && append.write && append.append);
    }

    #[test]
    fn test_errno_from_io() {
        assert_eq!(Errno::NotFound.code(), -2);
        assert_eq!(
            Errno::from(io::Error::from(io::ErrorKind::DirectoryNotEmpty)),
            Errno::NotEmpty
        );
        assert_eq!(Errno::from(io::Error::other("disk")), Errno::Io);
    }

    #[test]
    fn test_stat_size_saturates() {
        let meta = Metadata {
            size: u32::MAX as u64 + 10,
            is_dir: false,
            is_file: true,
            mtime: 5_000,
        };
        let stat = StatRecord::from(&meta);
        assert_eq!(stat.size, u32::MAX);
        assert_eq!(stat.mtime, 5);
        assert_eq!(std::mem::size_of::<StatRecord>(), 32);
    }

    // ============ Arguments ============

    #[test]
    fn test_argv_block() {
        let args = vec!["echo".to_string(), "hi".to_string()];
        let (bytes, argv) = argv_block(&args, 1024);
        assert_eq!(bytes.len(), argv_block_len(&args));
        assert_eq!(&bytes[..8], b"echo\0hi\0");
        assert_eq!(argv, 1032);

        let word = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        assert_eq!(word(8), 1024);
        assert_eq!(word(12), 1029);
        assert_eq!(word(16), 0);
    }
}

//! libc-ABI programs (`wasi_snapshot_preview1`)
//!
//! The emulated process sees:
//! - argv = `[program, args..]`, environment from the runtime manifest
//! - fds 0/1/2 as character devices wired to the run handler
//! - `/` preopened as fd 3 and `.` as fd 4, both the sandbox root
//! - `/dev/tty`: reads come from stdin, writes go to stdout
//!
//! `proc_exit(0)` is a normal exit. Clocks, randomness and a subset of the
//! filesystem calls are implemented; polling and sockets answer `ENOSYS`.

use super::stdin::{StdinPolicy, StdinSource};
use super::wasi::{
    self, Dirent, Errno, FdStat, FileStat, IoVec, PreStat, clock, errno, fdflags, filetype,
    oflags, rights, whence,
};
use super::{RunHandler, RunRequest, default_env, report};
use crate::platform::now_ns;
use crate::vfs::memory::Device;
use crate::vfs::{FileHandle, FileSystem, Metadata, MemoryFs, OpenOptions, join_path};
use crate::wasm::{
    CompiledModule, EntryCall, Engine, GuestMemory, HostAbi, HostTrap, HostVal, ImportSig,
    WasmError, WasmResult,
};
use serde::{Deserialize, Serialize};
use slab::Slab;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{self, SeekFrom};
use std::mem::size_of;
use std::rc::Rc;

/// Device nodes mounted into every sandbox; never reported back
pub const RESERVED_PATHS: &[&str] = &["/dev/stdin", "/dev/stdout", "/dev/stderr", "/dev/tty"];

const DEVICES: &[(&str, Device)] = &[
    ("/dev/stdin", Device::Stdin),
    ("/dev/stdout", Device::Stdout),
    ("/dev/stderr", Device::Stderr),
    ("/dev/tty", Device::Tty),
];

/// Runtime glue shipped next to a libc module as `<name>.rt`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeManifest {
    /// Environment of the emulated process
    pub env: BTreeMap<String, String>,
}

impl RuntimeManifest {
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// What a descriptor refers to
#[derive(Debug, Clone)]
enum Descriptor {
    Device(Device),
    Dir {
        path: String,
        preopen: Option<&'static str>,
    },
    File {
        handle: FileHandle,
        append: bool,
    },
}

/// A call that cannot complete: report an errno or unwind the guest
enum Fail {
    Errno(Errno),
    Trap(HostTrap),
}

impl From<io::Error> for Fail {
    fn from(err: io::Error) -> Self {
        Self::Errno(wasi::errno_from_io(&err))
    }
}

impl From<WasmError> for Fail {
    fn from(_: WasmError) -> Self {
        Self::Errno(errno::FAULT)
    }
}

impl From<HostTrap> for Fail {
    fn from(trap: HostTrap) -> Self {
        Self::Trap(trap)
    }
}

type WasiResult<T> = Result<T, Fail>;

fn fail<T>(code: Errno) -> WasiResult<T> {
    Err(Fail::Errno(code))
}

fn to_filestat(meta: &Metadata, filetype: u8) -> FileStat {
    let ns = meta.mtime.saturating_mul(1_000_000);
    FileStat {
        filetype,
        nlink: 1,
        size: meta.size,
        atim: ns,
        mtim: ns,
        ctim: ns,
        ..Default::default()
    }
}

fn device_filestat() -> FileStat {
    FileStat {
        filetype: filetype::CHARACTER_DEVICE,
        nlink: 1,
        ..Default::default()
    }
}

fn read_iovecs(mem: &dyn GuestMemory, ptr: u32, count: u32) -> WasiResult<Vec<IoVec>> {
    let len = count
        .checked_mul(size_of::<IoVec>() as u32)
        .ok_or(Fail::Errno(errno::INVAL))?;
    let bytes = mem.read(ptr, len)?;
    Ok(bytes
        .chunks_exact(size_of::<IoVec>())
        .map(bytemuck::pod_read_unaligned::<IoVec>)
        .collect())
}

/// Per-run state behind the import table
struct LibcHost<H> {
    handler: H,
    fs: MemoryFs,
    fds: Slab<Descriptor>,
    stdin: StdinSource,
    argv: Vec<String>,
    /// `KEY=value` strings
    environ: Vec<String>,
    rng: u64,
}

impl<H: RunHandler> LibcHost<H> {
    fn descriptor(&self, fd: i32) -> WasiResult<Descriptor> {
        usize::try_from(fd)
            .ok()
            .and_then(|key| self.fds.get(key))
            .cloned()
            .ok_or(Fail::Errno(errno::BADF))
    }

    fn dir_path(&self, fd: i32) -> WasiResult<String> {
        match self.descriptor(fd)? {
            Descriptor::Dir { path, .. } => Ok(path),
            _ => fail(errno::NOTDIR),
        }
    }

    /// Guest path relative to a directory descriptor
    fn resolve(&self, fd: i32, mem: &dyn GuestMemory, ptr: u32, len: u32) -> WasiResult<String> {
        let base = self.dir_path(fd)?;
        let raw = mem.read_str(ptr, len)?;
        Ok(join_path(&base, &raw))
    }

    fn next_random(&mut self) -> u64 {
        // xorshift64
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        x
    }

    fn write_strings(strings: &[String], ptrs: u32, buf: u32, mem: &mut dyn GuestMemory) -> WasiResult<()> {
        let mut offset = buf;
        for (i, s) in strings.iter().enumerate() {
            mem.write_u32(ptrs + 4 * i as u32, offset)?;
            mem.write(offset, s.as_bytes())?;
            mem.write(offset + s.len() as u32, &[0])?;
            offset += s.len() as u32 + 1;
        }
        Ok(())
    }

    fn write_sizes(strings: &[String], count_ptr: u32, size_ptr: u32, mem: &mut dyn GuestMemory) -> WasiResult<()> {
        let size: usize = strings.iter().map(|s| s.len() + 1).sum();
        mem.write_u32(count_ptr, strings.len() as u32)?;
        mem.write_u32(size_ptr, size as u32)?;
        Ok(())
    }

    fn fd_read(&mut self, fd: i32, iovs: u32, count: u32, nread: u32, mem: &mut dyn GuestMemory) -> WasiResult<()> {
        let target = self.descriptor(fd)?;
        let mut total = 0usize;

        for iov in read_iovecs(mem, iovs, count)? {
            if iov.buf_len == 0 {
                continue;
            }
            mem.check(iov.buf, iov.buf_len)?;
            let data = match &target {
                Descriptor::Device(Device::Stdin | Device::Tty) => {
                    self.stdin.read(&mut self.handler, iov.buf_len as usize)?
                }
                Descriptor::Device(_) => return fail(errno::BADF),
                Descriptor::Dir { .. } => return fail(errno::ISDIR),
                Descriptor::File { handle, .. } => {
                    let mut buf = vec![0u8; iov.buf_len as usize];
                    let n = self.fs.read(*handle, &mut buf)?;
                    buf.truncate(n);
                    buf
                }
            };
            mem.write(iov.buf, &data)?;
            total += data.len();

            // One blocking request per call for devices
            if matches!(target, Descriptor::Device(_)) || data.len() < iov.buf_len as usize {
                break;
            }
        }

        mem.write_u32(nread, total as u32)?;
        Ok(())
    }

    fn fd_write(&mut self, fd: i32, iovs: u32, count: u32, nwritten: u32, mem: &mut dyn GuestMemory) -> WasiResult<()> {
        let target = self.descriptor(fd)?;
        let mut data = Vec::new();
        for iov in read_iovecs(mem, iovs, count)? {
            data.extend(mem.read(iov.buf, iov.buf_len)?);
        }

        match target {
            Descriptor::Device(Device::Stdout | Device::Tty) => self.handler.stdout(&data),
            Descriptor::Device(Device::Stderr) => self.handler.stderr(&data),
            Descriptor::Device(Device::Stdin) => return fail(errno::BADF),
            Descriptor::Dir { .. } => return fail(errno::ISDIR),
            Descriptor::File { handle, .. } => {
                self.fs.write(handle, &data)?;
            }
        }

        mem.write_u32(nwritten, data.len() as u32)?;
        Ok(())
    }

    fn fd_seek(&mut self, fd: i32, offset: i64, whence_: u8) -> WasiResult<u64> {
        let handle = match self.descriptor(fd)? {
            Descriptor::File { handle, .. } => handle,
            Descriptor::Device(_) => return fail(errno::SPIPE),
            Descriptor::Dir { .. } => return fail(errno::ISDIR),
        };
        let pos = match whence_ {
            whence::SET if offset >= 0 => SeekFrom::Start(offset as u64),
            whence::CUR => SeekFrom::Current(offset),
            whence::END => SeekFrom::End(offset),
            _ => return fail(errno::INVAL),
        };
        Ok(self.fs.seek(handle, pos)?)
    }

    fn fd_filestat(&self, fd: i32) -> WasiResult<FileStat> {
        match self.descriptor(fd)? {
            Descriptor::Device(_) => Ok(device_filestat()),
            Descriptor::Dir { path, .. } => {
                Ok(to_filestat(&self.fs.metadata(&path)?, filetype::DIRECTORY))
            }
            Descriptor::File { handle, .. } => {
                Ok(to_filestat(&self.fs.fstat(handle)?, filetype::REGULAR_FILE))
            }
        }
    }

    fn fd_readdir(&self, fd: i32, buf: u32, buf_len: u32, cookie: u64, bufused: u32, mem: &mut dyn GuestMemory) -> WasiResult<()> {
        let path = self.dir_path(fd)?;
        let mut entries = vec![(".".to_string(), filetype::DIRECTORY), ("..".to_string(), filetype::DIRECTORY)];
        entries.extend(self.fs.read_dir(&path)?.into_iter().map(|e| {
            let kind = if e.is_dir {
                filetype::DIRECTORY
            } else if self.fs.device(&join_path(&path, &e.name)).is_some() {
                filetype::CHARACTER_DEVICE
            } else {
                filetype::REGULAR_FILE
            };
            (e.name, kind)
        }));

        let mut out = Vec::new();
        for (i, (name, kind)) in entries.iter().enumerate().skip(cookie as usize) {
            if out.len() >= buf_len as usize {
                break;
            }
            let dirent = Dirent {
                next: i as u64 + 1,
                ino: i as u64 + 1,
                namlen: name.len() as u32,
                filetype: *kind,
                ..Default::default()
            };
            out.extend_from_slice(bytemuck::bytes_of(&dirent));
            out.extend_from_slice(name.as_bytes());
        }
        // A full buffer tells the caller to come back with the last cookie
        out.truncate(buf_len as usize);

        mem.write(buf, &out)?;
        mem.write_u32(bufused, out.len() as u32)?;
        Ok(())
    }

    fn path_open(
        &mut self,
        path: String,
        open_flags: u16,
        rights_base: u64,
        fd_flags: u16,
        fd_out: u32,
        mem: &mut dyn GuestMemory,
    ) -> WasiResult<()> {
        let descriptor = if let Some(device) = self.fs.device(&path) {
            Descriptor::Device(device)
        } else if self.fs.metadata(&path).is_ok_and(|m| m.is_dir) {
            if open_flags & (oflags::CREAT | oflags::EXCL) == oflags::CREAT | oflags::EXCL {
                return fail(errno::EXIST);
            }
            if open_flags & oflags::TRUNC != 0 {
                return fail(errno::ISDIR);
            }
            Descriptor::Dir {
                path,
                preopen: None,
            }
        } else {
            if open_flags & oflags::DIRECTORY != 0 {
                return fail(if self.fs.exists(&path) {
                    errno::NOTDIR
                } else {
                    errno::NOENT
                });
            }
            let append = fd_flags & fdflags::APPEND != 0;
            let write = rights_base & rights::FD_WRITE != 0 || append;
            let options = OpenOptions::new()
                .read(rights_base & rights::FD_READ != 0)
                .write(write)
                .create(open_flags & oflags::CREAT != 0)
                .exclusive(open_flags & oflags::EXCL != 0)
                .truncate(open_flags & oflags::TRUNC != 0)
                .append(append);
            let handle = self.fs.open(&path, options)?;
            Descriptor::File { handle, append }
        };

        let fd = self.fds.insert(descriptor);
        mem.write_u32(fd_out, fd as u32)?;
        Ok(())
    }

    fn dispatch(&mut self, name: &str, args: &[HostVal], mem: &mut dyn GuestMemory) -> WasiResult<()> {
        let arg = |i: usize| args.get(i).copied().unwrap_or(HostVal::I32(0));
        let int = |i: usize| arg(i).i32();
        let ptr = |i: usize| arg(i).ptr();

        match name {
            "args_get" => Self::write_strings(&self.argv, ptr(0), ptr(1), mem),
            "args_sizes_get" => Self::write_sizes(&self.argv, ptr(0), ptr(1), mem),
            "environ_get" => Self::write_strings(&self.environ, ptr(0), ptr(1), mem),
            "environ_sizes_get" => Self::write_sizes(&self.environ, ptr(0), ptr(1), mem),
            "clock_res_get" => match ptr(0) {
                clock::REALTIME | clock::MONOTONIC | clock::PROCESS_CPUTIME | clock::THREAD_CPUTIME => {
                    Ok(mem.write_u64(ptr(1), 1_000_000)?)
                }
                _ => fail(errno::INVAL),
            },
            "clock_time_get" => match ptr(0) {
                clock::REALTIME | clock::MONOTONIC | clock::PROCESS_CPUTIME | clock::THREAD_CPUTIME => {
                    Ok(mem.write_u64(ptr(2), now_ns())?)
                }
                _ => fail(errno::INVAL),
            },
            "fd_advise" | "fd_datasync" | "fd_sync" | "fd_fdstat_set_flags" => {
                self.descriptor(int(0)).map(|_| ())
            }
            "fd_close" => {
                let fd = int(0);
                let descriptor = self.descriptor(fd)?;
                self.fds.remove(fd as usize);
                if let Descriptor::File { handle, .. } = descriptor {
                    self.fs.close(handle)?;
                }
                Ok(())
            }
            "fd_fdstat_get" => {
                let (kind, flags) = match self.descriptor(int(0))? {
                    Descriptor::Device(_) => (filetype::CHARACTER_DEVICE, 0),
                    Descriptor::Dir { .. } => (filetype::DIRECTORY, 0),
                    Descriptor::File { append, .. } => {
                        (filetype::REGULAR_FILE, if append { fdflags::APPEND } else { 0 })
                    }
                };
                let stat = FdStat {
                    filetype: kind,
                    flags,
                    rights_base: rights::ALL,
                    rights_inheriting: rights::ALL,
                    ..Default::default()
                };
                Ok(mem.write(ptr(1), bytemuck::bytes_of(&stat))?)
            }
            "fd_filestat_get" => {
                let stat = self.fd_filestat(int(0))?;
                Ok(mem.write(ptr(1), bytemuck::bytes_of(&stat))?)
            }
            "fd_filestat_set_size" => match self.descriptor(int(0))? {
                Descriptor::File { handle, .. } => Ok(self.fs.set_len(handle, arg(1).i64() as u64)?),
                _ => fail(errno::BADF),
            },
            "fd_prestat_get" => match self.descriptor(int(0))? {
                Descriptor::Dir {
                    preopen: Some(name),
                    ..
                } => {
                    let stat = PreStat {
                        tag: 0,
                        name_len: name.len() as u32,
                        ..Default::default()
                    };
                    Ok(mem.write(ptr(1), bytemuck::bytes_of(&stat))?)
                }
                _ => fail(errno::BADF),
            },
            "fd_prestat_dir_name" => match self.descriptor(int(0))? {
                Descriptor::Dir {
                    preopen: Some(name),
                    ..
                } => {
                    let n = name.len().min(ptr(2) as usize);
                    Ok(mem.write(ptr(1), &name.as_bytes()[..n])?)
                }
                _ => fail(errno::BADF),
            },
            "fd_read" => self.fd_read(int(0), ptr(1), ptr(2), ptr(3), mem),
            "fd_readdir" => self.fd_readdir(int(0), ptr(1), ptr(2), arg(3).i64() as u64, ptr(4), mem),
            "fd_seek" => {
                let pos = self.fd_seek(int(0), arg(1).i64(), int(2) as u8)?;
                Ok(mem.write_u64(ptr(3), pos)?)
            }
            "fd_tell" => {
                let pos = self.fd_seek(int(0), 0, whence::CUR)?;
                Ok(mem.write_u64(ptr(1), pos)?)
            }
            "fd_write" => self.fd_write(int(0), ptr(1), ptr(2), ptr(3), mem),
            "path_create_directory" => {
                let path = self.resolve(int(0), mem, ptr(1), ptr(2))?;
                Ok(self.fs.create_dir(&path)?)
            }
            "path_filestat_get" => {
                let path = self.resolve(int(0), mem, ptr(2), ptr(3))?;
                let stat = if self.fs.device(&path).is_some() {
                    device_filestat()
                } else {
                    let meta = self.fs.metadata(&path)?;
                    let kind = if meta.is_dir {
                        filetype::DIRECTORY
                    } else {
                        filetype::REGULAR_FILE
                    };
                    to_filestat(&meta, kind)
                };
                Ok(mem.write(ptr(4), bytemuck::bytes_of(&stat))?)
            }
            "path_open" => {
                let path = self.resolve(int(0), mem, ptr(2), ptr(3))?;
                self.path_open(
                    path,
                    int(4) as u16,
                    arg(5).i64() as u64,
                    int(7) as u16,
                    ptr(8),
                    mem,
                )
            }
            "path_remove_directory" => {
                let path = self.resolve(int(0), mem, ptr(1), ptr(2))?;
                Ok(self.fs.remove_dir(&path)?)
            }
            "path_rename" => {
                let from = self.resolve(int(0), mem, ptr(1), ptr(2))?;
                let to = self.resolve(int(3), mem, ptr(4), ptr(5))?;
                Ok(self.fs.rename(&from, &to)?)
            }
            "path_unlink_file" => {
                let path = self.resolve(int(0), mem, ptr(1), ptr(2))?;
                if self.fs.device(&path).is_some() {
                    return fail(errno::ACCES);
                }
                Ok(self.fs.remove_file(&path)?)
            }
            "proc_exit" => Err(HostTrap::Exit(int(0)).into()),
            "random_get" => {
                mem.check(ptr(0), ptr(1))?;
                let mut bytes = Vec::with_capacity(ptr(1) as usize);
                while bytes.len() < ptr(1) as usize {
                    bytes.extend_from_slice(&self.next_random().to_le_bytes());
                }
                bytes.truncate(ptr(1) as usize);
                Ok(mem.write(ptr(0), &bytes)?)
            }
            "sched_yield" => Ok(()),
            "poll_oneoff" | "sock_accept" | "sock_recv" | "sock_send" | "sock_shutdown" => {
                fail(errno::NOSYS)
            }
            other => Err(HostTrap::Fault(format!("unknown import {}", other)).into()),
        }
    }
}

impl<H: RunHandler> HostAbi for LibcHost<H> {
    fn imports(&self) -> &'static [ImportSig] {
        wasi::IMPORTS
    }

    fn call(
        &mut self,
        index: usize,
        args: &[HostVal],
        mem: &mut dyn GuestMemory,
    ) -> Result<Option<HostVal>, HostTrap> {
        let sig = wasi::IMPORTS
            .get(index)
            .ok_or_else(|| HostTrap::Fault(format!("no import #{}", index)))?;

        match self.dispatch(sig.name, args, mem) {
            Ok(()) => Ok(Some(HostVal::I32(errno::SUCCESS as i32))),
            Err(Fail::Errno(code)) => Ok(Some(HostVal::I32(code as i32))),
            Err(Fail::Trap(trap)) => Err(trap),
        }
    }

    fn entry(
        &mut self,
        has_export: &dyn Fn(&str) -> bool,
        _mem: &mut dyn GuestMemory,
    ) -> WasmResult<EntryCall> {
        if has_export("_start") {
            Ok(EntryCall {
                name: "_start",
                args: vec![],
            })
        } else {
            Err(WasmError::MissingExport { name: "_start" })
        }
    }
}

/// Runs modules built against libc (WASI preview1)
#[derive(Clone)]
pub struct LibcRunnable {
    engine: Engine,
    module: CompiledModule,
    manifest: RuntimeManifest,
}

impl LibcRunnable {
    pub fn new(engine: Engine, module: CompiledModule, manifest: RuntimeManifest) -> Self {
        Self {
            engine,
            module,
            manifest,
        }
    }

    pub fn manifest(&self) -> &RuntimeManifest {
        &self.manifest
    }

    fn environ(&self) -> Vec<String> {
        let mut env: BTreeMap<String, String> = default_env().into_iter().collect();
        env.extend(self.manifest.env.clone());
        env.into_iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    pub fn run<H: RunHandler + 'static>(&self, request: RunRequest, handler: H) {
        let mut fs = MemoryFs::new();
        fs.load(&request.files);
        for (path, device) in DEVICES {
            if let Err(e) = fs.mount_device(path, *device) {
                crate::console_log!("[run] cannot mount {}: {}", path, e);
            }
        }

        let mut fds = Slab::new();
        fds.insert(Descriptor::Device(Device::Stdin));
        fds.insert(Descriptor::Device(Device::Stdout));
        fds.insert(Descriptor::Device(Device::Stderr));
        fds.insert(Descriptor::Dir {
            path: "/".to_string(),
            preopen: Some("/"),
        });
        fds.insert(Descriptor::Dir {
            path: "/".to_string(),
            preopen: Some("."),
        });

        let host = Rc::new(RefCell::new(LibcHost {
            handler,
            fs,
            fds,
            stdin: StdinSource::new(StdinPolicy::Alternate, request.stdin.clone()),
            argv: request.argv(),
            environ: self.environ(),
            rng: now_ns() | 1,
        }));

        let outcome = self.engine.execute(&self.module, Rc::clone(&host));

        let mut guard = host.borrow_mut();
        let state = &mut *guard;
        let files = state.fs.snapshot(RESERVED_PATHS);
        report(&mut state.handler, outcome, files);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::{HeadlessOutput, RunError, Runnable, AbiKind};
    use crate::vfs::VirtualFile;
    use futures::executor::block_on;

    fn runnable(wat: &str, glue: Option<&[u8]>) -> Runnable {
        let engine = Engine::new().unwrap();
        let module = block_on(engine.compile(&wat::parse_str(wat).unwrap())).unwrap();
        Runnable::new(engine, module, AbiKind::Libc, glue)
    }

    fn headless(runnable: &Runnable, stdin: Option<&str>, files: Vec<VirtualFile>) -> HeadlessOutput {
        let request = RunRequest::new("prog", vec![])
            .with_files(files)
            .with_stdin(stdin.map(str::to_string));
        runnable.run_headless(request)
    }

    const HELLO: &str = r#"(module
        (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
        (memory (export "memory") 1)
        (data (i32.const 100) "hello\n")
        (func (export "_start")
            (i32.store (i32.const 0) (i32.const 100))
            (i32.store (i32.const 4) (i32.const 6))
            (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))"#;

    const CAT: &str = r#"(module
        (import "wasi_snapshot_preview1" "fd_read"
            (func $fd_read (param i32 i32 i32 i32) (result i32)))
        (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
        (memory (export "memory") 1)
        (func (export "_start")
            (block $done
                (loop $next
                    (i32.store (i32.const 0) (i32.const 64))
                    (i32.store (i32.const 4) (i32.const 256))
                    (drop (call $fd_read (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 8)))
                    (br_if $done (i32.eqz (i32.load (i32.const 8))))
                    (i32.store (i32.const 16) (i32.const 64))
                    (i32.store (i32.const 20) (i32.load (i32.const 8)))
                    (drop (call $fd_write (i32.const 1) (i32.const 16) (i32.const 1) (i32.const 24)))
                    (br $next)))))"#;

    /// Creates /out.txt through the "/" preopen and exits with the errno
    const WRITE_FILE: &str = r#"(module
        (import "wasi_snapshot_preview1" "path_open"
            (func $path_open (param i32 i32 i32 i32 i32 i64 i64 i32 i32) (result i32)))
        (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
        (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
        (memory (export "memory") 1)
        (data (i32.const 100) "out.txt")
        (data (i32.const 120) "saved")
        (func (export "_start")
            (local $err i32)
            (local.set $err (call $path_open (i32.const 3) (i32.const 0)
                (i32.const 100) (i32.const 7) (i32.const 9)
                (i64.const 66) (i64.const 0) (i32.const 0) (i32.const 40)))
            (if (local.get $err) (then (call $proc_exit (local.get $err))))
            (i32.store (i32.const 0) (i32.const 120))
            (i32.store (i32.const 4) (i32.const 5))
            (drop (call $fd_write (i32.load (i32.const 40)) (i32.const 0) (i32.const 1) (i32.const 8)))
            (call $proc_exit (i32.const 0))))"#;

    /// Writes the value of the first environment entry's length as exit code
    const ENV_COUNT: &str = r#"(module
        (import "wasi_snapshot_preview1" "environ_sizes_get"
            (func $sizes (param i32 i32) (result i32)))
        (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
        (memory (export "memory") 1)
        (func (export "_start")
            (drop (call $sizes (i32.const 0) (i32.const 4)))
            (call $proc_exit (i32.load (i32.const 0)))))"#;

    /// Reads into a buffer that runs past the end of memory
    const OVERSIZE_READ: &str = r#"(module
        (import "wasi_snapshot_preview1" "fd_read"
            (func $fd_read (param i32 i32 i32 i32) (result i32)))
        (import "wasi_snapshot_preview1" "proc_exit" (func $proc_exit (param i32)))
        (memory (export "memory") 1)
        (func (export "_start")
            (i32.store (i32.const 0) (i32.const 64))
            (i32.store (i32.const 4) (i32.const 0x7fffffff))
            (call $proc_exit (call $fd_read (i32.const 0) (i32.const 0) (i32.const 1) (i32.const 8)))))"#;

    // ============ Output ============

    #[test]
    fn test_hello_stdout() {
        let out = headless(&runnable(HELLO, None), None, vec![]);
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.error, None);
    }

    // ============ Stdin ============

    #[test]
    fn test_cat_preset() {
        let out = headless(&runnable(CAT, None), Some("abc"), vec![]);
        assert_eq!(out.stdout, "abc\n");
    }

    #[test]
    fn test_cat_without_input_is_empty() {
        let out = headless(&runnable(CAT, None), None, vec![]);
        assert_eq!(out.stdout, "");
        assert_eq!(out.error, None);
    }

    #[test]
    fn test_read_past_memory_is_fault() {
        let out = headless(&runnable(OVERSIZE_READ, None), Some("abc"), vec![]);
        assert_eq!(out.error, Some(RunError::Exit(errno::FAULT as i32)));
    }

    // ============ Files ============

    #[test]
    fn test_path_open_creates_file() {
        let out = headless(&runnable(WRITE_FILE, None), None, vec![]);
        assert_eq!(out.error, None);
        let paths: Vec<_> = out.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["/out.txt"]);
        assert_eq!(out.files[0].bytes, b"saved");
    }

    #[test]
    fn test_input_files_survive_and_devices_excluded() {
        let input = VirtualFile::new("/data/in.txt", b"x".to_vec());
        let out = headless(&runnable(HELLO, None), None, vec![input.clone()]);
        assert_eq!(out.files, vec![input]);
    }

    // ============ Exit ============

    #[test]
    fn test_proc_exit_nonzero_is_error() {
        let glue = br#"{"env": {"A": "1"}}"#;
        let out = headless(&runnable(ENV_COUNT, Some(glue)), None, vec![]);
        // HOME, PWD, TERM plus A
        assert_eq!(out.error, Some(RunError::Exit(4)));
    }

    #[test]
    fn test_invalid_manifest_falls_back_to_default() {
        let out = headless(&runnable(ENV_COUNT, Some(b"not json")), None, vec![]);
        assert_eq!(out.error, Some(RunError::Exit(3)));
    }

    #[test]
    fn test_missing_start_reported() {
        let out = headless(&runnable(r#"(module (func (export "main")))"#, None), None, vec![]);
        assert_eq!(
            out.error,
            Some(RunError::Wasm(WasmError::MissingExport { name: "_start" }))
        );
    }

    #[test]
    fn test_manifest_parse() {
        let manifest = RuntimeManifest::parse(br#"{"env": {"LANG": "C"}}"#).unwrap();
        assert_eq!(manifest.env.get("LANG").map(String::as_str), Some("C"));
        assert_eq!(RuntimeManifest::parse(b"{}").unwrap(), RuntimeManifest::default());
    }
}

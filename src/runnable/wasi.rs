//! `wasi_snapshot_preview1` constants, records and import table

use crate::wasm::{ImportSig, ValKind};
use bytemuck::{Pod, Zeroable};
use std::io;

pub const MODULE: &str = "wasi_snapshot_preview1";

pub type Errno = u16;

pub mod errno {
    use super::Errno;

    pub const SUCCESS: Errno = 0;
    pub const ACCES: Errno = 2;
    pub const BADF: Errno = 8;
    pub const EXIST: Errno = 20;
    pub const FAULT: Errno = 21;
    pub const INVAL: Errno = 28;
    pub const IO: Errno = 29;
    pub const ISDIR: Errno = 31;
    pub const NOENT: Errno = 44;
    pub const NOSYS: Errno = 52;
    pub const NOTDIR: Errno = 54;
    pub const NOTEMPTY: Errno = 55;
    pub const SPIPE: Errno = 70;
}

pub fn errno_from_io(err: &io::Error) -> Errno {
    match err.kind() {
        io::ErrorKind::NotFound => errno::NOENT,
        io::ErrorKind::AlreadyExists => errno::EXIST,
        io::ErrorKind::PermissionDenied => errno::ACCES,
        io::ErrorKind::IsADirectory => errno::ISDIR,
        io::ErrorKind::NotADirectory => errno::NOTDIR,
        io::ErrorKind::DirectoryNotEmpty => errno::NOTEMPTY,
        io::ErrorKind::InvalidInput => errno::INVAL,
        _ => errno::IO,
    }
}

pub mod filetype {
    pub const CHARACTER_DEVICE: u8 = 2;
    pub const DIRECTORY: u8 = 3;
    pub const REGULAR_FILE: u8 = 4;
}

pub mod oflags {
    pub const CREAT: u16 = 1;
    pub const DIRECTORY: u16 = 2;
    pub const EXCL: u16 = 4;
    pub const TRUNC: u16 = 8;
}

pub mod fdflags {
    pub const APPEND: u16 = 1;
}

pub mod rights {
    pub const FD_READ: u64 = 1 << 1;
    pub const FD_WRITE: u64 = 1 << 6;
    /// Every right defined by preview1
    pub const ALL: u64 = (1 << 29) - 1;
}

pub mod whence {
    pub const SET: u8 = 0;
    pub const CUR: u8 = 1;
    pub const END: u8 = 2;
}

pub mod clock {
    pub const REALTIME: u32 = 0;
    pub const MONOTONIC: u32 = 1;
    pub const PROCESS_CPUTIME: u32 = 2;
    pub const THREAD_CPUTIME: u32 = 3;
}

/// `ciovec` / `iovec`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct IoVec {
    pub buf: u32,
    pub buf_len: u32,
}

/// `fdstat`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct FdStat {
    pub filetype: u8,
    pub _pad0: u8,
    pub flags: u16,
    pub _pad1: u32,
    pub rights_base: u64,
    pub rights_inheriting: u64,
}

/// `filestat`
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct FileStat {
    pub dev: u64,
    pub ino: u64,
    pub filetype: u8,
    pub _pad: [u8; 7],
    pub nlink: u64,
    pub size: u64,
    pub atim: u64,
    pub mtim: u64,
    pub ctim: u64,
}

/// `prestat` for a preopened directory
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct PreStat {
    pub tag: u8,
    pub _pad: [u8; 3],
    pub name_len: u32,
}

/// `dirent` header; the name follows it
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
#[repr(C)]
pub struct Dirent {
    pub next: u64,
    pub ino: u64,
    pub namlen: u32,
    pub filetype: u8,
    pub _pad: [u8; 3],
}

const I: ValKind = ValKind::I32;
const L: ValKind = ValKind::I64;

const fn wasi(name: &'static str, params: &'static [ValKind], result: Option<ValKind>) -> ImportSig {
    ImportSig {
        module: MODULE,
        name,
        params,
        result,
    }
}

pub const IMPORTS: &[ImportSig] = &[
    wasi("args_get", &[I, I], Some(I)),
    wasi("args_sizes_get", &[I, I], Some(I)),
    wasi("environ_get", &[I, I], Some(I)),
    wasi("environ_sizes_get", &[I, I], Some(I)),
    wasi("clock_res_get", &[I, I], Some(I)),
    wasi("clock_time_get", &[I, L, I], Some(I)),
    wasi("fd_advise", &[I, L, L, I], Some(I)),
    wasi("fd_close", &[I], Some(I)),
    wasi("fd_datasync", &[I], Some(I)),
    wasi("fd_fdstat_get", &[I, I], Some(I)),
    wasi("fd_fdstat_set_flags", &[I, I], Some(I)),
    wasi("fd_filestat_get", &[I, I], Some(I)),
    wasi("fd_filestat_set_size", &[I, L], Some(I)),
    wasi("fd_prestat_get", &[I, I], Some(I)),
    wasi("fd_prestat_dir_name", &[I, I, I], Some(I)),
    wasi("fd_read", &[I, I, I, I], Some(I)),
    wasi("fd_readdir", &[I, I, I, L, I], Some(I)),
    wasi("fd_seek", &[I, L, I, I], Some(I)),
    wasi("fd_sync", &[I], Some(I)),
    wasi("fd_tell", &[I, I], Some(I)),
    wasi("fd_write", &[I, I, I, I], Some(I)),
    wasi("path_create_directory", &[I, I, I], Some(I)),
    wasi("path_filestat_get", &[I, I, I, I, I], Some(I)),
    wasi("path_open", &[I, I, I, I, I, L, L, I, I], Some(I)),
    wasi("path_remove_directory", &[I, I, I], Some(I)),
    wasi("path_rename", &[I, I, I, I, I, I], Some(I)),
    wasi("path_unlink_file", &[I, I, I], Some(I)),
    wasi("poll_oneoff", &[I, I, I, I], Some(I)),
    wasi("proc_exit", &[I], None),
    wasi("random_get", &[I, I], Some(I)),
    wasi("sched_yield", &[], Some(I)),
    wasi("sock_accept", &[I, I, I], Some(I)),
    wasi("sock_recv", &[I, I, I, I, I, I], Some(I)),
    wasi("sock_send", &[I, I, I, I, I], Some(I)),
    wasi("sock_shutdown", &[I, I], Some(I)),
];

//! Host function seam
//!
//! Both program ABIs describe their imports as a static table of
//! signatures and answer calls by index. Engines link every table entry to
//! a host function that forwards to [`HostAbi::call`] with a view of the
//! guest's linear memory, so the ABIs never touch engine types and run the
//! same on wasmtime and on the browser's WebAssembly API.

use super::error::{WasmError, WasmResult};
use std::fmt;

/// Value types used by host function signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValKind {
    I32,
    I64,
}

/// A value crossing the host boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostVal {
    I32(i32),
    I64(i64),
}

impl HostVal {
    pub fn i32(self) -> i32 {
        match self {
            Self::I32(v) => v,
            Self::I64(v) => v as i32,
        }
    }

    pub fn i64(self) -> i64 {
        match self {
            Self::I32(v) => v as i64,
            Self::I64(v) => v,
        }
    }

    /// Guest pointers are unsigned 32-bit offsets
    pub fn ptr(self) -> u32 {
        self.i32() as u32
    }
}

/// One imported host function
#[derive(Debug, Clone, Copy)]
pub struct ImportSig {
    pub module: &'static str,
    pub name: &'static str,
    pub params: &'static [ValKind],
    pub result: Option<ValKind>,
}

/// Control-flow signals raised by host functions
///
/// A trap unwinds the guest immediately; the engine maps it back to an
/// execution outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostTrap {
    /// The program asked to exit with a status code
    Exit(i32),
    /// The run was cancelled while inside a host call
    Interrupted,
    /// A host function could not continue
    Fault(String),
}

impl fmt::Display for HostTrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit(code) => write!(f, "exit({})", code),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Fault(reason) => write!(f, "host fault: {}", reason),
        }
    }
}

impl std::error::Error for HostTrap {}

/// The export to call once the module is instantiated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCall {
    pub name: &'static str,
    pub args: Vec<HostVal>,
}

/// An ABI the engines can link a module against
pub trait HostAbi {
    /// Host functions provided to the module
    fn imports(&self) -> &'static [ImportSig];

    /// Handle a call to `imports()[index]`
    fn call(
        &mut self,
        index: usize,
        args: &[HostVal],
        mem: &mut dyn GuestMemory,
    ) -> Result<Option<HostVal>, HostTrap>;

    /// Pick the entry point after instantiation, preparing memory for it
    fn entry(
        &mut self,
        has_export: &dyn Fn(&str) -> bool,
        mem: &mut dyn GuestMemory,
    ) -> WasmResult<EntryCall>;
}

fn out_of_bounds(address: u32, size: u32, memory_size: usize) -> WasmError {
    WasmError::MemoryAccessOutOfBounds {
        address,
        size,
        memory_size: memory_size as u32,
    }
}

/// Bounds-checked access to a guest's linear memory
pub trait GuestMemory {
    /// Memory size in bytes
    fn size(&self) -> usize;

    /// Copy `len` bytes out of guest memory
    fn read(&self, ptr: u32, len: u32) -> WasmResult<Vec<u8>>;

    /// Fail unless `ptr..ptr + len` lies inside guest memory
    ///
    /// Call before sizing a host buffer from a guest-supplied length.
    fn check(&self, ptr: u32, len: u32) -> WasmResult<()> {
        let size = self.size();
        if u64::from(ptr) + u64::from(len) > size as u64 {
            return Err(out_of_bounds(ptr, len, size));
        }
        Ok(())
    }

    /// Copy bytes into guest memory
    fn write(&mut self, ptr: u32, data: &[u8]) -> WasmResult<()>;

    fn read_u32(&self, ptr: u32) -> WasmResult<u32> {
        let bytes = self.read(ptr, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn write_u32(&mut self, ptr: u32, value: u32) -> WasmResult<()> {
        self.write(ptr, &value.to_le_bytes())
    }

    fn write_u64(&mut self, ptr: u32, value: u64) -> WasmResult<()> {
        self.write(ptr, &value.to_le_bytes())
    }

    /// Read a string with explicit length (lossy UTF-8)
    fn read_str(&self, ptr: u32, len: u32) -> WasmResult<String> {
        let bytes = self.read(ptr, len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Guest memory borrowed as a plain byte slice
pub struct SliceMemory<'a>(pub &'a mut [u8]);

impl SliceMemory<'_> {
    fn range(&self, ptr: u32, len: u32) -> WasmResult<std::ops::Range<usize>> {
        let start = ptr as usize;
        let end = start
            .checked_add(len as usize)
            .filter(|end| *end <= self.0.len())
            .ok_or_else(|| out_of_bounds(ptr, len, self.0.len()))?;
        Ok(start..end)
    }
}

impl GuestMemory for SliceMemory<'_> {
    fn size(&self) -> usize {
        self.0.len()
    }

    fn read(&self, ptr: u32, len: u32) -> WasmResult<Vec<u8>> {
        let range = self.range(ptr, len)?;
        Ok(self.0[range].to_vec())
    }

    fn write(&mut self, ptr: u32, data: &[u8]) -> WasmResult<()> {
        let range = self.range(ptr, data.len() as u32)?;
        self.0[range].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_memory_bounds() {
        let mut buf = vec![0u8; 16];
        let mut mem = SliceMemory(&mut buf);

        mem.write_u32(12, 0xDEAD_BEEF).unwrap();
        assert_eq!(mem.read_u32(12).unwrap(), 0xDEAD_BEEF);

        assert!(mem.write(14, b"abc").is_err());
        assert!(mem.read(u32::MAX, 2).is_err());
        assert_eq!(mem.size(), 16);
    }

    #[test]
    fn test_check_rejects_lengths_past_memory() {
        let mut buf = vec![0u8; 64];
        let mem = SliceMemory(&mut buf);
        assert!(mem.check(0, 64).is_ok());
        assert!(mem.check(60, 8).is_err());
        assert!(mem.check(8, u32::MAX).is_err());
        assert!(mem.check(u32::MAX, u32::MAX).is_err());
    }

    #[test]
    fn test_read_str_lossy() {
        let mut buf = b"hi\xFFthere".to_vec();
        let mem = SliceMemory(&mut buf);
        assert_eq!(mem.read_str(0, 2).unwrap(), "hi");
        assert_eq!(mem.read_str(2, 1).unwrap(), "\u{FFFD}");
    }

    #[test]
    fn test_host_val_conversions() {
        assert_eq!(HostVal::I32(-1).ptr(), u32::MAX);
        assert_eq!(HostVal::I64(7).i32(), 7);
        assert_eq!(HostVal::I32(-2).i64(), -2);
    }
}

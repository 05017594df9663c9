//! Error types for the WASM engines
//!
//! Provides detailed error information for debugging and user feedback.

use std::fmt;

/// Result type for engine operations
pub type WasmResult<T> = Result<T, WasmError>;

/// Errors that can occur while compiling and executing a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WasmError {
    /// Module binary is malformed or invalid
    InvalidModule { reason: String },

    /// The engine rejected the module
    CompileFailed { reason: String },

    /// Required export is missing
    MissingExport { name: &'static str },

    /// Memory access out of bounds
    MemoryAccessOutOfBounds {
        address: u32,
        size: u32,
        memory_size: u32,
    },

    /// Module instantiation failed (unsatisfiable imports, start trap)
    InstantiationFailed { reason: String },

    /// Program trapped or a host function faulted
    Aborted { reason: String },

    /// Execution was stopped from outside
    Interrupted,
}

impl fmt::Display for WasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidModule { reason } => {
                write!(f, "invalid WASM module: {}", reason)
            }
            Self::CompileFailed { reason } => {
                write!(f, "module compilation failed: {}", reason)
            }
            Self::MissingExport { name } => {
                write!(f, "missing required export: '{}'", name)
            }
            Self::MemoryAccessOutOfBounds {
                address,
                size,
                memory_size,
            } => {
                write!(
                    f,
                    "memory access out of bounds: address {} + size {} > memory size {}",
                    address, size, memory_size
                )
            }
            Self::InstantiationFailed { reason } => {
                write!(f, "module instantiation failed: {}", reason)
            }
            Self::Aborted { reason } => {
                write!(f, "command aborted: {}", reason)
            }
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for WasmError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WasmError::MissingExport { name: "_start" };
        assert_eq!(err.to_string(), "missing required export: '_start'");

        let err = WasmError::MemoryAccessOutOfBounds {
            address: 1000,
            size: 100,
            memory_size: 1024,
        };
        assert!(err.to_string().contains("1000"));
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("1024"));

        assert_eq!(WasmError::Interrupted.to_string(), "interrupted");
    }
}

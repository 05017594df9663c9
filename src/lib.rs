//! wasmterm - run WebAssembly command-line programs in a browser terminal
//!
//! A line typed into the terminal is parsed into a pipeline, each stage is
//! resolved to a compiled module (or a registered callable) and executed
//! with a virtual filesystem that is carried from one command to the next.
//!
//! Layers, leaves first:
//! - `history`, `line_buffer`: small terminal-side utilities
//! - `vfs`: in-memory sandbox filesystem and the `VirtualFile` snapshot type
//! - `wasm`: module inspection, the host-function ABI seam and the engines
//! - `runnable`: the POSIX-ABI and libc-ABI program runners
//! - `resolver`: program name -> cached, compiled module descriptor
//! - `exec`: foreground and background execution contexts + the sync bridge
//! - `shell`: pipeline parser, callable registry and the dispatcher
//! - `term`: controller glue between the terminal widget and the engine
//!
//! Platform support:
//! - Browser (wasm32-unknown-unknown): WebAssembly API, Worker + Atomics
//! - Native: wasmtime engine, OS threads (CLI and tests)

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod config;
pub mod exec;
pub mod history;
pub mod line_buffer;
pub mod platform;
pub mod resolver;
pub mod runnable;
pub mod shell;
pub mod term;
pub mod vfs;
pub mod wasm;

pub use config::TermConfig;
pub use vfs::VirtualFile;

/// Initialize panic hook for better error messages in browser console
#[cfg(target_arch = "wasm32")]
fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WASM entry point. The terminal itself is created from JS via `WasmTerm`.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn main() {
    init_panic_hook();
}

/// Console logging helper
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

/// Log to browser console (WASM)
#[cfg(target_arch = "wasm32")]
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        $crate::log(&format!($($t)*))
    };
}

/// Log to stderr (native)
#[cfg(not(target_arch = "wasm32"))]
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        eprintln!($($t)*)
    };
}

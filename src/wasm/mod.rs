//! WebAssembly engine layer
//!
//! - `loader`: header and section inspection without compiling
//! - `host`: the host-function seam both program ABIs implement
//! - `engine` (native, wasmtime) / `web` (browser, WebAssembly JS API):
//!   compile modules and execute them against a `HostAbi`
//!
//! Both engines expose the same surface: `Engine::new`, `compile`,
//! `execute` and `interrupt`, plus a cloneable `CompiledModule`.

pub mod error;
pub mod host;
pub mod loader;

#[cfg(not(target_arch = "wasm32"))]
mod engine;
#[cfg(target_arch = "wasm32")]
mod web;

#[cfg(not(target_arch = "wasm32"))]
pub use engine::{CompiledModule, Engine};
#[cfg(target_arch = "wasm32")]
pub use web::{CompiledModule, Engine};

pub use error::{WasmError, WasmResult};
pub use host::{EntryCall, GuestMemory, HostAbi, HostTrap, HostVal, ImportSig, ValKind};
pub use loader::{ModuleInfo, ModuleValidator};

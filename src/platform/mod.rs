//! Platform Abstraction Layer
//!
//! The engine is host-agnostic; only the Platform implementation knows
//! whether it is running in a browser page or as a native process:
//!
//! - Browser (via wasm-bindgen, web-sys): `window.prompt`, Worker support
//!   depends on cross-origin isolation
//! - Native: stdin prompts, OS threads are always available

#[cfg(not(target_arch = "wasm32"))]
pub mod native;

#[cfg(target_arch = "wasm32")]
pub mod web;

/// Host capabilities the execution contexts depend on
pub trait Platform {
    /// Human readable host name for diagnostics
    fn name(&self) -> &'static str;

    /// Whether a background execution context with shared memory
    /// wait/notify can be provisioned
    fn supports_background(&self) -> bool;

    /// Ask for one line of input, blocking the calling context.
    ///
    /// `None` means the user cancelled, which programs see as end-of-input.
    fn prompt(&self, caption: &str) -> Option<String>;
}

/// Milliseconds since the unix epoch
#[cfg(target_arch = "wasm32")]
pub fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}

/// Milliseconds since the unix epoch
#[cfg(not(target_arch = "wasm32"))]
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Monotonic-enough nanosecond clock for guest clock queries
pub fn now_ns() -> u64 {
    now_ms().saturating_mul(1_000_000)
}

/// The platform of the current build target
#[cfg(not(target_arch = "wasm32"))]
pub fn current() -> Box<dyn Platform> {
    Box::new(native::NativePlatform::new())
}

/// The platform of the current build target
#[cfg(target_arch = "wasm32")]
pub fn current() -> Box<dyn Platform> {
    Box::new(web::WebPlatform::new())
}

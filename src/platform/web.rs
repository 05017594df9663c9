//! Browser Platform Implementation
//!
//! - `window.prompt` for the blocking foreground input fallback
//! - Worker support requires `SharedArrayBuffer`, which browsers only
//!   expose to cross-origin isolated pages (COOP + COEP headers)

use super::Platform;
use wasm_bindgen::JsValue;

/// Browser platform state
pub struct WebPlatform;

impl WebPlatform {
    pub fn new() -> Self {
        Self
    }

    /// `crossOriginIsolated` global, false when the property is missing
    fn cross_origin_isolated() -> bool {
        js_sys::Reflect::get(&js_sys::global(), &JsValue::from_str("crossOriginIsolated"))
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    fn has_global(name: &str) -> bool {
        js_sys::Reflect::has(&js_sys::global(), &JsValue::from_str(name)).unwrap_or(false)
    }
}

impl Default for WebPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for WebPlatform {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn supports_background(&self) -> bool {
        Self::has_global("Worker")
            && Self::has_global("SharedArrayBuffer")
            && Self::has_global("Atomics")
            && Self::cross_origin_isolated()
    }

    fn prompt(&self, caption: &str) -> Option<String> {
        let window = web_sys::window()?;
        window.prompt_with_message(caption).ok().flatten()
    }
}

//! Native Platform Implementation
//!
//! Used by the CLI and the test-suite. Threads are always available, and the
//! blocking prompt reads one line from the process stdin.

use super::Platform;
use std::io::{self, BufRead, Write};

/// Native process platform
pub struct NativePlatform;

impl NativePlatform {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for NativePlatform {
    fn name(&self) -> &'static str {
        "native"
    }

    fn supports_background(&self) -> bool {
        true
    }

    fn prompt(&self, caption: &str) -> Option<String> {
        let mut stdout = io::stdout();
        let _ = write!(stdout, "{}", caption);
        let _ = stdout.flush();

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\n', '\r']).to_string()),
        }
    }
}

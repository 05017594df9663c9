//! wasmterm CLI - the terminal on a native host
//!
//! Run with: cargo run --bin wasmterm -- http://localhost:8080/bin
//!
//! Modules are fetched over HTTP exactly as in the browser, so the dev
//! server (`cargo run --bin serve`) can feed both. `WASMTERM_CONFIG`
//! may name a JSON config file instead.

use futures::executor::block_on;
use futures::future::LocalBoxFuture;
use std::io::{self, BufRead, Write};
use std::rc::Rc;
use wasmterm::TermConfig;
use wasmterm::exec::ExecutionContext;
use wasmterm::platform::native::NativePlatform;
use wasmterm::resolver::{HttpFetcher, ModuleResolver};
use wasmterm::term::{Controller, LineReader, TerminalSurface};
use wasmterm::wasm::Engine;

const DEFAULT_BIN_PATH: &str = "http://localhost:8080/bin";

/// Process stdout
struct Stdout;

impl TerminalSurface for Stdout {
    fn write(&self, text: &str) {
        let mut stdout = io::stdout();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}

/// Line input from the process stdin; the tty echoes the newline
struct Stdin;

impl LineReader for Stdin {
    fn read(&self, prompt: String) -> LocalBoxFuture<'static, Option<String>> {
        Stdout.write(&prompt);
        let mut line = String::new();
        let line = match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end_matches(['\n', '\r']).to_string()),
        };
        Box::pin(futures::future::ready(line))
    }

    fn echoes_newline(&self) -> bool {
        true
    }
}

fn load_config() -> Result<TermConfig, String> {
    if let Ok(path) = std::env::var("WASMTERM_CONFIG") {
        let json = std::fs::read_to_string(&path).map_err(|e| format!("{}: {}", path, e))?;
        return TermConfig::from_json(&json).map_err(|e| format!("{}: {}", path, e));
    }
    let bin_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_BIN_PATH.to_string());
    Ok(TermConfig::with_bin_path(bin_path))
}

fn run() -> Result<(), String> {
    let config = load_config()?;
    let engine = Engine::new().map_err(|e| e.to_string())?;
    let resolver = ModuleResolver::new(&config, engine.clone(), Rc::new(HttpFetcher));
    let context =
        ExecutionContext::new(&config, Rc::new(NativePlatform::new()), engine).map_err(|e| e.to_string())?;

    let controller = Controller::new(config, Rc::new(Stdout), Rc::new(Stdin), context, resolver);
    controller.activate();
    block_on(controller.repl());
    controller.dispose();
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("wasmterm: {}", e);
        std::process::exit(1);
    }
}

//! Runnables - one compiled module, executed once per call
//!
//! Two unrelated program ABIs share one external contract:
//!
//! - [`AbiKind::Posix`]: a small POSIX-subset syscall table in the `env`
//!   namespace, entered through `main(argc, argv)`
//! - [`AbiKind::Libc`]: `wasi_snapshot_preview1` as produced by libc
//!   toolchains, entered through `_start`
//!
//! [`Runnable`] is a tagged variant over the two implementations; they
//! share no wiring beyond the stdin helper and the post-run bookkeeping.
//!
//! Every run gets a fresh [`MemoryFs`](crate::vfs::MemoryFs) seeded from the
//! caller's files. When the program is done the sandbox is walked again and
//! the full snapshot is reported through [`RunHandler::on_finish`], exactly
//! once, whatever the outcome.

pub mod libc;
pub mod posix;
mod stdin;
mod wasi;

pub use libc::{LibcRunnable, RuntimeManifest};
pub use posix::PosixRunnable;

use crate::vfs::VirtualFile;
use crate::wasm::{CompiledModule, Engine, ModuleInfo, WasmError, WasmResult};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Which system-call contract a module expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbiKind {
    Posix,
    Libc,
}

impl AbiKind {
    /// Runtime glue or WASI imports mean libc; everything else is POSIX
    pub fn detect(info: &ModuleInfo, glue: Option<&[u8]>) -> Self {
        if glue.is_some() || info.imports_from(wasi::MODULE) {
            Self::Libc
        } else {
            Self::Posix
        }
    }
}

impl fmt::Display for AbiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Posix => write!(f, "posix"),
            Self::Libc => write!(f, "libc"),
        }
    }
}

/// Inputs of one run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Program name, passed as argv[0]
    pub program: String,
    /// Arguments after the program name
    pub args: Vec<String>,
    /// Files written into the sandbox before the entry point runs
    pub files: Vec<VirtualFile>,
    /// Fixed stdin contents (piped input); `None` reads through the handler
    pub stdin: Option<String>,
}

impl RunRequest {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            ..Default::default()
        }
    }

    pub fn with_files(mut self, files: Vec<VirtualFile>) -> Self {
        self.files = files;
        self
    }

    pub fn with_stdin(mut self, stdin: Option<String>) -> Self {
        self.stdin = stdin;
        self
    }

    /// argv including the program name
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Errors delivered to [`RunHandler::on_error`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// The program exited with a non-zero status
    Exit(i32),
    /// The run was cancelled
    Interrupted,
    /// Instantiation or execution failed
    Wasm(WasmError),
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exit(code) => write!(f, "command exited with code {}", code),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Wasm(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RunError {}

impl From<WasmError> for RunError {
    fn from(err: WasmError) -> Self {
        match err {
            WasmError::Interrupted => Self::Interrupted,
            other => Self::Wasm(other),
        }
    }
}

/// Callbacks of one run
pub trait RunHandler {
    /// One line of interactive input, `None` for end-of-input
    fn stdin(&mut self) -> Option<String>;

    fn stdout(&mut self, data: &[u8]);

    fn stderr(&mut self, data: &[u8]);

    /// Checked after every blocking input request
    fn interrupted(&self) -> bool {
        false
    }

    fn on_error(&mut self, error: &RunError);

    /// Called before `on_finish` when the run succeeded
    fn on_success(&mut self, _files: &[VirtualFile]) {}

    /// Called exactly once per run with the post-run snapshot
    fn on_finish(&mut self, files: Vec<VirtualFile>);
}

/// Everything a headless run produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadlessOutput {
    /// stdout and stderr interleaved in write order
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    pub files: Vec<VirtualFile>,
    pub error: Option<RunError>,
}

/// Handler capturing all output into a shared [`HeadlessOutput`]
pub struct CaptureHandler {
    capture: Rc<RefCell<HeadlessOutput>>,
}

impl CaptureHandler {
    pub fn new(capture: Rc<RefCell<HeadlessOutput>>) -> Self {
        Self { capture }
    }
}

impl RunHandler for CaptureHandler {
    fn stdin(&mut self) -> Option<String> {
        crate::console_log!("[run] headless command asked for input");
        None
    }

    fn stdout(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        let mut capture = self.capture.borrow_mut();
        capture.output.push_str(&text);
        capture.stdout.push_str(&text);
    }

    fn stderr(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        let mut capture = self.capture.borrow_mut();
        capture.output.push_str(&text);
        capture.stderr.push_str(&text);
    }

    fn on_error(&mut self, error: &RunError) {
        self.capture.borrow_mut().error = Some(error.clone());
    }

    fn on_finish(&mut self, files: Vec<VirtualFile>) {
        self.capture.borrow_mut().files = files;
    }
}

/// A compiled module bound to its ABI implementation
#[derive(Clone)]
pub enum Runnable {
    Posix(PosixRunnable),
    Libc(LibcRunnable),
}

impl Runnable {
    /// Bind a compiled module; `glue` is the libc runtime manifest
    pub fn new(
        engine: Engine,
        module: CompiledModule,
        abi: AbiKind,
        glue: Option<&[u8]>,
    ) -> Self {
        match abi {
            AbiKind::Posix => Self::Posix(PosixRunnable::new(engine, module)),
            AbiKind::Libc => {
                let manifest = glue
                    .map(|bytes| {
                        RuntimeManifest::parse(bytes).unwrap_or_else(|e| {
                            crate::console_log!("[run] ignoring invalid runtime manifest: {}", e);
                            RuntimeManifest::default()
                        })
                    })
                    .unwrap_or_default();
                Self::Libc(LibcRunnable::new(engine, module, manifest))
            }
        }
    }

    pub fn abi(&self) -> AbiKind {
        match self {
            Self::Posix(_) => AbiKind::Posix,
            Self::Libc(_) => AbiKind::Libc,
        }
    }

    /// Execute once, reporting through `handler`
    pub fn run<H: RunHandler + 'static>(&self, request: RunRequest, handler: H) {
        crate::console_log!(
            "[run] {} ({}) {:?}",
            request.program,
            self.abi(),
            request.args
        );
        match self {
            Self::Posix(runnable) => runnable.run(request, handler),
            Self::Libc(runnable) => runnable.run(request, handler),
        }
    }

    /// Execute once without a terminal, capturing all output
    pub fn run_headless(&self, request: RunRequest) -> HeadlessOutput {
        let capture = Rc::new(RefCell::new(HeadlessOutput::default()));
        self.run(request, CaptureHandler::new(Rc::clone(&capture)));
        capture.take()
    }
}

/// Environment every program starts with
pub(crate) fn default_env() -> Vec<(String, String)> {
    [("HOME", "/"), ("PWD", "/"), ("TERM", "xterm-256color")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Report the outcome of an execution: error or success, then finish
pub(crate) fn report<H: RunHandler>(
    handler: &mut H,
    outcome: WasmResult<i32>,
    files: Vec<VirtualFile>,
) {
    let error = match outcome {
        Ok(0) => None,
        Ok(code) => Some(RunError::Exit(code)),
        Err(e) => Some(RunError::from(e)),
    };

    match &error {
        Some(error) => {
            crate::console_log!("[run] failed: {}", error);
            handler.on_error(error);
        }
        None => handler.on_success(&files),
    }
    handler.on_finish(files);
}

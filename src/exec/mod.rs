//! Execution contexts
//!
//! An [`ExecutionContext`] runs one resolved module at a time, either:
//! - `Foreground`: on the calling context, asking for input with blocking
//!   prompts (the degraded fallback), or
//! - `Background`: on a dedicated worker (a Web Worker in the browser, an
//!   OS thread natively), with stdin reads bridged to the asynchronous line
//!   editor through [`bridge::Bridge`].
//!
//! Both variants answer interactive runs with a [`RunReport`] and headless
//! runs with a [`HeadlessOutput`]. The single-session rule is enforced by
//! the caller through [`session::SessionSlot`].

mod background;
pub mod bridge;
mod foreground;
pub mod session;
pub mod worker;

#[cfg(target_arch = "wasm32")]
pub mod web_worker;

pub use background::Background;
pub use foreground::Foreground;
pub use session::{SessionGuard, SessionSlot};
pub use worker::WorkerEvent;

use crate::config::{ExecutionMode, TermConfig};
use crate::platform::Platform;
use crate::resolver::{ModuleDescriptor, ResolveError};
use crate::runnable::{HeadlessOutput, RunError, RunRequest};
use crate::vfs::VirtualFile;
use crate::wasm::Engine;
use futures::future::LocalBoxFuture;
use futures::task::AtomicWaker;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

/// Result type for sessions
pub type SessionResult<T> = Result<T, SessionError>;

/// Why a session did not produce a report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Another session is open
    AlreadyRunning,
    /// The user interrupted the run
    Interrupted,
    /// The program could not be resolved
    Resolve(ResolveError),
    /// The background context failed
    Worker(String),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => write!(f, "already running a command"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Resolve(e) => write!(f, "{}", e),
            Self::Worker(reason) => write!(f, "background context failed: {}", reason),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<ResolveError> for SessionError {
    fn from(err: ResolveError) -> Self {
        Self::Resolve(err)
    }
}

/// Outcome of an interactive run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Full post-run sandbox snapshot
    pub files: Vec<VirtualFile>,
    pub error: Option<RunError>,
}

/// Terminal side of an interactive run
pub trait CommandIo {
    fn stdout(&self, data: &[u8]);

    fn stderr(&self, data: &[u8]);

    /// Transient status text that must show up right away
    fn status(&self, text: &str) {
        self.stdout(text.as_bytes());
    }

    /// Ask the line editor for one line; `None` is end-of-input
    fn read_line(&self, caption: String) -> LocalBoxFuture<'static, Option<String>>;
}

/// The last unterminated output line, shown as the input prompt
#[derive(Debug, Clone, Default)]
pub struct CaptionBuffer {
    tail: String,
}

impl CaptionBuffer {
    pub fn feed(&mut self, data: &[u8]) {
        let text = String::from_utf8_lossy(data);
        match text.rfind('\n') {
            Some(idx) => self.tail = text[idx + 1..].to_string(),
            None => self.tail.push_str(&text),
        }
    }

    /// Record a line the user entered
    pub fn feed_input(&mut self, line: &str) {
        self.feed(line.as_bytes());
        if !line.ends_with('\n') {
            self.tail.clear();
        }
    }

    pub fn caption(&self) -> &str {
        &self.tail
    }
}

/// One-shot cancellation flag that can be awaited
#[derive(Debug, Default)]
pub struct CancelToken {
    cancelled: AtomicBool,
    waker: AtomicWaker,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.waker.wake();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is cancelled
    pub fn cancelled(self: &Arc<Self>) -> Cancelled {
        Cancelled(Arc::clone(self))
    }
}

/// Future returned by [`CancelToken::cancelled`]
pub struct Cancelled(Arc<CancelToken>);

impl Future for Cancelled {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.0.is_cancelled() {
            return Poll::Ready(());
        }
        self.0.waker.register(cx.waker());
        if self.0.is_cancelled() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

/// Cancels the background run in flight, if any
///
/// Cheap to clone; natively it can be moved to other threads.
#[derive(Debug, Clone, Default)]
pub struct InterruptHandle {
    current: Arc<Mutex<Option<Arc<CancelToken>>>>,
}

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interrupt the current run; returns whether one was in flight
    pub fn interrupt(&self) -> bool {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(token) => {
                crate::console_log!("[exec] interrupt requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Start a run with a fresh token, dropping any stale interrupt
    pub(crate) fn install(&self) -> Arc<CancelToken> {
        let token = Arc::new(CancelToken::default());
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&token));
        token
    }

    pub(crate) fn clear(&self) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Where commands execute
pub enum ExecutionContext {
    Foreground(Foreground),
    Background(Background),
}

impl ExecutionContext {
    /// Pick the context for `config.execution` on this platform
    pub fn new(config: &TermConfig, platform: Rc<dyn Platform>, engine: Engine) -> SessionResult<Self> {
        let background = match config.execution {
            ExecutionMode::Auto => platform.supports_background(),
            ExecutionMode::Foreground => false,
            ExecutionMode::Background => {
                if !platform.supports_background() {
                    return Err(SessionError::Worker(format!(
                        "background execution is not available on {}",
                        platform.name()
                    )));
                }
                true
            }
        };

        if background {
            match Background::spawn(config, engine.clone()) {
                Ok(context) => return Ok(Self::Background(context)),
                Err(e) if config.execution == ExecutionMode::Auto => {
                    crate::console_log!("[exec] falling back to prompts: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Self::Foreground(Foreground::new(platform, engine)))
    }

    /// Shown in the welcome text
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Foreground(_) => "Prompts Fallback",
            Self::Background(_) => "Worker",
        }
    }

    pub fn engine(&self) -> &Engine {
        match self {
            Self::Foreground(context) => context.engine(),
            Self::Background(context) => context.engine(),
        }
    }

    /// Run attached to the terminal
    pub async fn run(
        &self,
        descriptor: &ModuleDescriptor,
        request: RunRequest,
        io: Rc<dyn CommandIo>,
    ) -> SessionResult<RunReport> {
        match self {
            Self::Foreground(context) => Ok(context.run(descriptor, request, io)),
            Self::Background(context) => context.run(descriptor, request, io).await,
        }
    }

    /// Run detached, capturing all output
    pub async fn run_headless(
        &self,
        descriptor: &ModuleDescriptor,
        request: RunRequest,
    ) -> SessionResult<HeadlessOutput> {
        match self {
            Self::Foreground(context) => Ok(context.run_headless(descriptor, request)),
            Self::Background(context) => context.run_headless(descriptor, request).await,
        }
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        match self {
            Self::Foreground(context) => context.interrupt_handle(),
            Self::Background(context) => context.interrupt_handle(),
        }
    }

    /// Stop the background context for good
    pub fn terminate(&self) {
        if let Self::Background(context) = self {
            context.terminate();
        }
    }
}

//! Background worker protocol
//!
//! A worker executes one job at a time and reports back through
//! [`WorkerEvent`]s, in order: any number of `Stdout`/`Stderr`/`ReadLine`,
//! an optional `Failed`, then exactly one `Finished`. A `ReadLine` event is
//! always followed by the worker blocking on the bridge until the
//! foreground delivers.
//!
//! [`WorkerHandler`] is the worker-side run handler shared by the native
//! thread below and the Web Worker entry point. [`WireJob`] and
//! [`WireEvent`] are the JSON forms posted across the Web Worker boundary.

use super::CaptionBuffer;
use super::bridge::{Bridge, SharedWords};
use crate::runnable::{AbiKind, RunError, RunHandler, RunRequest};
use crate::vfs::VirtualFile;
use crate::wasm::WasmError;
use serde::{Deserialize, Serialize};

/// Messages from a worker to the foreground
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// The program blocks on stdin; answer through the bridge
    ReadLine { caption: String },
    Failed { error: RunError },
    Finished { files: Vec<VirtualFile> },
}

/// A job as posted to a Web Worker; the compiled module travels beside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireJob {
    pub program: String,
    pub args: Vec<String>,
    pub files: Vec<VirtualFile>,
    pub stdin: Option<String>,
    pub abi: AbiKind,
    pub glue: Option<Vec<u8>>,
    pub headless: bool,
}

impl WireJob {
    pub fn new(request: RunRequest, abi: AbiKind, glue: Option<Vec<u8>>, headless: bool) -> Self {
        Self {
            program: request.program,
            args: request.args,
            files: request.files,
            stdin: request.stdin,
            abi,
            glue,
            headless,
        }
    }

    pub fn request(&self) -> RunRequest {
        RunRequest::new(self.program.clone(), self.args.clone())
            .with_files(self.files.clone())
            .with_stdin(self.stdin.clone())
    }
}

/// A [`WorkerEvent`] as posted back from a Web Worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WireEvent {
    Stdout { data: Vec<u8> },
    Stderr { data: Vec<u8> },
    ReadLine { caption: String },
    Failed {
        message: String,
        exit_code: Option<i32>,
        interrupted: bool,
    },
    Finished { files: Vec<VirtualFile> },
}

impl From<WorkerEvent> for WireEvent {
    fn from(event: WorkerEvent) -> Self {
        match event {
            WorkerEvent::Stdout(data) => Self::Stdout { data },
            WorkerEvent::Stderr(data) => Self::Stderr { data },
            WorkerEvent::ReadLine { caption } => Self::ReadLine { caption },
            WorkerEvent::Failed { error } => {
                let (message, exit_code, interrupted) = match &error {
                    RunError::Exit(code) => (error.to_string(), Some(*code), false),
                    RunError::Interrupted => (error.to_string(), None, true),
                    RunError::Wasm(WasmError::Aborted { reason })
                    | RunError::Wasm(WasmError::InstantiationFailed { reason }) => {
                        (reason.clone(), None, false)
                    }
                    RunError::Wasm(other) => (other.to_string(), None, false),
                };
                Self::Failed {
                    message,
                    exit_code,
                    interrupted,
                }
            }
            WorkerEvent::Finished { files } => Self::Finished { files },
        }
    }
}

impl From<WireEvent> for WorkerEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::Stdout { data } => Self::Stdout(data),
            WireEvent::Stderr { data } => Self::Stderr(data),
            WireEvent::ReadLine { caption } => Self::ReadLine { caption },
            WireEvent::Failed {
                message,
                exit_code,
                interrupted,
            } => {
                let error = match (exit_code, interrupted) {
                    (Some(code), _) => RunError::Exit(code),
                    (None, true) => RunError::Interrupted,
                    (None, false) => RunError::Wasm(WasmError::Aborted { reason: message }),
                };
                Self::Failed { error }
            }
            WireEvent::Finished { files } => Self::Finished { files },
        }
    }
}

/// Where a worker sends its events
pub trait EventSink {
    fn send(&self, event: WorkerEvent);
}

/// Reads the cancellation flag of the worker
pub trait CancelFlag {
    fn is_set(&self) -> bool;
}

/// Worker-side run handler
pub struct WorkerHandler<S, B, C> {
    sink: S,
    bridge: B,
    cancelled: C,
    caption: CaptionBuffer,
    headless: bool,
}

impl<S, B, C> WorkerHandler<S, B, C> {
    /// `bridge` is only used by interactive (non-headless) runs
    pub fn new(sink: S, bridge: B, cancelled: C, headless: bool) -> Self {
        Self {
            sink,
            bridge,
            cancelled,
            caption: CaptionBuffer::default(),
            headless,
        }
    }
}

impl<S, B, C, W> RunHandler for WorkerHandler<S, B, C>
where
    S: EventSink,
    B: std::ops::Deref<Target = Bridge<W>>,
    W: SharedWords,
    C: CancelFlag,
{
    fn stdin(&mut self) -> Option<String> {
        if self.headless || self.cancelled.is_set() {
            return None;
        }
        let caption = self.caption.caption().to_string();
        let sink = &self.sink;
        let cancelled = &self.cancelled;
        let line = self
            .bridge
            .request(|| sink.send(WorkerEvent::ReadLine { caption }), || cancelled.is_set());
        if let Some(line) = &line {
            self.caption.feed_input(line);
        }
        line
    }

    fn stdout(&mut self, data: &[u8]) {
        self.caption.feed(data);
        self.sink.send(WorkerEvent::Stdout(data.to_vec()));
    }

    fn stderr(&mut self, data: &[u8]) {
        self.sink.send(WorkerEvent::Stderr(data.to_vec()));
    }

    fn interrupted(&self) -> bool {
        self.cancelled.is_set()
    }

    fn on_error(&mut self, error: &RunError) {
        self.sink.send(WorkerEvent::Failed {
            error: error.clone(),
        });
    }

    fn on_finish(&mut self, files: Vec<VirtualFile>) {
        self.sink.send(WorkerEvent::Finished { files });
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub use native::{Job, WorkerThread};

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use super::{CancelFlag, EventSink, WorkerEvent, WorkerHandler};
    use crate::exec::bridge::{Bridge, NativeWords};
    use crate::exec::{SessionError, SessionResult};
    use crate::runnable::{RunRequest, Runnable};
    use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc as std_mpsc;
    use std::thread;

    impl EventSink for UnboundedSender<WorkerEvent> {
        fn send(&self, event: WorkerEvent) {
            // A closed channel means the foreground gave up on this run
            let _ = self.unbounded_send(event);
        }
    }

    impl CancelFlag for Arc<AtomicBool> {
        fn is_set(&self) -> bool {
            self.load(Ordering::SeqCst)
        }
    }

    /// One run handed to the worker thread
    pub struct Job {
        pub runnable: Runnable,
        pub request: RunRequest,
        pub headless: bool,
        pub events: UnboundedSender<WorkerEvent>,
    }

    /// A dedicated OS thread running jobs one after another
    pub struct WorkerThread {
        jobs: std_mpsc::Sender<Job>,
        bridge: Arc<Bridge<NativeWords>>,
        cancelled: Arc<AtomicBool>,
    }

    impl WorkerThread {
        pub fn spawn() -> SessionResult<Self> {
            let (jobs, queue) = std_mpsc::channel::<Job>();
            let bridge = Arc::new(Bridge::native());
            let cancelled = Arc::new(AtomicBool::new(false));

            let thread_bridge = Arc::clone(&bridge);
            let thread_cancelled = Arc::clone(&cancelled);
            thread::Builder::new()
                .name("wasmterm-worker".to_string())
                .spawn(move || {
                    while let Ok(job) = queue.recv() {
                        let handler = WorkerHandler::new(
                            job.events,
                            Arc::clone(&thread_bridge),
                            Arc::clone(&thread_cancelled),
                            job.headless,
                        );
                        job.runnable.run(job.request, handler);
                    }
                    crate::console_log!("[worker] thread exiting");
                })
                .map_err(|e| SessionError::Worker(e.to_string()))?;

            crate::console_log!("[worker] thread started");
            Ok(Self {
                jobs,
                bridge,
                cancelled,
            })
        }

        /// Queue a run; events arrive on the returned receiver
        pub fn start(
            &self,
            runnable: Runnable,
            request: RunRequest,
            headless: bool,
        ) -> SessionResult<UnboundedReceiver<WorkerEvent>> {
            let (events, receiver) = mpsc::unbounded();
            self.jobs
                .send(Job {
                    runnable,
                    request,
                    headless,
                    events,
                })
                .map_err(|_| SessionError::Worker("worker thread is gone".to_string()))?;
            Ok(receiver)
        }

        /// Answer a pending `ReadLine`
        pub fn deliver(&self, line: Option<&str>) {
            self.bridge.deliver(line);
        }

        /// Abandon the thread: the current job stops at its next input
        /// request or epoch check, and no further jobs are accepted
        pub fn terminate(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
            if self.bridge.is_held() {
                self.bridge.deliver(None);
            }
        }
    }
}

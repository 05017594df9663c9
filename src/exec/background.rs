//! Background execution (worker)
//!
//! The foreground side of a background run: it posts the job, then pumps
//! worker events into the terminal until `Finished`. A `ReadLine` event
//! is answered by awaiting the line editor and delivering the result
//! through the bridge.
//!
//! An interrupt abandons the worker outright and provisions a fresh one;
//! the run is rejected with [`SessionError::Interrupted`] and whatever the
//! old worker still produces is dropped.

use super::{CommandIo, InterruptHandle, RunReport, SessionError, SessionResult, WorkerEvent};
use crate::config::TermConfig;
use crate::resolver::ModuleDescriptor;
use crate::runnable::{HeadlessOutput, RunRequest};
use crate::wasm::Engine;
use futures::StreamExt;
use futures::channel::mpsc::UnboundedReceiver;
use futures::future::{Either, select};
use std::cell::RefCell;
use std::rc::Rc;

#[cfg(not(target_arch = "wasm32"))]
type WorkerHost = super::worker::WorkerThread;

#[cfg(target_arch = "wasm32")]
type WorkerHost = super::web_worker::WebWorkerHost;

/// Runs commands on a dedicated worker
pub struct Background {
    engine: Engine,
    worker_url: String,
    worker: RefCell<WorkerHost>,
    interrupt: InterruptHandle,
}

impl Background {
    pub fn spawn(config: &TermConfig, engine: Engine) -> SessionResult<Self> {
        let worker = Self::provision(&config.worker_url)?;
        Ok(Self {
            engine,
            worker_url: config.worker_url.clone(),
            worker: RefCell::new(worker),
            interrupt: InterruptHandle::new(),
        })
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn provision(_worker_url: &str) -> SessionResult<WorkerHost> {
        WorkerHost::spawn()
    }

    #[cfg(target_arch = "wasm32")]
    fn provision(worker_url: &str) -> SessionResult<WorkerHost> {
        WorkerHost::spawn(worker_url)
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn start(
        &self,
        descriptor: &ModuleDescriptor,
        request: RunRequest,
        headless: bool,
    ) -> SessionResult<UnboundedReceiver<WorkerEvent>> {
        let runnable = descriptor.runnable(&self.engine);
        self.worker.borrow().start(runnable, request, headless)
    }

    #[cfg(target_arch = "wasm32")]
    fn start(
        &self,
        descriptor: &ModuleDescriptor,
        request: RunRequest,
        headless: bool,
    ) -> SessionResult<UnboundedReceiver<WorkerEvent>> {
        self.worker.borrow().start(descriptor, request, headless)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    pub async fn run(
        &self,
        descriptor: &ModuleDescriptor,
        request: RunRequest,
        io: Rc<dyn CommandIo>,
    ) -> SessionResult<RunReport> {
        let output = self.session(descriptor, request, Some(io)).await?;
        Ok(RunReport {
            files: output.files,
            error: output.error,
        })
    }

    pub async fn run_headless(
        &self,
        descriptor: &ModuleDescriptor,
        request: RunRequest,
    ) -> SessionResult<HeadlessOutput> {
        self.session(descriptor, request, None).await
    }

    async fn session(
        &self,
        descriptor: &ModuleDescriptor,
        request: RunRequest,
        io: Option<Rc<dyn CommandIo>>,
    ) -> SessionResult<HeadlessOutput> {
        let events = self.start(descriptor, request, io.is_none())?;
        let result = self.pump(events, io).await;
        self.interrupt.clear();

        if let Err(e) = &result {
            crate::console_log!("[exec] session ended: {}", e);
            self.restart();
        }
        result
    }

    async fn pump(
        &self,
        mut events: UnboundedReceiver<WorkerEvent>,
        io: Option<Rc<dyn CommandIo>>,
    ) -> SessionResult<HeadlessOutput> {
        let token = self.interrupt.install();
        let mut output = HeadlessOutput::default();

        loop {
            let event = match select(events.next(), token.cancelled()).await {
                Either::Left((Some(event), _)) => event,
                Either::Left((None, _)) => {
                    return Err(SessionError::Worker("worker stopped unexpectedly".to_string()));
                }
                Either::Right(_) => return Err(SessionError::Interrupted),
            };

            match event {
                WorkerEvent::Stdout(data) => {
                    if let Some(io) = &io {
                        io.stdout(&data);
                    }
                    let text = String::from_utf8_lossy(&data);
                    output.output.push_str(&text);
                    output.stdout.push_str(&text);
                }
                WorkerEvent::Stderr(data) => {
                    if let Some(io) = &io {
                        io.stderr(&data);
                    }
                    let text = String::from_utf8_lossy(&data);
                    output.output.push_str(&text);
                    output.stderr.push_str(&text);
                }
                WorkerEvent::ReadLine { caption } => {
                    let line = match &io {
                        Some(io) => match select(io.read_line(caption), token.cancelled()).await {
                            Either::Left((line, _)) => line.map(|l| format!("{}\n", l)),
                            Either::Right(_) => return Err(SessionError::Interrupted),
                        },
                        None => None,
                    };
                    self.worker.borrow().deliver(line.as_deref());
                }
                WorkerEvent::Failed { error } => output.error = Some(error),
                WorkerEvent::Finished { files } => {
                    output.files = files;
                    return Ok(output);
                }
            }
        }
    }

    /// Hard stop of the current worker and a fresh one in its place
    fn restart(&self) {
        self.engine.interrupt();
        self.worker.borrow().terminate();
        match Self::provision(&self.worker_url) {
            Ok(worker) => *self.worker.borrow_mut() = worker,
            Err(e) => crate::console_log!("[exec] could not provision a new worker: {}", e),
        }
    }

    /// Stop the worker without replacing it
    pub fn terminate(&self) {
        self.interrupt.interrupt();
        self.worker.borrow().terminate();
    }
}

//! Foreground execution (prompts fallback)
//!
//! The program runs on the calling context. A stdin read blocks on a
//! modal prompt; the entered line is echoed to the terminal and a
//! cancelled prompt is end-of-input. Nothing else can happen while a
//! command runs, so there is nothing to interrupt.

use super::{CaptionBuffer, CommandIo, InterruptHandle, RunReport};
use crate::platform::Platform;
use crate::resolver::ModuleDescriptor;
use crate::runnable::{HeadlessOutput, RunError, RunHandler, RunRequest};
use crate::vfs::VirtualFile;
use crate::wasm::Engine;
use std::cell::RefCell;
use std::rc::Rc;

/// Runs commands on the calling context
pub struct Foreground {
    platform: Rc<dyn Platform>,
    engine: Engine,
    interrupt: InterruptHandle,
}

/// Forwards output to the terminal and asks the platform for input
struct PromptHandler {
    platform: Rc<dyn Platform>,
    io: Rc<dyn CommandIo>,
    caption: CaptionBuffer,
    report: Rc<RefCell<RunReport>>,
}

impl RunHandler for PromptHandler {
    fn stdin(&mut self) -> Option<String> {
        let line = self.platform.prompt(self.caption.caption())?;
        let echoed = format!("{}\n", line);
        self.io.stdout(echoed.as_bytes());
        self.caption.feed_input(&echoed);
        Some(echoed)
    }

    fn stdout(&mut self, data: &[u8]) {
        self.caption.feed(data);
        self.io.stdout(data);
    }

    fn stderr(&mut self, data: &[u8]) {
        self.io.stderr(data);
    }

    fn on_error(&mut self, error: &RunError) {
        self.report.borrow_mut().error = Some(error.clone());
    }

    fn on_finish(&mut self, files: Vec<VirtualFile>) {
        self.report.borrow_mut().files = files;
    }
}

impl Foreground {
    pub fn new(platform: Rc<dyn Platform>, engine: Engine) -> Self {
        Self {
            platform,
            engine,
            interrupt: InterruptHandle::new(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn run(&self, descriptor: &ModuleDescriptor, request: RunRequest, io: Rc<dyn CommandIo>) -> RunReport {
        let report = Rc::new(RefCell::new(RunReport::default()));
        let handler = PromptHandler {
            platform: Rc::clone(&self.platform),
            io,
            caption: CaptionBuffer::default(),
            report: Rc::clone(&report),
        };
        descriptor.runnable(&self.engine).run(request, handler);
        report.take()
    }

    pub fn run_headless(&self, descriptor: &ModuleDescriptor, request: RunRequest) -> HeadlessOutput {
        descriptor.runnable(&self.engine).run_headless(request)
    }

    /// Never active: a foreground run cannot be interrupted
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }
}

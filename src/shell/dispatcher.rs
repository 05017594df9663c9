//! Pipeline dispatcher
//!
//! Runs one parsed line stage by stage. Callables answer in-process; every
//! other stage is resolved to a module and handed to the execution context.
//! Non-last stages run headless and their stdout becomes the stdin preset of
//! the next stage; the last stage runs attached to the terminal.
//!
//! [`Dispatcher::run_line`] never fails. Errors end the line and are written
//! to the terminal, except interrupts, which the user already knows about.

use super::commands::{CommandError, CommandRegistry};
use super::parser::{self, SimpleCommand};
use crate::exec::{CommandIo, ExecutionContext, SessionError, SessionSlot};
use crate::resolver::{ModuleDescriptor, ModuleResolver};
use crate::runnable::{RunError, RunRequest};
use crate::vfs::VirtualFile;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Status line shown while a module is resolved
pub const LOADING_LINE: &str = "loading web assembly ...";

/// Erase the current terminal line
pub const CLEAR_LINE: &str = "\x1b[2K\r";

const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Why a line stopped early
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    Session(SessionError),
    Command(CommandError),
    Run(RunError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(e) => write!(f, "{}", e),
            Self::Command(e) => write!(f, "{}", e),
            Self::Run(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<SessionError> for DispatchError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl From<crate::resolver::ResolveError> for DispatchError {
    fn from(err: crate::resolver::ResolveError) -> Self {
        Self::Session(SessionError::Resolve(err))
    }
}

impl From<CommandError> for DispatchError {
    fn from(err: CommandError) -> Self {
        Self::Command(err)
    }
}

impl DispatchError {
    pub fn is_interrupt(&self) -> bool {
        matches!(
            self,
            Self::Session(SessionError::Interrupted) | Self::Run(RunError::Interrupted)
        )
    }
}

/// Result type for dispatching
pub type DispatchResult<T> = Result<T, DispatchError>;

type FilesListener = Rc<dyn Fn(&[VirtualFile])>;

/// Runs lines against the registry, the resolver and the execution context
pub struct Dispatcher {
    registry: Rc<RefCell<CommandRegistry>>,
    resolver: Rc<ModuleResolver>,
    context: Rc<ExecutionContext>,
    /// One line in flight
    line: SessionSlot,
    /// One execution session in flight
    session: SessionSlot,
    files: RefCell<Vec<VirtualFile>>,
    on_files: RefCell<Option<FilesListener>>,
}

impl Dispatcher {
    pub fn new(
        registry: Rc<RefCell<CommandRegistry>>,
        resolver: Rc<ModuleResolver>,
        context: Rc<ExecutionContext>,
    ) -> Self {
        Self {
            registry,
            resolver,
            context,
            line: SessionSlot::new(),
            session: SessionSlot::new(),
            files: RefCell::new(Vec::new()),
            on_files: RefCell::new(None),
        }
    }

    pub fn registry(&self) -> &Rc<RefCell<CommandRegistry>> {
        &self.registry
    }

    pub fn resolver(&self) -> &Rc<ModuleResolver> {
        &self.resolver
    }

    pub fn context(&self) -> &Rc<ExecutionContext> {
        &self.context
    }

    /// Whether an execution session is open
    pub fn is_running_command(&self) -> bool {
        self.session.is_running()
    }

    /// Whether a line is being dispatched
    pub fn is_busy(&self) -> bool {
        self.line.is_running()
    }

    /// Current sandbox snapshot
    pub fn files(&self) -> Vec<VirtualFile> {
        self.files.borrow().clone()
    }

    /// Replace the sandbox snapshot
    pub fn set_files(&self, files: Vec<VirtualFile>) {
        *self.files.borrow_mut() = files;
        let listener = self.on_files.borrow().clone();
        if let Some(listener) = listener {
            listener(&self.files.borrow());
        }
    }

    /// Called whenever a run replaced the snapshot
    pub fn on_files_changed(&self, listener: impl Fn(&[VirtualFile]) + 'static) {
        *self.on_files.borrow_mut() = Some(Rc::new(listener));
    }

    /// Parse and run one line, reporting every failure on `io`
    pub async fn run_line(&self, line: &str, io: Rc<dyn CommandIo>) {
        let _line = match self.line.acquire() {
            Ok(guard) => guard,
            Err(e) => {
                write_error(io.as_ref(), &DispatchError::from(e));
                return;
            }
        };

        if let Err(e) = self.run_pipeline(line, &io).await {
            crate::console_log!("[shell] line failed: {}", e);
            if !e.is_interrupt() {
                write_error(io.as_ref(), &e);
            }
        }
    }

    async fn run_pipeline(&self, line: &str, io: &Rc<dyn CommandIo>) -> DispatchResult<()> {
        let pipeline = parser::parse(line);
        for warning in &pipeline.warnings {
            io.stderr(format!("{}warning: {}{}\n", YELLOW, warning, RESET).as_bytes());
        }

        let count = pipeline.commands.len();
        let mut stdin: Option<String> = None;

        for (index, command) in pipeline.commands.into_iter().enumerate() {
            let last = index + 1 == count;

            let callback = self
                .registry
                .borrow()
                .get(&command.program)
                .map(|c| Rc::clone(&c.callback));

            if let Some(callback) = callback {
                let output = callback(command.args, stdin.take())?.collect().await?;
                if last {
                    io.stdout(output.as_bytes());
                } else if !output.is_empty() {
                    stdin = Some(output);
                }
                continue;
            }

            if last {
                self.run_command(command, stdin.take(), io).await?;
            } else {
                let output = self.run_command_headless(command, stdin.take(), io).await?;
                stdin = (!output.is_empty()).then_some(output);
            }
        }
        Ok(())
    }

    fn request(&self, command: SimpleCommand, stdin: Option<String>) -> RunRequest {
        RunRequest::new(command.program, command.args)
            .with_files(self.files())
            .with_stdin(stdin)
    }

    async fn load(&self, name: &str, io: &Rc<dyn CommandIo>) -> DispatchResult<ModuleDescriptor> {
        io.status(LOADING_LINE);
        let descriptor = self.resolver.resolve(name).await;
        io.status(CLEAR_LINE);
        Ok(descriptor?)
    }

    /// Run attached to the terminal
    async fn run_command(
        &self,
        command: SimpleCommand,
        stdin: Option<String>,
        io: &Rc<dyn CommandIo>,
    ) -> DispatchResult<()> {
        let _session = self.session.acquire()?;
        crate::console_log!("[shell] run {} {:?}", command.program, command.args);

        let descriptor = self.load(&command.program, io).await?;
        let request = self.request(command, stdin);
        let report = self.context.run(&descriptor, request, Rc::clone(io)).await?;

        self.set_files(report.files);
        match report.error {
            Some(error) => Err(DispatchError::Run(error)),
            None => Ok(()),
        }
    }

    /// Run detached; returns the captured stdout
    async fn run_command_headless(
        &self,
        command: SimpleCommand,
        stdin: Option<String>,
        io: &Rc<dyn CommandIo>,
    ) -> DispatchResult<String> {
        let _session = self.session.acquire()?;
        crate::console_log!("[shell] run headless {} {:?}", command.program, command.args);

        let descriptor = self.load(&command.program, io).await?;
        let request = self.request(command, stdin);
        let output = self.context.run_headless(&descriptor, request).await?;

        self.set_files(output.files);
        // A failing stage still feeds the next one
        if let Some(error) = &output.error {
            write_error(io.as_ref(), &DispatchError::Run(error.clone()));
        }
        Ok(output.stdout)
    }
}

fn write_error(io: &dyn CommandIo, error: &DispatchError) {
    io.stderr(format!("{}\n", error).as_bytes());
}

//! Terminal controller
//!
//! Glue between a terminal widget and the engine: lifecycle
//! (activate/dispose), the read-eval-print loop, callable registration and
//! host hooks. The browser binding lives in `xterm`.

pub mod surface;

#[cfg(target_arch = "wasm32")]
pub mod xterm;

pub use surface::{Interrupter, LineReader, OutputGate, TermIo, TerminalSurface, crlf};

use crate::config::TermConfig;
use crate::exec::{ExecutionContext, InterruptHandle};
use crate::history::History;
use crate::resolver::{ModuleResolver, ResolveResult};
use crate::shell::{CommandOutput, CommandRegistry, CommandResult, Completion, Dispatcher};
use crate::vfs::VirtualFile;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

/// Host callbacks around the controller lifecycle; all default to no-ops
pub trait ControllerHooks {
    fn on_activated(&self) {}

    fn on_disposed(&self) {}

    fn on_before_command_run(&self) {}

    fn on_command_run_finish(&self) {}

    /// The sandbox snapshot was replaced after a run
    fn on_file_system_update(&self, _files: &[VirtualFile]) {}
}

/// Hooks that do nothing
pub struct NoHooks;

impl ControllerHooks for NoHooks {}

type SharedHooks = Rc<RefCell<Rc<dyn ControllerHooks>>>;

/// Welcome text, `\n` line endings
pub fn welcome_text(commands: &[String], backend: &str) -> String {
    let mut text = String::from("\x1b[1;32mwasmterm\x1b[0m\n");
    text.push_str("Run WebAssembly binaries built for a POSIX or a WASI (libc) target.\n");
    text.push_str("You can also register and run your own commands.\n\n");
    text.push_str(&format!(
        "Commands: {}. Backend: {}.\n\n",
        commands.join(", "),
        backend
    ));
    text
}

/// Drives one terminal
pub struct Controller {
    config: TermConfig,
    surface: Rc<dyn TerminalSurface>,
    reader: Rc<dyn LineReader>,
    dispatcher: Rc<Dispatcher>,
    history: Rc<RefCell<History>>,
    hooks: SharedHooks,
    gate: OutputGate,
    active: Cell<bool>,
}

impl Controller {
    pub fn new(
        config: TermConfig,
        surface: Rc<dyn TerminalSurface>,
        reader: Rc<dyn LineReader>,
        context: ExecutionContext,
        resolver: ModuleResolver,
    ) -> Self {
        let registry = Rc::new(RefCell::new(CommandRegistry::new()));
        let dispatcher = Rc::new(Dispatcher::new(registry, Rc::new(resolver), Rc::new(context)));

        let hooks: SharedHooks = Rc::new(RefCell::new(Rc::new(NoHooks)));
        let listener = Rc::clone(&hooks);
        dispatcher.on_files_changed(move |files| {
            let hooks = Rc::clone(&listener.borrow());
            hooks.on_file_system_update(files);
        });

        Self {
            history: Rc::new(RefCell::new(History::new(config.history_size))),
            config,
            surface,
            reader,
            dispatcher,
            hooks,
            gate: OutputGate::new(),
            active: Cell::new(false),
        }
    }

    pub fn config(&self) -> &TermConfig {
        &self.config
    }

    /// Shared with the line editor for up/down navigation
    pub fn history(&self) -> Rc<RefCell<History>> {
        Rc::clone(&self.history)
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn is_running_command(&self) -> bool {
        self.dispatcher.is_running_command()
    }

    pub fn set_hooks(&self, hooks: impl ControllerHooks + 'static) {
        *self.hooks.borrow_mut() = Rc::new(hooks);
    }

    fn hooks(&self) -> Rc<dyn ControllerHooks> {
        Rc::clone(&self.hooks.borrow())
    }

    pub fn backend_name(&self) -> &'static str {
        self.dispatcher.context().backend_name()
    }

    /// Register built-ins, print the welcome text
    pub fn activate(&self) {
        self.register_builtins();
        self.active.set(true);
        if self.config.welcome {
            self.surface.write(&crlf(&self.welcome()));
        }
        crate::console_log!("[term] activated ({} backend)", self.backend_name());
        self.hooks().on_activated();
    }

    /// Stop the background context and leave the loop at its next prompt
    pub fn dispose(&self) {
        self.active.set(false);
        self.dispatcher.context().terminate();
        crate::console_log!("[term] disposed");
        self.hooks().on_disposed();
    }

    pub fn welcome(&self) -> String {
        welcome_text(&self.commands(), self.backend_name())
    }

    fn register_builtins(&self) {
        let registry = Rc::downgrade(self.dispatcher.registry());
        self.register_command(
            "help",
            move |_, _| {
                let names = names_of(&registry);
                Ok(format!("Commands: {}\n", names.join(", ")).into())
            },
            vec![],
        );

        let registry = Rc::downgrade(self.dispatcher.registry());
        let surface = Rc::clone(&self.surface);
        let backend = self.backend_name();
        self.register_command(
            "clear",
            move |_, _| {
                surface.clear();
                Ok(welcome_text(&names_of(&registry), backend).into())
            },
            vec![],
        );
    }

    /// Read-eval-print loop; returns when the reader closes or on dispose
    pub async fn repl(&self) {
        while self.active.get() {
            let Some(line) = self.reader.read(self.config.prompt.clone()).await else {
                break;
            };
            if !self.active.get() {
                break;
            }
            if !self.reader.echoes_newline() {
                self.surface.write("\r\n");
            }
            if line.trim().is_empty() {
                continue;
            }

            self.history.borrow_mut().push(&line);
            self.hooks().on_before_command_run();

            self.run_line(&line).await;

            self.hooks().on_command_run_finish();
            self.history.borrow_mut().rewind();
        }
        crate::console_log!("[term] repl finished");
    }

    /// Run one line; output goes to the surface, failures included
    pub async fn run_line(&self, line: &str) {
        self.gate.open();
        let io = Rc::new(TermIo::new(
            Rc::clone(&self.surface),
            Rc::clone(&self.reader),
            self.gate.clone(),
        ));
        self.dispatcher.run_line(line, io.clone()).await;
        io.flush();
        if !io.at_line_start() {
            self.surface.write("\r\n");
        }
    }

    pub fn register_command<F>(&self, name: &str, callback: F, autocomplete: Vec<String>)
    where
        F: Fn(Vec<String>, Option<String>) -> CommandResult<CommandOutput> + 'static,
    {
        self.dispatcher
            .registry()
            .borrow_mut()
            .register(name, callback, autocomplete);
    }

    pub fn unregister_command(&self, name: &str) -> bool {
        self.dispatcher.registry().borrow_mut().unregister(name)
    }

    /// Tab completion for a partially typed line
    pub fn complete(&self, line: &str) -> Completion {
        self.dispatcher.registry().borrow().complete(line)
    }

    /// Registered callables, sorted
    pub fn commands(&self) -> Vec<String> {
        self.dispatcher.registry().borrow().names()
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.dispatcher.context().interrupt_handle()
    }

    /// Interrupt the running command and drop its remaining output
    pub fn interrupter(&self) -> Interrupter {
        Interrupter::new(self.interrupt_handle(), self.gate.clone())
    }

    /// Current sandbox snapshot
    pub fn files(&self) -> Vec<VirtualFile> {
        self.dispatcher.files()
    }

    /// Replace the sandbox snapshot
    pub fn set_files(&self, files: Vec<VirtualFile>) {
        self.dispatcher.set_files(files);
    }

    /// Add dropped module files (`<name>.bin`, optional `<name>.rt`)
    pub async fn ingest(&self, files: Vec<(String, Vec<u8>)>) -> ResolveResult<Vec<String>> {
        self.dispatcher.resolver().ingest(files).await
    }
}

fn names_of(registry: &Weak<RefCell<CommandRegistry>>) -> Vec<String> {
    registry
        .upgrade()
        .map(|registry| registry.borrow().names())
        .unwrap_or_default()
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::surface::tests::{Screen, Scripted};
    use super::*;
    use crate::config::ExecutionMode;
    use crate::platform::Platform;
    use crate::resolver::StaticFetcher;
    use crate::wasm::Engine;
    use futures::executor::block_on;

    struct Headless;

    impl Platform for Headless {
        fn name(&self) -> &'static str {
            "test"
        }

        fn supports_background(&self) -> bool {
            false
        }

        fn prompt(&self, _caption: &str) -> Option<String> {
            None
        }
    }

    #[derive(Default)]
    struct Counting {
        before: Rc<Cell<usize>>,
        after: Rc<Cell<usize>>,
        activated: Rc<Cell<bool>>,
    }

    impl ControllerHooks for Counting {
        fn on_activated(&self) {
            self.activated.set(true);
        }

        fn on_before_command_run(&self) {
            self.before.set(self.before.get() + 1);
        }

        fn on_command_run_finish(&self) {
            self.after.set(self.after.get() + 1);
        }
    }

    fn controller(lines: &[&str]) -> (Controller, Rc<Screen>) {
        let engine = Engine::new().unwrap();
        let mut config = TermConfig::default();
        config.registry_url = None;
        config.execution = ExecutionMode::Foreground;

        let resolver = ModuleResolver::new(&config, engine.clone(), Rc::new(StaticFetcher::new()));
        let context = ExecutionContext::new(&config, Rc::new(Headless), engine).unwrap();
        let screen = Rc::new(Screen::default());
        let reader = Rc::new(Scripted::new(lines));
        (Controller::new(config, screen.clone(), reader, context, resolver), screen)
    }

    // ============ Lifecycle ============

    #[test]
    fn test_activate_prints_welcome() {
        let (controller, screen) = controller(&[]);
        let hooks = Counting::default();
        let activated = Rc::clone(&hooks.activated);
        controller.set_hooks(hooks);

        controller.activate();
        assert!(activated.get());
        assert_eq!(controller.commands(), vec!["clear", "help"]);
        let text = screen.text.borrow();
        assert!(text.contains("Commands: clear, help. Backend: Prompts Fallback."));
        assert!(text.contains("\r\n"));
    }

    #[test]
    fn test_repl_runs_lines_until_input_closes() {
        let (controller, screen) = controller(&["help", "  ", "help"]);
        let hooks = Counting::default();
        let before = Rc::clone(&hooks.before);
        let after = Rc::clone(&hooks.after);
        controller.set_hooks(hooks);
        controller.activate();
        screen.text.borrow_mut().clear();

        block_on(controller.repl());
        assert_eq!(before.get(), 2);
        assert_eq!(after.get(), 2);
        assert_eq!(controller.history().borrow().len(), 1);
        assert_eq!(
            screen.text.borrow().matches("Commands: clear, help\r\n").count(),
            2
        );
    }

    #[test]
    fn test_dispose_stops_repl() {
        let (controller, _) = controller(&["help"]);
        controller.activate();
        controller.dispose();
        assert!(!controller.is_active());
        block_on(controller.repl());
        assert!(controller.history().borrow().is_empty());
    }

    // ============ Commands ============

    #[test]
    fn test_register_and_run_callable() {
        let (controller, screen) = controller(&[]);
        controller.register_command(
            "greet",
            |args, _| Ok(format!("hi {}", args.join(" ")).into()),
            vec![],
        );
        block_on(controller.run_line("greet bob"));
        assert_eq!(*screen.text.borrow(), "hi bob\r\n");

        assert!(controller.unregister_command("greet"));
        assert!(controller.commands().is_empty());
    }

    #[test]
    fn test_clear_reprints_welcome() {
        let (controller, screen) = controller(&[]);
        controller.activate();
        screen.text.borrow_mut().clear();

        block_on(controller.run_line("clear"));
        assert_eq!(screen.clears.get(), 1);
        let text = screen.text.borrow();
        assert!(text.starts_with("\x1b[1;32mwasmterm"));
        assert_eq!(text.matches("wasmterm").count(), 1);
    }

    #[test]
    fn test_complete_builtins() {
        let (controller, _) = controller(&[]);
        controller.activate();
        controller.register_command("cat-all", |_, _| Ok(().into()), vec!["--fast".to_string()]);

        assert_eq!(controller.complete("c").candidates, vec!["cat-all", "clear"]);
        assert_eq!(controller.complete("cat-all -").candidates, vec!["--fast"]);
    }

    #[test]
    fn test_file_hook_fires_on_set_files() {
        struct Files(Rc<Cell<usize>>);

        impl ControllerHooks for Files {
            fn on_file_system_update(&self, files: &[VirtualFile]) {
                self.0.set(files.len());
            }
        }

        let (controller, _) = controller(&[]);
        let seen = Rc::new(Cell::new(0));
        controller.set_hooks(Files(Rc::clone(&seen)));
        controller.set_files(vec![VirtualFile::new("/a", "x"), VirtualFile::new("/b", "y")]);
        assert_eq!(seen.get(), 2);
        assert_eq!(controller.files().len(), 2);
    }
}

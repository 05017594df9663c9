//! Browser binding: xterm.js surface, line editor and the `WasmTerm` class
//!
//! ```js
//! const term = new WasmTerm("./bin")
//! term.registerCommand("rev", (argv, stdin) => [...(stdin ?? "")].reverse().join(""))
//! term.activate(new Terminal())
//! ```
//!
//! A callable may return a value, a Promise, or an (async) iterator.

use super::{Controller, Interrupter, LineReader, TerminalSurface};
use crate::config::TermConfig;
use crate::exec::ExecutionContext;
use crate::history::History;
use crate::platform::{self, Platform};
use crate::resolver::{HttpFetcher, ModuleResolver};
use crate::shell::{CommandError, CommandOutput, CommandResult, Completion};
use crate::wasm::Engine;
use futures::channel::oneshot;
use futures::future::LocalBoxFuture;
use futures::{FutureExt, Stream};
use js_sys::{Array, Function, Object, Promise, Reflect};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{JsFuture, future_to_promise, spawn_local};

// Bindings to the xterm.js `Terminal` handed to `activate`
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = Terminal)]
    type XTerm;

    #[wasm_bindgen(method)]
    fn write(this: &XTerm, data: &str);

    #[wasm_bindgen(method)]
    fn clear(this: &XTerm);

    #[wasm_bindgen(method, js_name = onData)]
    fn on_data(this: &XTerm, callback: &Function);
}

fn js_message(value: &JsValue) -> String {
    value
        .as_string()
        .or_else(|| value.dyn_ref::<js_sys::Error>().map(|e| String::from(e.message())))
        .unwrap_or_else(|| format!("{:?}", value))
}

/// String form of a callable's value; nothing becomes empty
fn js_text(value: JsValue) -> String {
    if value.is_null() || value.is_undefined() {
        return String::new();
    }
    match value.as_string() {
        Some(text) => text,
        None => String::from(Object::from(value).to_string()),
    }
}

fn command_error(value: JsValue) -> CommandError {
    CommandError::new(js_message(&value))
}

// ============ Surface ============

struct XtermSurface {
    xterm: XTerm,
}

impl TerminalSurface for XtermSurface {
    fn write(&self, text: &str) {
        self.xterm.write(text);
    }

    fn clear(&self) {
        self.xterm.clear();
    }
}

// ============ Line editor ============

type Completer = Rc<dyn Fn(&str) -> Completion>;

#[derive(Default)]
struct ReaderState {
    prompt: String,
    line: String,
    pending: Option<oneshot::Sender<Option<String>>>,
    history: Option<Rc<RefCell<History>>>,
    interrupter: Option<Interrupter>,
    completer: Option<Completer>,
}

/// Minimal line editor on top of xterm's `onData`
struct XtermReader {
    surface: Rc<XtermSurface>,
    state: RefCell<ReaderState>,
}

impl XtermReader {
    fn new(surface: Rc<XtermSurface>) -> Self {
        Self {
            surface,
            state: RefCell::new(ReaderState::default()),
        }
    }

    fn attach(&self, history: Rc<RefCell<History>>, interrupter: Interrupter, completer: Completer) {
        let mut state = self.state.borrow_mut();
        state.history = Some(history);
        state.interrupter = Some(interrupter);
        state.completer = Some(completer);
    }

    /// End the pending read with end-of-input
    fn close(&self) {
        if let Some(pending) = self.state.borrow_mut().pending.take() {
            let _ = pending.send(None);
        }
    }

    fn redraw(&self) {
        let state = self.state.borrow();
        self.surface
            .write(&format!("\r\x1b[K{}{}", state.prompt, state.line));
    }

    fn recall(&self, previous: bool) {
        let entry = {
            let state = self.state.borrow();
            let Some(history) = &state.history else {
                return;
            };
            let mut history = history.borrow_mut();
            let entry = if previous {
                history.get_previous()
            } else {
                history.get_next()
            };
            entry.map(str::to_string).unwrap_or_default()
        };
        self.state.borrow_mut().line = entry;
        self.redraw();
    }

    /// Tab: a single candidate replaces the last word, several are listed
    fn complete(&self) {
        let (line, completer) = {
            let state = self.state.borrow();
            (state.line.clone(), state.completer.clone())
        };
        let Some(completer) = completer else {
            return;
        };
        let completion = completer(&line);

        match completion.candidates.as_slice() {
            [] => return,
            [only] => {
                let mut state = self.state.borrow_mut();
                state.line.truncate(completion.start);
                state.line.push_str(only);
                state.line.push(' ');
            }
            many => self.surface.write(&format!("\r\n{}\r\n", many.join("  "))),
        }
        self.redraw();
    }

    fn handle_data(&self, data: &str) {
        if data == "\x03" {
            let interrupter = self.state.borrow().interrupter.clone();
            if interrupter.is_some_and(|i| i.fire()) {
                self.surface.write("^C\r\n");
                return;
            }
            if self.state.borrow().pending.is_some() {
                let prompt = {
                    let mut state = self.state.borrow_mut();
                    state.line.clear();
                    state.prompt.clone()
                };
                self.surface.write(&format!("^C\r\n{}", prompt));
            }
            return;
        }

        if self.state.borrow().pending.is_none() {
            return;
        }

        match data {
            "\x1b[A" => return self.recall(true),
            "\x1b[B" => return self.recall(false),
            _ if data.starts_with('\x1b') => return,
            _ => {}
        }

        for c in data.chars() {
            match c {
                '\r' | '\n' => {
                    let (pending, line) = {
                        let mut state = self.state.borrow_mut();
                        (state.pending.take(), std::mem::take(&mut state.line))
                    };
                    if let Some(pending) = pending {
                        let _ = pending.send(Some(line));
                    }
                    return;
                }
                '\t' => self.complete(),
                '\x7f' | '\x08' => {
                    if self.state.borrow_mut().line.pop().is_some() {
                        self.surface.write("\x08 \x08");
                    }
                }
                c if c.is_control() => {}
                c => {
                    self.state.borrow_mut().line.push(c);
                    self.surface.write(c.encode_utf8(&mut [0; 4]));
                }
            }
        }
    }
}

impl LineReader for XtermReader {
    fn read(&self, prompt: String) -> LocalBoxFuture<'static, Option<String>> {
        let (sender, receiver) = oneshot::channel();
        {
            let mut state = self.state.borrow_mut();
            if let Some(previous) = state.pending.replace(sender) {
                let _ = previous.send(None);
            }
            state.line.clear();
            state.prompt = prompt.clone();
        }
        self.surface.write(&prompt);
        receiver.map(|line| line.ok().flatten()).boxed_local()
    }
}

// ============ Callables ============

/// Drain a JS iterator or async iterator
fn iterate(iterator: JsValue, next: Function) -> impl Stream<Item = CommandResult<String>> {
    futures::stream::unfold(Some((iterator, next)), |state| async move {
        let (iterator, next) = state?;
        let step = match next.call0(&iterator) {
            Ok(step) => step,
            Err(e) => return Some((Err(command_error(e)), None)),
        };
        let step = match step.dyn_ref::<Promise>() {
            Some(promise) => match JsFuture::from(promise.clone()).await {
                Ok(step) => step,
                Err(e) => return Some((Err(command_error(e)), None)),
            },
            None => step,
        };

        let done = Reflect::get(&step, &JsValue::from_str("done"))
            .ok()
            .and_then(|d| d.as_bool())
            .unwrap_or(true);
        if done {
            return None;
        }
        let value = Reflect::get(&step, &JsValue::from_str("value")).unwrap_or(JsValue::UNDEFINED);
        Some((Ok(js_text(value)), Some((iterator, next))))
    })
}

fn js_output(value: JsValue) -> CommandOutput {
    if let Some(promise) = value.dyn_ref::<Promise>() {
        let future = JsFuture::from(promise.clone());
        return CommandOutput::future(async move { future.await.map(js_text).map_err(command_error) });
    }
    if let Ok(next) = Reflect::get(&value, &JsValue::from_str("next")) {
        if let Ok(next) = next.dyn_into::<Function>() {
            return CommandOutput::stream(iterate(value, next));
        }
    }
    CommandOutput::Text(js_text(value))
}

/// Wrap a JS function `(argv, stdin) => value | Promise | iterator`
fn js_command(callback: Function) -> impl Fn(Vec<String>, Option<String>) -> CommandResult<CommandOutput> {
    move |args, stdin| {
        let argv: Array = args.iter().map(|a| JsValue::from_str(a)).collect();
        let stdin = stdin.map(|s| JsValue::from_str(&s)).unwrap_or(JsValue::NULL);
        let result = callback
            .call2(&JsValue::NULL, &argv, &stdin)
            .map_err(command_error)?;
        Ok(js_output(result))
    }
}

// ============ WasmTerm ============

struct PendingCommand {
    name: String,
    callback: Function,
    autocomplete: Vec<String>,
}

/// Terminal attached to an xterm.js instance
#[wasm_bindgen]
pub struct WasmTerm {
    config: TermConfig,
    controller: Option<Rc<Controller>>,
    reader: Option<Rc<XtermReader>>,
    pending: Vec<PendingCommand>,
    on_data: Option<Closure<dyn FnMut(JsValue)>>,
}

#[wasm_bindgen]
impl WasmTerm {
    #[wasm_bindgen(constructor)]
    pub fn new(bin_path: Option<String>) -> WasmTerm {
        let config = bin_path.map(TermConfig::with_bin_path).unwrap_or_default();
        Self::with_config(config)
    }

    /// Build from a JSON config
    #[wasm_bindgen(js_name = fromConfig)]
    pub fn from_config(json: &str) -> Result<WasmTerm, JsValue> {
        let config = TermConfig::from_json(json).map_err(|e| JsValue::from_str(&e.to_string()))?;
        Ok(Self::with_config(config))
    }

    fn with_config(config: TermConfig) -> WasmTerm {
        WasmTerm {
            config,
            controller: None,
            reader: None,
            pending: Vec::new(),
            on_data: None,
        }
    }

    /// Attach to an xterm.js `Terminal` and start the prompt loop
    pub fn activate(&mut self, xterm: JsValue) -> Result<(), JsValue> {
        if self.controller.is_some() {
            return Err(JsValue::from_str("terminal is already active"));
        }
        if self.reader.is_some() {
            return Err(JsValue::from_str("terminal was disposed"));
        }
        let to_js = |e: &dyn std::fmt::Display| JsValue::from_str(&e.to_string());

        let surface = Rc::new(XtermSurface {
            xterm: xterm.unchecked_into(),
        });
        let reader = Rc::new(XtermReader::new(Rc::clone(&surface)));
        let platform: Rc<dyn Platform> = Rc::from(platform::current());
        let engine = Engine::new().map_err(|e| to_js(&e))?;
        let resolver = ModuleResolver::new(&self.config, engine.clone(), Rc::new(HttpFetcher));
        let context = ExecutionContext::new(&self.config, platform, engine).map_err(|e| to_js(&e))?;

        let controller = Rc::new(Controller::new(
            self.config.clone(),
            Rc::clone(&surface) as Rc<dyn TerminalSurface>,
            Rc::clone(&reader) as Rc<dyn LineReader>,
            context,
            resolver,
        ));
        let completing = Rc::downgrade(&controller);
        reader.attach(
            controller.history(),
            controller.interrupter(),
            Rc::new(move |line: &str| {
                completing
                    .upgrade()
                    .map(|controller| controller.complete(line))
                    .unwrap_or_default()
            }),
        );

        for command in self.pending.drain(..) {
            controller.register_command(&command.name, js_command(command.callback), command.autocomplete);
        }
        controller.activate();

        let data_reader = Rc::clone(&reader);
        let on_data: Closure<dyn FnMut(JsValue)> = Closure::wrap(Box::new(move |data: JsValue| {
            if let Some(data) = data.as_string() {
                data_reader.handle_data(&data);
            }
        }));
        surface.xterm.on_data(on_data.as_ref().unchecked_ref());

        let repl = Rc::clone(&controller);
        spawn_local(async move { repl.repl().await });

        self.controller = Some(controller);
        self.reader = Some(reader);
        self.on_data = Some(on_data);
        Ok(())
    }

    /// Stop the worker and the prompt loop
    pub fn dispose(&mut self) {
        if let Some(controller) = self.controller.take() {
            controller.dispose();
        }
        // xterm keeps calling `on_data`; a closed reader ignores it
        if let Some(reader) = &self.reader {
            reader.close();
        }
    }

    /// Register `callback(argv, stdin)`; registering before `activate`
    /// lists the command in the welcome text
    #[wasm_bindgen(js_name = registerCommand)]
    pub fn register_command(&mut self, name: String, callback: Function, autocomplete: Option<Array>) {
        let autocomplete = autocomplete
            .map(|hints| hints.iter().filter_map(|h| h.as_string()).collect())
            .unwrap_or_default();
        match &self.controller {
            Some(controller) => controller.register_command(&name, js_command(callback), autocomplete),
            None => self.pending.push(PendingCommand {
                name,
                callback,
                autocomplete,
            }),
        }
    }

    #[wasm_bindgen(js_name = unregisterCommand)]
    pub fn unregister_command(&mut self, name: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|c| c.name != name);
        let removed = self
            .controller
            .as_ref()
            .is_some_and(|c| c.unregister_command(name));
        removed || self.pending.len() != before
    }

    /// Run a line as if typed; resolves when it is done
    #[wasm_bindgen(js_name = runLine)]
    pub fn run_line(&self, line: String) -> Promise {
        let controller = self.controller.clone();
        future_to_promise(async move {
            let Some(controller) = controller else {
                return Err(JsValue::from_str("terminal is not active"));
            };
            controller.run_line(&line).await;
            Ok(JsValue::UNDEFINED)
        })
    }

    #[wasm_bindgen(getter, js_name = isRunningCommand)]
    pub fn is_running_command(&self) -> bool {
        self.controller
            .as_ref()
            .is_some_and(|c| c.is_running_command())
    }
}

/// Entry point of `worker.js`; `pending` holds messages received while
/// the module was loading
#[wasm_bindgen]
pub fn worker_entry(pending: Array) -> Result<(), JsValue> {
    crate::exec::web_worker::serve(pending)
}

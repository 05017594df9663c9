//! Web Worker host and worker-side entry point
//!
//! Page side, [`WebWorkerHost`] owns one `Worker` running `worker.js`. The
//! first message hands over the bridge buffers:
//!
//! ```text
//! { kind: "init", pause: Int32Array, window: Int32Array }
//! { kind: "job",  job: "<WireJob JSON>", module: WebAssembly.Module }
//! ```
//!
//! The worker answers every job with a stream of `WireEvent` JSON strings.
//! Worker side, [`serve`] installs the message handler and runs each job
//! synchronously; `Atomics.wait` is legal there, so stdin blocks on the
//! bridge until the page delivers a line.

use super::bridge::{Bridge, WebWords};
use super::worker::{CancelFlag, EventSink, WireEvent, WireJob, WorkerEvent, WorkerHandler};
use super::{SessionError, SessionResult};
use crate::resolver::ModuleDescriptor;
use crate::runnable::{RunRequest, Runnable};
use crate::wasm::{CompiledModule, Engine};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use js_sys::{Array, Int32Array, Object, Reflect, WebAssembly};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use web_sys::{DedicatedWorkerGlobalScope, ErrorEvent, MessageEvent, Worker, WorkerOptions, WorkerType};

type Listener = Closure<dyn FnMut(MessageEvent)>;
type ErrorListener = Closure<dyn FnMut(ErrorEvent)>;
type EventSlot = Rc<RefCell<Option<UnboundedSender<WorkerEvent>>>>;

fn js_error(value: JsValue) -> SessionError {
    SessionError::Worker(
        value
            .as_string()
            .or_else(|| value.dyn_ref::<js_sys::Error>().map(|e| String::from(e.message())))
            .unwrap_or_else(|| format!("{:?}", value)),
    )
}

fn message(fields: &[(&str, &JsValue)]) -> SessionResult<Object> {
    let object = Object::new();
    for (key, value) in fields {
        Reflect::set(&object, &JsValue::from_str(key), value).map_err(js_error)?;
    }
    Ok(object)
}

/// Page-side handle on one Web Worker
pub struct WebWorkerHost {
    worker: Worker,
    bridge: Bridge<WebWords>,
    events: EventSlot,
    _on_message: Listener,
    _on_error: ErrorListener,
}

impl WebWorkerHost {
    pub fn spawn(url: &str) -> SessionResult<Self> {
        let options = WorkerOptions::new();
        options.set_type(WorkerType::Module);
        let worker = Worker::new_with_options(url, &options).map_err(js_error)?;

        let events: EventSlot = Rc::new(RefCell::new(None));

        let slot = Rc::clone(&events);
        let on_message: Listener = Closure::wrap(Box::new(move |event: MessageEvent| {
            let Some(json) = event.data().as_string() else {
                crate::console_log!("[worker] ignoring non-text message");
                return;
            };
            let event = match serde_json::from_str::<WireEvent>(&json) {
                Ok(event) => WorkerEvent::from(event),
                Err(e) => {
                    crate::console_log!("[worker] malformed event: {}", e);
                    return;
                }
            };
            let finished = matches!(event, WorkerEvent::Finished { .. });
            let mut slot = slot.borrow_mut();
            if let Some(sender) = slot.as_ref() {
                let _ = sender.unbounded_send(event);
            }
            if finished {
                *slot = None;
            }
        }));
        worker.set_onmessage(Some(on_message.as_ref().unchecked_ref()));

        let slot = Rc::clone(&events);
        let on_error: ErrorListener = Closure::wrap(Box::new(move |event: ErrorEvent| {
            crate::console_log!("[worker] error: {}", event.message());
            // Dropping the sender ends the pump with a worker failure
            slot.borrow_mut().take();
        }));
        worker.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        let bridge = Bridge::shared();
        let pause: &JsValue = bridge.pause_words().array();
        let window: &JsValue = bridge.window_words().array();
        let init = message(&[
            ("kind", &JsValue::from_str("init")),
            ("pause", pause),
            ("window", window),
        ])?;
        worker.post_message(&init).map_err(js_error)?;

        crate::console_log!("[worker] started {}", url);
        Ok(Self {
            worker,
            bridge,
            events,
            _on_message: on_message,
            _on_error: on_error,
        })
    }

    /// Post a run; events arrive on the returned receiver
    pub fn start(
        &self,
        descriptor: &ModuleDescriptor,
        request: RunRequest,
        headless: bool,
    ) -> SessionResult<UnboundedReceiver<WorkerEvent>> {
        let job = WireJob::new(request, descriptor.abi, descriptor.glue.clone(), headless);
        let json = serde_json::to_string(&job).map_err(|e| SessionError::Worker(e.to_string()))?;

        let (sender, receiver) = mpsc::unbounded();
        *self.events.borrow_mut() = Some(sender);

        let module: &JsValue = descriptor.module.as_js();
        let post = message(&[
            ("kind", &JsValue::from_str("job")),
            ("job", &JsValue::from_str(&json)),
            ("module", module),
        ])?;
        self.worker.post_message(&post).map_err(js_error)?;
        Ok(receiver)
    }

    /// Answer a pending `ReadLine`
    pub fn deliver(&self, line: Option<&str>) {
        self.bridge.deliver(line);
    }

    pub fn terminate(&self) {
        self.worker.terminate();
        self.events.borrow_mut().take();
    }
}

// ============ Worker side ============

/// Posts events back to the page
struct PostSink(DedicatedWorkerGlobalScope);

impl EventSink for PostSink {
    fn send(&self, event: WorkerEvent) {
        match serde_json::to_string(&WireEvent::from(event)) {
            Ok(json) => {
                if let Err(e) = self.0.post_message(&JsValue::from_str(&json)) {
                    crate::console_log!("[worker] post failed: {:?}", e);
                }
            }
            Err(e) => crate::console_log!("[worker] cannot encode event: {}", e),
        }
    }
}

/// A Web Worker is stopped by termination, never by a flag
struct NotCancelled;

impl CancelFlag for NotCancelled {
    fn is_set(&self) -> bool {
        false
    }
}

struct WorkerState {
    scope: DedicatedWorkerGlobalScope,
    engine: Engine,
    bridge: Option<Rc<Bridge<WebWords>>>,
}

impl WorkerState {
    fn handle(&mut self, data: JsValue) {
        let kind = Reflect::get(&data, &JsValue::from_str("kind"))
            .ok()
            .and_then(|v| v.as_string());
        match kind.as_deref() {
            Some("init") => self.init(&data),
            Some("job") => self.run(&data),
            other => crate::console_log!("[worker] unknown message {:?}", other),
        }
    }

    fn init(&mut self, data: &JsValue) {
        let words = |key: &str| {
            Reflect::get(data, &JsValue::from_str(key))
                .ok()
                .and_then(|v| v.dyn_into::<Int32Array>().ok())
                .map(WebWords::from_array)
        };
        match (words("pause"), words("window")) {
            (Some(pause), Some(window)) => self.bridge = Some(Rc::new(Bridge::new(pause, window))),
            _ => crate::console_log!("[worker] init without bridge buffers"),
        }
    }

    fn run(&mut self, data: &JsValue) {
        let sink = PostSink(self.scope.clone());
        let Some(bridge) = self.bridge.clone() else {
            crate::console_log!("[worker] job before init");
            return;
        };

        let job = Reflect::get(data, &JsValue::from_str("job"))
            .ok()
            .and_then(|v| v.as_string())
            .and_then(|json| serde_json::from_str::<WireJob>(&json).ok());
        let module = Reflect::get(data, &JsValue::from_str("module"))
            .ok()
            .and_then(|v| v.dyn_into::<WebAssembly::Module>().ok());

        let (Some(job), Some(module)) = (job, module) else {
            crate::console_log!("[worker] malformed job");
            sink.send(WorkerEvent::Finished { files: Vec::new() });
            return;
        };

        let runnable = Runnable::new(
            self.engine.clone(),
            CompiledModule::from_js(module),
            job.abi,
            job.glue.as_deref(),
        );
        let handler = WorkerHandler::new(sink, bridge, NotCancelled, job.headless);
        runnable.run(job.request(), handler);
    }
}

/// Install the worker-side message handler
///
/// `pending` holds messages that arrived while the module was loading;
/// they are handled first, in order.
pub fn serve(pending: Array) -> Result<(), JsValue> {
    let scope: DedicatedWorkerGlobalScope = js_sys::global().dyn_into()?;
    let engine = Engine::new().map_err(|e| JsValue::from_str(&e.to_string()))?;
    let state = Rc::new(RefCell::new(WorkerState {
        scope: scope.clone(),
        engine,
        bridge: None,
    }));

    for data in pending.iter() {
        let data = match data.dyn_into::<MessageEvent>() {
            Ok(event) => event.data(),
            Err(data) => data,
        };
        state.borrow_mut().handle(data);
    }

    let on_message: Listener = Closure::wrap(Box::new(move |event: MessageEvent| {
        state.borrow_mut().handle(event.data());
    }));
    scope.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
    // Lives as long as the worker
    on_message.forget();

    crate::console_log!("[worker] ready");
    Ok(())
}

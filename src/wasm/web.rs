//! Browser engine (WebAssembly JS API)
//!
//! Modules are compiled asynchronously and instantiated synchronously with
//! an import object built from the ABI's signature table. Each import is a
//! variadic JS shim around one Rust closure, so a single closure type
//! serves every signature.

use super::error::{WasmError, WasmResult};
use super::host::{GuestMemory, HostAbi, HostTrap, HostVal, ValKind};
use js_sys::{Array, Function, Object, Reflect, Uint8Array, WebAssembly};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

/// Marker thrown through the guest when a host function traps
const TRAP_MARKER: &str = "wasmterm:host-trap";

/// Compilation and execution engine (stateless in the browser)
#[derive(Clone, Default)]
pub struct Engine;

/// A compiled module; can be posted to a worker
#[derive(Clone, Debug)]
pub struct CompiledModule {
    module: WebAssembly::Module,
}

impl CompiledModule {
    /// Wrap a module received from another context
    pub fn from_js(module: WebAssembly::Module) -> Self {
        Self { module }
    }

    pub fn as_js(&self) -> &WebAssembly::Module {
        &self.module
    }
}

type ImportFn = Closure<dyn FnMut(Array) -> Result<JsValue, JsValue>>;

/// Guest memory viewed through a fresh `Uint8Array` per access, since
/// growing memory detaches earlier views
struct JsMemory<'a>(Option<&'a WebAssembly::Memory>);

impl JsMemory<'_> {
    fn view(&self) -> Option<Uint8Array> {
        self.0.map(|memory| Uint8Array::new(&memory.buffer()))
    }

    fn range(&self, ptr: u32, len: u32) -> WasmResult<(Uint8Array, u32, u32)> {
        let view = self.view();
        let size = view.as_ref().map_or(0, |v| v.length());
        match (view, ptr.checked_add(len)) {
            (Some(view), Some(end)) if end <= size => Ok((view, ptr, end)),
            _ => Err(WasmError::MemoryAccessOutOfBounds {
                address: ptr,
                size: len,
                memory_size: size,
            }),
        }
    }
}

impl GuestMemory for JsMemory<'_> {
    fn size(&self) -> usize {
        self.view().map_or(0, |v| v.length() as usize)
    }

    fn read(&self, ptr: u32, len: u32) -> WasmResult<Vec<u8>> {
        let (view, start, end) = self.range(ptr, len)?;
        Ok(view.subarray(start, end).to_vec())
    }

    fn write(&mut self, ptr: u32, data: &[u8]) -> WasmResult<()> {
        let (view, start, end) = self.range(ptr, data.len() as u32)?;
        view.subarray(start, end).copy_from(data);
        Ok(())
    }
}

/// Execution state shared with the import closures
struct Shared<A> {
    host: Rc<RefCell<A>>,
    memory: Option<WebAssembly::Memory>,
    trap: Option<HostTrap>,
}

fn from_js(value: JsValue, kind: ValKind) -> HostVal {
    match kind {
        ValKind::I32 => HostVal::I32(value.as_f64().unwrap_or(0.0) as i32),
        ValKind::I64 => HostVal::I64(i64::try_from(value).unwrap_or(0)),
    }
}

fn to_js(value: HostVal) -> JsValue {
    match value {
        HostVal::I32(v) => JsValue::from(v),
        HostVal::I64(v) => JsValue::from(v),
    }
}

fn js_message(value: &JsValue) -> String {
    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        return String::from(err.message());
    }
    value
        .as_string()
        .unwrap_or_else(|| "unknown error".to_string())
}

fn instantiation_failed(value: JsValue) -> WasmError {
    WasmError::InstantiationFailed {
        reason: js_message(&value),
    }
}

/// Wrap a closure taking the argument array as a variadic JS function
fn variadic(closure: &ImportFn) -> WasmResult<Function> {
    let factory = Function::new_with_args("f", "return function(...a) { return f(a); }");
    factory
        .call1(&JsValue::NULL, closure.as_ref())
        .map_err(instantiation_failed)?
        .dyn_into::<Function>()
        .map_err(instantiation_failed)
}

/// Namespace object of the import object, created on first use
fn namespace(imports: &Object, module: &str) -> WasmResult<JsValue> {
    let key = JsValue::from_str(module);
    let existing = Reflect::get(imports, &key).map_err(instantiation_failed)?;
    if existing.is_object() {
        return Ok(existing);
    }
    let ns: JsValue = Object::new().into();
    Reflect::set(imports, &key, &ns).map_err(instantiation_failed)?;
    Ok(ns)
}

impl Engine {
    pub fn new() -> WasmResult<Self> {
        Ok(Self)
    }

    /// Compile module bytes
    pub async fn compile(&self, bytes: &[u8]) -> WasmResult<CompiledModule> {
        let array = Uint8Array::new_with_length(bytes.len() as u32);
        array.copy_from(bytes);

        let promise = WebAssembly::compile(&array.buffer());
        let result = wasm_bindgen_futures::JsFuture::from(promise)
            .await
            .map_err(|e| WasmError::CompileFailed {
                reason: js_message(&e),
            })?;

        result
            .dyn_into::<WebAssembly::Module>()
            .map(CompiledModule::from_js)
            .map_err(|_| WasmError::CompileFailed {
                reason: "failed to cast to Module".to_string(),
            })
    }

    /// A running module cannot be trapped from the page; the worker that
    /// runs it is terminated instead.
    pub fn interrupt(&self) {}

    /// Instantiate `module` against `host` and run its entry point
    pub fn execute<A: HostAbi + 'static>(
        &self,
        module: &CompiledModule,
        host: Rc<RefCell<A>>,
    ) -> WasmResult<i32> {
        let shared = Rc::new(RefCell::new(Shared {
            host,
            memory: None,
            trap: None,
        }));

        let imports = Object::new();
        let mut closures: Vec<ImportFn> = Vec::new();
        let sigs = shared.borrow().host.borrow().imports();

        for (index, sig) in sigs.iter().enumerate() {
            let state = Rc::clone(&shared);
            let closure: ImportFn = Closure::wrap(Box::new(move |args: Array| {
                let mut state = state.borrow_mut();
                let values: Vec<HostVal> = sig
                    .params
                    .iter()
                    .enumerate()
                    .map(|(i, kind)| from_js(args.get(i as u32), *kind))
                    .collect();

                let Shared { host, memory, trap } = &mut *state;
                let mut mem = JsMemory(memory.as_ref());
                let result = host.borrow_mut().call(index, &values, &mut mem);
                match result {
                    Ok(value) => Ok(value.map(to_js).unwrap_or(JsValue::UNDEFINED)),
                    Err(t) => {
                        *trap = Some(t);
                        Err(JsValue::from_str(TRAP_MARKER))
                    }
                }
            })
                as Box<dyn FnMut(Array) -> Result<JsValue, JsValue>>);

            let ns = namespace(&imports, sig.module)?;
            Reflect::set(&ns, &JsValue::from_str(sig.name), &variadic(&closure)?)
                .map_err(instantiation_failed)?;
            closures.push(closure);
        }

        Self::stub_unknown_imports(module, &imports)?;

        let instance =
            WebAssembly::Instance::new(&module.module, &imports).map_err(instantiation_failed)?;
        let exports = instance.exports();

        let memory = Reflect::get(&exports, &JsValue::from_str("memory"))
            .ok()
            .and_then(|m| m.dyn_into::<WebAssembly::Memory>().ok());
        shared.borrow_mut().memory = memory;

        let entry = {
            let state = shared.borrow();
            let has_export =
                |name: &str| Reflect::has(&exports, &JsValue::from_str(name)).unwrap_or(false);
            let mut mem = JsMemory(state.memory.as_ref());
            let mut host = state.host.borrow_mut();
            host.entry(&has_export, &mut mem)?
        };

        let func = Reflect::get(&exports, &JsValue::from_str(entry.name))
            .ok()
            .and_then(|f| f.dyn_into::<Function>().ok())
            .ok_or(WasmError::MissingExport { name: entry.name })?;
        let args: Array = entry.args.iter().copied().map(to_js).collect();

        let result = func.apply(&JsValue::NULL, &args);
        drop(closures);

        match result {
            Ok(value) => Ok(value.as_f64().map_or(0, |code| code as i32)),
            Err(e) => match shared.borrow_mut().trap.take() {
                Some(HostTrap::Exit(code)) => Ok(code),
                Some(HostTrap::Interrupted) => Err(WasmError::Interrupted),
                Some(HostTrap::Fault(reason)) => Err(WasmError::Aborted { reason }),
                None => Err(WasmError::Aborted {
                    reason: js_message(&e),
                }),
            },
        }
    }

    /// Link imports the ABI does not provide as functions that throw when
    /// called, so modules that never call them still instantiate
    fn stub_unknown_imports(module: &CompiledModule, imports: &Object) -> WasmResult<()> {
        for desc in WebAssembly::Module::imports(&module.module).iter() {
            let field = |key: &str| {
                Reflect::get(&desc, &JsValue::from_str(key))
                    .ok()
                    .and_then(|v| v.as_string())
                    .unwrap_or_default()
            };
            if field("kind") != "function" {
                continue;
            }

            let (module_name, name) = (field("module"), field("name"));
            let ns = namespace(imports, &module_name)?;
            let key = JsValue::from_str(&name);
            if Reflect::has(&ns, &key).unwrap_or(false) {
                continue;
            }

            let message = serde_json::to_string(&format!(
                "unimplemented import {}::{}",
                module_name, name
            ))
            .unwrap_or_default();
            let stub = Function::new_no_args(&format!("throw new Error({});", message));
            Reflect::set(&ns, &key, &stub).map_err(instantiation_failed)?;
        }
        Ok(())
    }
}

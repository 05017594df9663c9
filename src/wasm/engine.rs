//! Native engine (wasmtime)
//!
//! One `Engine` is shared by every context in the process; compiled
//! modules are cheap to clone and can be sent to the worker thread.
//! Interruption uses epoch deadlines: every store starts with a deadline
//! one tick ahead, so a single `increment_epoch` traps whatever is running.

use super::error::{WasmError, WasmResult};
use super::host::{GuestMemory, HostAbi, HostTrap, HostVal, SliceMemory, ValKind};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use wasmtime::{Caller, Config, Extern, FuncType, Linker, Module, Store, Trap, Val, ValType};

/// Shared compilation and execution engine
#[derive(Clone)]
pub struct Engine {
    inner: wasmtime::Engine,
}

/// A compiled module, shareable across executions and threads
#[derive(Clone)]
pub struct CompiledModule {
    module: Module,
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("name", &self.module.name())
            .finish()
    }
}

fn val_type(kind: ValKind) -> ValType {
    match kind {
        ValKind::I32 => ValType::I32,
        ValKind::I64 => ValType::I64,
    }
}

fn to_val(val: HostVal) -> Val {
    match val {
        HostVal::I32(v) => Val::I32(v),
        HostVal::I64(v) => Val::I64(v),
    }
}

fn from_val(val: &Val) -> HostVal {
    match val {
        Val::I64(v) => HostVal::I64(*v),
        other => HostVal::I32(other.i32().unwrap_or(0)),
    }
}

/// Map a wasmtime error back to an exit code or a failure
fn classify(err: wasmtime::Error) -> WasmResult<i32> {
    if let Some(trap) = err.downcast_ref::<HostTrap>() {
        return match trap {
            HostTrap::Exit(code) => Ok(*code),
            HostTrap::Interrupted => Err(WasmError::Interrupted),
            HostTrap::Fault(reason) => Err(WasmError::Aborted {
                reason: reason.clone(),
            }),
        };
    }
    if let Some(Trap::Interrupt) = err.downcast_ref::<Trap>() {
        return Err(WasmError::Interrupted);
    }
    Err(WasmError::Aborted {
        reason: format!("{:#}", err),
    })
}

/// Run `f` with the store's data and a view of the exported memory
fn with_memory<A, R>(
    caller: &mut Caller<'_, Rc<RefCell<A>>>,
    f: impl FnOnce(&mut A, &mut dyn GuestMemory) -> R,
) -> R {
    let memory = caller.get_export("memory").and_then(Extern::into_memory);
    let mut empty = [0u8; 0];
    let (data, state) = match memory {
        Some(memory) => memory.data_and_store_mut(caller),
        None => (&mut empty[..], caller.data_mut()),
    };
    let mut abi = state.borrow_mut();
    f(&mut abi, &mut SliceMemory(data))
}

impl Engine {
    pub fn new() -> WasmResult<Self> {
        let mut config = Config::new();
        config.epoch_interruption(true);
        let inner = wasmtime::Engine::new(&config).map_err(|e| WasmError::CompileFailed {
            reason: e.to_string(),
        })?;
        Ok(Self { inner })
    }

    /// Compile module bytes
    pub async fn compile(&self, bytes: &[u8]) -> WasmResult<CompiledModule> {
        Module::new(&self.inner, bytes)
            .map(|module| CompiledModule { module })
            .map_err(|e| WasmError::CompileFailed {
                reason: format!("{:#}", e),
            })
    }

    /// Trap the module currently executing on any thread
    pub fn interrupt(&self) {
        self.inner.increment_epoch();
    }

    /// Instantiate `module` against `host` and run its entry point.
    ///
    /// Returns the exit code: the entry point's return value, or the code
    /// passed to an exit host call.
    pub fn execute<A: HostAbi + 'static>(
        &self,
        module: &CompiledModule,
        host: Rc<RefCell<A>>,
    ) -> WasmResult<i32> {
        let imports = host.borrow().imports();
        let mut linker: Linker<Rc<RefCell<A>>> = Linker::new(&self.inner);

        for (index, sig) in imports.iter().enumerate() {
            let ty = FuncType::new(
                &self.inner,
                sig.params.iter().copied().map(val_type),
                sig.result.map(val_type),
            );

            linker
                .func_new(
                    sig.module,
                    sig.name,
                    ty,
                    move |mut caller: Caller<'_, Rc<RefCell<A>>>, params: &[Val], results: &mut [Val]| {
                        let args: Vec<HostVal> = params.iter().map(from_val).collect();
                        let ret = with_memory(&mut caller, |abi, mem| abi.call(index, &args, mem));
                        match ret {
                            Ok(value) => {
                                if let (Some(slot), Some(value)) = (results.first_mut(), value) {
                                    *slot = to_val(value);
                                }
                                Ok(())
                            }
                            Err(trap) => Err(wasmtime::Error::new(trap)),
                        }
                    },
                )
                .map_err(|e| WasmError::InstantiationFailed {
                    reason: e.to_string(),
                })?;
        }

        linker
            .define_unknown_imports_as_traps(&module.module)
            .map_err(|e| WasmError::InstantiationFailed {
                reason: e.to_string(),
            })?;

        let mut store = Store::new(&self.inner, host);
        store.set_epoch_deadline(1);

        let instance = match linker.instantiate(&mut store, &module.module) {
            Ok(instance) => instance,
            Err(e) => {
                return match classify(e) {
                    Err(WasmError::Aborted { reason }) => {
                        Err(WasmError::InstantiationFailed { reason })
                    }
                    other => other,
                };
            }
        };

        let exports: HashSet<String> = module
            .module
            .exports()
            .map(|e| e.name().to_string())
            .collect();

        let entry = {
            let memory = instance.get_memory(&mut store, "memory");
            let mut empty = [0u8; 0];
            let (data, state) = match memory {
                Some(memory) => memory.data_and_store_mut(&mut store),
                None => (&mut empty[..], store.data_mut()),
            };
            let mut abi = state.borrow_mut();
            abi.entry(&|name| exports.contains(name), &mut SliceMemory(data))?
        };

        let func = instance
            .get_func(&mut store, entry.name)
            .ok_or(WasmError::MissingExport { name: entry.name })?;
        let params: Vec<Val> = entry.args.iter().copied().map(to_val).collect();
        let mut results = vec![Val::I32(0); func.ty(&store).results().len()];

        match func.call(&mut store, &params, &mut results) {
            Ok(()) => Ok(results.first().and_then(Val::i32).unwrap_or(0)),
            Err(e) => classify(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wasm::host::{EntryCall, ImportSig};
    use futures::executor::block_on;

    const PRINT: &[ImportSig] = &[ImportSig {
        module: "test",
        name: "print",
        params: &[ValKind::I32, ValKind::I32],
        result: Some(ValKind::I32),
    }];

    /// Collects `print(ptr, len)` calls
    #[derive(Default)]
    struct Recorder {
        printed: Vec<String>,
        exit_on_print: Option<i32>,
    }

    impl HostAbi for Recorder {
        fn imports(&self) -> &'static [ImportSig] {
            PRINT
        }

        fn call(
            &mut self,
            _index: usize,
            args: &[HostVal],
            mem: &mut dyn GuestMemory,
        ) -> Result<Option<HostVal>, HostTrap> {
            let text = mem
                .read_str(args[0].ptr(), args[1].ptr())
                .map_err(|e| HostTrap::Fault(e.to_string()))?;
            self.printed.push(text);
            if let Some(code) = self.exit_on_print {
                return Err(HostTrap::Exit(code));
            }
            Ok(Some(HostVal::I32(0)))
        }

        fn entry(
            &mut self,
            has_export: &dyn Fn(&str) -> bool,
            _mem: &mut dyn GuestMemory,
        ) -> WasmResult<EntryCall> {
            if has_export("run") {
                Ok(EntryCall {
                    name: "run",
                    args: vec![],
                })
            } else {
                Err(WasmError::MissingExport { name: "run" })
            }
        }
    }

    const HELLO: &str = r#"(module
        (import "test" "print" (func $print (param i32 i32) (result i32)))
        (memory (export "memory") 1)
        (data (i32.const 16) "hello")
        (func (export "run") (result i32)
            (drop (call $print (i32.const 16) (i32.const 5)))
            (i32.const 3)))"#;

    fn compile(engine: &Engine, wat: &str) -> CompiledModule {
        block_on(engine.compile(&wat::parse_str(wat).unwrap())).unwrap()
    }

    #[test]
    fn test_execute_returns_entry_result() {
        let engine = Engine::new().unwrap();
        let module = compile(&engine, HELLO);
        let host = Rc::new(RefCell::new(Recorder::default()));

        let code = engine.execute(&module, Rc::clone(&host)).unwrap();
        assert_eq!(code, 3);
        assert_eq!(host.borrow().printed, vec!["hello"]);
    }

    #[test]
    fn test_exit_trap_becomes_code() {
        let engine = Engine::new().unwrap();
        let module = compile(&engine, HELLO);
        let host = Rc::new(RefCell::new(Recorder {
            exit_on_print: Some(7),
            ..Default::default()
        }));

        assert_eq!(engine.execute(&module, host).unwrap(), 7);
    }

    #[test]
    fn test_unknown_imports_trap_only_when_called() {
        let engine = Engine::new().unwrap();
        let module = compile(
            &engine,
            r#"(module
                (import "other" "missing" (func $missing))
                (func (export "run") (result i32) (i32.const 0))
                (func (export "bad") (call $missing)))"#,
        );
        let host = Rc::new(RefCell::new(Recorder::default()));
        assert_eq!(engine.execute(&module, host).unwrap(), 0);
    }

    #[test]
    fn test_guest_trap_is_aborted() {
        let engine = Engine::new().unwrap();
        let module = compile(&engine, r#"(module (func (export "run") unreachable))"#);
        let host = Rc::new(RefCell::new(Recorder::default()));
        let err = engine.execute(&module, host).unwrap_err();
        assert!(matches!(err, WasmError::Aborted { .. }));
    }

    #[test]
    fn test_missing_entry() {
        let engine = Engine::new().unwrap();
        let module = compile(&engine, r#"(module (func (export "main")))"#);
        let host = Rc::new(RefCell::new(Recorder::default()));
        assert_eq!(
            engine.execute(&module, host).unwrap_err(),
            WasmError::MissingExport { name: "run" }
        );
    }

    #[test]
    fn test_compile_rejects_garbage() {
        let engine = Engine::new().unwrap();
        let result = block_on(engine.compile(b"\0asm\x01\0\0\0\xFF"));
        assert!(matches!(result, Err(WasmError::CompileFailed { .. })));
    }
}

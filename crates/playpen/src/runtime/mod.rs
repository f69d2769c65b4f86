//! WebAssembly foreign runtime
//!
//! Loads a core WebAssembly module described by a [`RuntimeManifest`] and
//! drives it through a small pointer/length ABI:
//!
//! - `alloc(len: i32) -> i32` reserves an input buffer
//! - `execute(ptr: i32, len: i32) -> i64` runs the program in that buffer and
//!   returns `(result_ptr << 32) | result_len` of a JSON result payload
//! - `reset()` clears global state
//! - `dealloc(ptr: i32, len: i32)` (optional) releases the input buffer

use std::path::Path;

use tracing::{debug, info, instrument};
use wasmtime::{Engine, Instance, Memory, Module, Store, TypedFunc, WasmParams, WasmResults};

use crate::bridge::{ForeignRuntime, LoadError, RuntimeFault, RuntimeLoader};
use crate::config::DEFAULT_MANIFEST_NAME;

pub use crate::runtime::manifest::{ExportNames, RuntimeManifest};

mod manifest;

/// Loads [`WasmRuntime`]s from `<base_path>/<manifest_name>`
#[derive(Clone)]
pub struct WasmLoader {
    engine: Engine,
    manifest_name: String,
}

impl WasmLoader {
    pub fn new(manifest_name: impl Into<String>) -> Self {
        Self {
            engine: Engine::default(),
            manifest_name: manifest_name.into(),
        }
    }
}

impl Default for WasmLoader {
    fn default() -> Self {
        Self::new(DEFAULT_MANIFEST_NAME)
    }
}

impl std::fmt::Debug for WasmLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmLoader")
            .field("manifest_name", &self.manifest_name)
            .finish_non_exhaustive()
    }
}

impl RuntimeLoader for WasmLoader {
    type Runtime = WasmRuntime;

    #[instrument(skip(self), fields(manifest = %self.manifest_name))]
    fn load(&self, base_path: &Path) -> Result<WasmRuntime, LoadError> {
        let manifest = RuntimeManifest::from_file(&base_path.join(&self.manifest_name))?;
        let module_path = base_path.join(&manifest.module);
        debug!(module = %module_path.display(), "reading runtime module");

        let bytes = std::fs::read(&module_path).map_err(|source| LoadError::Fetch {
            path: module_path.clone(),
            source,
        })?;
        let module = Module::new(&self.engine, &bytes)
            .map_err(|e| LoadError::Compile(format!("{e:#}")))?;

        let mut store = Store::new(&self.engine, ());
        let instance = Instance::new(&mut store, &module, &[])
            .map_err(|e| LoadError::Instantiate(format!("{e:#}")))?;

        let names = &manifest.exports;
        let memory = instance
            .get_memory(&mut store, &names.memory)
            .ok_or_else(|| LoadError::MissingExport(names.memory.clone()))?;
        let alloc = typed_export(&instance, &mut store, &names.alloc)?;
        let execute = typed_export(&instance, &mut store, &names.execute)?;
        let reset = typed_export(&instance, &mut store, &names.reset)?;
        let dealloc = match &names.dealloc {
            Some(name) => Some(typed_export(&instance, &mut store, name)?),
            None => None,
        };

        if let Some(name) = &names.entry {
            let entry: TypedFunc<(), ()> = typed_export(&instance, &mut store, name)?;
            entry
                .call(&mut store, ())
                .map_err(|e| LoadError::Entry(format!("{e:#}")))?;
        }

        info!(module = %module_path.display(), "runtime instantiated");
        Ok(WasmRuntime {
            store,
            memory,
            alloc,
            execute,
            reset,
            dealloc,
        })
    }
}

fn typed_export<Params, Results>(
    instance: &Instance,
    store: &mut Store<()>,
    name: &str,
) -> Result<TypedFunc<Params, Results>, LoadError>
where
    Params: WasmParams,
    Results: WasmResults,
{
    instance
        .get_typed_func::<Params, Results>(store, name)
        .map_err(|e| {
            debug!(export = name, error = %format!("{e:#}"), "export lookup failed");
            LoadError::MissingExport(name.to_string())
        })
}

/// One instantiated WebAssembly runtime
pub struct WasmRuntime {
    store: Store<()>,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    execute: TypedFunc<(i32, i32), i64>,
    reset: TypedFunc<(), ()>,
    dealloc: Option<TypedFunc<(i32, i32), ()>>,
}

impl WasmRuntime {
    fn read_result(&self, packed: i64) -> Result<String, RuntimeFault> {
        let packed = packed as u64;
        let ptr = (packed >> 32) as usize;
        let len = (packed & 0xFFFF_FFFF) as usize;

        let size = self.memory.data_size(&self.store);
        if ptr.checked_add(len).is_none_or(|end| end > size) {
            return Err(RuntimeFault::Abi(format!(
                "result {ptr}+{len} lies outside linear memory of {size} bytes"
            )));
        }

        let mut buf = vec![0; len];
        self.memory
            .read(&self.store, ptr, &mut buf)
            .map_err(|e| RuntimeFault::Abi(format!("failed to read result: {e}")))?;
        String::from_utf8(buf)
            .map_err(|e| RuntimeFault::Abi(format!("result is not UTF-8: {e}")))
    }
}

impl ForeignRuntime for WasmRuntime {
    fn execute(&mut self, code: &str) -> Result<String, RuntimeFault> {
        let len = i32::try_from(code.len()).map_err(|_| {
            RuntimeFault::Abi(format!("program of {} bytes is too large", code.len()))
        })?;

        let ptr = self.alloc.call(&mut self.store, len).map_err(trapped)?;
        self.memory
            .write(&mut self.store, ptr as u32 as usize, code.as_bytes())
            .map_err(|e| RuntimeFault::Abi(format!("input buffer at {ptr} is unusable: {e}")))?;

        let packed = self.execute.call(&mut self.store, (ptr, len)).map_err(trapped)?;
        if let Some(dealloc) = &self.dealloc {
            dealloc.call(&mut self.store, (ptr, len)).map_err(trapped)?;
        }

        self.read_result(packed)
    }

    fn reset(&mut self) -> Result<(), RuntimeFault> {
        self.reset.call(&mut self.store, ()).map_err(trapped)
    }
}

fn trapped(e: wasmtime::Error) -> RuntimeFault {
    RuntimeFault::Trap(format!("{e:#}"))
}

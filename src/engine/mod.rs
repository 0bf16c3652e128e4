//! # Execution Engine
//!
//! Wasmtime host for loaded tenant code. Guest calls are synchronous, so the
//! pipeline runs them on the blocking pool; host capability functions bridge
//! back into the async runtime through the captured handle. Every invocation
//! gets a fresh store with a memory limiter and a fuel budget derived from
//! the request timeout, so runaway guest code traps instead of holding a
//! worker.

mod envelope;
mod host;

use std::sync::Arc;

use tokio::runtime::Handle;
use wasmtime::{Config, Engine, Linker, Module, Store, Trap};

use crate::context::TenantContext;
use crate::errors::{Error, Result};

pub use envelope::{
    EnvelopeCodec, PostFilterInput, PostFilterOutput, PreFilterOutput, RequestEnvelope,
    ResponseEnvelope, StreamRecordEnvelope,
};
pub use host::{pack, unpack, HostState, NONE};

/// Per-invocation resource limits.
#[derive(Debug, Clone)]
pub struct RuntimeLimits {
    /// Maximum guest linear memory in bytes.
    pub max_memory_bytes: usize,
    /// Maximum wasm stack in bytes.
    pub max_stack_bytes: usize,
    /// Fuel units granted per millisecond of the invocation budget.
    pub fuel_per_ms: u64,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 64 * 1024 * 1024,
            max_stack_bytes: 1024 * 1024,
            fuel_per_ms: 100_000,
        }
    }
}

/// One prepared guest invocation.
#[derive(Clone)]
pub struct GuestCall {
    pub module: Module,
    pub entry: String,
    /// JSON configuration bytes, present when the unit accepts configuration.
    pub config: Option<Vec<u8>>,
    /// Diagnostic label, the artifact coordinate.
    pub unit: String,
}

/// Shared wasmtime engine plus the process-wide limits.
pub struct WasmEngine {
    engine: Engine,
    limits: RuntimeLimits,
}

impl WasmEngine {
    pub fn new(limits: RuntimeLimits) -> Result<Self> {
        let mut config = Config::new();
        config.consume_fuel(true).max_wasm_stack(limits.max_stack_bytes);
        let engine = Engine::new(&config)
            .map_err(|e| Error::internal(format!("Failed to create WASM engine: {e}")))?;
        Ok(Self { engine, limits })
    }

    /// Compile raw artifact bytes into a module ("class space" creation).
    pub fn compile(&self, bytes: &[u8]) -> std::result::Result<Module, wasmtime::Error> {
        Module::new(&self.engine, bytes)
    }

    /// Run a guest entry on the blocking pool.
    pub async fn invoke(
        self: &Arc<Self>,
        call: GuestCall,
        context: Arc<TenantContext>,
        input: Vec<u8>,
        timeout_ms: u64,
    ) -> Result<Vec<u8>> {
        let engine = self.clone();
        let handle = Handle::current();
        tokio::task::spawn_blocking(move || {
            engine.invoke_sync(&call, context, handle, &input, timeout_ms)
        })
        .await
        .map_err(|e| Error::internal(format!("Guest worker terminated: {e}")))?
    }

    /// Synchronous invocation: instantiate, configure if accepted, feed the
    /// input envelope through the entry export, read back the packed output.
    pub fn invoke_sync(
        &self,
        call: &GuestCall,
        context: Arc<TenantContext>,
        handle: Handle,
        input: &[u8],
        timeout_ms: u64,
    ) -> Result<Vec<u8>> {
        let unit = call.unit.as_str();
        let mut store = Store::new(
            &self.engine,
            HostState::new(context, handle, self.limits.max_memory_bytes),
        );
        store.limiter(|state| &mut state.limits);
        let fuel = self.limits.fuel_per_ms.saturating_mul(timeout_ms.max(1));
        store
            .set_fuel(fuel)
            .map_err(|e| Error::internal(format!("Failed to set fuel budget: {e}")))?;

        let mut linker: Linker<HostState> = Linker::new(&self.engine);
        host::link_host_functions(&mut linker)
            .map_err(|e| Error::internal(format!("Failed to link host capabilities: {e}")))?;

        let instance = linker
            .instantiate(&mut store, &call.module)
            .map_err(|e| map_guest_error(e, unit, timeout_ms))?;
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| Error::execution(unit, "guest module has no memory export"))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .map_err(|_| Error::execution(unit, "guest module has no alloc export"))?;

        if let Some(config) = &call.config {
            let configure = instance
                .get_typed_func::<(i32, i32), ()>(&mut store, "configure")
                .map_err(|_| Error::execution(unit, "guest module has no configure export"))?;
            let ptr = alloc
                .call(&mut store, config.len() as i32)
                .map_err(|e| map_guest_error(e, unit, timeout_ms))?;
            memory
                .write(&mut store, ptr as usize, config)
                .map_err(|e| Error::execution(unit, format!("configure write failed: {e}")))?;
            configure
                .call(&mut store, (ptr, config.len() as i32))
                .map_err(|e| map_guest_error(e, unit, timeout_ms))?;
        }

        let entry = instance
            .get_typed_func::<(i32, i32), i64>(&mut store, &call.entry)
            .map_err(|_| Error::execution(unit, format!("guest module has no '{}' entry", call.entry)))?;

        let ptr = alloc
            .call(&mut store, input.len() as i32)
            .map_err(|e| map_guest_error(e, unit, timeout_ms))?;
        memory
            .write(&mut store, ptr as usize, input)
            .map_err(|e| Error::execution(unit, format!("input write failed: {e}")))?;

        let packed = entry
            .call(&mut store, (ptr, input.len() as i32))
            .map_err(|e| map_guest_error(e, unit, timeout_ms))?;

        if packed <= 0 {
            return Ok(Vec::new());
        }
        let (out_ptr, out_len) = unpack(packed);
        let mut output = vec![0u8; out_len];
        memory
            .read(&store, out_ptr, &mut output)
            .map_err(|e| Error::execution(unit, format!("guest returned an invalid output range: {e}")))?;
        Ok(output)
    }
}

fn map_guest_error(error: wasmtime::Error, unit: &str, timeout_ms: u64) -> Error {
    if let Some(Trap::OutOfFuel) = error.downcast_ref::<Trap>() {
        return Error::timeout(format!("guest execution in {unit}"), timeout_ms);
    }
    match error.downcast::<Error>() {
        Ok(platform) => platform,
        Err(error) => Error::execution(unit, error.to_string()),
    }
}

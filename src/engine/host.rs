//! Host capability functions linked into every guest instance.
//!
//! Values cross the boundary through guest linear memory: the host reads
//! parameters at `(ptr, len)` and writes results by calling the guest's
//! `alloc` export, returning a packed `(ptr << 32) | len` i64. `-1` means
//! "no value" — either a cache miss or a capability absent because the
//! request is not yet scoped to a tenant.
//!
//! Backend failures surface as platform errors and trap the guest; malformed
//! guest arguments trap with a plain message. Outbound HTTP transport
//! failures are the one exception — they come back inside the response
//! envelope so tenant code can apply its own retry policy.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::runtime::Handle;
use wasmtime::{Caller, Extern, Linker, Memory, StoreLimits, StoreLimitsBuilder};

use crate::context::{HttpCallRequest, LogLevel, TenantContext};

/// Packed "no value / capability absent" sentinel.
pub const NONE: i64 = -1;

/// Per-invocation store data.
pub struct HostState {
    pub context: Arc<TenantContext>,
    pub handle: Handle,
    pub limits: StoreLimits,
}

impl HostState {
    pub fn new(context: Arc<TenantContext>, handle: Handle, max_memory_bytes: usize) -> Self {
        Self {
            context,
            handle,
            limits: StoreLimitsBuilder::new()
                .memory_size(max_memory_bytes)
                .instances(2)
                .memories(1)
                .tables(8)
                .build(),
        }
    }
}

pub fn pack(ptr: i32, len: usize) -> i64 {
    ((ptr as i64) << 32) | (len as i64 & 0xFFFF_FFFF)
}

pub fn unpack(packed: i64) -> (usize, usize) {
    (((packed >> 32) & 0xFFFF_FFFF) as usize, (packed & 0xFFFF_FFFF) as usize)
}

fn guest_memory(caller: &mut Caller<'_, HostState>) -> wasmtime::Result<Memory> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| wasmtime::Error::msg("guest module has no memory export"))
}

fn read_bytes(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<Vec<u8>> {
    let memory = guest_memory(caller)?;
    let mut buffer = vec![0u8; len as usize];
    memory.read(&mut *caller, ptr as usize, &mut buffer)?;
    Ok(buffer)
}

fn read_string(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> wasmtime::Result<String> {
    let bytes = read_bytes(caller, ptr, len)?;
    String::from_utf8(bytes)
        .map_err(|_| wasmtime::Error::msg("guest passed a non-UTF-8 string argument"))
}

/// Copy `bytes` into guest memory via its `alloc` export and pack the range.
fn write_guest(caller: &mut Caller<'_, HostState>, bytes: &[u8]) -> wasmtime::Result<i64> {
    let memory = guest_memory(caller)?;
    let alloc = caller
        .get_export("alloc")
        .and_then(Extern::into_func)
        .ok_or_else(|| wasmtime::Error::msg("guest module has no alloc export"))?
        .typed::<i32, i32>(&mut *caller)?;
    let ptr = alloc.call(&mut *caller, bytes.len() as i32)?;
    memory.write(&mut *caller, ptr as usize, bytes)?;
    Ok(pack(ptr, bytes.len()))
}

fn bridge<T, F>(caller: &Caller<'_, HostState>, future: F) -> wasmtime::Result<T>
where
    F: std::future::Future<Output = crate::errors::Result<T>>,
{
    caller.data().handle.clone().block_on(future).map_err(wasmtime::Error::new)
}

/// Link every platform capability into the linker. The set must stay in sync
/// with the sandbox allow-list — an import linked here but not allow-listed
/// would be unreachable, and the reverse would fail instantiation.
pub fn link_host_functions(linker: &mut Linker<HostState>) -> wasmtime::Result<()> {
    linker.func_wrap(
        "portico",
        "log",
        |mut caller: Caller<'_, HostState>, level: i32, ptr: i32, len: i32| -> wasmtime::Result<()> {
            let message = read_string(&mut caller, ptr, len)?;
            caller.data().context.logger.log(LogLevel::from_raw(level), &message);
            Ok(())
        },
    )?;

    linker.func_wrap(
        "portico",
        "cache_get",
        |mut caller: Caller<'_, HostState>, kptr: i32, klen: i32| -> wasmtime::Result<i64> {
            let field = read_string(&mut caller, kptr, klen)?;
            let cache = match caller.data().context.cache.clone() {
                Some(cache) => cache,
                None => return Ok(NONE),
            };
            match bridge(&caller, async { cache.get(&field).await })? {
                Some(value) => write_guest(&mut caller, value.as_bytes()),
                None => Ok(NONE),
            }
        },
    )?;

    linker.func_wrap(
        "portico",
        "cache_set",
        |mut caller: Caller<'_, HostState>,
         kptr: i32,
         klen: i32,
         vptr: i32,
         vlen: i32|
         -> wasmtime::Result<i32> {
            let field = read_string(&mut caller, kptr, klen)?;
            let value = read_string(&mut caller, vptr, vlen)?;
            let cache = match caller.data().context.cache.clone() {
                Some(cache) => cache,
                None => return Ok(-1),
            };
            let created = bridge(&caller, async { cache.set(&field, &value).await })?;
            Ok(created as i32)
        },
    )?;

    linker.func_wrap(
        "portico",
        "cache_del",
        |mut caller: Caller<'_, HostState>, kptr: i32, klen: i32| -> wasmtime::Result<i64> {
            let field = read_string(&mut caller, kptr, klen)?;
            let cache = match caller.data().context.cache.clone() {
                Some(cache) => cache,
                None => return Ok(NONE),
            };
            let removed = bridge(&caller, async { cache.del(&[field]).await })?;
            Ok(removed as i64)
        },
    )?;

    linker.func_wrap(
        "portico",
        "cache_exists",
        |mut caller: Caller<'_, HostState>, kptr: i32, klen: i32| -> wasmtime::Result<i32> {
            let field = read_string(&mut caller, kptr, klen)?;
            let cache = match caller.data().context.cache.clone() {
                Some(cache) => cache,
                None => return Ok(-1),
            };
            let exists = bridge(&caller, async { cache.exists(&field).await })?;
            Ok(exists as i32)
        },
    )?;

    linker.func_wrap(
        "portico",
        "cache_keys",
        |mut caller: Caller<'_, HostState>| -> wasmtime::Result<i64> {
            let cache = match caller.data().context.cache.clone() {
                Some(cache) => cache,
                None => return Ok(NONE),
            };
            let keys = bridge(&caller, async { cache.keys().await })?;
            let json = serde_json::to_vec(&keys)
                .map_err(|e| wasmtime::Error::msg(format!("cache_keys encoding failed: {e}")))?;
            write_guest(&mut caller, &json)
        },
    )?;

    linker.func_wrap(
        "portico",
        "cache_values",
        |mut caller: Caller<'_, HostState>| -> wasmtime::Result<i64> {
            let cache = match caller.data().context.cache.clone() {
                Some(cache) => cache,
                None => return Ok(NONE),
            };
            let values = bridge(&caller, async { cache.values().await })?;
            let json = serde_json::to_vec(&values)
                .map_err(|e| wasmtime::Error::msg(format!("cache_values encoding failed: {e}")))?;
            write_guest(&mut caller, &json)
        },
    )?;

    linker.func_wrap(
        "portico",
        "cache_len",
        |caller: Caller<'_, HostState>| -> wasmtime::Result<i64> {
            let cache = match caller.data().context.cache.clone() {
                Some(cache) => cache,
                None => return Ok(NONE),
            };
            let length = bridge(&caller, async { cache.len().await })?;
            Ok(length as i64)
        },
    )?;

    linker.func_wrap(
        "portico",
        "stream_append",
        |mut caller: Caller<'_, HostState>,
         tptr: i32,
         tlen: i32,
         pptr: i32,
         plen: i32|
         -> wasmtime::Result<i64> {
            let topic = read_string(&mut caller, tptr, tlen)?;
            let payload = read_bytes(&mut caller, pptr, plen)?;
            let entries: HashMap<String, String> = serde_json::from_slice(&payload)
                .map_err(|_| {
                    wasmtime::Error::msg("stream_append payload must be a JSON object of strings")
                })?;
            let stream = match caller.data().context.stream.clone() {
                Some(stream) => stream,
                None => return Ok(NONE),
            };
            let record_id = bridge(&caller, async { stream.send(&topic, &entries).await })?;
            write_guest(&mut caller, record_id.as_bytes())
        },
    )?;

    linker.func_wrap(
        "portico",
        "publish",
        |mut caller: Caller<'_, HostState>,
         cptr: i32,
         clen: i32,
         mptr: i32,
         mlen: i32|
         -> wasmtime::Result<i64> {
            let channel = read_string(&mut caller, cptr, clen)?;
            let message = read_string(&mut caller, mptr, mlen)?;
            let publisher = match caller.data().context.publisher.clone() {
                Some(publisher) => publisher,
                None => return Ok(NONE),
            };
            let receivers = bridge(&caller, async { publisher.publish(&channel, &message).await })?;
            Ok(receivers as i64)
        },
    )?;

    linker.func_wrap(
        "portico",
        "http_call",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> wasmtime::Result<i64> {
            let payload = read_bytes(&mut caller, ptr, len)?;
            let request: HttpCallRequest = serde_json::from_slice(&payload).map_err(|_| {
                wasmtime::Error::msg("http_call payload must be a JSON request envelope")
            })?;
            let http = caller.data().context.http.clone();
            let handle = caller.data().handle.clone();
            let response = handle.block_on(async { http.call(request).await });
            let json = serde_json::to_vec(&response)
                .map_err(|e| wasmtime::Error::msg(format!("http_call encoding failed: {e}")))?;
            write_guest(&mut caller, &json)
        },
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack_roundtrip() {
        let packed = pack(1024, 77);
        assert_eq!(unpack(packed), (1024, 77));
    }

    #[test]
    fn test_pack_zero_length() {
        let packed = pack(8, 0);
        assert_eq!(unpack(packed), (8, 0));
    }

    #[test]
    fn test_none_is_negative() {
        assert!(NONE < 0);
    }
}

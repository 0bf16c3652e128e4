//! Shared harness for integration tests: mock configuration/code
//! repositories plus WAT-built guest artifacts.

// Each integration test binary compiles its own copy; not every helper is
// used by every binary.
#![allow(dead_code)]

use std::sync::Arc;

use portico::backends::Backends;
use portico::configstore::{ConfigStore, GlobalDocument};
use portico::context::{ContextBuilder, HttpCapability, LogForwarderHandle, LogLevel};
use portico::engine::{RuntimeLimits, WasmEngine};
use portico::loader::ArtifactLoader;
use portico::pipeline::RequestPipeline;
use portico::sandbox::SandboxPolicy;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct Harness {
    pub config_repo: MockServer,
    pub code_repo: MockServer,
    pub backends: Backends,
    pub global: Arc<GlobalDocument>,
    pub pipeline: Arc<RequestPipeline>,
}

/// Build a pipeline wired to fresh mock repositories. `global` is the global
/// document body; the code repository URL is filled in automatically.
pub async fn harness(mut global: Value) -> Harness {
    let config_repo = MockServer::start().await;
    let code_repo = MockServer::start().await;

    if global.get("config").is_none() {
        global["config"] = json!({});
    }
    global["config"]["code_repository_url"] = Value::String(code_repo.uri());
    let global: Arc<GlobalDocument> = Arc::new(serde_json::from_value(global).unwrap());

    let http = reqwest::Client::new();
    let backends = Backends::from_storage_url("memory://").unwrap();
    let engine = Arc::new(WasmEngine::new(RuntimeLimits::default()).unwrap());
    let loader = Arc::new(ArtifactLoader::new(
        engine.clone(),
        Arc::new(SandboxPolicy::new()),
        http.clone(),
        global.config.code_repository_url.clone(),
    ));
    let contexts = Arc::new(ContextBuilder::new(
        backends.clone(),
        LogLevel::parse(&global.config.log_level),
        Arc::new(HttpCapability::new(http.clone())),
        LogForwarderHandle::disabled(),
    ));
    let store = Arc::new(ConfigStore::new(http, config_repo.uri()));
    let pipeline = Arc::new(RequestPipeline::new(
        global.clone(),
        store,
        loader,
        contexts,
        engine,
    ));

    Harness { config_repo, code_repo, backends, global, pipeline }
}

pub async fn mount_environment(server: &MockServer, environment: &str, doc: Value) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/imperative-shell/environments/{}/config.json",
            environment
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(doc))
        .mount(server)
        .await;
}

pub async fn mount_tenant(server: &MockServer, environment: &str, tenant: &str, doc: Value) {
    Mock::given(method("GET"))
        .and(path(format!(
            "/imperative-shell/environments/{}/tenants/{}/config.json",
            environment, tenant
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(doc))
        .mount(server)
        .await;
}

pub async fn mount_artifact(server: &MockServer, name: &str, version: &str, wat: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/{}-{}.wasm", name, version)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(wat::parse_str(wat).unwrap()))
        .mount(server)
        .await;
}

const ALLOC_WAT: &str = r#"
  (global $heap (mut i32) (i32.const 4096))
  (func (export "alloc") (param $len i32) (result i32)
    (local $ptr i32)
    global.get $heap
    local.set $ptr
    global.get $heap
    local.get $len
    i32.add
    global.set $heap
    local.get $ptr)
"#;

fn wat_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A unit whose entry ignores its input and returns a constant JSON output.
pub fn const_output(entry: &str, output_json: &str) -> String {
    let packed: i64 = (8i64 << 32) | output_json.len() as i64;
    format!(
        r#"(module
  (memory (export "memory") 16)
  (data (i32.const 8) "{data}")
  {alloc}
  (func (export "{entry}") (param i32 i32) (result i64)
    i64.const {packed}))"#,
        data = wat_escape(output_json),
        alloc = ALLOC_WAT,
    )
}

/// A pre- or post-filter that only sets attributes.
pub fn attribute_filter(entry: &str, attributes_json: &str) -> String {
    const_output(entry, &format!(r#"{{"attributes":{}}}"#, attributes_json))
}

/// A filter that appends a marker record to the tenant `trace` stream and
/// leaves the request/response unchanged. Used to assert execution order.
pub fn marker_filter(entry: &str, marker: &str) -> String {
    let payload = format!(r#"{{"m":"{}"}}"#, marker);
    let packed_payload_len = payload.len();
    format!(
        r#"(module
  (import "portico" "stream_append" (func $append (param i32 i32 i32 i32) (result i64)))
  (memory (export "memory") 16)
  (data (i32.const 0) "trace")
  (data (i32.const 16) "{payload}")
  {alloc}
  (func (export "{entry}") (param i32 i32) (result i64)
    i32.const 0
    i32.const 5
    i32.const 16
    i32.const {payload_len}
    call $append
    drop
    i64.const 0))"#,
        payload = wat_escape(&payload),
        alloc = ALLOC_WAT,
        payload_len = packed_payload_len,
    )
}

/// A unit that traps immediately.
pub fn trap_unit(entry: &str) -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
  {alloc}
  (func (export "{entry}") (param i32 i32) (result i64)
    unreachable))"#,
        alloc = ALLOC_WAT,
    )
}

/// A function that spins until its fuel budget is exhausted.
pub fn spin_function() -> String {
    format!(
        r#"(module
  (memory (export "memory") 1)
  {alloc}
  (func (export "handle") (param i32 i32) (result i64)
    (loop $spin br $spin)
    i64.const 0))"#,
        alloc = ALLOC_WAT,
    )
}

/// A function that tries to import a raw socket capability.
pub fn rogue_function() -> String {
    format!(
        r#"(module
  (import "wasi_snapshot_preview1" "sock_open" (func (param i32 i32) (result i32)))
  (memory (export "memory") 1)
  {alloc}
  (func (export "handle") (param i32 i32) (result i64)
    i64.const 0))"#,
        alloc = ALLOC_WAT,
    )
}

/// The canonical echo function: constant 200 response with body `echo`.
pub fn echo_function() -> String {
    const_output(
        "handle",
        r#"{"status":200,"headers":{"x-fn":"echo"},"body":"ZWNobw=="}"#,
    )
}

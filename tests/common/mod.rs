//! Common test utilities: a scriptable target and environment isolation.

#![allow(dead_code)]

use std::env;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use waitkit::core::errors::TargetError;
use waitkit::core::target::{
    ByteStream, ContainerInspect, ContainerState, ExecResult, Port, StrategyTarget,
};

type HostFn = Arc<dyn Fn() -> Result<String, TargetError> + Send + Sync>;
type InspectFn = Arc<dyn Fn() -> Result<ContainerInspect, TargetError> + Send + Sync>;
type MappedPortFn = Arc<dyn Fn(&Port) -> Result<Port, TargetError> + Send + Sync>;
type LogsFn = Arc<dyn Fn() -> Result<Vec<u8>, TargetError> + Send + Sync>;
type ExecFn = Arc<dyn Fn(&[String]) -> Result<ExecResult, TargetError> + Send + Sync>;
type StateFn = Arc<dyn Fn() -> Result<ContainerState, TargetError> + Send + Sync>;
type CopyFn = Arc<dyn Fn(&str) -> Result<Vec<u8>, TargetError> + Send + Sync>;

/// A target whose every capability is a replaceable closure.
///
/// Defaults: host `127.0.0.1`, empty inspection, unmapped ports, empty logs,
/// successful exec, running state, missing files.
#[derive(Clone)]
pub struct MockStrategyTarget {
    host: HostFn,
    inspect: InspectFn,
    mapped_port: MappedPortFn,
    logs: LogsFn,
    exec: ExecFn,
    state: StateFn,
    copy: CopyFn,
    state_calls: Arc<AtomicUsize>,
}

impl Default for MockStrategyTarget {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStrategyTarget {
    pub fn new() -> Self {
        Self {
            host: Arc::new(|| Ok("127.0.0.1".to_string())),
            inspect: Arc::new(|| Ok(ContainerInspect::default())),
            mapped_port: Arc::new(|port| Err(TargetError::PortNotFound(port.clone()))),
            logs: Arc::new(|| Ok(Vec::new())),
            exec: Arc::new(|_| Ok(ExecResult::default())),
            state: Arc::new(|| Ok(ContainerState::running())),
            copy: Arc::new(|path| Err(TargetError::NotFound(path.to_string()))),
            state_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_host(mut self, f: impl Fn() -> Result<String, TargetError> + Send + Sync + 'static) -> Self {
        self.host = Arc::new(f);
        self
    }

    pub fn with_inspect(
        mut self,
        f: impl Fn() -> Result<ContainerInspect, TargetError> + Send + Sync + 'static,
    ) -> Self {
        self.inspect = Arc::new(f);
        self
    }

    pub fn with_mapped_port(
        mut self,
        f: impl Fn(&Port) -> Result<Port, TargetError> + Send + Sync + 'static,
    ) -> Self {
        self.mapped_port = Arc::new(f);
        self
    }

    pub fn with_logs(mut self, f: impl Fn() -> Result<Vec<u8>, TargetError> + Send + Sync + 'static) -> Self {
        self.logs = Arc::new(f);
        self
    }

    pub fn with_exec(
        mut self,
        f: impl Fn(&[String]) -> Result<ExecResult, TargetError> + Send + Sync + 'static,
    ) -> Self {
        self.exec = Arc::new(f);
        self
    }

    pub fn with_state(
        mut self,
        f: impl Fn() -> Result<ContainerState, TargetError> + Send + Sync + 'static,
    ) -> Self {
        self.state = Arc::new(f);
        self
    }

    pub fn with_copy(mut self, f: impl Fn(&str) -> Result<Vec<u8>, TargetError> + Send + Sync + 'static) -> Self {
        self.copy = Arc::new(f);
        self
    }

    /// Number of `state()` calls observed so far.
    pub fn state_calls(&self) -> usize {
        self.state_calls.load(Ordering::SeqCst)
    }

    /// Shared counter of `state()` calls, readable from inside closures.
    pub fn state_calls_handle(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.state_calls)
    }
}

#[async_trait::async_trait]
impl StrategyTarget for MockStrategyTarget {
    async fn host(&self) -> Result<String, TargetError> {
        (self.host)()
    }

    async fn inspect(&self) -> Result<ContainerInspect, TargetError> {
        (self.inspect)()
    }

    async fn mapped_port(&self, port: &Port) -> Result<Port, TargetError> {
        (self.mapped_port)(port)
    }

    async fn logs(&self) -> Result<ByteStream, TargetError> {
        let logs = (self.logs)()?;
        Ok(Box::new(Cursor::new(logs)))
    }

    async fn exec(&self, cmd: &[String]) -> Result<ExecResult, TargetError> {
        (self.exec)(cmd)
    }

    async fn state(&self) -> Result<ContainerState, TargetError> {
        self.state_calls.fetch_add(1, Ordering::SeqCst);
        (self.state)()
    }

    async fn copy_file_from_container(&self, path: &str) -> Result<ByteStream, TargetError> {
        let content = (self.copy)(path)?;
        Ok(Box::new(Cursor::new(content)))
    }
}

/// Test helper to create a temporary directory for test files
pub fn create_temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Path of a PEM fixture under `tests/testdata`.
pub fn testdata(name: &str) -> String {
    format!("{}/tests/testdata/{}", env!("CARGO_MANIFEST_DIR"), name)
}

const WAITKIT_VARS: &[&str] = &[
    "WAITKIT_CONFIG",
    "WAITKIT_STARTUP_TIMEOUT_MS",
    "WAITKIT_POLL_INTERVAL_MS",
    "WAITKIT_DEBUG",
    "WAITKIT_DEBUG_LOG",
];

/// Clears every `WAITKIT_*` variable and restores the originals on drop.
pub struct IsolatedEnv {
    saved: Vec<(&'static str, Option<String>)>,
}

impl IsolatedEnv {
    pub fn new() -> Self {
        let saved = WAITKIT_VARS
            .iter()
            .map(|name| (*name, env::var(name).ok()))
            .collect();
        for name in WAITKIT_VARS {
            env::remove_var(name);
        }
        Self { saved }
    }

    pub fn set(&self, name: &str, value: impl AsRef<std::ffi::OsStr>) {
        env::set_var(name, value);
    }
}

impl Drop for IsolatedEnv {
    fn drop(&mut self) {
        for (name, value) in &self.saved {
            match value {
                Some(value) => env::set_var(name, value),
                None => env::remove_var(name),
            }
        }
    }
}

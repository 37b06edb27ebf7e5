//! A [`StrategyTarget`] for processes on the local machine.
//!
//! The local host has no port mapping: every declared port maps to itself on
//! `127.0.0.1`. Logs come from an optional log file, commands run through
//! the local shell and "copying" a file reads it from the local filesystem.
//! The target always reports itself as running.

use std::io::Cursor;
use std::path::PathBuf;

use tokio::process::Command;

use crate::core::errors::TargetError;
use crate::core::target::{
    ByteStream, ContainerInspect, ContainerState, ExecResult, Port, PortBinding, StrategyTarget,
};

#[derive(Debug, Clone)]
pub struct LocalTarget {
    host: String,
    ports: Vec<Port>,
    log_file: Option<PathBuf>,
}

impl Default for LocalTarget {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ports: Vec::new(),
            log_file: None,
        }
    }
}

impl LocalTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: impl Into<Port>) -> Self {
        let port = port.into();
        if !self.ports.contains(&port) {
            self.ports.push(port);
        }
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }
}

#[async_trait::async_trait]
impl StrategyTarget for LocalTarget {
    async fn host(&self) -> Result<String, TargetError> {
        Ok(self.host.clone())
    }

    async fn inspect(&self) -> Result<ContainerInspect, TargetError> {
        let ports = self
            .ports
            .iter()
            .map(|port| (port.clone(), vec![PortBinding::new(self.host.as_str(), port.number())]))
            .collect();
        Ok(ContainerInspect {
            network_mode: "local".to_string(),
            ports,
        })
    }

    async fn mapped_port(&self, port: &Port) -> Result<Port, TargetError> {
        if self.ports.contains(port) {
            Ok(port.clone())
        } else {
            Err(TargetError::PortNotFound(port.clone()))
        }
    }

    async fn logs(&self) -> Result<ByteStream, TargetError> {
        let Some(path) = &self.log_file else {
            return Ok(Box::new(Cursor::new(Vec::new())));
        };
        match tokio::fs::File::open(path).await {
            Ok(file) => Ok(Box::new(file)),
            // nothing logged yet
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Box::new(Cursor::new(Vec::new()))),
            Err(err) => Err(err.into()),
        }
    }

    async fn exec(&self, cmd: &[String]) -> Result<ExecResult, TargetError> {
        let Some((program, args)) = cmd.split_first() else {
            return Err(TargetError::Other("empty command".to_string()));
        };
        // a probe abandoned at the deadline must not leave its process behind
        let output = match Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ExecResult {
                    exit_code: 127,
                    output: err.to_string().into_bytes(),
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
                return Ok(ExecResult {
                    exit_code: 126,
                    output: err.to_string().into_bytes(),
                })
            }
            Err(err) => return Err(err.into()),
        };

        let mut combined = output.stdout;
        combined.extend_from_slice(&output.stderr);
        Ok(ExecResult {
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
            output: combined,
        })
    }

    async fn state(&self) -> Result<ContainerState, TargetError> {
        Ok(ContainerState::running())
    }

    async fn copy_file_from_container(&self, path: &str) -> Result<ByteStream, TargetError> {
        match tokio::fs::File::open(path).await {
            Ok(file) => Ok(Box::new(file)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(TargetError::NotFound(path.to_string())),
            Err(err) => Err(err.into()),
        }
    }
}

use std::path::PathBuf;

use clap::Parser;

use crate::config::WaitConfig;
use crate::core::local::LocalTarget;
use crate::core::wait::{for_all, for_exec, for_file, for_http, for_listening_port, for_log, Strategy};

#[derive(Parser, Debug)]
#[command(name = "waitkit")]
#[command(version = concat!("Ver:", env!("CARGO_PKG_VERSION")))]
#[command(about = "Block until a local service is ready")]
pub struct Cli {
    /// TCP port that must accept connections (repeatable)
    #[arg(short = 'p', long = "port", value_name = "PORT")]
    pub ports: Vec<u16>,

    /// HTTP path probed on the first --port
    #[arg(long = "http", value_name = "PATH")]
    pub http: Option<String>,

    /// Expected HTTP status code
    #[arg(long = "status", default_value_t = 200)]
    pub status: u16,

    /// Text (or pattern with --regex) that must appear in the log file
    #[arg(long = "log", value_name = "TEXT", requires = "log_file")]
    pub log: Option<String>,

    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Required number of --log matches
    #[arg(long = "occurrence", default_value_t = 1)]
    pub occurrence: usize,

    /// Treat --log as a regular expression
    #[arg(long = "regex")]
    pub regex: bool,

    /// File that must exist
    #[arg(long = "file", value_name = "PATH")]
    pub file: Option<String>,

    /// Shell command that must succeed
    #[arg(long = "exec", value_name = "CMD")]
    pub exec: Option<String>,

    /// Exit code expected from --exec
    #[arg(long = "exit-code", default_value_t = 0)]
    pub exit_code: i64,

    /// Overall timeout in milliseconds
    #[arg(long = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    /// Delay between attempts in milliseconds
    #[arg(long = "poll-ms")]
    pub poll_ms: Option<u64>,

    /// Print the effective configuration and exit
    #[arg(long = "print-config")]
    pub print_config: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("nothing to wait for: pass at least one of --port, --http, --log, --file or --exec")]
    NoChecks,
    #[error("--http needs a --port to probe")]
    HttpWithoutPort,
    #[error("--{0} must be greater than zero")]
    Zero(&'static str),
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Fold explicit flags over the loaded configuration.
    pub fn effective_config(&self, mut config: WaitConfig) -> Result<WaitConfig, CliError> {
        if let Some(timeout_ms) = self.timeout_ms {
            if timeout_ms == 0 {
                return Err(CliError::Zero("timeout-ms"));
            }
            config.startup_timeout_ms = timeout_ms;
        }
        if let Some(poll_ms) = self.poll_ms {
            if poll_ms == 0 {
                return Err(CliError::Zero("poll-ms"));
            }
            config.poll_interval_ms = poll_ms;
        }
        Ok(config)
    }

    pub fn target(&self) -> LocalTarget {
        let mut target = LocalTarget::new();
        for port in &self.ports {
            target = target.with_port(*port);
        }
        if let Some(path) = &self.log_file {
            target = target.with_log_file(path.clone());
        }
        target
    }

    /// Compose every requested check into one strategy bounded by the startup timeout.
    pub fn build_strategy(&self, config: &WaitConfig) -> Result<Strategy, CliError> {
        let mut checks: Vec<Strategy> = Vec::new();
        // leaves would otherwise fall back to their own 60s default
        let budget = config.startup_timeout();

        // same network namespace, the dial is enough
        for port in &self.ports {
            checks.push(
                for_listening_port(*port)
                    .skip_internal_check()
                    .with_startup_timeout(budget)
                    .into(),
            );
        }

        if let Some(path) = &self.http {
            let port = self.ports.first().ok_or(CliError::HttpWithoutPort)?;
            let expected = self.status;
            let mut http = for_http(path.as_str())
                .with_port(*port)
                .with_status_code_matcher(move |status| status == expected)
                .with_startup_timeout(budget);
            if config.force_ipv4_localhost {
                http = http.with_forced_ipv4_localhost();
            }
            checks.push(http.into());
        }

        if let Some(text) = &self.log {
            let mut log = for_log(text.as_str())
                .with_occurrence(self.occurrence)
                .with_startup_timeout(budget);
            if self.regex {
                log = log.as_regexp();
            }
            checks.push(log.into());
        }

        if let Some(path) = &self.file {
            checks.push(for_file(path.as_str()).with_startup_timeout(budget).into());
        }

        if let Some(cmd) = &self.exec {
            checks.push(
                for_exec(["sh", "-c", cmd.as_str()])
                    .with_exit_code(self.exit_code)
                    .with_startup_timeout(budget)
                    .into(),
            );
        }

        if checks.is_empty() {
            return Err(CliError::NoChecks);
        }

        Ok(for_all(checks)
            .with_deadline(budget)
            .with_poll_interval(config.poll_interval())
            .into())
    }
}

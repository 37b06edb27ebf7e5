/*!
Structured JSON-Lines debug logging for wait strategies.

Logging is off unless `WAITKIT_DEBUG` is truthy (`true`, `1`, `yes`, `on`).
When enabled, every strategy evaluation writes `strategy_start` /
`strategy_end` entries sharing a correlation id, and the loops add
`probe_retry`, `port_resolved` and `state_check_failed` entries as they go.

## File layout

- Default path: `~/.waitkit/waitkit-debug.log`, overridable with `WAITKIT_DEBUG_LOG`
- Size based rotation into gzip archives (`waitkit-debug.<timestamp>.gz`)
- Only the newest archives are kept; rotation is serialized through a lock file

Messages are redacted before they are written: credentials embedded in URLs
and `token`/`password`/`authorization` style pairs never reach disk.
*/

use std::collections::HashMap;
use std::env;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use chrono::Local;
use flate2::{write::GzEncoder, Compression};
use fs2::FileExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const DEBUG_ENV: &str = "WAITKIT_DEBUG";
pub const DEBUG_LOG_ENV: &str = "WAITKIT_DEBUG_LOG";

const ROTATION_BYTES: u64 = 4 * 1024 * 1024;
const KEEP_ARCHIVES: usize = 3;
const ROTATION_CHECK_EVERY: u32 = 100;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub component: String,
    pub event: String,
    pub message: String,
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub fields: HashMap<String, Value>,
}

struct RotatingFile {
    path: PathBuf,
    writes: AtomicU32,
}

impl RotatingFile {
    fn open(path: PathBuf) -> Self {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        Self {
            path,
            writes: AtomicU32::new(0),
        }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        if self.writes.fetch_add(1, Ordering::Relaxed) % ROTATION_CHECK_EVERY == 0 {
            // a failed rotation must not lose the entry
            let _ = self.rotate_if_oversized();
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)
    }

    fn is_oversized(&self) -> std::io::Result<bool> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len() >= ROTATION_BYTES),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn rotate_if_oversized(&self) -> std::io::Result<()> {
        if !self.is_oversized()? {
            return Ok(());
        }

        let lock_path = self.path.with_extension("lock");
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;

        // another process holds the lock and is rotating already
        if lock.try_lock_exclusive().is_err() {
            return Ok(());
        }
        let result = if self.is_oversized()? {
            self.compress_current()
        } else {
            Ok(())
        };
        let _ = std::fs::remove_file(&lock_path);
        result
    }

    fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "waitkit-debug".to_string())
    }

    fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    fn compress_current(&self) -> std::io::Result<()> {
        let archive = self.dir().join(format!(
            "{}.{}.gz",
            self.stem(),
            Local::now().format("%Y%m%d_%H%M%S")
        ));
        let staging = self.path.with_extension("rotating");
        std::fs::rename(&self.path, &staging)?;

        let mut encoder = GzEncoder::new(File::create(&archive)?, Compression::default());
        std::io::copy(&mut BufReader::new(File::open(&staging)?), &mut encoder)?;
        encoder.finish()?;
        std::fs::remove_file(&staging)?;

        let _ = self.prune_archives();
        Ok(())
    }

    fn prune_archives(&self) -> std::io::Result<()> {
        let prefix = format!("{}.", self.stem());
        let mut archives = Vec::new();
        for entry in std::fs::read_dir(self.dir())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(".gz") {
                archives.push((entry.path(), entry.metadata()?.modified()?));
            }
        }

        archives.sort_by_key(|(_, modified)| *modified);
        let excess = archives.len().saturating_sub(KEEP_ARCHIVES);
        for (path, _) in archives.into_iter().take(excess) {
            let _ = std::fs::remove_file(path);
        }
        Ok(())
    }
}

fn redaction_patterns() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"://[^/\s:@]+:[^/\s@]+@", "://[REDACTED]@"),
            (r"(?i)authorization[:=\s]+(basic|bearer)?\s*[^\s,]+", "authorization [REDACTED]"),
            (r"(?i)password[:=\s]+[^\s,]+", "password [REDACTED]"),
            (r"(?i)token[:=\s]+[^\s,]+", "token [REDACTED]"),
            (r"(?i)secret[:=\s]+[^\s,]+", "secret [REDACTED]"),
            (r"-----BEGIN [A-Z ]*PRIVATE KEY-----[\s\S]*?-----END [A-Z ]*PRIVATE KEY-----", "[REDACTED PRIVATE KEY]"),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
        .collect()
    })
}

/// Parse a boolean switch the way `WAITKIT_DEBUG` is parsed.
pub fn parse_env_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

pub struct EnhancedDebugLogger {
    enabled: bool,
    file: Option<Arc<Mutex<RotatingFile>>>,
    session_id: String,
}

impl Default for EnhancedDebugLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl EnhancedDebugLogger {
    pub fn new() -> Self {
        let enabled = env::var(DEBUG_ENV)
            .map(|v| parse_env_bool(&v))
            .unwrap_or(false);
        Self::with_path(enabled, Self::log_path())
    }

    /// Logger writing to an explicit file, ignoring the environment.
    pub fn with_path(enabled: bool, path: PathBuf) -> Self {
        let file = enabled.then(|| Arc::new(Mutex::new(RotatingFile::open(path))));
        Self {
            enabled,
            file,
            session_id: short_id(),
        }
    }

    pub fn log_path() -> PathBuf {
        if let Ok(path) = env::var(DEBUG_LOG_ENV) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".waitkit");
        path.push("waitkit-debug.log");
        path
    }

    pub fn redact(&self, text: &str) -> String {
        let mut redacted = text.to_string();
        for (pattern, replacement) in redaction_patterns() {
            redacted = pattern.replace_all(&redacted, *replacement).into_owned();
        }
        redacted
    }

    fn write(
        &self,
        level: &str,
        component: &str,
        event: &str,
        message: &str,
        correlation_id: Option<&str>,
        fields: HashMap<String, Value>,
    ) {
        if !self.enabled {
            return;
        }

        let entry = LogEntry {
            timestamp: Local::now().to_rfc3339(),
            level: level.to_string(),
            component: component.to_string(),
            event: event.to_string(),
            message: self.redact(message),
            correlation_id: Some(correlation_id.unwrap_or(&self.session_id).to_string()),
            fields,
        };

        let Some(file) = &self.file else { return };
        if let (Ok(file), Ok(line)) = (file.lock(), serde_json::to_string(&entry)) {
            let _ = file.append(&line);
        }
    }

    pub fn debug_sync(&self, component: &str, event: &str, message: &str) {
        self.write("DEBUG", component, event, message, None, HashMap::new());
    }

    pub fn warn_sync(&self, component: &str, event: &str, message: &str) {
        self.write("WARN", component, event, message, None, HashMap::new());
    }

    pub fn error_sync(&self, component: &str, event: &str, message: &str) {
        self.write("ERROR", component, event, message, None, HashMap::new());
    }

    pub fn strategy_start(&self, kind: &str, timeout_ms: Option<u64>, correlation_id: &str) {
        let mut fields = HashMap::new();
        fields.insert("strategy".to_string(), Value::from(kind));
        if let Some(timeout_ms) = timeout_ms {
            fields.insert("timeout_ms".to_string(), Value::from(timeout_ms));
        }
        self.write(
            "WAIT",
            kind,
            "strategy_start",
            &format!("Waiting for {} strategy", kind),
            Some(correlation_id),
            fields,
        );
    }

    pub fn strategy_end(&self, kind: &str, error: Option<&str>, duration_ms: u64, correlation_id: &str) {
        let outcome = if error.is_some() { "failed" } else { "ready" };
        let mut fields = HashMap::new();
        fields.insert("strategy".to_string(), Value::from(kind));
        fields.insert("outcome".to_string(), Value::from(outcome));
        fields.insert("duration_ms".to_string(), Value::from(duration_ms));
        if let Some(error) = error {
            fields.insert("error".to_string(), Value::from(self.redact(error)));
        }
        self.write(
            if error.is_some() { "ERROR" } else { "WAIT" },
            kind,
            "strategy_end",
            &format!("{} strategy {} after {}ms", kind, outcome, duration_ms),
            Some(correlation_id),
            fields,
        );
    }

    pub fn probe_retry(&self, kind: &str, reason: &str) {
        let mut fields = HashMap::new();
        fields.insert("reason".to_string(), Value::from(self.redact(reason)));
        self.write("DEBUG", kind, "probe_retry", &format!("Retrying: {}", reason), None, fields);
    }

    pub fn port_resolved(&self, kind: &str, internal: &str, host: &str, host_port: u16) {
        let mut fields = HashMap::new();
        fields.insert("internal_port".to_string(), Value::from(internal));
        fields.insert("host".to_string(), Value::from(host));
        fields.insert("host_port".to_string(), Value::from(host_port));
        self.write(
            "DEBUG",
            kind,
            "port_resolved",
            &format!("Port {} reachable at {}:{}", internal, host, host_port),
            None,
            fields,
        );
    }

    pub fn state_check_failed(&self, kind: &str, error: &str) {
        self.write(
            "ERROR",
            kind,
            "state_check_failed",
            &format!("Target is not running: {}", error),
            None,
            HashMap::new(),
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

/// Eight character correlation id.
pub fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

pub fn get_debug_logger() -> EnhancedDebugLogger {
    EnhancedDebugLogger::new()
}

//! Diagnostics for the Inventory Hub console.
//!
//! Provides:
//! - **Request log**: a capped ring buffer of API request/response events
//!   recorded by the gateway tap
//! - **About info**: version, build timestamp, git SHA, platform
//! - **Diagnostics export**: packages about info, redacted settings, the
//!   request log and rolling log files into a zip bundle
//! - **Log rotation helpers**: used by `lib.rs` to configure rolling log files

use serde::Serialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fs;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

use crate::settings::Settings;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Maximum size per log file in bytes (5 MB).
pub const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;

/// Rolling log file prefix (`console.2026-10-17`).
pub const LOG_FILE_PREFIX: &str = "console";

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsExportOptions {
    pub include_logs: bool,
    pub redact_sensitive: bool,
}

impl Default for DiagnosticsExportOptions {
    fn default() -> Self {
        Self {
            include_logs: true,
            redact_sensitive: true,
        }
    }
}

/// One request/response pair observed by the API gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEvent {
    pub seq: u64,
    pub at: String,
    pub method: String,
    pub path: String,
    pub status: Option<u16>,
    pub duration_ms: u64,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogStats {
    pub recorded: usize,
    pub errors: usize,
    pub avg_duration_ms: u64,
    pub total_seen: u64,
}

#[derive(Debug)]
struct RequestLogInner {
    events: VecDeque<ApiEvent>,
    next_seq: u64,
}

/// Append-only, capped log of API events. Cloning shares the buffer.
#[derive(Debug, Clone)]
pub struct RequestLog {
    capacity: usize,
    inner: Arc<Mutex<RequestLogInner>>,
}

impl RequestLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Arc::new(Mutex::new(RequestLogInner {
                events: VecDeque::with_capacity(capacity),
                next_seq: 1,
            })),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an event; the oldest event is evicted once the buffer is full.
    /// The `seq` field is assigned here.
    pub fn record(&self, mut event: ApiEvent) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        event.seq = inner.next_seq;
        inner.next_seq += 1;
        while inner.events.len() >= self.capacity {
            inner.events.pop_front();
        }
        inner.events.push_back(event);
    }

    /// Oldest-first copy of the buffered events.
    pub fn snapshot(&self) -> Vec<ApiEvent> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.events.iter().cloned().collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.events.clear();
    }

    pub fn stats(&self) -> RequestLogStats {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let recorded = inner.events.len();
        let errors = inner.events.iter().filter(|e| !e.ok).count();
        let total_ms: u64 = inner.events.iter().map(|e| e.duration_ms).sum();
        RequestLogStats {
            recorded,
            errors,
            avg_duration_ms: if recorded == 0 {
                0
            } else {
                total_ms / recorded as u64
            },
            total_seen: inner.next_seq - 1,
        }
    }
}

/// Returns version, build timestamp, git SHA, and platform info.
pub fn about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

/// Zip writer for one diagnostics bundle.
struct Bundle {
    zip: zip::ZipWriter<fs::File>,
    options: zip::write::SimpleFileOptions,
    redact: bool,
}

impl Bundle {
    fn create(path: &Path, redact: bool) -> Result<Self, String> {
        let file = fs::File::create(path)
            .map_err(|e| format!("Failed to create diagnostics zip: {e}"))?;
        Ok(Self {
            zip: zip::ZipWriter::new(file),
            options: zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated),
            redact,
        })
    }

    fn add_bytes(&mut self, name: &str, bytes: &[u8]) -> Result<(), String> {
        self.zip
            .start_file(name, self.options)
            .map_err(|e| format!("{name}: {e}"))?;
        self.zip.write_all(bytes).map_err(|e| format!("{name}: {e}"))
    }

    fn add_json(&mut self, name: &str, value: Value) -> Result<(), String> {
        let value = if self.redact {
            redact_sensitive_fields(value)
        } else {
            value
        };
        let text = serde_json::to_vec_pretty(&value).map_err(|e| e.to_string())?;
        self.add_bytes(name, &text)
    }

    /// Copy the head of a log file; unreadable files are skipped.
    fn add_log(&mut self, path: &Path) -> Result<(), String> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        let mut head = Vec::new();
        match fs::File::open(path).and_then(|f| f.take(MAX_LOG_SIZE).read_to_end(&mut head)) {
            Ok(_) => self.add_bytes(&format!("logs/{name}"), &head),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable log file");
                Ok(())
            }
        }
    }

    fn finish(self) -> Result<(), String> {
        self.zip.finish().map(|_| ()).map_err(|e| e.to_string())
    }
}

/// Write `inventory-hub-diagnostics-<stamp>.zip` into `output_dir` and return
/// its path. The bundle holds about info, the effective settings, the request
/// log and (optionally) the console log files.
pub fn export_diagnostics(
    settings: &Settings,
    requests: &RequestLog,
    output_dir: &Path,
    export_options: DiagnosticsExportOptions,
) -> Result<String, String> {
    fs::create_dir_all(output_dir)
        .map_err(|e| format!("Failed to create diagnostics directory: {e}"))?;

    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let zip_path = output_dir.join(format!("inventory-hub-diagnostics-{stamp}.zip"));
    let mut bundle = Bundle::create(&zip_path, export_options.redact_sensitive)?;

    bundle.add_json("about.json", about_info())?;
    bundle.add_json(
        "settings.json",
        serde_json::to_value(settings).map_err(|e| e.to_string())?,
    )?;
    bundle.add_json(
        "requests.json",
        json!({
            "capacity": requests.capacity(),
            "stats": requests.stats(),
            "events": requests.snapshot(),
        }),
    )?;

    if export_options.include_logs {
        for path in console_log_files(&log_dir(settings)) {
            bundle.add_log(&path)?;
        }
    }

    bundle.finish()?;
    Ok(zip_path.to_string_lossy().into_owned())
}

const SENSITIVE_KEY_MARKERS: &[&str] = &[
    "api_key",
    "apikey",
    "secret",
    "password",
    "pass_field",
    "basic_pass",
    "token",
    "authorization",
    "cookie",
];

/// Replace every non-null value under a credential-looking key.
pub(crate) fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let value = if should_redact_key(&key) && !value.is_null() {
                        Value::String("[REDACTED]".into())
                    } else {
                        redact_sensitive_fields(value)
                    };
                    (key, value)
                })
                .collect(),
        ),
        Value::Array(items) => items.into_iter().map(redact_sensitive_fields).collect(),
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEY_MARKERS.iter().any(|m| key.contains(m))
}

/// Where rolling console logs live: `logging.dir` when set, otherwise
/// `<data dir>/inventory-hub/logs`.
pub fn log_dir(settings: &Settings) -> PathBuf {
    if let Some(dir) = settings.logging.dir.as_ref() {
        return dir.clone();
    }
    data_dir().join("inventory-hub").join("logs")
}

fn data_dir() -> PathBuf {
    let env_dir = |name: &str| std::env::var_os(name).filter(|v| !v.is_empty()).map(PathBuf::from);
    if let Some(dir) = env_dir("XDG_DATA_HOME").or_else(|| env_dir("LOCALAPPDATA")) {
        return dir;
    }
    if cfg!(windows) {
        env_dir("USERPROFILE")
            .unwrap_or_else(|| PathBuf::from("."))
            .join("AppData")
            .join("Local")
    } else {
        env_dir("HOME")
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".local")
            .join("share")
    }
}

fn is_console_log_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&format!("{LOG_FILE_PREFIX}.")))
}

/// Console log files in `dir`, newest first.
fn console_log_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| is_console_log_file(path))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            (path, modified)
        })
        .collect();
    files.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
    files.into_iter().map(|(path, _)| path).collect()
}

/// Delete console log files beyond the newest `MAX_LOG_FILES`.
pub fn prune_old_logs(log_dir: &Path) {
    for path in console_log_files(log_dir).into_iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to prune log file");
        }
    }
}

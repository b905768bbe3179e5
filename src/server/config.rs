// Serialize lets the server log its effective settings as one JSON line
use serde::Serialize;

// Settings arrive as a loosely-typed JSON object from embedders and tests
use serde_json::Value as JsonValue;

use crate::error::{RelayError, Result};

/// Port the relay listens on when none is given.
pub const DEFAULT_PORT: u16 = 12345;

/// Default host for both the server and the console client.
pub const DEFAULT_HOST: &str = "127.0.0.1";

//////////////////////
// LoggerConfig     //
//////////////////////

/// Where and how log records are written
#[derive(Debug, Clone, Serialize)]
pub struct LoggerConfig {
    /// Minimum level, parsed by `log::LevelFilter` (e.g. `"DEBUG"`)
    pub log_level: String,

    /// Coloured lines on stdout
    pub enable_console_log: bool,

    /// Append to `<log_file_path>/<name>.log`
    pub enable_file_log: bool,

    /// One JSON envelope per line in the file branch
    pub enable_json_log: bool,

    /// Directory for the log file; empty means the working directory
    pub log_file_path: String,

    /// chrono format string for timestamps
    pub date_format: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            enable_console_log: true,
            enable_file_log: false,
            enable_json_log: false,
            log_file_path: String::new(),
            date_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        }
    }
}

//////////////////////
// ServerConfig     //
//////////////////////

/// Everything the relay needs to start
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    /// IP or hostname to listen on
    pub host: String,

    /// Port number; `0` asks the OS for a free one
    pub port: u16,

    /// How many Tokio worker threads to spin up (defaults to cpu-1)
    pub worker_threads: usize,

    /// Tell connected clients the server is going away on shutdown
    pub shutdown_notice: bool,

    pub logger: LoggerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            worker_threads: default_worker_threads(),
            shutdown_notice: true,
            logger: LoggerConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// `"host:port"` as passed to `TcpListener::bind`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_worker_threads() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

// Look up `key`; a missing key or a value of the wrong type falls back to `default`.
fn extract_or<T>(obj: &serde_json::Map<String, JsonValue>, key: &str, default: T) -> T
where
    T: serde::de::DeserializeOwned,
{
    match obj.get(key) {
        Some(value) => match serde_json::from_value::<T>(value.clone()) {
            Ok(val) => val,
            Err(err) => {
                eprintln!("Warning: '{}' has wrong type: {}", key, err);
                default
            }
        },
        None => default,
    }
}

impl TryFrom<&JsonValue> for LoggerConfig {
    type Error = RelayError;

    fn try_from(value: &JsonValue) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| RelayError::Config("logger settings must be an object".to_string()))?;
        let d = LoggerConfig::default();

        Ok(LoggerConfig {
            log_level: extract_or(obj, "log_level", d.log_level),
            enable_console_log: extract_or(obj, "enable_console_log", d.enable_console_log),
            enable_file_log: extract_or(obj, "enable_file_log", d.enable_file_log),
            enable_json_log: extract_or(obj, "enable_json_log", d.enable_json_log),
            log_file_path: extract_or(obj, "log_file_path", d.log_file_path),
            date_format: extract_or(obj, "date_format", d.date_format),
        })
    }
}

impl TryFrom<&JsonValue> for ServerConfig {
    type Error = RelayError;

    fn try_from(value: &JsonValue) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| RelayError::Config("server settings must be an object".to_string()))?;
        let d = ServerConfig::default();

        let logger = match obj.get("logger") {
            Some(JsonValue::Null) | None => d.logger,
            Some(nested) => LoggerConfig::try_from(nested)?,
        };

        Ok(ServerConfig {
            host: extract_or(obj, "host", d.host),
            port: extract_or(obj, "port", d.port),
            worker_threads: extract_or(obj, "worker_threads", d.worker_threads).max(1),
            shutdown_notice: extract_or(obj, "shutdown_notice", d.shutdown_notice),
            logger,
        })
    }
}

// Local time formatting for every log line
use chrono::Local;

// Global minimum level (Debug, Info, Warn, Error)
use log::LevelFilter;

// Builder that fans log records out to console and file branches
use fern::Dispatch;

// JSON envelope for the structured file format
use serde_json::Value as JsonValue;

use std::{fs, io};

// The dispatcher is installed once per process
use std::sync::OnceLock;

use crate::server::config::LoggerConfig;

/// A zero-sized handle over the `log` facade.
/// Cloned into the server, every connection handler and the registry.
#[derive(Clone, Debug, Default)]
pub struct Logger;

impl Logger {
    /// Logs a message at DEBUG level
    pub fn debug(&self, msg: &str) {
        log::debug!("{}", msg);
    }

    /// Logs a message at INFO level
    pub fn info(&self, msg: &str) {
        log::info!("{}", msg);
    }

    /// Logs a message at WARN level
    pub fn warn(&self, msg: &str) {
        log::warn!("{}", msg);
    }

    /// Logs a message at ERROR level
    pub fn error(&self, msg: &str) {
        log::error!("{}", msg);
    }
}

static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Compute the log file location: `<dir>/<name>.log`, with dots in the name replaced.
pub fn log_file_path(name: &str, dir: &str) -> String {
    let file_name = format!("{}.log", name.replace('.', "_"));
    if dir.is_empty() {
        file_name
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), file_name)
    }
}

/// Build the one-line JSON envelope written by the file branch in JSON mode.
/// A message that is itself valid JSON is embedded as an object, not a string.
pub fn json_envelope(timestamp: &str, name: &str, level: log::Level, message: &str) -> JsonValue {
    let message_json: JsonValue =
        serde_json::from_str(message).unwrap_or_else(|_| JsonValue::String(message.to_string()));

    serde_json::json!({
        "timestamp": timestamp,
        "name":      name,
        "level":     level.to_string(),
        "message":   message_json
    })
}

/// Install the global fern dispatcher exactly once, according to `cfg`.
/// Later calls return the existing handle and leave the first configuration in place.
pub fn init_logger(name: &str, cfg: &LoggerConfig) -> Logger {
    LOGGER
        .get_or_init(|| {
            // Unparseable levels fall back to Info
            let level = cfg.log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);

            let mut base = Dispatch::new().level(level);

            if cfg.enable_console_log {
                let nm = name.to_string();
                let datefmt = cfg.date_format.clone();

                let log_format_console = move |out: fern::FormatCallback,
                                               message: &std::fmt::Arguments,
                                               record: &log::Record| {
                    out.finish(format_args!(
                        "\x1b[92m{}\x1b[0m - \x1b[94m{}\x1b[0m - {} - {}",
                        Local::now().format(&datefmt),
                        nm,
                        record.level(),
                        message
                    ))
                };

                base = base.chain(Dispatch::new().format(log_format_console).chain(io::stdout()));
            }

            if cfg.enable_file_log {
                if !cfg.log_file_path.is_empty() {
                    let _ = fs::create_dir_all(&cfg.log_file_path);
                }

                let nm = name.to_string();
                let datefmt = cfg.date_format.clone();
                let enable_json = cfg.enable_json_log;
                let filepath = log_file_path(name, &cfg.log_file_path);

                let log_format_file = move |out: fern::FormatCallback,
                                            message: &std::fmt::Arguments,
                                            record: &log::Record| {
                    let timestamp = Local::now().format(&datefmt).to_string();
                    if enable_json {
                        let envelope =
                            json_envelope(&timestamp, &nm, record.level(), &message.to_string());
                        out.finish(format_args!("{}", envelope))
                    } else {
                        out.finish(format_args!(
                            "{} - {} - {} - {}",
                            timestamp,
                            nm,
                            record.level(),
                            message
                        ))
                    }
                };

                // Don't panic on an unopenable file; drop file output instead
                let file_output: Box<dyn io::Write + Send> = match fern::log_file(&filepath) {
                    Ok(fh) => Box::new(fh),
                    Err(err) => {
                        eprintln!("Warning: could not open log file {}: {}", filepath, err);
                        Box::new(io::sink())
                    }
                };

                base = base.chain(Dispatch::new().format(log_format_file).chain(file_output));
            }

            // Another global logger may already be installed (e.g. by an embedding binary)
            if let Err(err) = base.apply() {
                eprintln!("Warning: logger already initialised: {}", err);
            }

            Logger
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_path_replaces_dots_in_name() {
        assert_eq!(log_file_path("chat.relay", ""), "chat_relay.log");
        assert_eq!(log_file_path("chat.relay", "logs/"), "logs/chat_relay.log");
        assert_eq!(log_file_path("server", "/var/log"), "/var/log/server.log");
    }

    #[test]
    fn json_envelope_embeds_plain_text_as_string() {
        let env = json_envelope("t0", "relay", log::Level::Warn, "peer vanished");
        assert_eq!(env["level"], "WARN");
        assert_eq!(env["name"], "relay");
        assert_eq!(env["message"], "peer vanished");
    }

    #[test]
    fn json_envelope_embeds_json_message_as_object() {
        let env = json_envelope("t0", "relay", log::Level::Info, r#"{"peer":"127.0.0.1:1"}"#);
        assert_eq!(env["message"]["peer"], "127.0.0.1:1");
    }
}

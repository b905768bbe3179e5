use std::process::ExitCode;

use clap::{Parser, Subcommand};

use chat_relay::server::config::{DEFAULT_HOST, DEFAULT_PORT};
use chat_relay::{LoggerConfig, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "chat-relay")]
#[command(about = "Line-oriented TCP chat relay")]
#[command(version)]
/// Command-line arguments.
struct Cli {
    /// Minimum log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long, global = true, default_value = "INFO")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay server until Ctrl+C
    Serve {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        #[arg(long, short, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Connect to a relay and chat from the console
    Client {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        #[arg(long, short, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Start a relay and a console client in this process
    Demo {
        #[arg(long, short, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let logger_config = LoggerConfig {
        log_level: cli.log_level,
        ..LoggerConfig::default()
    };

    let result = match cli.command {
        Command::Serve { host, port } => {
            let config = ServerConfig {
                host,
                logger: logger_config,
                ..ServerConfig::default()
            }
            .with_port(port);
            chat_relay::start_server("chat_relay", config)
        }
        Command::Client { host, port } => {
            chat_relay::start_client("chat_client", &host, port, &logger_config)
        }
        Command::Demo { port } => {
            let config = ServerConfig {
                logger: logger_config,
                ..ServerConfig::default()
            }
            .with_port(port);
            chat_relay::start_demo("chat_relay", config)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("chat-relay: {}", e);
            ExitCode::FAILURE
        }
    }
}

//! A line-oriented TCP chat relay.
//!
//! The server broadcasts every line a client sends to all other connected
//! clients. The console client forwards typed lines to the relay and prints
//! canned replies from a local keyword table.

pub mod client;
pub mod error;
pub mod logger;
pub mod responses;
pub mod server;

pub use client::run_client;
pub use error::{RelayError, Result};
pub use logger::{Logger, init_logger};
pub use responses::{FALLBACK_RESPONSE, ResponseTable};
pub use server::RelayServer;
pub use server::config::{LoggerConfig, ServerConfig};

use server::shutdown_signal;

/// Run the relay until Ctrl+C.
///
/// Builds a multi-threaded Tokio runtime sized by `config.worker_threads`,
/// installs the logger under `name`, binds, and serves.
pub fn start_server(name: &str, config: ServerConfig) -> Result<()> {
    let rt = build_runtime(&config)?;

    let logger = init_logger(name, &config.logger);

    rt.block_on(async {
        let server = RelayServer::bind(config, logger.clone()).await?;
        let result = server.run_until(shutdown_signal(logger.clone())).await;
        if let Err(e) = &result {
            logger.error(&format!("Rust server error: {}", e));
        }
        result
    })
}

/// Server and console client in one process: serve, give the listener a
/// second to come up, then chat against it until stdin closes.
pub fn start_demo(name: &str, config: ServerConfig) -> Result<()> {
    let rt = build_runtime(&config)?;

    let logger = init_logger(name, &config.logger);

    let result = rt.block_on(async {
        let server = RelayServer::bind(config, logger.clone()).await?;
        let addr = server.local_addr().map_err(|source| RelayError::Bind {
            addr: "listener".to_string(),
            source,
        })?;

        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server_task = tokio::spawn(server.run_until(async move {
            let _ = stop_rx.await;
        }));

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        let client_result =
            run_client(&addr.ip().to_string(), addr.port(), logger.clone()).await;

        let _ = stop_tx.send(());
        match server_task.await {
            Ok(server_result) => server_result?,
            Err(e) => logger.warn(&format!("⚠️ Server task failed: {}", e)),
        }
        client_result
    });

    // The stdin reader may still be parked on a blocking read
    rt.shutdown_background();
    result
}

/// Run the console client against `host:port` until stdin closes or the
/// relay hangs up.
pub fn start_client(name: &str, host: &str, port: u16, logger_config: &LoggerConfig) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(RelayError::Runtime)?;
    let logger = init_logger(name, logger_config);

    let result = rt.block_on(run_client(host, port, logger));

    // Returning must not wait for a pending stdin line
    rt.shutdown_background();
    result
}

fn build_runtime(config: &ServerConfig) -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("chat-relay-worker")
        .enable_all()
        .build()
        .map_err(RelayError::Runtime)
}

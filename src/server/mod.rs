use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

pub mod config;
pub mod handler;
pub mod registry;

use crate::error::{RelayError, Result};
use crate::logger::Logger;
use crate::server::config::ServerConfig;
use crate::server::handler::ConnectionHandler;
use crate::server::registry::{ConnectionRegistry, SharedRegistry};

/// Owns the listening socket and the registry shared by all connections.
pub struct RelayServer {
    listener: TcpListener,
    registry: SharedRegistry,
    config: ServerConfig,
    logger: Logger,
}

impl RelayServer {
    /// Bind the configured address. Failure here is fatal for the server.
    pub async fn bind(config: ServerConfig, logger: Logger) -> Result<Self> {
        let addr = config.addr();
        let listener = TcpListener::bind(&addr).await.map_err(|source| {
            logger.error(&format!("Failed to bind {}: {}", addr, source));
            RelayError::Bind {
                addr: addr.clone(),
                source,
            }
        })?;

        let bound = listener.local_addr().map(|a| a.to_string()).unwrap_or(addr);
        logger.info(&format!("🚀 Rust server listening on {}", bound));
        if let Ok(settings) = serde_json::to_string(&config) {
            logger.debug(&format!("Settings: {}", settings));
        }

        Ok(Self {
            listener,
            registry: ConnectionRegistry::shared(logger.clone()),
            config,
            logger,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `accept` itself fails.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Accept connections until `shutdown` completes or `accept` fails.
    ///
    /// Either way every live handler is told to stop, and this returns
    /// once all of them have deregistered and closed.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            registry,
            config,
            logger,
        } = self;

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let mut handlers = JoinSet::new();
        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer)) => {
                            logger.info(&format!("🔌 {} connected.", peer));

                            if let Err(e) = stream.set_nodelay(true) {
                                logger.warn(&format!("⚠️ Failed to set TCP_NODELAY for {}: {}", peer, e));
                            }

                            let handler = ConnectionHandler::from_stream(
                                stream,
                                peer,
                                Arc::clone(&registry),
                                logger.clone(),
                            )
                            .with_shutdown_notice(config.shutdown_notice);
                            handlers.spawn(handler.run(shutdown_tx.subscribe()));
                        }
                        Err(e) => {
                            let err = RelayError::Accept(e);
                            logger.error(&format!("{}", err));
                            break Err(err);
                        }
                    }
                }

                // Reap finished handlers so the set doesn't grow with every connection
                Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                    if let Err(e) = joined {
                        logger.warn(&format!("⚠️ Connection task failed: {}", e));
                    }
                }

                _ = &mut shutdown => {
                    logger.info("🧹 Server received shutdown signal.");
                    break Ok(());
                }
            }
        };

        let _ = shutdown_tx.send(());
        while let Some(joined) = handlers.join_next().await {
            if let Err(e) = joined {
                logger.warn(&format!("⚠️ Connection task failed: {}", e));
            }
        }
        logger.info("Server stopped.");

        result
    }
}

/// Resolves when Ctrl+C is pressed. If the signal handler can't be
/// installed the server runs until killed.
pub async fn shutdown_signal(logger: Logger) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => logger.warn("🛑 Ctrl+C received, shutting down."),
        Err(e) => {
            logger.error(&format!("Failed to listen for ctrl_c: {}", e));
            std::future::pending::<()>().await
        }
    }
}

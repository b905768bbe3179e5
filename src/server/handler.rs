use std::borrow::Cow;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast;

use crate::error::RelayError;
use crate::logger::Logger;
use crate::server::registry::{SharedRegistry, Sink};

/// Line written to a client's own sink when the server stops.
pub const SHUTDOWN_NOTICE: &str = "Warning: Server is shutting down.";

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Accepted,
    Registered,
    Relaying,
    Deregistering,
    Closed,
}

/// Why the relay loop stopped.
#[derive(Debug)]
pub enum Disconnect {
    /// The peer closed its side cleanly
    Closed,
    /// Reading the next line failed
    ReadFailed(io::Error),
    /// The server is shutting down
    Shutdown,
}

/// Drives one accepted connection from registration to close.
pub struct ConnectionHandler<R = OwnedReadHalf, W = OwnedWriteHalf> {
    peer: SocketAddr,
    reader: R,
    writer: W,
    registry: SharedRegistry<W>,
    logger: Logger,
    shutdown_notice: bool,
}

impl ConnectionHandler {
    /// Split a freshly accepted TCP stream into a handler.
    pub fn from_stream(
        stream: TcpStream,
        peer: SocketAddr,
        registry: SharedRegistry,
        logger: Logger,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(peer, reader, writer, registry, logger)
    }
}

impl<R, W> ConnectionHandler<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        peer: SocketAddr,
        reader: R,
        writer: W,
        registry: SharedRegistry<W>,
        logger: Logger,
    ) -> Self {
        Self {
            peer,
            reader,
            writer,
            registry,
            logger,
            shutdown_notice: true,
        }
    }

    /// Whether to send [`SHUTDOWN_NOTICE`] to the client on server shutdown.
    pub fn with_shutdown_notice(mut self, enabled: bool) -> Self {
        self.shutdown_notice = enabled;
        self
    }

    /// Run the connection to completion.
    ///
    /// The sink is unregistered exactly once on every exit path, before
    /// the write half is shut down.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> Disconnect {
        let Self {
            peer,
            reader,
            writer,
            registry,
            logger,
            shutdown_notice,
        } = self;
        let mut state = HandlerState::Accepted;

        let sink = Sink::new(peer, writer);
        registry.register(sink.clone()).await;
        transition(&logger, peer, &mut state, HandlerState::Registered);

        let mut reader = BufReader::new(reader);
        transition(&logger, peer, &mut state, HandlerState::Relaying);
        let outcome = relay_lines(&mut reader, &sink, &registry, &mut shutdown_rx, &logger).await;

        transition(&logger, peer, &mut state, HandlerState::Deregistering);
        match &outcome {
            Disconnect::Closed => logger.info(&format!("⚠️ {} disconnected gracefully.", peer)),
            Disconnect::ReadFailed(e) => {
                logger.warn(&format!("❌ Error reading from {}: {}", peer, e))
            }
            Disconnect::Shutdown => logger.warn(&format!("🛑 {} disconnected due to shutdown.", peer)),
        }
        registry.unregister(sink.id()).await;

        if matches!(outcome, Disconnect::Shutdown) && shutdown_notice {
            if let Err(e) = sink.write_line(SHUTDOWN_NOTICE).await {
                logger.warn(&format!("⚠️ Shutdown notice to {}: {}", peer, RelayError::Write(e)));
            }
        }

        if let Err(e) = sink.close().await {
            logger.warn(&format!("⚠️ {} {}", peer, RelayError::Close(e)));
        }
        drop(reader);
        transition(&logger, peer, &mut state, HandlerState::Closed);
        logger.info(&format!("{} connection closed.", peer));

        outcome
    }
}

async fn relay_lines<R, W>(
    reader: &mut BufReader<R>,
    sink: &Sink<W>,
    registry: &SharedRegistry<W>,
    shutdown_rx: &mut broadcast::Receiver<()>,
    logger: &Logger,
) -> Disconnect
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut buf = Vec::new();
    loop {
        tokio::select! {
            read = reader.read_until(b'\n', &mut buf) => {
                match read {
                    Ok(0) => return Disconnect::Closed,
                    Ok(_) => {
                        let line = decode_line(&buf);
                        logger.debug(&format!("📨 From {}: {}", sink.peer(), line));
                        registry.broadcast(&line, sink.id()).await;
                        buf.clear();
                    }
                    Err(e) => return Disconnect::ReadFailed(e),
                }
            }
            // A closed channel means the server is gone too
            _ = shutdown_rx.recv() => return Disconnect::Shutdown,
        }
    }
}

/// Strip the line terminator (`\n` or `\r\n`). Bytes that are not valid
/// UTF-8 become U+FFFD instead of ending the connection.
fn decode_line(buf: &[u8]) -> Cow<'_, str> {
    let line = buf.strip_suffix(b"\n").unwrap_or(buf);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line)
}

fn transition(logger: &Logger, peer: SocketAddr, state: &mut HandlerState, next: HandlerState) {
    logger.debug(&format!("{}: {:?} -> {:?}", peer, state, next));
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::registry::ConnectionRegistry;
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf, duplex, split};
    use tokio::time::{Duration, sleep, timeout};

    type Half = WriteHalf<DuplexStream>;

    struct Client {
        io: DuplexStream,
        task: tokio::task::JoinHandle<Disconnect>,
    }

    fn connect(
        port: u16,
        registry: &SharedRegistry<Half>,
        shutdown: &broadcast::Sender<()>,
    ) -> Client {
        let (client_io, server_io) = duplex(1024);
        let (reader, writer): (ReadHalf<DuplexStream>, Half) = split(server_io);
        let handler = ConnectionHandler::new(
            SocketAddr::from(([127, 0, 0, 1], port)),
            reader,
            writer,
            Arc::clone(registry),
            Logger,
        );
        let task = tokio::spawn(handler.run(shutdown.subscribe()));
        Client { io: client_io, task }
    }

    async fn wait_for_members(registry: &SharedRegistry<Half>, n: usize) {
        timeout(Duration::from_secs(1), async {
            while registry.len().await != n {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("registry never reached expected size");
    }

    async fn read_all(io: &mut DuplexStream) -> String {
        let mut buf = String::new();
        timeout(Duration::from_secs(1), io.read_to_string(&mut buf))
            .await
            .expect("stream never closed")
            .expect("read failed");
        buf
    }

    #[tokio::test]
    async fn relays_lines_to_other_connections_only() {
        let registry: SharedRegistry<Half> = ConnectionRegistry::shared(Logger);
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut a = connect(1, &registry, &shutdown_tx);
        let mut b = connect(2, &registry, &shutdown_tx);
        wait_for_members(&registry, 2).await;

        a.io.write_all(b"hi\r\n").await.unwrap();
        let mut buf = [0u8; 3];
        timeout(Duration::from_secs(1), b.io.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, b"hi\n");

        // Closing both clients ends both handlers; A must have seen nothing
        a.io.shutdown().await.unwrap();
        assert!(matches!(a.task.await.unwrap(), Disconnect::Closed));
        assert_eq!(read_all(&mut a.io).await, "");
        b.io.shutdown().await.unwrap();
        assert!(matches!(b.task.await.unwrap(), Disconnect::Closed));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn eof_deregisters_and_closes() {
        let registry: SharedRegistry<Half> = ConnectionRegistry::shared(Logger);
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut a = connect(1, &registry, &shutdown_tx);
        wait_for_members(&registry, 1).await;

        a.io.shutdown().await.unwrap();
        assert!(matches!(a.task.await.unwrap(), Disconnect::Closed));
        assert!(registry.is_empty().await);
        assert_eq!(read_all(&mut a.io).await, "");
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced_and_relaying_continues() {
        let registry: SharedRegistry<Half> = ConnectionRegistry::shared(Logger);
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut a = connect(1, &registry, &shutdown_tx);
        let mut b = connect(2, &registry, &shutdown_tx);
        wait_for_members(&registry, 2).await;

        a.io.write_all(b"caf\xe9\nhi\n").await.unwrap();
        a.io.shutdown().await.unwrap();
        assert!(matches!(a.task.await.unwrap(), Disconnect::Closed));

        b.io.shutdown().await.unwrap();
        assert!(matches!(b.task.await.unwrap(), Disconnect::Closed));
        assert_eq!(read_all(&mut b.io).await, "caf\u{fffd}\nhi\n");
        assert!(registry.is_empty().await);
    }

    #[test]
    fn decode_line_strips_terminators() {
        assert_eq!(decode_line(b"hi\r\n"), "hi");
        assert_eq!(decode_line(b"hi\n"), "hi");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"\n"), "");
        assert_eq!(decode_line(b"a\rb\n"), "a\rb");
    }

    #[tokio::test]
    async fn failed_shutdown_notice_still_deregisters() {
        let registry: SharedRegistry<Half> = ConnectionRegistry::shared(Logger);
        let (shutdown_tx, _) = broadcast::channel(1);

        // Inbound stays open; outbound has already lost its peer
        let (_inbound_client, inbound) = duplex(64);
        let (outbound_client, outbound) = duplex(64);
        let (reader, _) = split(inbound);
        let (_, writer) = split(outbound);
        drop(outbound_client);

        let handler = ConnectionHandler::new(
            SocketAddr::from(([127, 0, 0, 1], 7)),
            reader,
            writer,
            Arc::clone(&registry),
            Logger,
        );
        let task = tokio::spawn(handler.run(shutdown_tx.subscribe()));
        wait_for_members(&registry, 1).await;

        shutdown_tx.send(()).unwrap();
        let outcome = timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(matches!(outcome, Disconnect::Shutdown));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn shutdown_sends_notice_and_deregisters() {
        let registry: SharedRegistry<Half> = ConnectionRegistry::shared(Logger);
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut a = connect(1, &registry, &shutdown_tx);
        wait_for_members(&registry, 1).await;

        shutdown_tx.send(()).unwrap();
        assert!(matches!(a.task.await.unwrap(), Disconnect::Shutdown));
        assert!(registry.is_empty().await);
        assert_eq!(read_all(&mut a.io).await, format!("{}\n", SHUTDOWN_NOTICE));
    }

    #[tokio::test]
    async fn dropped_shutdown_sender_ends_the_handler() {
        let registry: SharedRegistry<Half> = ConnectionRegistry::shared(Logger);
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let (client_io, server_io) = duplex(64);
        let (reader, writer) = split(server_io);
        let handler = ConnectionHandler::new(
            SocketAddr::from(([127, 0, 0, 1], 9)),
            reader,
            writer,
            Arc::clone(&registry),
            Logger,
        )
        .with_shutdown_notice(false);
        let task = tokio::spawn(handler.run(shutdown_tx.subscribe()));
        drop(shutdown_tx);

        let mut client_io = client_io;
        assert!(matches!(task.await.unwrap(), Disconnect::Shutdown));
        assert_eq!(read_all(&mut client_io).await, "");
        assert!(registry.is_empty().await);
    }
}

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;

use crate::error::RelayError;
use crate::logger::Logger;

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one connection's write half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl SinkId {
    fn next() -> Self {
        SinkId(NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink#{}", self.0)
    }
}

/// The outbound half of a connection.
///
/// Cloning is cheap and every clone writes to the same peer; the inner
/// mutex serialises writes coming from different broadcasting tasks.
pub struct Sink<W = OwnedWriteHalf> {
    id: SinkId,
    peer: SocketAddr,
    writer: Arc<Mutex<W>>,
}

impl<W> Clone for Sink<W> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            peer: self.peer,
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<W> fmt::Debug for Sink<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

impl<W: AsyncWrite + Unpin + Send> Sink<W> {
    pub fn new(peer: SocketAddr, writer: W) -> Self {
        Self {
            id: SinkId::next(),
            peer,
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn id(&self) -> SinkId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Write `line` followed by a newline and flush it.
    pub async fn write_line(&self, line: &str) -> io::Result<()> {
        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push('\n');

        let mut w = self.writer.lock().await;
        w.write_all(frame.as_bytes()).await?;
        w.flush().await
    }

    /// Shut down the write direction; the peer sees end of stream.
    pub async fn close(&self) -> io::Result<()> {
        let mut w = self.writer.lock().await;
        w.shutdown().await
    }
}

/// Outcome of one [`ConnectionRegistry::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Sinks the line was written to
    pub delivered: usize,
    /// Sinks whose write failed; they stay registered
    pub failed: usize,
}

/// The set of sinks currently eligible for broadcast.
///
/// `register`, `unregister` and `broadcast` all take the same lock, so a
/// broadcast fans out to one consistent membership snapshot. The registry
/// never closes or evicts a sink: that belongs to the owning handler.
pub struct ConnectionRegistry<W = OwnedWriteHalf> {
    sinks: Mutex<Vec<Sink<W>>>,
    logger: Logger,
}

/// Registry handle shared by the server and every handler.
pub type SharedRegistry<W = OwnedWriteHalf> = Arc<ConnectionRegistry<W>>;

impl<W: AsyncWrite + Unpin + Send> ConnectionRegistry<W> {
    pub fn new(logger: Logger) -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
            logger,
        }
    }

    pub fn shared(logger: Logger) -> SharedRegistry<W> {
        Arc::new(Self::new(logger))
    }

    /// Add `sink` as a broadcast target. Re-adding a present sink does nothing.
    pub async fn register(&self, sink: Sink<W>) {
        let mut list = self.sinks.lock().await;
        if list.iter().any(|s| s.id == sink.id) {
            self.logger
                .debug(&format!("{} ({}) already registered", sink.id, sink.peer));
            return;
        }
        self.logger.info(&format!(
            "➕ {} ({}) registered. Active sinks: {}",
            sink.id,
            sink.peer,
            list.len() + 1
        ));
        list.push(sink);
    }

    /// Remove the sink with `id`. Removing an absent sink is a no-op.
    pub async fn unregister(&self, id: SinkId) {
        let mut list = self.sinks.lock().await;
        let before = list.len();
        list.retain(|s| s.id != id);
        if list.len() != before {
            self.logger.info(&format!(
                "➖ {} unregistered. Active sinks: {}",
                id,
                list.len()
            ));
        }
    }

    /// Deliver `line` to every registered sink except `exclude`, in
    /// registration order. A failed write is logged and skipped.
    pub async fn broadcast(&self, line: &str, exclude: SinkId) -> BroadcastReport {
        let list = self.sinks.lock().await;
        let mut report = BroadcastReport::default();

        for sink in list.iter() {
            if sink.id == exclude {
                continue;
            }
            match sink.write_line(line).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    self.logger.warn(&format!(
                        "❌ Failed to send to {} ({}): {}",
                        sink.id,
                        sink.peer,
                        RelayError::Write(e)
                    ));
                }
            }
        }

        self.logger.debug(&format!(
            "📣 Broadcast from {}: delivered={} failed={}",
            exclude, report.delivered, report.failed
        ));
        report
    }

    pub async fn contains(&self, id: SinkId) -> bool {
        self.sinks.lock().await.iter().any(|s| s.id == id)
    }

    pub async fn len(&self) -> usize {
        self.sinks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sinks.lock().await.is_empty()
    }
}

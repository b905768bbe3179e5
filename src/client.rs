use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{RelayError, Result};
use crate::logger::Logger;
use crate::responses::ResponseTable;

/// Connect to the relay and chat from the console.
///
/// Each stdin line is sent to the relay verbatim and answered locally with a
/// `Bot:` reply; lines relayed from other clients are printed as they arrive.
pub async fn run_client(host: &str, port: u16, logger: Logger) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|source| RelayError::Connect {
            addr: addr.clone(),
            source,
        })?;
    logger.info(&format!("Connected to {}", addr));

    let (reader, writer) = stream.into_split();
    relay_console(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        reader,
        writer,
        ResponseTable::standard(),
        logger,
    )
    .await
}

/// The console loop over arbitrary streams.
///
/// Returns when `input` reaches end of file or the relay closes the connection.
pub async fn relay_console<I, O, R, W>(
    input: I,
    output: O,
    server_reader: R,
    mut server_writer: W,
    table: ResponseTable,
    logger: Logger,
) -> Result<()>
where
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin + Send + 'static,
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    let output = Arc::new(Mutex::new(output));
    let mut listener = tokio::spawn(print_relayed(server_reader, Arc::clone(&output), logger.clone()));
    let mut input = input.lines();

    let result = loop {
        tokio::select! {
            maybe_line = input.next_line() => {
                match maybe_line {
                    Ok(Some(line)) => {
                        if let Err(e) = send_line(&mut server_writer, &line).await {
                            break Err(RelayError::Write(e));
                        }
                        let reply = format!("Bot: {}", table.lookup(&line));
                        if let Err(e) = print_line(&output, &reply).await {
                            break Err(RelayError::Write(e));
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(RelayError::Read(e)),
                }
            }
            _ = &mut listener => {
                logger.info("Relay closed the connection.");
                return Ok(());
            }
        }
    };

    if let Err(e) = server_writer.shutdown().await {
        logger.warn(&format!("{}", RelayError::Close(e)));
    }
    listener.abort();
    result
}

async fn print_relayed<R, O>(reader: R, output: Arc<Mutex<O>>, logger: Logger)
where
    R: AsyncRead + Unpin,
    O: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Err(e) = print_line(&output, &line).await {
                    logger.warn(&format!("Failed to print relayed line: {}", e));
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                logger.warn(&format!("❌ Error reading from relay: {}", e));
                break;
            }
        }
    }
}

async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(format!("{}\n", line).as_bytes()).await?;
    writer.flush().await
}

async fn print_line<O: AsyncWrite + Unpin>(output: &Mutex<O>, line: &str) -> std::io::Result<()> {
    let mut out = output.lock().await;
    out.write_all(format!("{}\n", line).as_bytes()).await?;
    out.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responses::FALLBACK_RESPONSE;
    use tokio::io::{DuplexStream, Lines, duplex, split};
    use tokio::task::JoinHandle;
    use tokio::time::{Duration, timeout};

    struct Console {
        keyboard: DuplexStream,
        screen: Lines<BufReader<DuplexStream>>,
        relay: Lines<BufReader<ReadHalfOf>>,
        relay_tx: WriteHalfOf,
        task: JoinHandle<Result<()>>,
    }

    type ReadHalfOf = tokio::io::ReadHalf<DuplexStream>;
    type WriteHalfOf = tokio::io::WriteHalf<DuplexStream>;

    fn console() -> Console {
        let (keyboard, stdin) = duplex(1024);
        let (stdout, screen) = duplex(4096);
        let (client_io, relay_io) = duplex(1024);
        let (server_reader, server_writer) = split(client_io);
        let (relay_rx, relay_tx) = split(relay_io);

        let task = tokio::spawn(relay_console(
            BufReader::new(stdin),
            stdout,
            server_reader,
            server_writer,
            ResponseTable::standard(),
            Logger,
        ));

        Console {
            keyboard,
            screen: BufReader::new(screen).lines(),
            relay: BufReader::new(relay_rx).lines(),
            relay_tx,
            task,
        }
    }

    async fn next<R: AsyncRead + Unpin>(lines: &mut Lines<BufReader<R>>) -> Option<String> {
        timeout(Duration::from_secs(1), lines.next_line())
            .await
            .expect("timed out")
            .expect("read failed")
    }

    #[tokio::test]
    async fn typed_lines_go_to_relay_and_get_a_bot_reply() {
        let mut c = console();

        c.keyboard.write_all(b" Hello \n").await.unwrap();
        assert_eq!(next(&mut c.relay).await.as_deref(), Some(" Hello "));
        assert_eq!(
            next(&mut c.screen).await.as_deref(),
            Some("Bot: Hi there! How can I help you today?")
        );

        c.keyboard.write_all(b"xyz123\n").await.unwrap();
        assert_eq!(next(&mut c.relay).await.as_deref(), Some("xyz123"));
        assert_eq!(
            next(&mut c.screen).await,
            Some(format!("Bot: {}", FALLBACK_RESPONSE))
        );

        drop(c.keyboard);
        c.task.await.unwrap().unwrap();
        // Relay side sees the client hang up
        assert_eq!(next(&mut c.relay).await, None);
    }

    #[tokio::test]
    async fn relayed_lines_are_printed() {
        let mut c = console();

        c.relay_tx.write_all(b"from another client\n").await.unwrap();
        assert_eq!(
            next(&mut c.screen).await.as_deref(),
            Some("from another client")
        );

        drop(c.keyboard);
        c.task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn relay_hangup_ends_the_console() {
        let c = console();
        let Console {
            keyboard,
            relay,
            relay_tx,
            task,
            ..
        } = c;

        drop(relay_tx);
        drop(relay);
        timeout(Duration::from_secs(1), task)
            .await
            .expect("console kept running")
            .unwrap()
            .unwrap();
        drop(keyboard);
    }
}

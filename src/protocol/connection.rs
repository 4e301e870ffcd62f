//! Newline-delimited connection over TCP, with optional deadlines.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

use super::Message;
use crate::error::TransportError;
use crate::metrics::MetricsCollector;

/// Longest line accepted from a peer, excluding the terminator.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// A TCP stream framed into lines.
///
/// Reads and writes can each be bounded by a deadline. A connection is
/// owned by exactly one session.
pub struct LineConnection {
    reader: BufReader<OwnedReadHalf>,
    // Bytes of the line being assembled, kept across cancelled reads.
    pending: Vec<u8>,
    writer: OwnedWriteHalf,
    peer: SocketAddr,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    metrics: MetricsCollector,
}

impl LineConnection {
    /// Wraps an accepted or dialed stream.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the peer address cannot be read.
    pub fn new(stream: TcpStream) -> Result<Self, TransportError> {
        let peer = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            pending: Vec::new(),
            writer: write_half,
            peer,
            read_timeout: None,
            write_timeout: None,
            metrics: MetricsCollector::new(),
        })
    }

    /// Dials `addr`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Connect` if the connection cannot be made.
    pub async fn connect(addr: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        Self::new(stream)
    }

    /// Sets the deadline for [`receive`](Self::receive).
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Sets the deadline for [`send`](Self::send).
    pub fn with_write_timeout(mut self, write_timeout: Option<Duration>) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Address of the remote end.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Writes one message and flushes it.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` on write failure and
    /// `TransportError::Timeout` if the write deadline passes.
    pub async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let line = message.encode();
        let writer = &mut self.writer;
        let send_future = async move {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
            Ok(())
        };

        with_deadline(self.write_timeout, send_future).await?;
        self.metrics.record_message_sent(message.kind());
        trace!(peer = %self.peer, message = %message, "Sent message");
        Ok(())
    }

    /// Reads the next line, waiting up to the read deadline.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` at end of stream,
    /// `TransportError::Timeout` if the deadline passes, and
    /// `TransportError::Io` on read failure.
    pub async fn receive(&mut self) -> Result<String, TransportError> {
        self.receive_within(self.read_timeout).await
    }

    /// Reads the next line, waiting up to `limit`.
    ///
    /// # Errors
    ///
    /// Same as [`receive`](Self::receive).
    pub async fn receive_within(
        &mut self,
        limit: Option<Duration>,
    ) -> Result<String, TransportError> {
        with_deadline(limit, self.next_line()).await
    }

    /// Reads the next line without any deadline.
    ///
    /// Invalid UTF-8 is replaced rather than rejected, so a garbled line
    /// surfaces as an unrecognized message instead of ending the session.
    ///
    /// Cancel safe: dropping the future before it completes loses no data,
    /// so it can be raced against timers in `tokio::select!`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Closed` at end of stream,
    /// `TransportError::LineTooLong` once a line exceeds [`MAX_LINE_BYTES`]
    /// and `TransportError::Io` on read failure.
    pub async fn next_line(&mut self) -> Result<String, TransportError> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                if self.pending.is_empty() {
                    return Err(TransportError::Closed);
                }
                // Final line without a terminator.
                break;
            }

            let (consumed, complete) = match available.iter().position(|&b| b == b'\n') {
                Some(index) => {
                    self.pending.extend_from_slice(&available[..index]);
                    (index + 1, true)
                }
                None => {
                    self.pending.extend_from_slice(available);
                    (available.len(), false)
                }
            };
            self.reader.consume(consumed);

            if self.pending.len() > MAX_LINE_BYTES {
                self.pending.clear();
                return Err(TransportError::LineTooLong {
                    limit: MAX_LINE_BYTES,
                });
            }
            if complete {
                break;
            }
        }

        let mut bytes = std::mem::take(&mut self.pending);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        let line = String::from_utf8(bytes)
            .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned());
        trace!(peer = %self.peer, line = %line, "Received line");
        Ok(line)
    }

    /// Shuts down the write half so the peer sees end of stream.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if the shutdown fails.
    pub async fn close(mut self) -> Result<(), TransportError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

async fn with_deadline<T>(
    limit: Option<Duration>,
    operation: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match limit {
        Some(limit) => timeout(limit, operation)
            .await
            .map_err(|_| TransportError::Timeout(limit))?,
        None => operation.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Task;
    use tokio::net::TcpListener;

    async fn pair() -> (LineConnection, LineConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (client, accepted) = tokio::join!(LineConnection::connect(&addr), listener.accept());
        let (stream, _) = accepted.unwrap();
        (client.unwrap(), LineConnection::new(stream).unwrap())
    }

    #[tokio::test]
    async fn test_send_receive() {
        let (mut client, mut server) = pair().await;

        server
            .send(&Message::Task(Task::new("GET http://x")))
            .await
            .unwrap();
        server.send(&Message::NoTask).await.unwrap();

        assert_eq!(client.receive().await.unwrap(), "task:GET http://x");
        assert_eq!(client.receive().await.unwrap(), "NO_TASK");
    }

    #[tokio::test]
    async fn test_receive_reports_closed_peer() {
        let (client, mut server) = pair().await;
        client.close().await.unwrap();

        let result = server.receive().await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_receive_times_out() {
        let (_client, server) = pair().await;
        let mut server = server.with_read_timeout(Some(Duration::from_millis(50)));

        let result = server.receive().await;
        assert!(matches!(result, Err(TransportError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_next_line_is_cancel_safe() {
        let (mut client, mut server) = pair().await;

        // Abandon a pending read, then deliver the line.
        tokio::select! {
            _ = server.next_line() => panic!("nothing was sent yet"),
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
        client.send(&Message::TaskCompleted).await.unwrap();

        assert_eq!(server.next_line().await.unwrap(), "Task completed");
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_stream() {
        let (mut client, mut server) = pair().await;
        client.writer.write_all(b"\xff\xfe\r\ntask:GET http://x\n").await.unwrap();

        let garbled = server.receive().await.unwrap();
        assert_eq!(garbled, "\u{FFFD}\u{FFFD}");
        assert_eq!(server.receive().await.unwrap(), "task:GET http://x");
    }

    #[tokio::test]
    async fn test_line_over_limit_is_rejected() {
        let (mut client, mut server) = pair().await;
        let oversized = vec![b'a'; MAX_LINE_BYTES + 1];
        let writer = tokio::spawn(async move {
            // The reader may give up before everything is written.
            let _ = client.writer.write_all(&oversized).await;
            client
        });

        let result = server.receive().await;
        assert!(matches!(
            result,
            Err(TransportError::LineTooLong { limit }) if limit == MAX_LINE_BYTES
        ));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_line_at_limit_is_accepted() {
        let (mut client, mut server) = pair().await;
        let mut line = vec![b'a'; MAX_LINE_BYTES];
        line.push(b'\n');
        let writer = tokio::spawn(async move {
            client.writer.write_all(&line).await.unwrap();
            client
        });

        assert_eq!(server.receive().await.unwrap().len(), MAX_LINE_BYTES);
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_final_line_without_terminator() {
        let (mut client, mut server) = pair().await;
        client.writer.write_all(b"NO_TASK").await.unwrap();
        client.close().await.unwrap();

        assert_eq!(server.receive().await.unwrap(), "NO_TASK");
        assert!(matches!(server.receive().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let result = LineConnection::connect(&addr).await;
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }
}

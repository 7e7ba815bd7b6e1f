//! Socket Session
//!
//! Owns the single Unix-socket connection to snapd. The connection is opened
//! lazily, torn down on any I/O error and re-opened by the next write.
//!
//! The stream is split: the driver reads the read half directly while a
//! writer task drains queued requests into the write half. A large request
//! therefore never stops responses from being read, and a write error comes
//! back as a [`SessionEvent`].

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ClientError;
use crate::request::RequestId;

/// Result of a non-blocking read
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes arrived
    Data(Vec<u8>),
    /// The server closed the connection
    Closed,
    /// Readiness was spurious; nothing to read yet
    WouldBlock,
}

/// Something happened on the connection
#[derive(Debug)]
pub enum SessionEvent {
    /// The read half is ready (or failed to become ready)
    Readable(io::Result<()>),
    /// The writer task failed; the session is already torn down
    WriteFailed(ClientError),
}

/// A write error reported by a writer task
#[derive(Debug)]
struct WriteFailure {
    generation: u64,
    error: ClientError,
}

/// One open connection
#[derive(Debug)]
struct Connection {
    generation: u64,
    reader: OwnedReadHalf,
    writes: mpsc::UnboundedSender<(RequestId, Vec<u8>)>,
    writer: JoinHandle<()>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.writer.abort();
    }
}

/// The client's connection to snapd
#[derive(Debug)]
pub struct SocketSession {
    socket_path: PathBuf,
    read_chunk_size: usize,
    connection: Option<Connection>,
    generation: u64,
    failure_tx: mpsc::UnboundedSender<WriteFailure>,
    failure_rx: mpsc::UnboundedReceiver<WriteFailure>,
}

impl SocketSession {
    /// Create a disconnected session
    pub fn new(socket_path: impl Into<PathBuf>, read_chunk_size: usize) -> Self {
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        Self {
            socket_path: socket_path.into(),
            read_chunk_size: read_chunk_size.max(1),
            connection: None,
            generation: 0,
            failure_tx,
            failure_rx,
        }
    }

    /// Create a session around an already connected stream
    ///
    /// Once that stream fails, the next write reconnects to `socket_path`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn from_stream(
        stream: UnixStream,
        socket_path: impl Into<PathBuf>,
        read_chunk_size: usize,
    ) -> Self {
        let mut session = Self::new(socket_path, read_chunk_size);
        tracing::info!("Adopted existing snapd connection");
        session.attach(stream);
        session
    }

    /// Get the socket path
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Whether a connection is open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Connect if there is no live connection
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ConnectionFailed` if the socket cannot be
    /// connected.
    pub async fn ensure_connected(&mut self) -> Result<(), ClientError> {
        if self.connection.is_some() {
            return Ok(());
        }

        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            ClientError::ConnectionFailed(format!(
                "failed to connect to {}: {e}",
                self.socket_path.display()
            ))
        })?;

        tracing::info!(path = %self.socket_path.display(), "Connected to snapd");
        self.attach(stream);
        Ok(())
    }

    /// Queue a whole request for the writer task
    ///
    /// Requests are written in the order they are queued. A failure while
    /// writing is reported later through [`SocketSession::next_event`].
    ///
    /// # Errors
    ///
    /// Returns `ClientError::WriteFailed` if there is no connection or the
    /// writer task has stopped; the session is torn down in the latter case.
    pub fn send(&mut self, id: RequestId, bytes: Vec<u8>) -> Result<(), ClientError> {
        let Some(ref connection) = self.connection else {
            return Err(ClientError::WriteFailed("not connected".into()));
        };

        if connection.writes.send((id, bytes)).is_err() {
            self.teardown();
            return Err(ClientError::WriteFailed("writer stopped".into()));
        }
        Ok(())
    }

    /// Wait for the connection to become readable or for a write to fail
    ///
    /// Readiness never fires while disconnected. Failures from connections
    /// that were already torn down are dropped.
    pub async fn next_event(&mut self) -> SessionEvent {
        loop {
            let failure = tokio::select! {
                ready = readable(self.connection.as_ref()) => return SessionEvent::Readable(ready),
                Some(failure) = self.failure_rx.recv() => failure,
            };

            let current = self
                .connection
                .as_ref()
                .is_some_and(|c| c.generation == failure.generation);
            if current {
                self.teardown();
                return SessionEvent::WriteFailed(failure.error);
            }
            tracing::debug!(error = %failure.error, "Ignoring write failure on an old connection");
        }
    }

    /// Read whatever is available without blocking
    ///
    /// # Errors
    ///
    /// Returns `ClientError::ReadFailed` for read errors other than "would
    /// block"; the session is torn down in that case.
    pub fn read_available(&mut self) -> Result<ReadOutcome, ClientError> {
        let Some(ref connection) = self.connection else {
            return Ok(ReadOutcome::WouldBlock);
        };

        let mut chunk = vec![0u8; self.read_chunk_size];
        let read = connection.reader.try_read(&mut chunk);
        match read {
            Ok(0) => {
                tracing::debug!("Connection closed by snapd");
                self.teardown();
                Ok(ReadOutcome::Closed)
            }
            Ok(n) => {
                chunk.truncate(n);
                Ok(ReadOutcome::Data(chunk))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(e) => {
                self.teardown();
                Err(ClientError::ReadFailed(e.to_string()))
            }
        }
    }

    /// Drop the connection, if any, discarding unwritten requests
    pub fn teardown(&mut self) {
        if self.connection.take().is_some() {
            tracing::info!(path = %self.socket_path.display(), "Disconnected from snapd");
        }
    }

    fn attach(&mut self, stream: UnixStream) {
        self.generation += 1;
        let generation = self.generation;
        let (reader, write_half) = stream.into_split();
        let (writes, write_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_requests(
            write_half,
            write_rx,
            generation,
            self.failure_tx.clone(),
        ));

        self.connection = Some(Connection {
            generation,
            reader,
            writes,
            writer,
        });
    }
}

async fn readable(connection: Option<&Connection>) -> io::Result<()> {
    match connection {
        Some(connection) => connection.reader.readable().await,
        None => std::future::pending().await,
    }
}

/// Writer task: queued requests -> stream
async fn write_requests(
    mut write_half: OwnedWriteHalf,
    mut requests: mpsc::UnboundedReceiver<(RequestId, Vec<u8>)>,
    generation: u64,
    failures: mpsc::UnboundedSender<WriteFailure>,
) {
    while let Some((id, bytes)) = requests.recv().await {
        if let Err(e) = write_half.write_all(&bytes).await {
            tracing::warn!(request = %id, error = %e, "Write error");
            let _ = failures.send(WriteFailure {
                generation,
                error: ClientError::WriteFailed(e.to_string()),
            });
            return;
        }
        tracing::trace!(request = %id, bytes = bytes.len(), "Request written");
    }
}

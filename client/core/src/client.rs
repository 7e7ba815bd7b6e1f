//! snapd Client
//!
//! [`SnapdClient`] is a cheap, cloneable handle to a driver task that owns
//! the connection and the protocol [`Engine`]. Handles talk to the driver
//! over a command channel, so requests can be submitted and cancelled from
//! any task or thread.
//!
//! ```text
//!  SnapdClient ──Command──►  Driver  ──Action──► SocketSession / timers
//!      ▲                       │
//!      └── oneshot / progress ◄┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use snapd_client_core::{RequestDescriptor, SnapdClient};
//!
//! let client = SnapdClient::new(&ClientConfig::default());
//! let info = client.submit(RequestDescriptor::get("/v2/system-info")).await?.await?;
//! println!("{}", info.into_result()?);
//! ```

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::auth::AuthData;
use crate::config::{ClientConfig, RequestSettings};
use crate::engine::{Action, Completion, Engine, EngineConfig};
use crate::error::ClientError;
use crate::operation::{OperationResult, OperationSnapshot};
use crate::request::{RequestDescriptor, RequestId, RequestIds};
use crate::response::Response;
use crate::transport::session::{ReadOutcome, SessionEvent, SocketSession};

/// Where a completion is delivered
#[derive(Debug)]
enum Reply {
    Simple(oneshot::Sender<Result<Response, ClientError>>),
    Tracked {
        complete: oneshot::Sender<Result<OperationResult, ClientError>>,
        progress: mpsc::UnboundedSender<OperationSnapshot>,
    },
}

/// Messages from client handles to the driver
#[derive(Debug)]
enum Command {
    Submit {
        id: RequestId,
        request: RequestDescriptor,
        reply: Reply,
    },
    Cancel {
        id: RequestId,
    },
    Shutdown,
}

// =============================================================================
// Client Handle
// =============================================================================

/// Handle to a snapd connection
#[derive(Clone, Debug)]
pub struct SnapdClient {
    commands: mpsc::Sender<Command>,
    settings: Arc<RwLock<RequestSettings>>,
    ids: RequestIds,
    socket_path: PathBuf,
}

impl SnapdClient {
    /// Create a client and spawn its driver task
    ///
    /// Nothing is connected until the first request is submitted.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        let transport = &config.transport;
        let session = SocketSession::new(&transport.socket_path, transport.read_chunk_size);
        Self::spawn(config, session)
    }

    /// Create a client that talks over an already connected stream
    ///
    /// Confined processes are handed their snapd connection this way. Once
    /// the stream fails, the next request reconnects to the configured
    /// socket path.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn from_stream(stream: UnixStream, config: &ClientConfig) -> Self {
        let transport = &config.transport;
        let session = SocketSession::from_stream(
            stream,
            &transport.socket_path,
            transport.read_chunk_size,
        );
        Self::spawn(config, session)
    }

    fn spawn(config: &ClientConfig, session: SocketSession) -> Self {
        let transport = &config.transport;
        let settings = Arc::new(RwLock::new(config.request.clone()));
        let ids = RequestIds::default();
        let (commands, command_rx) = mpsc::channel(transport.command_capacity.max(1));

        let mut engine = Engine::new(
            EngineConfig::from(transport),
            Arc::clone(&settings),
            ids.clone(),
        );
        if session.is_connected() {
            engine.adopt_connection();
        }
        tokio::spawn(Driver::new(engine, session, command_rx).run());

        Self {
            commands,
            settings,
            ids,
            socket_path: transport.socket_path.clone(),
        }
    }

    /// Create a client for a socket path with default settings
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn with_socket(path: impl Into<PathBuf>) -> Self {
        let mut config = ClientConfig::default();
        config.transport.socket_path = path.into();
        Self::new(&config)
    }

    /// Get the socket path
    #[must_use]
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Submit a simple request
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Shutdown` if the driver has stopped.
    pub async fn submit(&self, request: RequestDescriptor) -> Result<PendingRequest, ClientError> {
        let id = self.ids.allocate();
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Submit {
            id,
            request,
            reply: Reply::Simple(tx),
        })
        .await?;

        Ok(PendingRequest {
            handle: self.handle(id),
            completion: rx,
        })
    }

    /// Submit a request whose response is an operation to track
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Shutdown` if the driver has stopped.
    pub async fn submit_tracked(
        &self,
        request: RequestDescriptor,
    ) -> Result<TrackedRequest, ClientError> {
        let id = self.ids.allocate();
        let (complete, completion) = oneshot::channel();
        let (progress, progress_rx) = mpsc::unbounded_channel();
        self.send_command(Command::Submit {
            id,
            request,
            reply: Reply::Tracked { complete, progress },
        })
        .await?;

        Ok(TrackedRequest {
            handle: self.handle(id),
            progress: progress_rx,
            completion,
        })
    }

    /// Submit a simple request and wait for its response
    ///
    /// # Errors
    ///
    /// Returns the request's error.
    pub async fn send(&self, request: RequestDescriptor) -> Result<Response, ClientError> {
        self.submit(request).await?.await
    }

    /// Set the `User-Agent` header; `None` omits it
    pub fn set_user_agent(&self, user_agent: Option<String>) {
        self.settings.write().user_agent = user_agent;
    }

    /// Allow snapd to prompt for authorization
    pub fn set_allow_interaction(&self, allow: bool) {
        self.settings.write().allow_interaction = allow;
    }

    /// Set a fixed `Accept-Language`; `None` derives it from the locale
    pub fn set_accept_language(&self, value: Option<String>) {
        self.settings.write().accept_language = value;
    }

    /// Set the credentials sent with every request
    pub fn set_auth(&self, auth: Option<AuthData>) {
        self.settings.write().auth = auth;
    }

    /// Current request settings
    #[must_use]
    pub fn settings(&self) -> RequestSettings {
        self.settings.read().clone()
    }

    /// Complete every outstanding request with `Shutdown` and stop the driver
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    fn handle(&self, id: RequestId) -> RequestHandle {
        RequestHandle {
            id,
            commands: self.commands.clone(),
        }
    }

    async fn send_command(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::Shutdown)
    }
}

/// Cancels one request
#[derive(Clone, Debug)]
pub struct RequestHandle {
    id: RequestId,
    commands: mpsc::Sender<Command>,
}

impl RequestHandle {
    /// ID of the request
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Cancel the request
    ///
    /// A simple request completes with `ClientError::Cancelled` at once. A
    /// tracked request asks snapd to abort the operation and still completes
    /// only when snapd reports it ready.
    pub async fn cancel(&self) {
        if self.commands.send(Command::Cancel { id: self.id }).await.is_err() {
            tracing::debug!(request = %self.id, "Cancel after client shut down");
        }
    }
}

/// A submitted simple request; await it for the response
#[derive(Debug)]
pub struct PendingRequest {
    handle: RequestHandle,
    completion: oneshot::Receiver<Result<Response, ClientError>>,
}

impl PendingRequest {
    /// ID of the request
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.handle.id
    }

    /// Handle for cancelling the request from elsewhere
    #[must_use]
    pub fn handle(&self) -> RequestHandle {
        self.handle.clone()
    }
}

impl Future for PendingRequest {
    type Output = Result<Response, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.completion)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(ClientError::Shutdown)))
    }
}

/// A submitted tracked request
///
/// Progress snapshots arrive through [`TrackedRequest::next_progress`], all
/// of them before the completion.
#[derive(Debug)]
pub struct TrackedRequest {
    handle: RequestHandle,
    progress: mpsc::UnboundedReceiver<OperationSnapshot>,
    completion: oneshot::Receiver<Result<OperationResult, ClientError>>,
}

impl TrackedRequest {
    /// ID of the request
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.handle.id
    }

    /// Handle for cancelling the request from elsewhere
    #[must_use]
    pub fn handle(&self) -> RequestHandle {
        self.handle.clone()
    }

    /// Next changed snapshot, or `None` once the request is complete
    pub async fn next_progress(&mut self) -> Option<OperationSnapshot> {
        self.progress.recv().await
    }

    /// Wait for the completion, discarding unread progress
    ///
    /// # Errors
    ///
    /// Returns the request's error.
    pub async fn wait(self) -> Result<OperationResult, ClientError> {
        self.completion.await.unwrap_or(Err(ClientError::Shutdown))
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Owns the engine and the socket session; the only task that touches the engine
struct Driver {
    engine: Engine,
    session: SocketSession,
    commands: mpsc::Receiver<Command>,
    replies: HashMap<RequestId, Reply>,
    timers: HashMap<RequestId, (u64, JoinHandle<()>)>,
    timer_generation: u64,
    timer_tx: mpsc::UnboundedSender<(RequestId, u64)>,
    timer_rx: mpsc::UnboundedReceiver<(RequestId, u64)>,
}

impl Driver {
    fn new(engine: Engine, session: SocketSession, commands: mpsc::Receiver<Command>) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            session,
            commands,
            replies: HashMap::new(),
            timers: HashMap::new(),
            timer_generation: 0,
            timer_tx,
            timer_rx,
        }
    }

    async fn run(mut self) {
        tracing::debug!(path = %self.session.socket_path().display(), "snapd driver started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Submit { id, request, reply }) => {
                        let tracked = matches!(reply, Reply::Tracked { .. });
                        self.replies.insert(id, reply);
                        let actions = if tracked {
                            self.engine.submit_tracked(id, &request)
                        } else {
                            self.engine.submit(id, &request)
                        };
                        self.perform(actions).await;
                    }
                    Some(Command::Cancel { id }) => {
                        let actions = self.engine.cancel(id);
                        self.perform(actions).await;
                    }
                    Some(Command::Shutdown) | None => {
                        let actions = self.engine.shutdown();
                        self.perform(actions).await;
                        break;
                    }
                },
                event = self.session.next_event() => {
                    let actions = match event {
                        SessionEvent::Readable(Ok(())) => match self.session.read_available() {
                            Ok(ReadOutcome::Data(bytes)) => self.engine.receive(&bytes),
                            Ok(ReadOutcome::Closed) => self.engine.connection_closed(),
                            Ok(ReadOutcome::WouldBlock) => Vec::new(),
                            Err(e) => self.engine.read_failed(e),
                        },
                        SessionEvent::Readable(Err(e)) => {
                            self.session.teardown();
                            self.engine.read_failed(ClientError::ReadFailed(e.to_string()))
                        }
                        SessionEvent::WriteFailed(e) => {
                            tracing::warn!(error = %e, "Writing to snapd failed");
                            self.engine.write_failed(e)
                        }
                    };
                    self.perform(actions).await;
                },
                Some((id, generation)) = self.timer_rx.recv() => {
                    let current = matches!(self.timers.get(&id), Some((g, _)) if *g == generation);
                    if current {
                        self.timers.remove(&id);
                        let actions = self.engine.poll_due(id);
                        self.perform(actions).await;
                    }
                },
            }
        }

        for (_, (_, timer)) in self.timers.drain() {
            timer.abort();
        }
        tracing::debug!("snapd driver stopped");
    }

    /// Carry out engine actions, feeding failures back into the engine
    async fn perform(&mut self, actions: Vec<Action>) {
        let mut queue: VecDeque<Action> = actions.into();

        while let Some(action) = queue.pop_front() {
            match action {
                Action::Connect => {
                    if let Err(e) = self.session.ensure_connected().await {
                        tracing::warn!(error = %e, "Connecting to snapd failed");
                        queue.extend(self.engine.connect_failed(e));
                    }
                }
                Action::Write { id, bytes } => {
                    // Requests queued behind a failed connect or write were
                    // already failed by the engine
                    if !self.session.is_connected() {
                        tracing::debug!(request = %id, "Skipping write on closed connection");
                        continue;
                    }
                    if let Err(e) = self.session.send(id, bytes) {
                        tracing::warn!(request = %id, error = %e, "Writing to snapd failed");
                        queue.extend(self.engine.write_failed(e));
                    }
                }
                Action::SchedulePoll { id, after } => self.arm_timer(id, after),
                Action::CancelPoll { id } => {
                    if let Some((_, timer)) = self.timers.remove(&id) {
                        timer.abort();
                    }
                }
                Action::Disconnect => self.session.teardown(),
                Action::Progress { id, snapshot } => {
                    if let Some(Reply::Tracked { progress, .. }) = self.replies.get(&id) {
                        let _ = progress.send(snapshot);
                    }
                }
                Action::Complete { id, outcome } => self.deliver(id, outcome),
            }
        }
    }

    fn arm_timer(&mut self, id: RequestId, after: Duration) {
        if let Some((_, old)) = self.timers.remove(&id) {
            old.abort();
        }
        self.timer_generation += 1;
        let generation = self.timer_generation;
        let tx = self.timer_tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send((id, generation));
        });
        self.timers.insert(id, (generation, timer));
    }

    fn deliver(&mut self, id: RequestId, outcome: Completion) {
        match (self.replies.remove(&id), outcome) {
            (Some(Reply::Simple(tx)), Completion::Response(result)) => {
                let _ = tx.send(result);
            }
            (Some(Reply::Tracked { complete, .. }), Completion::Operation(result)) => {
                let _ = complete.send(result);
            }
            (Some(_), _) => {
                tracing::warn!(request = %id, "Completion kind does not match request kind");
            }
            (None, _) => {
                tracing::debug!(request = %id, "Completion for unknown request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connection_failure_completes_request() {
        let temp_dir = TempDir::new().unwrap();
        let client = SnapdClient::with_socket(temp_dir.path().join("missing.sock"));

        let result = client.send(RequestDescriptor::get("/v2/system-info")).await;
        assert!(matches!(result, Err(ClientError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_tracked_connection_failure_closes_progress() {
        let temp_dir = TempDir::new().unwrap();
        let client = SnapdClient::with_socket(temp_dir.path().join("missing.sock"));

        let mut tracked = client
            .submit_tracked(RequestDescriptor::post("/v2/snaps/hello"))
            .await
            .unwrap();
        assert!(tracked.next_progress().await.is_none());
        assert!(matches!(
            tracked.wait().await,
            Err(ClientError::ConnectionFailed(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let temp_dir = TempDir::new().unwrap();
        let client = SnapdClient::with_socket(temp_dir.path().join("missing.sock"));
        client.shutdown().await;

        // The driver may still be draining; either way the request ends in Shutdown
        let result = match client.submit(RequestDescriptor::get("/v2/snaps")).await {
            Ok(pending) => pending.await,
            Err(e) => Err(e),
        };
        assert_eq!(result, Err(ClientError::Shutdown));
    }

    #[tokio::test]
    async fn test_settings_are_shared() {
        let client = SnapdClient::with_socket("/nonexistent.sock");
        let other = client.clone();
        client.set_allow_interaction(true);
        client.set_user_agent(None);
        assert!(other.settings().allow_interaction);
        assert_eq!(other.settings().user_agent, None);
    }
}

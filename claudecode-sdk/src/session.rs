//! The session runtime: subprocess ownership, the four long-lived tasks, and
//! the host-facing API.
//!
//! One reader task consumes the CLI's stdout and routes every envelope:
//! conversation traffic lands on an ordered event queue, control responses
//! resolve their pending waiters, and control requests flow to the dispatch
//! driver. One writer task owns stdin, so every producer (user messages,
//! control requests, control responses) funnels through a single mpsc
//! channel and envelope writes stay atomic. A third task drains stderr into
//! the log, and the dispatch driver runs inbound handlers concurrently while
//! honoring `control_cancel_request`.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{AbortHandle, JoinHandle, JoinSet};
use tokio::time::timeout;

use crate::channel::{write_value, FramedReader, DEFAULT_MAX_BUFFER_SIZE};
use crate::cmd::Prompt;
use crate::control::dispatch::Dispatcher;
use crate::control::pending::PendingRequests;
use crate::control::protocol::{
    cancel_envelope, classify_frame, error_envelope, request_envelope, success_envelope,
    InboundControlRequest, InboundFrame, OutboundControlRequest, RequestIdGenerator,
};
use crate::discovery::discover_cli;
use crate::error::SdkError;
use crate::message::{ContentBlock, Message};
use crate::options::{AgentOptions, PermissionMode};
use crate::transport;

/// Capacity of the ordered host event queue.
const EVENT_QUEUE_CAPACITY: usize = 256;
/// Capacity of the writer funnel.
const WRITE_QUEUE_CAPACITY: usize = 256;
/// How long in-flight inbound handlers may finish during shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(2);
/// How long to wait for the exit status after stdout closes.
const EXIT_WAIT: Duration = Duration::from_secs(5);
/// Cap on retained stderr diagnostics.
const MAX_STDERR_BYTES: usize = 1024 * 1024;

/// A connected CLI session.
///
/// Created by [`Session::connect`]; destroyed by [`Session::close`] (or by
/// dropping the handle, which aborts the tasks and kills the subprocess).
pub struct Session {
    events: mpsc::Receiver<Result<Message, SdkError>>,
    writer_tx: Option<mpsc::Sender<Value>>,
    dispatch_tx: Option<mpsc::Sender<DispatchMsg>>,
    pending: Arc<PendingRequests>,
    ids: RequestIdGenerator,
    dispatcher: Arc<Dispatcher>,
    session_id: Arc<std::sync::Mutex<Option<String>>>,
    child: Arc<Mutex<Option<Child>>>,
    tasks: Vec<JoinHandle<()>>,
    control_timeout: Duration,
    closed: Arc<AtomicBool>,
}

enum DispatchMsg {
    Request { request_id: String, request: Value },
    Cancel { request_id: String },
}

impl Session {
    /// Locates the CLI, spawns it, and wires the session tasks.
    ///
    /// With [`Prompt::OneShot`] the prompt travels on argv and stdin closes
    /// immediately; with [`Prompt::Interactive`] the caller streams user
    /// envelopes via [`Session::send_user_message`].
    pub async fn connect(prompt: Prompt, options: AgentOptions) -> Result<Self, SdkError> {
        let cli_path = discover_cli(options.cli_path.clone())?;
        let process = transport::spawn(&cli_path, &prompt, &options)?;
        let close_stdin = matches!(prompt, Prompt::OneShot(_));
        Ok(Self::from_streams(
            process.stdin,
            process.stdout,
            Some(process.stderr),
            Some(process.child),
            close_stdin,
            options,
        ))
    }

    /// Wires a session over arbitrary streams.
    ///
    /// This is the seam [`Session::connect`] uses with the subprocess pipes;
    /// tests drive the control plane through in-memory duplex streams.
    pub fn from_streams<W, R, E>(
        stdin: W,
        stdout: R,
        stderr: Option<E>,
        child: Option<Child>,
        close_stdin: bool,
        options: AgentOptions,
    ) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let control_timeout = options.control_timeout();
        let max_buffer = options.max_buffer_size.unwrap_or(DEFAULT_MAX_BUFFER_SIZE);
        let options = Arc::new(options);
        let dispatcher = Arc::new(Dispatcher::new(options.clone()));
        let pending = Arc::new(PendingRequests::new());
        let session_id = Arc::new(std::sync::Mutex::new(None));
        let child = Arc::new(Mutex::new(child));
        let closed = Arc::new(AtomicBool::new(false));

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let (writer_tx, writer_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);

        let stderr_buffer = Arc::new(std::sync::Mutex::new(String::new()));

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(writer_task(stdin, writer_rx, close_stdin)));
        if let Some(stderr) = stderr {
            tasks.push(tokio::spawn(stderr_task(stderr, stderr_buffer.clone())));
        }
        tasks.push(tokio::spawn(dispatch_driver(
            dispatch_rx,
            dispatcher.clone(),
            writer_tx.clone(),
        )));
        tasks.push(tokio::spawn(reader_task(ReaderContext {
            stdout,
            max_buffer,
            events_tx,
            dispatch_tx: dispatch_tx.clone(),
            pending: pending.clone(),
            session_id: session_id.clone(),
            child: child.clone(),
            stderr_buffer,
        })));

        Self {
            events: events_rx,
            writer_tx: Some(writer_tx),
            dispatch_tx: Some(dispatch_tx),
            pending,
            ids: RequestIdGenerator::new(),
            dispatcher,
            session_id,
            child,
            tasks,
            control_timeout,
            closed,
        }
    }

    /// The next conversation event, in CLI emission order.
    ///
    /// `None` marks a clean end of stream. Decode errors and process errors
    /// arrive as terminal `Err` values just before the stream ends.
    pub async fn next_event(&mut self) -> Option<Result<Message, SdkError>> {
        self.events.recv().await
    }

    /// The most recent session id observed on a `result` envelope.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// The session's current permission mode, tracking CLI-initiated
    /// changes.
    #[must_use]
    pub fn permission_mode(&self) -> Option<String> {
        self.dispatcher.current_permission_mode()
    }

    /// Sends an interactive user message.
    pub async fn send_user_message(&self, content: impl Into<String>) -> Result<(), SdkError> {
        self.send_user_value(json!(content.into())).await
    }

    /// Sends an interactive user message made of structured blocks.
    pub async fn send_user_blocks(&self, blocks: Vec<ContentBlock>) -> Result<(), SdkError> {
        let content: Vec<Value> = blocks.iter().map(ContentBlock::to_value).collect();
        self.send_user_value(Value::Array(content)).await
    }

    async fn send_user_value(&self, content: Value) -> Result<(), SdkError> {
        let session_id = self.session_id().unwrap_or_else(|| "default".to_string());
        let envelope = json!({
            "type": "user",
            "message": {"role": "user", "content": content},
            "parent_tool_use_id": null,
            "session_id": session_id,
        });
        self.enqueue(envelope).await
    }

    /// Aborts the current turn.
    ///
    /// Carries no deadline: the CLI acknowledges whenever the turn actually
    /// stops, and a second interrupt is a no-op success.
    pub async fn interrupt(&self) -> Result<(), SdkError> {
        self.control_request(OutboundControlRequest::Interrupt, None)
            .await
            .map(drop)
    }

    /// Switches the CLI's permission mode.
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<(), SdkError> {
        self.control_request(
            OutboundControlRequest::SetPermissionMode(mode),
            Some(self.control_timeout),
        )
        .await?;
        self.dispatcher.record_permission_mode(mode.as_flag());
        Ok(())
    }

    /// Switches the model mid-session. `None` restores the default.
    pub async fn set_model(&self, model: Option<String>) -> Result<(), SdkError> {
        self.control_request(
            OutboundControlRequest::SetModel(model),
            Some(self.control_timeout),
        )
        .await
        .map(drop)
    }

    /// Sends an outbound control request and awaits its response.
    pub async fn control_request(
        &self,
        request: OutboundControlRequest,
        deadline: Option<Duration>,
    ) -> Result<Value, SdkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SdkError::Disconnected);
        }

        let request_id = self.ids.next_id();
        let rx = self.pending.insert(request_id.clone());
        let envelope = request_envelope(&request_id, request.payload());
        if let Err(err) = self.enqueue(envelope).await {
            self.pending.remove(&request_id);
            return Err(err);
        }

        match deadline {
            None => rx.await.unwrap_or(Err(SdkError::Disconnected)),
            Some(limit) => match timeout(limit, rx).await {
                Ok(result) => result.unwrap_or(Err(SdkError::Disconnected)),
                Err(_) => {
                    self.pending.remove(&request_id);
                    let _ = self.enqueue(cancel_envelope(&request_id)).await;
                    Err(SdkError::ControlTimeout {
                        subtype: request.subtype().to_string(),
                        elapsed: limit,
                    })
                }
            },
        }
    }

    async fn enqueue(&self, envelope: Value) -> Result<(), SdkError> {
        let writer = self.writer_tx.as_ref().ok_or(SdkError::Disconnected)?;
        writer
            .send(envelope)
            .await
            .map_err(|_| SdkError::Disconnected)
    }

    /// Shuts the session down: fails pending outbound requests, drains
    /// in-flight inbound handlers up to a bounded window, terminates the
    /// subprocess (politely, then forcefully), and closes the streams.
    pub async fn close(&mut self) -> Result<(), SdkError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.pending.fail_all();

        // Dropping the dispatch sender lets the driver drain its in-flight
        // handlers; dropping the writer sender afterwards closes stdin.
        self.dispatch_tx.take();
        self.writer_tx.take();

        let status = {
            let mut guard = self.child.lock().await;
            match guard.as_mut() {
                Some(child) => {
                    let status = transport::graceful_shutdown(child).await;
                    *guard = None;
                    Some(status)
                }
                None => None,
            }
        };

        // The dispatch driver may legitimately use its whole drain window;
        // anything still running after that is abandoned.
        for mut task in self.tasks.drain(..) {
            if timeout(SHUTDOWN_DRAIN + Duration::from_millis(500), &mut task)
                .await
                .is_err()
            {
                task.abort();
            }
        }

        match status {
            Some(Err(err)) => Err(err),
            _ => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.pending.fail_all();
        for task in &self.tasks {
            task.abort();
        }
        if let Ok(mut guard) = self.child.try_lock() {
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
            }
        }
    }
}

async fn writer_task<W: AsyncWrite + Unpin>(
    mut stdin: W,
    mut rx: mpsc::Receiver<Value>,
    close_stdin: bool,
) {
    if close_stdin {
        // One-shot mode: the prompt is on argv, so the CLI gets EOF at once.
        let _ = stdin.shutdown().await;
        while let Some(envelope) = rx.recv().await {
            tracing::warn!(
                kind = envelope.get("type").and_then(serde_json::Value::as_str).unwrap_or("?"),
                "discarding envelope; stdin is closed in one-shot mode"
            );
        }
        return;
    }

    while let Some(envelope) = rx.recv().await {
        if let Err(err) = write_value(&mut stdin, &envelope).await {
            tracing::warn!(error = %err, "stdin write failed; stopping writer");
            break;
        }
    }
    let _ = stdin.shutdown().await;
}

async fn stderr_task<E: AsyncRead + Unpin>(stderr: E, buffer: Arc<std::sync::Mutex<String>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        tracing::warn!(target: "claude_cli", "{line}");
        let mut guard = buffer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if guard.len() < MAX_STDERR_BYTES {
            guard.push_str(&line);
            guard.push('\n');
        }
    }
}

struct ReaderContext<R> {
    stdout: R,
    max_buffer: usize,
    events_tx: mpsc::Sender<Result<Message, SdkError>>,
    dispatch_tx: mpsc::Sender<DispatchMsg>,
    pending: Arc<PendingRequests>,
    session_id: Arc<std::sync::Mutex<Option<String>>>,
    child: Arc<Mutex<Option<Child>>>,
    stderr_buffer: Arc<std::sync::Mutex<String>>,
}

async fn reader_task<R: AsyncRead + Unpin>(ctx: ReaderContext<R>) {
    let ReaderContext {
        stdout,
        max_buffer,
        events_tx,
        dispatch_tx,
        pending,
        session_id,
        child,
        stderr_buffer,
    } = ctx;

    let mut reader = FramedReader::with_max_buffer(stdout, max_buffer);
    loop {
        match reader.next_value().await {
            Ok(Some(value)) => match classify_frame(value) {
                Ok(InboundFrame::Conversation(value)) => {
                    let message = Message::parse(value);
                    note_session_id(&session_id, &message);
                    if events_tx.send(Ok(message)).await.is_err() {
                        // Host abandoned its consumer.
                        break;
                    }
                }
                Ok(InboundFrame::Response { request_id, result }) => {
                    let result = result.map_err(SdkError::ControlRequestFailed);
                    if !pending.complete(&request_id, result) {
                        tracing::warn!(
                            request_id = %request_id,
                            "control_response without matching request"
                        );
                    }
                }
                Ok(InboundFrame::Request {
                    request_id,
                    request,
                }) => {
                    if dispatch_tx
                        .send(DispatchMsg::Request {
                            request_id,
                            request,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(InboundFrame::Cancel { request_id }) => {
                    let _ = dispatch_tx.send(DispatchMsg::Cancel { request_id }).await;
                }
                Err(err) => {
                    // Malformed control envelope; the session survives.
                    tracing::warn!(error = %err, "dropping malformed control envelope");
                }
            },
            Ok(None) => {
                if let Some(err) = exit_error(&child, &stderr_buffer).await {
                    let _ = events_tx.send(Err(err)).await;
                }
                break;
            }
            Err(err) => {
                let _ = events_tx.send(Err(err)).await;
                break;
            }
        }
    }
    pending.fail_all();
}

fn note_session_id(slot: &Arc<std::sync::Mutex<Option<String>>>, message: &Message) {
    let observed = match message {
        Message::Result(result) if !result.session_id.is_empty() => {
            Some(result.session_id.clone())
        }
        Message::System(system) => system
            .data
            .get("session_id")
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    };
    if let Some(id) = observed {
        *slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(id);
    }
}

/// After stdout closes: reap the child and decide whether the stream ends in
/// a process error (non-zero exit with diagnostic stderr).
async fn exit_error(
    child: &Arc<Mutex<Option<Child>>>,
    stderr_buffer: &Arc<std::sync::Mutex<String>>,
) -> Option<SdkError> {
    let mut guard = child.lock().await;
    let child = guard.as_mut()?;
    let status = timeout(EXIT_WAIT, child.wait()).await.ok()?.ok()?;
    *guard = None;

    if status.success() {
        return None;
    }
    let stderr = stderr_buffer
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .clone();
    if stderr.to_lowercase().contains("error") {
        Some(SdkError::Process {
            exit_code: status.code().unwrap_or(-1),
            stderr,
        })
    } else {
        None
    }
}

/// Runs inbound requests concurrently, answers each with exactly one
/// control response, and honors cancellation by id.
async fn dispatch_driver(
    mut rx: mpsc::Receiver<DispatchMsg>,
    dispatcher: Arc<Dispatcher>,
    writer_tx: mpsc::Sender<Value>,
) {
    let mut inflight: HashMap<String, AbortHandle> = HashMap::new();
    let mut running: JoinSet<String> = JoinSet::new();

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(DispatchMsg::Request { request_id, request }) => {
                    let dispatcher = dispatcher.clone();
                    let writer_tx = writer_tx.clone();
                    let id = request_id.clone();
                    let handle = running.spawn(async move {
                        let envelope = run_one(&dispatcher, &id, request).await;
                        let _ = writer_tx.send(envelope).await;
                        id
                    });
                    inflight.insert(request_id, handle);
                }
                Some(DispatchMsg::Cancel { request_id }) => {
                    if let Some(handle) = inflight.remove(&request_id) {
                        tracing::debug!(request_id = %request_id, "cancelling inbound request");
                        handle.abort();
                    }
                }
                None => break,
            },
            Some(done) = running.join_next(), if !running.is_empty() => {
                if let Ok(request_id) = done {
                    inflight.remove(&request_id);
                }
            }
        }
    }

    // Bounded drain, then abandon whatever is still running.
    let drained = timeout(SHUTDOWN_DRAIN, async {
        while running.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        tracing::warn!("abandoning in-flight inbound requests after drain window");
        running.abort_all();
        while running.join_next().await.is_some() {}
    }
}

async fn run_one(dispatcher: &Dispatcher, request_id: &str, request: Value) -> Value {
    match InboundControlRequest::parse(&request) {
        Ok(parsed) => match dispatcher.handle(parsed).await {
            Ok(payload) => success_envelope(request_id, Some(payload)),
            Err(err) => error_envelope(request_id, &err.to_string()),
        },
        Err(err) => error_envelope(request_id, &err.to_string()),
    }
}

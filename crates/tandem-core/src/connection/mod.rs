//! Connection: bidirectional RPC over one duplex byte stream.
//!
//! ```text
//!   query / invoke ──► pending table ──► outbound queue ──► writer ──► stream
//!                          ▲                   ▲
//!                          │ fulfil            │ result / fault frames
//!                          │                   │
//!   stream ──► reader ──► spawn per frame ─────┴──► handler registry
//! ```
//!
//! Two long-running tasks drive the stream: the reader owns the read half,
//! the writer owns the write half. The reader never waits on a handler:
//! every parsed frame is handed to its own detached task, so a slow handler
//! cannot stall the frames behind it and both peers can call each other at
//! the same time.
//!
//! Whichever of {reader exit, writer exit, `stop`} happens first moves the
//! connection to [`ConnectionState::Faulted`], cancels both loops, fails every
//! pending call with [`RpcError::Shutdown`] and publishes one
//! [`ConnectionEvent::Faulted`].

mod reader;
mod writer;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::frame::FIRE_AND_FORGET_ID;
use crate::queue::{OutboundQueue, OutboundReceiver, outbound_queue};
use crate::{
    ConnectionConfig, ConnectionEvent, ConnectionState, Frame, Handler, HandlerRegistry,
    PendingCalls, RpcError, StartError, TransportError,
};

type BoxReader = Box<dyn AsyncRead + Unpin + Send>;
type BoxWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Stream halves waiting for `start`.
struct Io {
    reader: BoxReader,
    writer: BoxWriter,
    outbound: OutboundReceiver,
}

/// State shared between the public handle, the loops, and dispatch tasks.
pub(crate) struct Inner {
    registry: HandlerRegistry,
    pending: PendingCalls,
    queue: OutboundQueue,
    next_message_id: AtomicU32,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    fault: Mutex<Option<Arc<TransportError>>>,
    cancel: CancellationToken,
}

impl Inner {
    fn next_message_id(&self) -> u32 {
        loop {
            let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
            if id != FIRE_AND_FORGET_ID {
                return id;
            }
        }
    }

    fn publish(&self, event: ConnectionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// The fault controller. Runs its effects once, for the first caller.
    pub(crate) fn shutdown(&self, cause: Option<TransportError>) {
        let mut first = false;
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Faulted {
                false
            } else {
                *state = ConnectionState::Faulted;
                first = true;
                true
            }
        });
        if !first {
            if let Some(cause) = cause {
                tracing::debug!(error = %cause, "already shut down; ignoring later failure");
            }
            return;
        }

        self.cancel.cancel();
        let failed = self.pending.fail_all();

        let error = cause.map(Arc::new);
        match &error {
            Some(e) => tracing::error!(error = %e, failed_calls = failed, "connection faulted"),
            None => tracing::debug!(failed_calls = failed, "connection stopped"),
        }
        *self.fault.lock() = error.clone();
        self.publish(ConnectionEvent::Faulted { error });
    }
}

/// One end of a bidirectional RPC connection.
///
/// Either side may call procedures the other side has registered. Share it
/// with handlers that need to call back through an `Arc<Connection>`.
///
/// Dropping the connection stops it. Call [`dispose`](Self::dispose) to also
/// wait for the loops to finish and clear the handler table.
pub struct Connection {
    inner: Arc<Inner>,
    config: ConnectionConfig,
    io: Mutex<Option<Io>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_config(stream, ConnectionConfig::default())
    }

    pub fn with_config<S>(stream: S, config: ConnectionConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_split(reader, writer, config)
    }

    /// Build a connection from separate read and write handles, such as
    /// stdin/stdout or an already split socket.
    pub fn from_split<R, W>(reader: R, writer: W, config: ConnectionConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (queue, outbound) = outbound_queue();
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let inner = Arc::new(Inner {
            registry: HandlerRegistry::new(),
            pending: PendingCalls::new(),
            queue,
            next_message_id: AtomicU32::new(1),
            state,
            events,
            fault: Mutex::new(None),
            cancel: CancellationToken::new(),
        });
        Self {
            inner,
            config,
            io: Mutex::new(Some(Io {
                reader: Box::new(reader),
                writer: Box::new(writer),
                outbound,
            })),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the reader and writer tasks on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn start(&self) -> Result<(), StartError> {
        self.start_inner(None)
    }

    /// Like [`start`](Self::start), and also stop when `token` is cancelled.
    pub fn start_with_token(&self, token: CancellationToken) -> Result<(), StartError> {
        self.start_inner(Some(token))
    }

    fn start_inner(&self, parent: Option<CancellationToken>) -> Result<(), StartError> {
        match *self.inner.state.borrow() {
            ConnectionState::Idle => {}
            ConnectionState::Running => return Err(StartError::AlreadyStarted),
            ConnectionState::Faulted => return Err(StartError::Stopped),
        }
        let Some(io) = self.io.lock().take() else {
            return Err(StartError::AlreadyStarted);
        };
        let started = self.inner.state.send_if_modified(|state| {
            if *state == ConnectionState::Idle {
                *state = ConnectionState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(StartError::Stopped);
        }

        let token = self.inner.cancel.clone();
        let mut tasks = self.tasks.lock();

        if let Some(parent) = parent {
            let own = token.clone();
            tasks.push(tokio::spawn(async move {
                tokio::select! {
                    _ = parent.cancelled() => own.cancel(),
                    _ = own.cancelled() => {}
                }
            }));
        }

        tasks.push(tokio::spawn(
            writer::run(
                self.inner.clone(),
                io.writer,
                io.outbound,
                token.clone(),
                self.config.shutdown_stream_on_exit,
            )
            .instrument(tracing::debug_span!("tandem.writer")),
        ));
        tasks.push(tokio::spawn(
            reader::run(self.inner.clone(), io.reader, token)
                .instrument(tracing::debug_span!("tandem.reader")),
        ));

        tracing::debug!("connection started");
        Ok(())
    }

    /// Call `method` on the remote side and wait for its reply.
    ///
    /// Resolves with the encoded return value (`None` when the remote
    /// procedure returns nothing), [`RpcError::RemoteFault`] when the remote
    /// handler failed, or [`RpcError::Shutdown`] when the connection stops
    /// first. There is no timeout: if the remote never answers (for example
    /// because no handler is registered under `method`), this waits until the
    /// connection stops.
    pub async fn query(
        &self,
        method: &str,
        arguments: Vec<Bytes>,
    ) -> Result<Option<Bytes>, RpcError> {
        // Register before enqueueing: the reply may race the write.
        let (message_id, rx) = self
            .inner
            .pending
            .register(|| self.inner.next_message_id())?;
        let mut guard = PendingGuard {
            pending: &self.inner.pending,
            message_id,
            armed: true,
        };
        let frame = Frame::call(message_id, method, arguments)?;

        if self.inner.queue.push(frame).is_err() {
            return Err(RpcError::Shutdown);
        }
        tracing::debug!(message_id, method, "query enqueued");

        let result = rx.await.unwrap_or(Err(RpcError::Shutdown));
        guard.disarm();
        result
    }

    /// Send a call without waiting for, or expecting, a reply.
    ///
    /// Uses message ID 0; any reply the remote sends is discarded.
    pub fn invoke(&self, method: &str, arguments: Vec<Bytes>) -> Result<(), RpcError> {
        let frame = Frame::call(FIRE_AND_FORGET_ID, method, arguments)?;
        if self.state() == ConnectionState::Faulted {
            return Err(RpcError::Shutdown);
        }
        self.inner
            .queue
            .push(frame)
            .map_err(|_| RpcError::Shutdown)?;
        tracing::debug!(method, "invoke enqueued");
        Ok(())
    }

    pub fn register_handler(&self, name: &str, handler: Arc<dyn Handler>) {
        self.inner.registry.register(name, handler);
    }

    pub fn deregister_handler(&self, name: &str) -> bool {
        self.inner.registry.deregister(name)
    }

    /// Remove `handler` from every name it is registered under.
    pub fn deregister_handler_instance(&self, handler: &Arc<dyn Handler>) -> bool {
        self.inner.registry.deregister_instance(handler)
    }

    pub fn clear_handlers(&self) {
        self.inner.registry.clear();
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.inner.registry
    }

    /// Stop both loops and fail every pending call. Idempotent.
    pub fn stop(&self) {
        self.inner.shutdown(None);
    }

    /// Stop, wait for the loops to exit, and clear the handler table.
    pub async fn dispose(&self) {
        self.stop();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "connection task ended abnormally");
            }
        }
        self.io.lock().take();
        self.inner.registry.clear();
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Resolves once the connection has reached [`ConnectionState::Faulted`].
    pub async fn wait_stopped(&self) {
        let mut state = self.inner.state.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail.
        let _ = state
            .wait_for(|state| *state == ConnectionState::Faulted)
            .await;
    }

    /// The transport error that faulted the connection, if any.
    pub fn fault_error(&self) -> Option<Arc<TransportError>> {
        self.inner.fault.lock().clone()
    }

    /// Frames enqueued but not yet taken by the writer.
    pub fn pending_outbound(&self) -> usize {
        self.inner.queue.len()
    }

    /// Queries still waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.inner.shutdown(None);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("pending_calls", &self.pending_calls())
            .field("pending_outbound", &self.pending_outbound())
            .finish_non_exhaustive()
    }
}

/// Removes a query's pending entry if the query future is dropped early.
struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    message_id: u32,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed && self.pending.remove(self.message_id) {
            tracing::debug!(
                message_id = self.message_id,
                "query dropped: removed pending call"
            );
        }
    }
}

//! Read loop and per-frame dispatch.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{BoxReader, Inner};
use crate::wire::read_frame;
use crate::{ConnectionEvent, Frame, FrameKind, HandlerError, RpcError, TransportError};

pub(super) async fn run(inner: Arc<Inner>, mut reader: BoxReader, token: CancellationToken) {
    let result = read_loop(&inner, &mut reader, &token).await;
    match &result {
        Ok(()) => tracing::debug!("reader stopped"),
        Err(e) => tracing::debug!(error = %e, "reader failed"),
    }
    inner.shutdown(result.err());
}

async fn read_loop(
    inner: &Arc<Inner>,
    reader: &mut BoxReader,
    token: &CancellationToken,
) -> Result<(), TransportError> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            frame = read_frame(reader) => frame?,
        };

        tracing::trace!(
            message_id = frame.message_id(),
            kind = ?frame.kind(),
            argument_count = frame.arguments().len(),
            "dispatching frame"
        );

        // Detached: the next read must not wait for this frame's handler.
        let span = tracing::debug_span!("tandem.dispatch", message_id = frame.message_id());
        tokio::spawn(dispatch(inner.clone(), frame).instrument(span));
    }
}

pub(super) async fn dispatch(inner: Arc<Inner>, frame: Frame) {
    match frame.kind() {
        FrameKind::Result | FrameKind::Fault => deliver_reply(&inner, frame),
        FrameKind::Call => serve_call(&inner, frame).await,
    }
}

fn deliver_reply(inner: &Inner, frame: Frame) {
    let message_id = frame.message_id();
    let result = if frame.kind() == FrameKind::Fault {
        Err(RpcError::RemoteFault { message_id })
    } else {
        Ok(frame.into_arguments().into_iter().next())
    };

    if inner.pending.fulfill(message_id, result) {
        tracing::debug!(message_id, "reply delivered");
    } else {
        // Fire-and-forget echo, a reply after shutdown, or a stray ID.
        tracing::debug!(message_id, "no pending call for reply; discarded");
    }
}

async fn serve_call(inner: &Inner, frame: Frame) {
    let message_id = frame.message_id();
    let Some(method) = frame.method_name().map(str::to_owned) else {
        return;
    };

    let Some(handler) = inner.registry.lookup(&method) else {
        tracing::warn!(message_id, method = %method, "no handler registered; dropping call");
        return;
    };

    let arguments = frame.into_arguments();
    let execution = {
        let handler = handler.clone();
        async move { handler.execute(arguments).await }
    };
    let outcome = match AssertUnwindSafe(execution).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(HandlerError::new(panic_message(panic.as_ref()))),
    };

    let reply = outcome.and_then(|value| {
        Frame::result(message_id, value)
            .map_err(|e| HandlerError::new(format!("return value cannot be framed: {e}")))
    });

    match reply {
        Ok(reply) => {
            if inner.queue.push(reply).is_err() {
                tracing::debug!(
                    message_id,
                    method = %method,
                    "connection closed before reply was queued"
                );
                return;
            }
            tracing::debug!(message_id, method = %method, "call served");
        }
        Err(error) => {
            tracing::warn!(message_id, method = %method, error = %error, "handler failed");
            if inner.queue.push(Frame::fault(message_id)).is_err() {
                tracing::debug!(
                    message_id,
                    method = %method,
                    "connection closed before fault was queued"
                );
            }
            inner.publish(ConnectionEvent::HandlerError { handler, error });
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

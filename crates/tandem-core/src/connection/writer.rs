//! Write loop: drains the outbound queue onto the stream in order.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::{BoxWriter, Inner};
use crate::TransportError;
use crate::queue::OutboundReceiver;
use crate::wire::write_frame;

pub(super) async fn run(
    inner: Arc<Inner>,
    mut writer: BoxWriter,
    mut outbound: OutboundReceiver,
    token: CancellationToken,
    shutdown_stream: bool,
) {
    let result = write_loop(&mut writer, &mut outbound, &token).await;
    match &result {
        Ok(()) => tracing::debug!("writer stopped"),
        Err(e) => tracing::debug!(error = %e, "writer failed"),
    }

    let discarded = outbound.close();
    if discarded > 0 {
        tracing::debug!(discarded, "discarded unsent frames");
    }
    inner.shutdown(result.err());

    if shutdown_stream {
        if let Err(e) = writer.shutdown().await {
            tracing::debug!(error = %e, "failed to shut down write half");
        }
    }
}

async fn write_loop(
    writer: &mut BoxWriter,
    outbound: &mut OutboundReceiver,
    token: &CancellationToken,
) -> Result<(), TransportError> {
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            next = outbound.recv() => match next {
                Some(frame) => frame,
                None => return Ok(()),
            },
        };

        buf.clear();
        frame.encode(&mut buf);
        tracing::trace!(
            message_id = frame.message_id(),
            kind = ?frame.kind(),
            len = buf.len(),
            "writing frame"
        );

        tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(()),
            written = write_frame(writer, &buf) => written?,
        }
    }
}

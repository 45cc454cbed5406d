//! Ordered multi-producer, single-consumer queue of frames to send.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;

use crate::Frame;

/// Producer side, shared by callers and dispatch tasks.
///
/// The channel doubles as the writer's wake signal: the writer suspends in
/// `recv` until something is pushed. FIFO order holds across all producers.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<Frame>,
    queued: Arc<AtomicUsize>,
}

/// Consumer side, owned by the writer loop.
pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<Frame>,
    queued: Arc<AtomicUsize>,
}

pub fn outbound_queue() -> (OutboundQueue, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queued = Arc::new(AtomicUsize::new(0));
    (
        OutboundQueue {
            tx,
            queued: queued.clone(),
        },
        OutboundReceiver { rx, queued },
    )
}

impl OutboundQueue {
    /// Enqueue a frame. Gives the frame back if the writer is gone.
    pub fn push(&self, frame: Frame) -> Result<(), Frame> {
        self.queued.fetch_add(1, Ordering::AcqRel);
        self.tx.send(frame).map_err(|e| {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            e.0
        })
    }

    /// Frames enqueued but not yet taken by the writer.
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OutboundReceiver {
    /// Wait for the next frame. `None` once every producer is gone or the
    /// receiver was closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        let frame = self.rx.recv().await?;
        self.queued.fetch_sub(1, Ordering::AcqRel);
        Some(frame)
    }

    /// Stop accepting frames and discard whatever is still queued.
    pub fn close(&mut self) -> usize {
        self.rx.close();
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            self.queued.fetch_sub(1, Ordering::AcqRel);
            dropped += 1;
        }
        dropped
    }
}

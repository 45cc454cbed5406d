//! Connection lifecycle and notifications.

use std::sync::Arc;

use crate::{Handler, HandlerError, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Constructed, loops not started yet.
    Idle,
    Running,
    /// Terminal. Reached exactly once; a connection never resumes.
    Faulted,
}

/// Notifications published by a connection.
#[derive(Clone)]
pub enum ConnectionEvent {
    /// The connection shut down. Fired exactly once. `error` is `None` for a
    /// deliberate stop or cancellation.
    Faulted { error: Option<Arc<TransportError>> },

    /// A local handler failed while serving a call. The caller got a fault
    /// frame; the connection is unaffected.
    HandlerError {
        handler: Arc<dyn Handler>,
        error: HandlerError,
    },
}

impl std::fmt::Debug for ConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Faulted { error } => f.debug_struct("Faulted").field("error", error).finish(),
            Self::HandlerError { handler, error } => f
                .debug_struct("HandlerError")
                .field("handler", &handler.name())
                .field("error", error)
                .finish(),
        }
    }
}

//! Error types.
//!
//! Failures fall into two families. Anything wrong with the stream or the
//! framing is a [`TransportError`] and takes the whole connection down.
//! Anything scoped to one call ([`RpcError::RemoteFault`], [`HandlerError`])
//! stays with that call.

use core::fmt;
use std::borrow::Cow;

/// Problems with the shape of a single frame.
///
/// Returned by the frame constructors when a request cannot be put on the
/// wire, and wrapped in [`TransportError::Corrupt`] when an inbound frame is
/// malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The buffer ended before the frame did.
    Incomplete,
    /// An argument with a zero length prefix.
    EmptyArgument,
    /// A call frame needs a non-empty method name.
    EmptyMethodName,
    MethodNameTooLong {
        len: usize,
    },
    /// The method name is not valid UTF-8.
    InvalidMethodName,
    TooManyArguments {
        count: usize,
    },
    ArgumentTooLarge {
        index: usize,
        len: usize,
    },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => write!(f, "incomplete frame"),
            Self::EmptyArgument => write!(f, "zero-length argument payload"),
            Self::EmptyMethodName => write!(f, "empty method name"),
            Self::MethodNameTooLong { len } => {
                write!(f, "method name is {len} bytes (max {})", u16::MAX)
            }
            Self::InvalidMethodName => write!(f, "method name is not valid UTF-8"),
            Self::TooManyArguments { count } => {
                write!(
                    f,
                    "{count} arguments (max {})",
                    crate::frame::MAX_ARGUMENTS
                )
            }
            Self::ArgumentTooLarge { index, len } => {
                write!(f, "argument {index} is {len} bytes (max {})", u16::MAX)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Stream-level failures. Every variant faults the connection.
#[derive(Debug)]
pub enum TransportError {
    /// The peer closed the stream between frames.
    Closed,
    /// The stream ended part-way through a frame.
    UnexpectedEof,
    Io(std::io::Error),
    /// The peer sent a frame we refuse to interpret.
    Corrupt(FrameError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "stream closed by peer"),
            Self::UnexpectedEof => write!(f, "stream ended inside a frame"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Corrupt(e) => write!(f, "corrupt frame: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Corrupt(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<FrameError> for TransportError {
    fn from(e: FrameError) -> Self {
        Self::Corrupt(e)
    }
}

/// Errors surfaced to a caller of `query`/`invoke`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    /// The remote answered this call with a fault frame.
    RemoteFault { message_id: u32 },
    /// The connection stopped before a reply arrived.
    Shutdown,
    /// The request could not be framed; nothing was sent.
    Frame(FrameError),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteFault { message_id } => write!(
                f,
                "remote peer failed to process call {message_id} and cannot fulfil the response"
            ),
            Self::Shutdown => write!(
                f,
                "connection shut down before a response was received"
            ),
            Self::Frame(e) => write!(f, "cannot frame request: {e}"),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Frame(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FrameError> for RpcError {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

/// Failure of a local handler while serving a call.
///
/// The remote only learns that the call failed (a fault frame); the message
/// stays local and is published through `ConnectionEvent::HandlerError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: Cow<'static, str>,
}

impl HandlerError {
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&'static str> for HandlerError {
    fn from(message: &'static str) -> Self {
        Self::new(message)
    }
}

/// Why `start` refused to spin up the loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartError {
    AlreadyStarted,
    /// The connection was stopped; connections cannot be resumed.
    Stopped,
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyStarted => write!(f, "connection already started"),
            Self::Stopped => write!(f, "connection was stopped and cannot be restarted"),
        }
    }
}

impl std::error::Error for StartError {}

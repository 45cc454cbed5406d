//! tandem-core: bidirectional RPC over a single duplex byte stream.
//!
//! This crate defines:
//! - The wire frame ([`Frame`], [`FrameKind`]) and its codec ([`wire`])
//! - The handler capability ([`Handler`]) and table ([`HandlerRegistry`])
//! - The pending call table ([`PendingCalls`]) and outbound queue ([`OutboundQueue`])
//! - The connection engine ([`Connection`]) with its reader, writer and fault handling
//! - Errors ([`TransportError`], [`RpcError`], [`HandlerError`], [`FrameError`])
//!
//! Arguments and return values are opaque byte strings here. Typed bindings
//! and value codecs live in the `tandem` crate.

#![forbid(unsafe_code)]

mod config;
mod connection;
mod error;
mod event;
mod frame;
mod handler;
mod pending;
mod queue;
mod registry;
pub mod wire;

pub use config::*;
pub use connection::*;
pub use error::*;
pub use event::*;
pub use frame::*;
pub use handler::*;
pub use pending::*;
pub use queue::*;
pub use registry::*;

// Re-exported so callers can link connections to their own shutdown signal.
pub use tokio_util::sync::CancellationToken;

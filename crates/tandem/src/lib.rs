//! tandem: typed bindings for [`tandem_core`].
//!
//! The core moves opaque byte strings. This crate adds:
//! - [`Codec`]: how values become argument payloads ([`JsonCodec`] by default)
//! - [`handler_fn`]: handlers from async closures with typed parameters
//! - [`Peer`]: typed `query`/`invoke` over a shared [`Connection`]
//!
//! ```ignore
//! use tandem::prelude::*;
//!
//! let connection = Arc::new(Connection::new(stream));
//! let peer = Peer::new(connection.clone());
//! peer.register("add", |a: i64, b: i64| async move { Ok::<_, HandlerError>(a + b) });
//! connection.start()?;
//!
//! let sum: i64 = peer.query("add", (1, 2)).await?;
//! ```

#![forbid(unsafe_code)]

mod codec;
mod handler_fn;
mod peer;

pub use codec::*;
pub use handler_fn::*;
pub use peer::*;

pub use tandem_core;
pub use tandem_core::{
    CancellationToken, Connection, ConnectionConfig, ConnectionEvent, ConnectionState, Frame,
    FrameError, Handler, HandlerError, HandlerFuture, HandlerRegistry, RpcError, StartError,
    TransportError,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use tandem::prelude::*;
/// ```
pub mod prelude {
    pub use std::sync::Arc;

    pub use crate::{
        Codec, Connection, ConnectionConfig, ConnectionEvent, Handler, HandlerError, JsonCodec,
        Peer, RpcError, handler_fn,
    };
}

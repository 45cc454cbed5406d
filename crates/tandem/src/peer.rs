//! Typed calls over a shared [`Connection`].

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tandem_core::{Connection, Handler, RpcError};

use crate::codec::{Codec, CodecError, JsonCodec};
use crate::handler_fn::{HandlerFn, handler_fn_with};

/// Error of a typed call.
#[derive(Debug)]
pub enum Error {
    /// The call itself failed (remote fault, shutdown, unframeable request).
    Rpc(RpcError),
    /// An argument could not be encoded, or the reply could not be decoded.
    Codec(CodecError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(e) => write!(f, "rpc error: {e}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Rpc(e) => Some(e),
            Self::Codec(e) => Some(e),
        }
    }
}

impl From<RpcError> for Error {
    fn from(e: RpcError) -> Self {
        Self::Rpc(e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

/// Values that can be sent as the argument list of a call.
///
/// Implemented for tuples of up to six serializable values, and for
/// `Vec<Bytes>` holding payloads that are already encoded.
pub trait IntoArguments {
    fn into_arguments<C: Codec>(self, codec: &C) -> Result<Vec<Bytes>, CodecError>;
}

impl IntoArguments for Vec<Bytes> {
    fn into_arguments<C: Codec>(self, _codec: &C) -> Result<Vec<Bytes>, CodecError> {
        Ok(self)
    }
}

macro_rules! impl_into_arguments {
    ($($arg:ident),*) => {
        impl<$($arg: Serialize,)*> IntoArguments for ($($arg,)*) {
            #[allow(non_snake_case, unused_variables)]
            fn into_arguments<C: Codec>(self, codec: &C) -> Result<Vec<Bytes>, CodecError> {
                let ($($arg,)*) = self;
                Ok(vec![$(codec.encode(&$arg)?),*])
            }
        }
    };
}

impl_into_arguments!();
impl_into_arguments!(T1);
impl_into_arguments!(T1, T2);
impl_into_arguments!(T1, T2, T3);
impl_into_arguments!(T1, T2, T3, T4);
impl_into_arguments!(T1, T2, T3, T4, T5);
impl_into_arguments!(T1, T2, T3, T4, T5, T6);

/// A [`Connection`] paired with the codec both sides agreed on.
///
/// Cheap to clone; clones share the connection.
pub struct Peer<C = JsonCodec> {
    connection: Arc<Connection>,
    codec: C,
}

impl Peer<JsonCodec> {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self::with_codec(connection, JsonCodec)
    }
}

impl<C: Codec> Peer<C> {
    pub fn with_codec(connection: Arc<Connection>, codec: C) -> Self {
        Self { connection, codec }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Call `method` and decode its return value as `R`.
    ///
    /// Use `R = ()` for procedures that return nothing.
    pub async fn query<R, A>(&self, method: &str, arguments: A) -> Result<R, Error>
    where
        R: DeserializeOwned,
        A: IntoArguments,
    {
        let arguments = arguments.into_arguments(&self.codec)?;
        let reply = self.connection.query(method, arguments).await?;
        let value = match reply {
            Some(payload) => self.codec.decode(&payload)?,
            None => self.codec.decode_absent()?,
        };
        Ok(value)
    }

    /// Send a fire-and-forget call.
    pub fn invoke<A: IntoArguments>(&self, method: &str, arguments: A) -> Result<(), Error> {
        let arguments = arguments.into_arguments(&self.codec)?;
        self.connection.invoke(method, arguments)?;
        Ok(())
    }

    /// Register an async closure under `name`, using this peer's codec.
    ///
    /// Returns the registered instance, for
    /// [`Connection::deregister_handler_instance`].
    pub fn register<F, Args>(&self, name: &str, f: F) -> Arc<dyn Handler>
    where
        F: HandlerFn<Args>,
        Args: 'static,
    {
        let handler = handler_fn_with(self.codec.clone(), name, f);
        self.connection.register_handler(name, handler.clone());
        handler
    }
}

impl<C: Clone> Clone for Peer<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            codec: self.codec.clone(),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for Peer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("connection", &self.connection)
            .field("codec", &self.codec)
            .finish()
    }
}

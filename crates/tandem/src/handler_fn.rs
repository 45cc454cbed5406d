//! Handlers built from plain async closures with typed parameters.

use std::any::{TypeId, type_name};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::{self, BoxFuture};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tandem_core::{Handler, HandlerError, HandlerFuture};

use crate::codec::{Codec, JsonCodec};

/// An async function that can serve calls, taking `Args` as a tuple of
/// decodable parameters.
///
/// Implemented for `Fn(T1, .., Tn) -> impl Future<Output = Result<R,
/// HandlerError>>` with up to six parameters.
pub trait HandlerFn<Args>: Send + Sync + 'static {
    type Output: Serialize + 'static;

    fn parameter_types() -> Vec<&'static str>;

    /// Decode `arguments` and start the call.
    fn call<C: Codec>(
        &self,
        codec: &C,
        arguments: Vec<Bytes>,
    ) -> Result<BoxFuture<'static, Result<Self::Output, HandlerError>>, HandlerError>;
}

struct Arguments {
    payloads: std::vec::IntoIter<Bytes>,
    index: usize,
}

impl Arguments {
    /// Payloads beyond `arity` are ignored.
    fn new(payloads: Vec<Bytes>, arity: usize) -> Result<Self, HandlerError> {
        if payloads.len() < arity {
            return Err(HandlerError::new(format!(
                "expected {arity} argument(s), got {}",
                payloads.len()
            )));
        }
        Ok(Self {
            payloads: payloads.into_iter(),
            index: 0,
        })
    }

    fn next<T: DeserializeOwned, C: Codec>(&mut self, codec: &C) -> Result<T, HandlerError> {
        let index = self.index;
        self.index += 1;
        let payload = self
            .payloads
            .next()
            .ok_or_else(|| HandlerError::new(format!("missing argument {index}")))?;
        codec
            .decode(&payload)
            .map_err(|e| HandlerError::new(format!("argument {index}: {e}")))
    }
}

macro_rules! impl_handler_fn {
    ($($arg:ident),*) => {
        impl<F, Fut, R, $($arg,)*> HandlerFn<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> Fut + Send + Sync + 'static,
            Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
            R: Serialize + 'static,
            $($arg: DeserializeOwned + 'static,)*
        {
            type Output = R;

            fn parameter_types() -> Vec<&'static str> {
                vec![$(type_name::<$arg>()),*]
            }

            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn call<C: Codec>(
                &self,
                codec: &C,
                arguments: Vec<Bytes>,
            ) -> Result<BoxFuture<'static, Result<R, HandlerError>>, HandlerError> {
                let arity = <[&str]>::len(&[$(stringify!($arg)),*]);
                let mut arguments = Arguments::new(arguments, arity)?;
                $(let $arg = arguments.next::<$arg, C>(codec)?;)*
                Ok((self)($($arg),*).boxed())
            }
        }
    };
}

impl_handler_fn!();
impl_handler_fn!(T1);
impl_handler_fn!(T1, T2);
impl_handler_fn!(T1, T2, T3);
impl_handler_fn!(T1, T2, T3, T4);
impl_handler_fn!(T1, T2, T3, T4, T5);
impl_handler_fn!(T1, T2, T3, T4, T5, T6);

/// [`Handler`] adapter around a [`HandlerFn`].
pub struct FnHandler<F, Args, C = JsonCodec> {
    name: String,
    f: F,
    codec: C,
    parameter_types: Vec<&'static str>,
    _args: PhantomData<fn(Args)>,
}

impl<F, Args, C> FnHandler<F, Args, C>
where
    F: HandlerFn<Args>,
    C: Codec,
{
    pub fn new(name: impl Into<String>, f: F, codec: C) -> Self {
        Self {
            name: name.into(),
            f,
            codec,
            parameter_types: F::parameter_types(),
            _args: PhantomData,
        }
    }
}

impl<F, Args, C> Handler for FnHandler<F, Args, C>
where
    F: HandlerFn<Args>,
    C: Codec,
    Args: 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn parameter_types(&self) -> &[&'static str] {
        &self.parameter_types
    }

    fn return_type(&self) -> Option<&'static str> {
        if returns_nothing::<F::Output>() {
            None
        } else {
            Some(type_name::<F::Output>())
        }
    }

    fn is_async(&self) -> bool {
        true
    }

    fn execute(&self, arguments: Vec<Bytes>) -> HandlerFuture {
        let call = match self.f.call(&self.codec, arguments) {
            Ok(call) => call,
            Err(e) => {
                tracing::debug!(handler = %self.name, error = %e, "arguments rejected");
                return future::ready(Err(e)).boxed();
            }
        };
        let codec = self.codec.clone();
        async move {
            let value = call.await?;
            encode_return(&codec, &value)
        }
        .boxed()
    }
}

impl<F, Args, C: fmt::Debug> fmt::Debug for FnHandler<F, Args, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("name", &self.name)
            .field("parameter_types", &self.parameter_types)
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

fn returns_nothing<R: 'static>() -> bool {
    TypeId::of::<R>() == TypeId::of::<()>()
}

fn encode_return<C: Codec, R: Serialize + 'static>(
    codec: &C,
    value: &R,
) -> Result<Option<Bytes>, HandlerError> {
    if returns_nothing::<R>() {
        return Ok(None);
    }
    Ok(Some(codec.encode(value)?))
}

/// Build a JSON handler from an async closure.
///
/// ```ignore
/// let add = handler_fn("add", |a: i64, b: i64| async move {
///     Ok::<_, HandlerError>(a + b)
/// });
/// connection.register_handler("add", add);
/// ```
pub fn handler_fn<F, Args>(name: impl Into<String>, f: F) -> Arc<dyn Handler>
where
    F: HandlerFn<Args>,
    Args: 'static,
{
    handler_fn_with(JsonCodec, name, f)
}

/// Like [`handler_fn`], with an explicit codec.
pub fn handler_fn_with<C, F, Args>(codec: C, name: impl Into<String>, f: F) -> Arc<dyn Handler>
where
    C: Codec,
    F: HandlerFn<Args>,
    Args: 'static,
{
    Arc::new(FnHandler::new(name, f, codec))
}

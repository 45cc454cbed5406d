//! The handler capability the dispatcher executes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::HandlerError;

/// Boxed future returned by [`Handler::execute`].
pub type HandlerFuture =
    Pin<Box<dyn Future<Output = Result<Option<Bytes>, HandlerError>> + Send + 'static>>;

/// A locally registered, remotely invocable procedure.
///
/// The core never interprets argument payloads: `execute` receives the raw
/// argument byte strings in order and returns the encoded return value, or
/// `None` when the procedure has nothing to return. Decoding arguments
/// according to `parameter_types` is the handler's business.
pub trait Handler: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Type names of the parameters, in call order.
    fn parameter_types(&self) -> &[&'static str];

    /// Type name of the return value, `None` for procedures that return nothing.
    fn return_type(&self) -> Option<&'static str>;

    /// Whether `execute` actually suspends, or completes on first poll.
    fn is_async(&self) -> bool;

    fn execute(&self, arguments: Vec<Bytes>) -> HandlerFuture;
}

/// Compare handler identity by allocation, ignoring vtables.
pub(crate) fn same_handler(a: &Arc<dyn Handler>, b: &Arc<dyn Handler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

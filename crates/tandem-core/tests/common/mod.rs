#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tandem_core::{Connection, Handler, HandlerError, HandlerFuture};
use tokio::io::DuplexStream;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Closure-backed handler for tests.
pub struct TestHandler<F> {
    name: &'static str,
    f: F,
}

impl<F> Handler for TestHandler<F>
where
    F: Fn(Vec<Bytes>) -> HandlerFuture + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn parameter_types(&self) -> &[&'static str] {
        &["bytes"]
    }

    fn return_type(&self) -> Option<&'static str> {
        Some("bytes")
    }

    fn is_async(&self) -> bool {
        true
    }

    fn execute(&self, arguments: Vec<Bytes>) -> HandlerFuture {
        (self.f)(arguments)
    }
}

pub fn handler<F, Fut>(name: &'static str, f: F) -> Arc<dyn Handler>
where
    F: Fn(Vec<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<Bytes>, HandlerError>> + Send + 'static,
{
    Arc::new(TestHandler {
        name,
        f: move |arguments: Vec<Bytes>| -> HandlerFuture { Box::pin(f(arguments)) },
    })
}

pub fn echo() -> Arc<dyn Handler> {
    handler("echo", |arguments: Vec<Bytes>| async move {
        Ok::<_, HandlerError>(arguments.into_iter().next())
    })
}

pub fn bytes(s: &'static str) -> Bytes {
    Bytes::from_static(s.as_bytes())
}

/// Two started connections talking to each other.
pub fn connected_pair() -> (Arc<Connection>, Arc<Connection>) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let a = Arc::new(Connection::new(a));
    let b = Arc::new(Connection::new(b));
    a.start().expect("start a");
    b.start().expect("start b");
    (a, b)
}

/// A started connection plus the raw far end of its stream.
pub fn raw_peer() -> (Arc<Connection>, DuplexStream) {
    let (a, raw) = tokio::io::duplex(64 * 1024);
    let conn = Arc::new(Connection::new(a));
    conn.start().expect("start");
    (conn, raw)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

//! Echo over TCP
//!
//! Two tandem peers on one loopback socket, each calling the other:
//! - the client asks the server to `echo` and `greet`
//! - `greet` calls back into the client for its preferred salutation
//! - the client sends a fire-and-forget `log` line
//!
//! Usage:
//!   RUST_LOG=debug cargo run -p tandem-echo-over-tcp

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tandem::prelude::*;
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Serialize, Deserialize)]
struct Salutation {
    word: String,
    punctuation: char,
}

fn serve(stream: TcpStream) -> Result<Peer, Box<dyn std::error::Error>> {
    stream.set_nodelay(true)?;
    let connection = Arc::new(Connection::with_config(stream, ConnectionConfig::from_env()));
    let peer = Peer::new(connection.clone());

    peer.register("echo", |text: String| async move {
        Ok::<_, HandlerError>(text)
    });

    let callback = peer.clone();
    peer.register("greet", move |name: String| {
        let callback = callback.clone();
        async move {
            let salutation: Salutation = callback
                .query("salutation", ())
                .await
                .map_err(|e| HandlerError::new(format!("salutation callback failed: {e}")))?;
            Ok::<_, HandlerError>(format!(
                "{}, {}{}",
                salutation.word, name, salutation.punctuation
            ))
        }
    });

    peer.register("log", |line: String| async move {
        tracing::info!(%line, "client says");
        Ok::<_, HandlerError>(())
    });

    connection.start()?;
    Ok(peer)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tandem_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== tandem: echo over TCP ===\n");

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "listening");

    let client_stream = TcpStream::connect(addr).await?;
    let (server_stream, remote) = listener.accept().await?;
    tracing::info!(%remote, "accepted");

    let server = serve(server_stream)?;

    client_stream.set_nodelay(true)?;
    let client = Peer::new(Arc::new(Connection::new(client_stream)));
    client.register("salutation", || async {
        Ok::<_, HandlerError>(Salutation {
            word: "Hello".to_string(),
            punctuation: '!',
        })
    });
    let mut client_events = client.connection().subscribe();
    client.connection().start()?;

    let echoed: String = client.query("echo", ("ping",)).await?;
    println!("echo      -> {echoed}");

    let greeting: String = client.query("Greet", ("tandem",)).await?;
    println!("greet     -> {greeting}");

    client.invoke("log", ("fire and forget",))?;

    // No argument: the server handler rejects the call and the client sees a fault.
    match client.query::<String, _>("echo", ()).await {
        Ok(_) => println!("unexpected reply"),
        Err(e) => println!("bad call  -> {e}"),
    }

    // Give the invoke a moment to land before tearing down.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    server.connection().dispose().await;
    client.connection().wait_stopped().await;

    if let Ok(ConnectionEvent::Faulted { error }) = client_events.recv().await {
        match error {
            Some(e) => println!("client stopped: {e}"),
            None => println!("client stopped"),
        }
    }

    client.connection().dispose().await;
    println!("\ndone");
    Ok(())
}

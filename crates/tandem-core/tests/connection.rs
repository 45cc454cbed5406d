mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;
use common::{TIMEOUT, bytes, connected_pair, echo, handler, init_tracing};
use tandem_core::{
    CancellationToken, Connection, ConnectionEvent, ConnectionState, HandlerError, RpcError,
    StartError,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

#[tokio::test]
async fn echo_round_trip() {
    init_tracing();
    let (a, b) = connected_pair();
    b.register_handler("Echo", echo());

    let reply = timeout(TIMEOUT, a.query("Echo", vec![bytes("\"hi\"")]))
        .await
        .expect("timed out")
        .expect("query failed");
    assert_eq!(reply, Some(bytes("\"hi\"")));
}

#[tokio::test]
async fn both_sides_can_call() {
    let (a, b) = connected_pair();
    a.register_handler("whoami", handler("a", |_| async { Ok::<_, HandlerError>(Some(bytes("a"))) }));
    b.register_handler("whoami", handler("b", |_| async { Ok::<_, HandlerError>(Some(bytes("b"))) }));

    let (from_b, from_a) = tokio::join!(a.query("whoami", vec![]), b.query("whoami", vec![]));
    assert_eq!(from_b.unwrap(), Some(bytes("b")));
    assert_eq!(from_a.unwrap(), Some(bytes("a")));
}

#[tokio::test]
async fn method_names_are_case_insensitive() {
    let (a, b) = connected_pair();
    b.register_handler("Echo", echo());
    let reply = timeout(TIMEOUT, a.query("eCHO", vec![bytes("x")]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, Some(bytes("x")));
}

#[tokio::test]
async fn concurrent_queries_get_their_own_replies() {
    let (a, b) = connected_pair();
    // Later requests finish first, so replies come back out of order.
    b.register_handler(
        "delayed_echo",
        handler("delayed_echo", |arguments: Vec<Bytes>| async move {
            let value = arguments.into_iter().next().ok_or("missing argument")?;
            let n: u64 = std::str::from_utf8(&value).unwrap().parse().unwrap();
            tokio::time::sleep(Duration::from_millis(64 - n)).await;
            Ok::<_, HandlerError>(Some(value))
        }),
    );

    let calls = (0..64u64).map(|n| {
        let a = a.clone();
        async move {
            let reply = a
                .query("delayed_echo", vec![Bytes::from(n.to_string())])
                .await;
            (n, reply)
        }
    });
    let results = timeout(TIMEOUT, join_all(calls)).await.unwrap();

    for (n, reply) in results {
        assert_eq!(reply.unwrap(), Some(Bytes::from(n.to_string())));
    }
    assert_eq!(a.pending_calls(), 0);
}

#[tokio::test]
async fn handler_without_return_value_replies_with_nothing() {
    let (a, b) = connected_pair();
    b.register_handler("noop", handler("noop", |_| async { Ok::<_, HandlerError>(None) }));
    let reply = timeout(TIMEOUT, a.query("noop", vec![])).await.unwrap();
    assert_eq!(reply, Ok(None));
}

#[tokio::test]
async fn invoke_does_not_wait_and_echo_is_discarded() {
    let (a, b) = connected_pair();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    b.register_handler(
        "note",
        handler("note", move |arguments: Vec<Bytes>| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(arguments);
                // Produces a reply with message ID 0, which `a` must discard.
                Ok::<_, HandlerError>(Some(bytes("ack")))
            }
        }),
    );
    b.register_handler("Echo", echo());

    a.invoke("note", vec![bytes("first")]).unwrap();
    a.invoke("note", vec![bytes("second")]).unwrap();

    let first = timeout(TIMEOUT, seen_rx.recv()).await.unwrap().unwrap();
    let second = timeout(TIMEOUT, seen_rx.recv()).await.unwrap().unwrap();
    let mut seen = vec![first[0].clone(), second[0].clone()];
    seen.sort();
    assert_eq!(seen, vec![bytes("first"), bytes("second")]);

    let reply = timeout(TIMEOUT, a.query("Echo", vec![bytes("still fine")]))
        .await
        .unwrap();
    assert_eq!(reply, Ok(Some(bytes("still fine"))));
    assert_eq!(a.state(), ConnectionState::Running);
}

#[tokio::test]
async fn failing_handler_only_fails_its_caller() {
    let (a, b) = connected_pair();
    let mut events = b.subscribe();
    b.register_handler(
        "fail",
        handler("fail", |_| async { Err::<Option<Bytes>, _>(HandlerError::new("nope")) }),
    );
    b.register_handler("Echo", echo());

    let err = timeout(TIMEOUT, a.query("fail", vec![]))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, RpcError::RemoteFault { .. }));

    let reply = timeout(TIMEOUT, a.query("Echo", vec![bytes("ok")]))
        .await
        .unwrap();
    assert_eq!(reply, Ok(Some(bytes("ok"))));

    match timeout(TIMEOUT, events.recv()).await.unwrap().unwrap() {
        ConnectionEvent::HandlerError { handler, error } => {
            assert_eq!(handler.name(), "fail");
            assert_eq!(error.message(), "nope");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(a.state(), ConnectionState::Running);
    assert_eq!(b.state(), ConnectionState::Running);
}

#[tokio::test]
async fn panicking_handler_is_contained() {
    let (a, b) = connected_pair();
    let mut events = b.subscribe();
    b.register_handler(
        "explode",
        handler("explode", |_| async {
            if true {
                panic!("kaboom");
            }
            Ok::<_, HandlerError>(None)
        }),
    );
    b.register_handler("Echo", echo());

    let err = timeout(TIMEOUT, a.query("explode", vec![]))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, RpcError::RemoteFault { .. }));

    match timeout(TIMEOUT, events.recv()).await.unwrap().unwrap() {
        ConnectionEvent::HandlerError { error, .. } => {
            assert!(error.message().contains("kaboom"), "{}", error.message());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let reply = timeout(TIMEOUT, a.query("Echo", vec![bytes("alive")]))
        .await
        .unwrap();
    assert_eq!(reply, Ok(Some(bytes("alive"))));
}

#[tokio::test]
async fn stop_fails_every_pending_call() {
    let (a, _b) = connected_pair();

    // Nothing is registered on `b`, so these never get an answer.
    let calls: Vec<_> = (0..16)
        .map(|_| {
            let a = a.clone();
            tokio::spawn(async move { a.query("unanswered", vec![]).await })
        })
        .collect();

    timeout(TIMEOUT, async {
        while a.pending_calls() < 16 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("calls never registered");

    a.stop();

    for call in calls {
        let result = timeout(TIMEOUT, call).await.unwrap().unwrap();
        assert_eq!(result, Err(RpcError::Shutdown));
    }
    assert_eq!(a.state(), ConnectionState::Faulted);
    assert_eq!(a.pending_calls(), 0);
}

#[tokio::test]
async fn query_after_stop_fails_immediately() {
    let (a, _b) = connected_pair();
    a.stop();
    assert_eq!(a.query("anything", vec![]).await, Err(RpcError::Shutdown));
    assert_eq!(a.invoke("anything", vec![]), Err(RpcError::Shutdown));
}

#[tokio::test]
async fn unframeable_request_is_rejected_before_sending() {
    let (a, _b) = connected_pair();
    let err = a.query("x", vec![Bytes::new()]).await.unwrap_err();
    assert!(matches!(err, RpcError::Frame(_)));
    assert_eq!(a.pending_calls(), 0);
    assert_eq!(a.state(), ConnectionState::Running);
}

#[tokio::test]
async fn stop_publishes_faulted_once() {
    let (a, _b) = connected_pair();
    let mut events = a.subscribe();

    a.stop();
    a.stop();
    timeout(TIMEOUT, a.wait_stopped()).await.unwrap();

    match timeout(TIMEOUT, events.recv()).await.unwrap().unwrap() {
        ConnectionEvent::Faulted { error } => assert!(error.is_none()),
        other => panic!("unexpected event: {other:?}"),
    }

    // Give both loops time to exit and report.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(matches!(
        events.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn peer_going_away_faults_the_connection() {
    let (a, b) = connected_pair();
    let pending = {
        let a = a.clone();
        tokio::spawn(async move { a.query("unanswered", vec![]).await })
    };
    timeout(TIMEOUT, async {
        while a.pending_calls() < 1 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    b.dispose().await;

    let result = timeout(TIMEOUT, pending).await.unwrap().unwrap();
    assert_eq!(result, Err(RpcError::Shutdown));
    timeout(TIMEOUT, a.wait_stopped()).await.unwrap();
    assert!(a.fault_error().is_some());
}

#[tokio::test]
async fn nested_callbacks_complete() {
    let (a, b) = connected_pair();
    a.register_handler("prefix", handler("prefix", |_| async { Ok::<_, HandlerError>(Some(bytes("PREFIX:"))) }));

    let b_for_handler = b.clone();
    b.register_handler(
        "format",
        handler("format", move |arguments: Vec<Bytes>| {
            let b = b_for_handler.clone();
            async move {
                let prefix = b
                    .query("prefix", vec![])
                    .await
                    .map_err(|e| HandlerError::new(format!("callback failed: {e}")))?
                    .unwrap_or_default();
                let mut out = prefix.to_vec();
                out.extend_from_slice(&arguments[0]);
                Ok::<_, HandlerError>(Some(Bytes::from(out)))
            }
        }),
    );

    let reply = timeout(TIMEOUT, a.query("format", vec![bytes("test")]))
        .await
        .unwrap();
    assert_eq!(reply, Ok(Some(bytes("PREFIX:test"))));

    // Breaks the b -> handler -> b cycle.
    b.dispose().await;
}

#[tokio::test]
async fn start_is_single_shot() {
    let (a, _b) = connected_pair();
    assert_eq!(a.start(), Err(StartError::AlreadyStarted));
    a.stop();
    assert_eq!(a.start(), Err(StartError::Stopped));

    let (stream, _other) = tokio::io::duplex(64);
    let idle = Connection::new(stream);
    assert_eq!(idle.state(), ConnectionState::Idle);
    idle.stop();
    assert_eq!(idle.start(), Err(StartError::Stopped));
}

#[tokio::test]
async fn queries_issued_before_start_are_sent_after() {
    let (left, right) = tokio::io::duplex(64 * 1024);
    let a = Arc::new(Connection::new(left));
    let b = Arc::new(Connection::new(right));
    b.register_handler("Echo", echo());
    b.start().unwrap();

    let early = {
        let a = a.clone();
        tokio::spawn(async move { a.query("Echo", vec![bytes("early")]).await })
    };
    timeout(TIMEOUT, async {
        while a.pending_outbound() < 1 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();

    a.start().unwrap();
    let reply = timeout(TIMEOUT, early).await.unwrap().unwrap();
    assert_eq!(reply, Ok(Some(bytes("early"))));
}

#[tokio::test]
async fn parent_token_cancellation_stops_the_connection() {
    let (left, right) = tokio::io::duplex(1024);
    let a = Connection::new(left);
    let _b = Connection::new(right);
    let parent = CancellationToken::new();
    a.start_with_token(parent.clone()).unwrap();

    parent.cancel();
    timeout(TIMEOUT, a.wait_stopped()).await.unwrap();
    assert!(a.fault_error().is_none());
}

#[tokio::test]
async fn deregistered_handlers_stop_answering() {
    let (a, b) = connected_pair();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = {
        let calls = calls.clone();
        handler("counted", move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, HandlerError>(Some(bytes("hit"))) }
        })
    };
    b.register_handler("first", counted.clone());
    b.register_handler("second", counted.clone());
    b.register_handler("Echo", echo());

    assert_eq!(a.query("second", vec![]).await, Ok(Some(bytes("hit"))));
    assert!(b.deregister_handler_instance(&counted));
    assert!(b.handlers().lookup("first").is_none());
    assert!(b.handlers().lookup("second").is_none());

    // The call is dropped on the floor; the caller waits.
    let dropped = timeout(Duration::from_millis(100), a.query("first", vec![])).await;
    assert!(dropped.is_err(), "dropped call must not be answered");

    assert_eq!(a.query("Echo", vec![bytes("x")]).await, Ok(Some(bytes("x"))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dispose_clears_handlers() {
    let (a, _b) = connected_pair();
    a.register_handler("Echo", echo());
    a.dispose().await;
    assert!(a.handlers().is_empty());
    assert_eq!(a.state(), ConnectionState::Faulted);
}

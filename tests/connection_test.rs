//! Connection tests against a scripted server
//!
//! Covers token allocation, demultiplexing, noreply, server errors and the
//! connection lifecycle.

mod common;

use common::{connect, options, MockConnector};
use reql_driver::error::RuntimeErrorKind;
use reql_driver::network::{BlockingConnection, ConnectionStatus};
use reql_driver::{Datum, QueryOutput, ReqlError, RunOptions, Term};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[tokio::test]
async fn test_first_query_gets_token_one() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        let (token, body) = server.read_query().await.unwrap();
        seen_tx.send((token, body)).unwrap();
        server.reply(token, json!({"t": 1, "r": [42]})).await;
        server.idle().await;
    });
    let connection = connect(connector).await;
    assert_eq!(connection.status(), ConnectionStatus::Open);

    let output = connection.run(Term::db_list(), &RunOptions::new()).await.unwrap();
    assert_eq!(output.into_atom().unwrap(), Datum::from(42));

    let (token, body) = seen_rx.recv().await.unwrap();
    assert_eq!(token, 1);
    assert_eq!(body, json!([1, [59, []]]));
}

#[tokio::test]
async fn test_out_of_order_replies_reach_their_callers() {
    let (tokens_tx, tokens_rx) = oneshot::channel();
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        let mut tokens = Vec::new();
        for _ in 0..5 {
            tokens.push(server.read_query().await.unwrap().0);
        }
        for token in tokens.iter().rev() {
            server.reply(*token, json!({"t": 1, "r": [token * 10]})).await;
        }
        tokens_tx.send(tokens).unwrap();
        server.idle().await;
    });
    let connection = connect(connector).await;

    let mut pending = Vec::new();
    for _ in 0..5 {
        pending.push(connection.submit(Term::db_list(), &RunOptions::new()).unwrap());
    }
    for mut response in pending {
        let token = response.token();
        let datum = response.wait(None).await.unwrap().into_atom().unwrap();
        assert_eq!(datum, Datum::from(token * 10));
    }

    let mut tokens = tokens_rx.await.unwrap();
    tokens.sort_unstable();
    assert_eq!(tokens, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_use_db_is_sent_as_global_optarg() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        while let Some((token, body)) = server.read_query().await {
            seen_tx.send(body).unwrap();
            server.reply(token, json!({"t": 1, "r": [null]})).await;
        }
    });
    let connection = connect(connector).await;
    connection.use_db("blog");

    let table = Term::db("blog").table("posts").count();
    connection.run(Term::db_list(), &RunOptions::new()).await.unwrap();
    connection.run(table, &RunOptions::new().db("other")).await.unwrap();

    assert_eq!(seen_rx.recv().await.unwrap(), json!([1, [59, []], {"db": [14, ["blog"]]}]));
    let second = seen_rx.recv().await.unwrap();
    assert_eq!(second[2], json!({"db": [14, ["other"]]}));
}

#[tokio::test]
async fn test_runtime_error_renders_query() {
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        let (token, _) = server.read_query().await.unwrap();
        server
            .reply(
                token,
                json!({
                    "t": 18,
                    "e": 3100000,
                    "r": ["Table `test.missing` does not exist."],
                    "b": [1]
                }),
            )
            .await;
        server.idle().await;
    });
    let connection = connect(connector).await;

    let err = connection
        .run(Term::db("test").table("missing"), &RunOptions::new())
        .await
        .unwrap_err();
    match &err {
        ReqlError::Runtime { kind, .. } => assert_eq!(*kind, RuntimeErrorKind::NonExistence),
        other => panic!("expected a runtime error, got {:?}", other),
    }
    assert_eq!(err.message(), "Table `test.missing` does not exist.");
    let rendered = err.to_string();
    assert!(rendered.contains(r#"r.db("test").table("missing")"#));
    assert!(rendered.lines().last().unwrap().contains('^'));

    // the connection survives query errors
    assert!(connection.is_open());
}

#[tokio::test]
async fn test_compile_and_client_errors() {
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        let (token, _) = server.read_query().await.unwrap();
        server.reply(token, json!({"t": 17, "r": ["Expected 1 argument"]})).await;
        let (token, _) = server.read_query().await.unwrap();
        server.reply(token, json!({"t": 16, "r": ["Bad query"]})).await;
        server.idle().await;
    });
    let connection = connect(connector).await;

    let err = connection.run(Term::db_list(), &RunOptions::new()).await.unwrap_err();
    assert!(matches!(err, ReqlError::Compile(_)));
    let err = connection.run(Term::db_list(), &RunOptions::new()).await.unwrap_err();
    assert!(matches!(err, ReqlError::Client(_)));
}

#[tokio::test]
async fn test_unknown_token_fails_everything() {
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        server.read_query().await.unwrap();
        server.read_query().await.unwrap();
        server.reply(99, json!({"t": 1, "r": [0]})).await;
        server.idle().await;
    });
    let connection = connect(connector).await;

    let mut first = connection.submit(Term::db_list(), &RunOptions::new()).unwrap();
    let mut second = connection.submit(Term::db_list(), &RunOptions::new()).unwrap();

    for pending in [&mut first, &mut second] {
        let err = pending.wait(None).await.unwrap_err();
        assert_eq!(err.to_string(), "Unexpected response received.");
    }
    assert_eq!(connection.status(), ConnectionStatus::Closed);

    let err = connection.run(Term::db_list(), &RunOptions::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "Connection is closed.");
}

#[tokio::test]
async fn test_server_hangup_fails_waiters() {
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        server.read_query().await.unwrap();
        // dropping the server closes the pipe
    });
    let connection = connect(connector).await;

    let err = connection.run(Term::db_list(), &RunOptions::new()).await.unwrap_err();
    assert_eq!(err.to_string(), "Connection is closed.");
    assert_eq!(connection.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn test_close_fails_cursors_and_drains_noreply() {
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        let (token, _) = server.read_query().await.unwrap();
        server.reply(token, json!({"t": 3, "r": [1, 2, 3]})).await;
        server.idle().await;
    });
    let connection = connect(connector).await;

    let mut cursor = connection
        .run(Term::db("test").table("t"), &RunOptions::new())
        .await
        .unwrap()
        .into_cursor()
        .unwrap();
    assert_eq!(cursor.buffered(), 3);

    connection.close(true).await.unwrap();
    assert_eq!(connection.status(), ConnectionStatus::Closed);

    let err = cursor.next(None).await.unwrap_err();
    assert_eq!(err.to_string(), "Connection is closed.");
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        server.idle().await;
    });
    let connection = connect(connector).await;

    connection.close(false).await.unwrap();
    connection.close(false).await.unwrap();
    connection.close(true).await.unwrap();
    assert_eq!(connection.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn test_noreply_then_noreply_wait() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        let (_, body) = server.read_query().await.unwrap();
        seen_tx.send(body).unwrap();
        let (token, body) = server.read_query().await.unwrap();
        seen_tx.send(body).unwrap();
        server.reply(token, json!({"t": 4, "r": []})).await;
        server.idle().await;
    });
    let connection = connect(connector).await;

    let output = connection
        .run(Term::db_list(), &RunOptions::new().noreply(true))
        .await
        .unwrap();
    assert!(matches!(output, QueryOutput::NoReply));
    connection.noreply_wait().await.unwrap();

    assert_eq!(seen_rx.recv().await.unwrap(), json!([1, [59, []], {"noreply": true}]));
    assert_eq!(seen_rx.recv().await.unwrap(), json!([4]));
}

#[tokio::test]
async fn test_server_info() {
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        let (token, body) = server.read_query().await.unwrap();
        assert_eq!(body, json!([5]));
        server
            .reply(token, json!({"t": 5, "r": [{"id": "abc", "name": "mock", "proxy": false}]}))
            .await;
        server.idle().await;
    });
    let connection = connect(connector).await;

    let info = connection.server_info().await.unwrap();
    assert_eq!(info.get("name"), Some(&Datum::from("mock")));
    assert_eq!(info.get("proxy"), Some(&Datum::Boolean(false)));
}

#[tokio::test]
async fn test_profile_wraps_atom() {
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        let (token, body) = server.read_query().await.unwrap();
        assert_eq!(body[2], json!({"profile": true}));
        server
            .reply(token, json!({"t": 1, "r": [7], "p": [{"description": "Evaluating datum."}]}))
            .await;
        server.idle().await;
    });
    let connection = connect(connector).await;

    let datum = connection
        .run(Term::db_list(), &RunOptions::new().profile(true))
        .await
        .unwrap()
        .into_atom()
        .unwrap();
    assert_eq!(datum.get("value"), Some(&Datum::from(7)));
    assert!(datum.get("profile").is_some());
}

#[tokio::test]
async fn test_wait_timeout_can_be_retried() {
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        let (token, _) = server.read_query().await.unwrap();
        go_rx.await.unwrap();
        server.reply(token, json!({"t": 1, "r": ["late"]})).await;
        server.idle().await;
    });
    let connection = connect(connector).await;

    let mut pending = connection.submit(Term::db_list(), &RunOptions::new()).unwrap();
    let err = pending.wait(Some(Duration::from_millis(20))).await.unwrap_err();
    assert!(err.is_timeout());

    go_tx.send(()).unwrap();
    let datum = pending.wait(None).await.unwrap().into_atom().unwrap();
    assert_eq!(datum, Datum::from("late"));
}

#[tokio::test]
async fn test_abandoned_stream_is_stopped() {
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<(u64, Value)>();
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        let (token, _) = server.read_query().await.unwrap();
        go_rx.await.unwrap();
        server.reply(token, json!({"t": 3, "r": [1]})).await;
        while let Some((token, body)) = server.read_query().await {
            seen_tx.send((token, body.clone())).unwrap();
            match body[0].as_u64() {
                Some(3) => server.reply(token, json!({"t": 2, "r": []})).await,
                _ => server.reply(token, json!({"t": 1, "r": ["ok"]})).await,
            }
        }
    });
    let connection = connect(connector).await;

    let pending = connection.submit(Term::db("test").table("t"), &RunOptions::new()).unwrap();
    let token = pending.token();
    drop(pending);
    go_tx.send(()).unwrap();

    assert_eq!(seen_rx.recv().await.unwrap(), (token, json!([3])));

    // the STOP acknowledgement was routed to the closed cursor, not treated
    // as an unknown token
    let output = connection.run(Term::db_list(), &RunOptions::new()).await.unwrap();
    assert_eq!(output.into_atom().unwrap(), Datum::from("ok"));
}

#[tokio::test]
async fn test_unclaimed_stream_is_stopped() {
    let (replied_tx, replied_rx) = oneshot::channel::<()>();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<(u64, Value)>();
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        let (token, _) = server.read_query().await.unwrap();
        server.reply(token, json!({"t": 3, "r": [1]})).await;
        replied_tx.send(()).unwrap();
        while let Some((token, body)) = server.read_query().await {
            seen_tx.send((token, body.clone())).unwrap();
            if body[0] == 3 {
                server.reply(token, json!({"t": 2, "r": []})).await;
            }
        }
    });
    let connection = connect(connector).await;

    let pending = connection.submit(Term::db("test").table("t"), &RunOptions::new()).unwrap();
    let token = pending.token();
    replied_rx.await.unwrap();
    // let the reader hand the stream to the pending response
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(pending);

    let stop = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
        .await
        .expect("STOP not sent for an unclaimed stream");
    assert_eq!(stop, Some((token, json!([3]))));
    assert!(connection.is_open());
}

#[tokio::test]
async fn test_reconnect_keeps_counting_tokens() {
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let second_seen = seen_tx.clone();
    let connector = MockConnector::new()
        .serve(|mut server| async move {
            server.accept_v0_4().await;
            let (token, _) = server.read_query().await.unwrap();
            seen_tx.send(token).unwrap();
            server.reply(token, json!({"t": 1, "r": ["first"]})).await;
            server.idle().await;
        })
        .serve(|mut server| async move {
            server.accept_v0_4().await;
            let (token, _) = server.read_query().await.unwrap();
            second_seen.send(token).unwrap();
            server.reply(token, json!({"t": 1, "r": ["second"]})).await;
            server.idle().await;
        });
    let connection = connect(connector).await;

    let first = connection.run(Term::db_list(), &RunOptions::new()).await.unwrap();
    assert_eq!(first.into_atom().unwrap(), Datum::from("first"));

    connection.reconnect(false, None).await.unwrap();
    assert!(connection.is_open());

    let second = connection.run(Term::db_list(), &RunOptions::new()).await.unwrap();
    assert_eq!(second.into_atom().unwrap(), Datum::from("second"));

    assert_eq!(seen_rx.recv().await.unwrap(), 1);
    assert_eq!(seen_rx.recv().await.unwrap(), 2);
}

#[tokio::test]
async fn test_reconnect_timeout() {
    let connector = MockConnector::new()
        .serve(|mut server| async move {
            server.accept_v0_4().await;
            server.idle().await;
        })
        .serve(|mut server| async move {
            server.read_v0_4().await;
            // never answer the handshake
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
    let connection = connect(connector).await;

    let err = connection
        .reconnect(false, Some(Duration::from_millis(50)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(err.to_string().contains("operation timed out"));
    assert_eq!(connection.status(), ConnectionStatus::Closed);
}

#[test]
fn test_blocking_connection() {
    let connector = MockConnector::new().serve(|mut server| async move {
        server.accept_v0_4().await;
        let (token, _) = server.read_query().await.unwrap();
        server.reply(token, json!({"t": 3, "r": [1, 2]})).await;
        while let Some((next, body)) = server.read_query().await {
            match body[0].as_u64() {
                Some(2) => server.reply(next, json!({"t": 2, "r": [3]})).await,
                Some(5) => server.reply(next, json!({"t": 5, "r": [{"name": "mock"}]})).await,
                _ => {}
            }
        }
    });
    let connection = BlockingConnection::connect_with(options(), Arc::new(connector)).unwrap();

    let cursor = connection
        .run(Term::db("test").table("t"), &RunOptions::new())
        .unwrap()
        .into_cursor()
        .unwrap();
    let items: Vec<Datum> = cursor.collect::<Result<_, _>>().unwrap();
    assert_eq!(items, vec![Datum::from(1), Datum::from(2), Datum::from(3)]);

    let info = connection.server_info().unwrap();
    assert_eq!(info.get("name"), Some(&Datum::from("mock")));

    connection.close(false).unwrap();
    assert_eq!(connection.status(), ConnectionStatus::Closed);
}

//! End-to-end client tests against a served operation endpoint.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nexus_client::{
    Client, ClientError, ClientOptions, ExecuteOperationOptions, GetResultOptions,
    StartOperationOptions,
};
use nexus_core::{HandlerError, OperationState, SerializerChain};
use nexus_server::{completion_router, CompletionHandler, CompletionRequest, HandlerConfig};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use common::{demo_registry, serve, ScriptedHandler};

fn client(base_url: &str) -> Client {
    Client::new(ClientOptions::new(base_url)).unwrap()
}

// ---------------------------------------------------------------------------
// Start
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sync_start_returns_body_and_headers() {
    let server = serve(Arc::new(ScriptedHandler::default()), HandlerConfig::default()).await;
    let client = client(&server.base_url);

    let options = StartOperationOptions {
        header: BTreeMap::from([("echo".to_string(), "test".to_string())]),
        ..StartOperationOptions::default()
    };
    let handle = client
        .start_operation("sync", &vec![0x00_u8, 0x01], options)
        .await
        .unwrap();

    assert_eq!(handle.id(), None);
    assert_eq!(handle.state(), OperationState::Succeeded);

    let content = handle.result(GetResultOptions::default()).await.unwrap();
    assert_eq!(content.data.as_ref(), &[0x00, 0x01]);
    assert_eq!(content.header.get("echo").map(String::as_str), Some("test"));
    assert_eq!(content.content_type(), Some("application/octet-stream"));

    // Cached after the first read.
    let again = handle.result(GetResultOptions::default()).await.unwrap();
    assert_eq!(again, content);
}

#[tokio::test]
async fn async_start_returns_running_handle() {
    let server = serve(Arc::new(ScriptedHandler::default()), HandlerConfig::default()).await;
    let client = client(&server.base_url);

    let handle = client
        .start_operation("async", &json!({"n": 1}), StartOperationOptions::default())
        .await
        .unwrap();
    assert_eq!(handle.id(), Some("async"));
    assert_eq!(handle.state(), OperationState::Running);

    let info = handle.get_info().await.unwrap();
    assert_eq!(info.id, "async");
    assert_eq!(info.state, OperationState::Running);

    let content = handle.result(GetResultOptions::default()).await.unwrap();
    assert_eq!(content.data.as_ref(), b"\"done\"");
    assert_eq!(handle.state(), OperationState::Succeeded);
}

#[tokio::test]
async fn unsuccessful_start_carries_state_and_failure() {
    let server = serve(Arc::new(ScriptedHandler::default()), HandlerConfig::default()).await;
    let client = client(&server.base_url);

    let err = client
        .start_operation("cancel", &json!(null), StartOperationOptions::default())
        .await
        .unwrap_err();
    let ClientError::Unsuccessful(err) = err else {
        panic!("expected unsuccessful error, got {err}");
    };
    assert_eq!(err.state, OperationState::Canceled);
    assert_eq!(err.failure.message, "intentional");

    let err = client
        .start_operation("fail", &json!(null), StartOperationOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.operation_state(), Some(OperationState::Failed));
}

#[tokio::test]
async fn handler_errors_keep_status_and_message() {
    let server = serve(Arc::new(ScriptedHandler::default()), HandlerConfig::default()).await;
    let client = client(&server.base_url);

    let err = client
        .start_operation("bad", &json!({}), StartOperationOptions::default())
        .await
        .unwrap_err();
    let ClientError::Handler(err) = err else {
        panic!("expected handler error, got {err}");
    };
    assert_eq!(err.status.as_u16(), 400);
    assert_eq!(err.failure.message, "bad input");

    let err = client
        .start_operation("missing", &json!({}), StartOperationOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Handler(HandlerError { status, .. }) if status.as_u16() == 404));
}

// ---------------------------------------------------------------------------
// Handle calls
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_is_accepted() {
    let handler = Arc::new(ScriptedHandler::default());
    let server = serve(handler.clone(), HandlerConfig::default()).await;
    let client = client(&server.base_url);

    let handle = client.get_handle("async", "op-1");
    handle.cancel().await.unwrap();
    assert_eq!(*handler.canceled.lock().unwrap(), vec!["op-1".to_string()]);
}

#[tokio::test]
async fn sync_handle_has_no_id_for_handle_calls() {
    let server = serve(Arc::new(ScriptedHandler::default()), HandlerConfig::default()).await;
    let client = client(&server.base_url);

    let handle = client
        .start_operation("sync", &json!("x"), StartOperationOptions::default())
        .await
        .unwrap();
    assert!(matches!(handle.cancel().await, Err(ClientError::MissingOperationId)));
    assert!(matches!(handle.get_info().await, Err(ClientError::MissingOperationId)));
}

#[tokio::test]
async fn result_gives_up_after_wait() {
    let server = serve(Arc::new(ScriptedHandler::default()), HandlerConfig::default()).await;
    let client = client(&server.base_url);
    let handle = client.get_handle("async", "running");

    let started = Instant::now();
    let err = handle
        .result(GetResultOptions {
            wait: Some(Duration::from_millis(300)),
            cancel: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::StillRunning), "{err}");
    assert!(started.elapsed() >= Duration::from_millis(250));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(handle.state(), OperationState::Running);

    // Zero wait checks once without blocking.
    let err = handle
        .result(GetResultOptions {
            wait: Some(Duration::ZERO),
            cancel: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::StillRunning));
}

#[tokio::test]
async fn result_stops_when_cancelled() {
    let server = serve(Arc::new(ScriptedHandler::default()), HandlerConfig::default()).await;
    let client = client(&server.base_url);
    let handle = client.get_handle("async", "running");

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = handle
        .result(GetResultOptions {
            wait: None,
            cancel: Some(cancel),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Cancelled), "{err}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn failed_result_is_unsuccessful() {
    let server = serve(Arc::new(ScriptedHandler::default()), HandlerConfig::default()).await;
    let client = client(&server.base_url);
    let handle = client.get_handle("async", "failed");

    let err = handle.result(GetResultOptions::default()).await.unwrap_err();
    assert_eq!(err.operation_state(), Some(OperationState::Failed));
    assert_eq!(handle.state(), OperationState::Failed);
}

#[tokio::test]
async fn terminal_state_regression_is_protocol_error() {
    let server = serve(Arc::new(ScriptedHandler::default()), HandlerConfig::default()).await;
    let client = client(&server.base_url);
    let handle = client.get_handle("async", "zombie");

    let info = handle.get_info().await.unwrap();
    assert_eq!(info.state, OperationState::Failed);

    let err = handle
        .result(GetResultOptions {
            wait: Some(Duration::ZERO),
            cancel: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)), "{err}");
    assert_eq!(handle.state(), OperationState::Failed);
}

#[tokio::test]
async fn closed_handle_rejects_result() {
    let server = serve(Arc::new(ScriptedHandler::default()), HandlerConfig::default()).await;
    let client = client(&server.base_url);

    let handle = client
        .start_operation("sync", &json!("x"), StartOperationOptions::default())
        .await
        .unwrap();
    handle.close().await;
    handle.close().await;
    assert!(matches!(
        handle.result(GetResultOptions::default()).await,
        Err(ClientError::HandleClosed)
    ));
}

// ---------------------------------------------------------------------------
// Registry-backed operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execute_sync_operation() {
    let server = serve(demo_registry(), HandlerConfig::default()).await;
    let client = client(&server.base_url);

    let output: serde_json::Value = client
        .execute_operation("demo/echo", &json!({"a": [1, 2]}), ExecuteOperationOptions::default())
        .await
        .unwrap();
    assert_eq!(output, json!({"a": [1, 2]}));
}

#[tokio::test]
async fn execute_async_operation_long_polls() {
    let server = serve(demo_registry(), HandlerConfig::default()).await;
    let client = client(&server.base_url);

    let started = Instant::now();
    let output: String = client
        .execute_operation(
            "demo/delay",
            &json!({"millis": 100, "message": "hi"}),
            ExecuteOperationOptions {
                wait: Some(Duration::from_secs(5)),
                ..ExecuteOperationOptions::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(output, "hi");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn execute_polls_repeatedly_with_short_hints() {
    let server = serve(demo_registry(), HandlerConfig::default()).await;
    let client = Client::new(ClientOptions {
        max_poll_wait: Duration::from_millis(100),
        ..ClientOptions::new(server.base_url.clone())
    })
    .unwrap();

    let output: String = client
        .execute_operation(
            "demo/delay",
            &json!({"millis": 450, "message": "later"}),
            ExecuteOperationOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(output, "later");
}

#[tokio::test]
async fn execute_maps_failures_through_converter() {
    let server = serve(demo_registry(), HandlerConfig::default()).await;
    let client = client(&server.base_url);

    let err = client
        .execute_operation::<_, serde_json::Value>(
            "demo/fail",
            &json!({}),
            ExecuteOperationOptions::default(),
        )
        .await
        .unwrap_err();
    let ClientError::Application { state, source } = err else {
        panic!("expected application error, got {err}");
    };
    assert_eq!(state, OperationState::Failed);
    assert_eq!(source.to_string(), "kaput");
}

#[tokio::test]
async fn cancel_then_result_reports_canceled() {
    let server = serve(demo_registry(), HandlerConfig::default()).await;
    let client = client(&server.base_url);

    let handle = client
        .start_operation(
            "demo/delay",
            &json!({"millis": 10_000, "message": "never"}),
            StartOperationOptions::default(),
        )
        .await
        .unwrap();
    handle.cancel().await.unwrap();

    let err = handle
        .result(GetResultOptions {
            wait: Some(Duration::from_secs(5)),
            cancel: None,
        })
        .await
        .unwrap_err();
    let ClientError::Unsuccessful(err) = err else {
        panic!("expected unsuccessful error, got {err}");
    };
    assert_eq!(err.state, OperationState::Canceled);
    assert_eq!(err.failure.message, "operation canceled");
    assert_eq!(handle.state(), OperationState::Canceled);
}

#[tokio::test]
async fn request_id_deduplicates_starts() {
    let server = serve(demo_registry(), HandlerConfig::default()).await;
    let client = client(&server.base_url);
    let options = StartOperationOptions {
        request_id: Some("req-1".to_string()),
        ..StartOperationOptions::default()
    };
    let input = json!({"millis": 50, "message": "once"});

    let first = client
        .start_operation("demo/delay", &input, options.clone())
        .await
        .unwrap();
    let second = client
        .start_operation("demo/delay", &input, options)
        .await
        .unwrap();
    assert_eq!(first.id(), second.id());
}

#[tokio::test]
async fn get_handle_resumes_operation() {
    let server = serve(demo_registry(), HandlerConfig::default()).await;
    let starter = client(&server.base_url);
    let handle = starter
        .start_operation(
            "demo/delay",
            &json!({"millis": 100, "message": "resumed"}),
            StartOperationOptions::default(),
        )
        .await
        .unwrap();
    let id = handle.id().unwrap().to_string();

    let other = client(&server.base_url);
    let resumed = other.get_handle("demo/delay", &id);
    let content = resumed
        .result(GetResultOptions {
            wait: Some(Duration::from_secs(5)),
            cancel: None,
        })
        .await
        .unwrap();
    let message: String = SerializerChain::default().deserialize(&content).unwrap();
    assert_eq!(message, "resumed");
    assert_eq!(resumed.get_info().await.unwrap().state, OperationState::Succeeded);
}

#[tokio::test]
async fn terminal_result_is_stable_across_calls() {
    let server = serve(demo_registry(), HandlerConfig::default()).await;
    let client = client(&server.base_url);
    let handle = client
        .start_operation(
            "demo/delay",
            &json!({"millis": 50, "message": "settled"}),
            StartOperationOptions::default(),
        )
        .await
        .unwrap();
    let id = handle.id().unwrap().to_string();
    let wait = || GetResultOptions {
        wait: Some(Duration::from_secs(5)),
        cancel: None,
    };

    let first = handle.result(wait()).await.unwrap();
    let second = handle.result(wait()).await.unwrap();
    assert_eq!(first, second);

    // Fresh handles skip the cache and ask the server each time.
    for _ in 0..2 {
        let fresh = client.get_handle("demo/delay", &id);
        assert_eq!(fresh.result(wait()).await.unwrap(), first);
        assert_eq!(fresh.state(), OperationState::Succeeded);
    }
}

#[tokio::test]
async fn canceled_result_is_stable_across_calls() {
    let server = serve(demo_registry(), HandlerConfig::default()).await;
    let client = client(&server.base_url);
    let handle = client
        .start_operation(
            "demo/delay",
            &json!({"millis": 10_000, "message": "never"}),
            StartOperationOptions::default(),
        )
        .await
        .unwrap();
    handle.cancel().await.unwrap();
    let id = handle.id().unwrap().to_string();

    let mut outcomes = Vec::new();
    for _ in 0..2 {
        let fresh = client.get_handle("demo/delay", &id);
        let err = fresh
            .result(GetResultOptions {
                wait: Some(Duration::from_secs(5)),
                cancel: None,
            })
            .await
            .unwrap_err();
        let ClientError::Unsuccessful(err) = err else {
            panic!("expected unsuccessful error, got {err}");
        };
        outcomes.push((err.state, err.failure));
    }
    assert_eq!(outcomes[0], outcomes[1]);
    assert_eq!(outcomes[0].0, OperationState::Canceled);
}

// ---------------------------------------------------------------------------
// Completion callbacks
// ---------------------------------------------------------------------------

struct Forward(mpsc::UnboundedSender<CompletionRequest>);

#[async_trait]
impl CompletionHandler for Forward {
    async fn complete_operation(&self, request: CompletionRequest) -> Result<(), HandlerError> {
        self.0
            .send(request)
            .map_err(|_| HandlerError::internal())
    }
}

#[tokio::test]
async fn completion_is_delivered_to_callback() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let callback_url = format!("http://{}/", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, completion_router(Arc::new(Forward(tx))))
            .await
            .unwrap();
    });

    let server = serve(demo_registry(), HandlerConfig::default()).await;
    let client = client(&server.base_url);
    client
        .start_operation(
            "demo/delay",
            &json!({"millis": 50, "message": "called back"}),
            StartOperationOptions {
                callback_url: Some(callback_url),
                ..StartOperationOptions::default()
            },
        )
        .await
        .unwrap();

    let request = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.completion.state(), OperationState::Succeeded);
    let content = request.completion.into_result().unwrap();
    let message: String = SerializerChain::default().deserialize(&content).unwrap();
    assert_eq!(message, "called back");
}

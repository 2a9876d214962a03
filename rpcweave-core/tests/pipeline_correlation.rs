//! End-to-end tests: an [`RpcClient`] over a [`ChannelTransport`] wired to a
//! [`DispatchPipeline`] serving a [`MethodMap`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rpcweave_core::client::{
    ChannelTransport, JsonConverter, MethodTable, MethodTableEntry, RpcClient, TypedConverter,
};
use rpcweave_core::dispatch::{DispatchOptions, DispatchPipeline, PipelineLink, receiver_stream};
use rpcweave_core::error::CallError;
use rpcweave_core::error::jsonrpc::ResponseError;
use rpcweave_core::jsonrpc::{Message, MessageId, Params, RequestMessage, ResponseMessage};
use rpcweave_core::service::{HandlerContext, MethodMap};
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

struct Harness {
    client: Arc<RpcClient<Arc<ChannelTransport>>>,
    pipeline: DispatchPipeline,
    _link: PipelineLink,
    log_calls: Arc<AtomicUsize>,
    log_seen: Arc<Notify>,
}

fn methods(log_calls: Arc<AtomicUsize>, log_seen: Arc<Notify>) -> MethodMap {
    MethodMap::new()
        .with_method("echo", |params: Option<Params>, _cx| async move {
            Ok(params
                .and_then(|p| p.get(0, "value").cloned())
                .unwrap_or(Value::Null))
        })
        .with_method("slow", |_params, cx: HandlerContext| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(json!("finished")),
                _ = cx.cancel.cancelled() => Err(ResponseError::new(-32000, "interrupted")),
            }
        })
        .with_method("answer", |_params, _cx| async move { Ok(json!(42)) })
        .with_method("explode", |_params, _cx| async move {
            if true {
                panic!("handler defect");
            }
            Ok(Value::Null)
        })
        .with_method("log", move |_params, _cx| {
            let (calls, seen) = (log_calls.clone(), log_seen.clone());
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                seen.notify_one();
                Ok(Value::Null)
            }
        })
}

fn table() -> MethodTable {
    MethodTable::builder()
        .method(MethodTableEntry::request("echo").param("value", JsonConverter))
        .method(MethodTableEntry::request("slow"))
        .method(MethodTableEntry::request("answer").returns_void())
        .method(MethodTableEntry::request("explode"))
        .method(MethodTableEntry::request("answer_typed").returns(TypedConverter::<u8>::new()))
        .method(MethodTableEntry::notification("log").param("line", TypedConverter::<String>::new()))
        .build()
        .expect("table should build")
}

fn harness(options: DispatchOptions) -> Harness {
    let log_calls = Arc::new(AtomicUsize::new(0));
    let log_seen = Arc::new(Notify::new());
    let pipeline = DispatchPipeline::new(methods(log_calls.clone(), log_seen.clone()), options);

    let (requests_tx, requests_rx) = mpsc::channel::<Message>(32);
    let (responses_tx, responses_rx) = mpsc::channel::<ResponseMessage>(32);

    let transport = Arc::new(ChannelTransport::new(requests_tx));
    transport.spawn_receiver(responses_rx);
    let link = pipeline.attach(receiver_stream(requests_rx), responses_tx);

    Harness {
        client: Arc::new(RpcClient::new(transport, table())),
        pipeline,
        _link: link,
        log_calls,
        log_seen,
    }
}

fn index(h: &Harness, name: &str) -> rpcweave_core::client::MethodIndex {
    h.client.table().index_of(name).expect("method should be declared")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_echo_round_trip() {
    let h = harness(DispatchOptions::default());
    let result = h
        .client
        .call(index(&h, "echo"), vec![json!("hi")], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result, Some(json!("hi")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_try_cancel_in_flight_call() {
    let h = harness(DispatchOptions::default());
    let slow = index(&h, "slow");
    let client = Arc::clone(&h.client);
    let call = tokio::spawn(async move { client.call(slow, vec![], CancellationToken::new()).await });

    // The first id a ChannelTransport hands out is 1.
    let id = MessageId::Number(1);
    while !h.pipeline.is_registered(&id) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(h.pipeline.try_cancel(&id), Ok(true));

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(err.as_remote().map(|e| e.code), Some(-32800));
    assert_eq!(h.pipeline.in_flight(), 0);
    assert_eq!(h.pipeline.try_cancel(&id), Ok(false));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_side_cancellation() {
    let h = harness(DispatchOptions::default());
    let cancel = CancellationToken::new();
    let slow = index(&h, "slow");
    let client = Arc::clone(&h.client);
    let token = cancel.clone();
    let call = tokio::spawn(async move { client.call(slow, vec![], token).await });

    while h.client.transport().pending_len() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    cancel.cancel();

    assert_eq!(call.await.unwrap(), Err(CallError::Cancelled));
    assert_eq!(h.client.transport().pending_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_notification_executes_without_response() {
    let h = harness(DispatchOptions::default());
    h.client
        .notify(index(&h, "log"), vec![json!("x")], CancellationToken::new())
        .await
        .unwrap();

    h.log_seen.notified().await;
    assert_eq!(h.log_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.client.transport().pending_len(), 0);
    assert_eq!(h.pipeline.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_void_call_discards_result() {
    let h = harness(DispatchOptions::default());
    let result = h
        .client
        .call(index(&h, "answer"), vec![], CancellationToken::new())
        .await;
    assert_eq!(result, Ok(None));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_remote_method_is_remote_error() {
    let h = harness(DispatchOptions::default());
    let err = h
        .client
        .call(index(&h, "answer_typed"), vec![], CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.as_remote().map(|e| e.code), Some(-32601));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_ids_both_answered() {
    let log_calls = Arc::new(AtomicUsize::new(0));
    let pipeline = DispatchPipeline::new(
        methods(log_calls, Arc::new(Notify::new())),
        DispatchOptions::default(),
    );

    let (in_tx, in_rx) = mpsc::channel(8);
    let (out_tx, mut out_rx) = mpsc::channel(8);
    let link = pipeline.attach(receiver_stream(in_rx), out_tx);

    let slow = RequestMessage::request(5_i64, "slow", None);
    let echo = RequestMessage::request(5_i64, "echo", Some(Params::Positional(vec![json!("b")])));
    in_tx.send(Message::Request(slow)).await.unwrap();
    let id = MessageId::Number(5);
    while !pipeline.is_registered(&id) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // The duplicate runs without a registration of its own.
    in_tx.send(Message::Request(echo)).await.unwrap();
    let second = out_rx.recv().await.unwrap();
    assert_eq!(second.id, Some(id.clone()));
    assert_eq!(second.result, Some(json!("b")));
    assert_eq!(pipeline.in_flight(), 1);

    // Cancelling the id reaches the first request.
    assert_eq!(pipeline.try_cancel(&id), Ok(true));
    let first = out_rx.recv().await.unwrap();
    assert_eq!(first.error.map(|e| e.code), Some(-32800));

    drop(in_tx);
    assert!(out_rx.recv().await.is_none());
    link.completed().await;
    assert_eq!(pipeline.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_handler_answers_with_internal_error() {
    let h = harness(DispatchOptions::default());
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        h.client.call(index(&h, "explode"), vec![], CancellationToken::new()),
    )
    .await
    .expect("call should complete");

    let err = outcome.unwrap_err();
    assert_eq!(err.as_remote().map(|e| e.code), Some(-32603));
    assert_eq!(h.client.transport().pending_len(), 0);
    assert_eq!(h.pipeline.in_flight(), 0);

    // The pipeline keeps serving after the panic.
    let result = h
        .client
        .call(index(&h, "echo"), vec![json!("still here")], CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result, Some(json!("still here")));
}

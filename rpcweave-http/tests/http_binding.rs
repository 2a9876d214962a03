//! HTTP binding tests driven through the axum router.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use http_body_util::BodyExt;
use rpcweave_core::dispatch::{DispatchOptions, DispatchPipeline};
use rpcweave_core::jsonrpc::Params;
use rpcweave_core::service::MethodMap;
use rpcweave_http::{HttpBinding, HttpBindingConfig};
use serde_json::{Value, json};
use tower::ServiceExt;

fn router_with(config: HttpBindingConfig) -> Router {
    let methods = MethodMap::new()
        .with_method("echo", |params: Option<Params>, _cx| async move {
            Ok(params
                .and_then(|p| p.get(0, "value").cloned())
                .unwrap_or(Value::Null))
        })
        .with_method("log", |_params, _cx| async move { Ok(Value::Null) })
        .with_method("explode", |_params, _cx| async move {
            if true {
                panic!("handler defect");
            }
            Ok(Value::Null)
        });
    let pipeline = DispatchPipeline::new(methods, DispatchOptions::default());
    HttpBinding::new(pipeline, config).router()
}

fn router() -> Router {
    router_with(HttpBindingConfig::default())
}

fn rpc_request(method: &str, content_type: Option<&str>, body: &'static str) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri("/rpc");
    if let Some(content_type) = content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder.body(Body::from(body)).expect("should build request")
}

async fn response_json(response: Response) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("should collect body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("body should be JSON")
}

#[tokio::test]
async fn test_echo_request() {
    let request = rpc_request(
        "POST",
        Some("application/json"),
        r#"{"jsonrpc":"2.0","id":1,"method":"echo","params":["hi"]}"#,
    );
    let response = router().oneshot(request).await.expect("should get response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/json; charset=utf-8"
    );
    let body = response_json(response).await;
    assert_eq!(body, json!({"jsonrpc": "2.0", "id": 1, "result": "hi"}));
}

#[tokio::test]
async fn test_get_is_accepted() {
    let request = rpc_request(
        "GET",
        Some("application/json"),
        r#"{"jsonrpc":"2.0","id":"a","method":"echo","params":{"value":3}}"#,
    );
    let response = router().oneshot(request).await.expect("should get response");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response_json(response).await["result"], json!(3));
}

#[tokio::test]
async fn test_notification_has_no_body() {
    let request = rpc_request(
        "POST",
        Some("application/json"),
        r#"{"jsonrpc":"2.0","method":"log","params":["x"]}"#,
    );
    let response = router().oneshot(request).await.expect("should get response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn test_empty_response_status_is_configurable() {
    let config = HttpBindingConfig {
        empty_response_status: StatusCode::OK,
        ..HttpBindingConfig::default()
    };
    let request = rpc_request(
        "POST",
        Some("application/json"),
        r#"{"jsonrpc":"2.0","method":"log"}"#,
    );
    let response = router_with(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_method_not_allowed() {
    let request = rpc_request("PUT", Some("application/json"), r#"{"jsonrpc":"2.0"}"#);
    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    let body = response_json(response).await;
    assert_eq!(body["error"]["code"], json!(-32010));
    assert_eq!(body["id"], Value::Null);
}

#[tokio::test]
async fn test_unsupported_media_type() {
    let request = rpc_request(
        "POST",
        Some("text/plain"),
        r#"{"jsonrpc":"2.0","id":1,"method":"echo"}"#,
    );
    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(response_json(response).await["error"]["code"], json!(-32011));
}

#[tokio::test]
async fn test_missing_content_type() {
    let request = rpc_request("POST", None, r#"{"jsonrpc":"2.0","id":1,"method":"echo"}"#);
    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_short_body() {
    let request = rpc_request("POST", Some("application/json"), "{");
    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["error"]["code"], json!(-32600));
}

#[tokio::test]
async fn test_malformed_body() {
    let request = rpc_request("POST", Some("application/json"), "{not json");
    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["error"]["code"], json!(-32600));
}

#[tokio::test]
async fn test_response_body_rejected() {
    let request = rpc_request(
        "POST",
        Some("application/json"),
        r#"{"jsonrpc":"2.0","id":1,"result":true}"#,
    );
    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversized_body() {
    let config = HttpBindingConfig {
        max_body_size: 16,
        ..HttpBindingConfig::default()
    };
    let request = rpc_request(
        "POST",
        Some("application/json"),
        r#"{"jsonrpc":"2.0","id":1,"method":"echo","params":["this is too long"]}"#,
    );
    let response = router_with(config).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_json(response).await["error"]["code"], json!(-32600));
}

#[tokio::test]
async fn test_unknown_method_is_http_ok() {
    let request = rpc_request(
        "POST",
        Some("application/json"),
        r#"{"jsonrpc":"2.0","id":7,"method":"missing"}"#,
    );
    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["id"], json!(7));
    assert_eq!(body["error"]["code"], json!(-32601));
}

#[tokio::test]
async fn test_panicking_handler_gets_error_body() {
    let request = rpc_request(
        "POST",
        Some("application/json"),
        r#"{"jsonrpc":"2.0","id":1,"method":"explode"}"#,
    );
    let response = router().oneshot(request).await.expect("should get response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = response_json(response).await;
    assert_eq!(body["id"], json!(1));
    assert_eq!(body["error"]["code"], json!(-32603));
}

#[tokio::test]
async fn test_invalid_request_echoes_recoverable_id() {
    let request = rpc_request(
        "POST",
        Some("application/json"),
        r#"{"jsonrpc":"1.0","id":7,"method":"echo"}"#,
    );
    let response = router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_json(response).await;
    assert_eq!(body["id"], json!(7));
    assert_eq!(body["error"]["code"], json!(-32600));
}

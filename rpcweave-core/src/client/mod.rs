//! Call correlator.
//!
//! [`RpcClient`] turns a call described by a [`MethodIndex`] and a list of
//! argument values into a wire request, sends it through a
//! [`ClientTransport`], and turns the matching response into a value or a
//! [`CallError`].
//!
//! Every call on a request method ends in exactly one of: a value,
//! [`CallError::Remote`], [`CallError::Contract`], [`CallError::Cancelled`],
//! or [`CallError::Transport`].

mod method_table;
mod transport;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::CallError;
use crate::jsonrpc::RequestMessage;

pub use method_table::{
    ConversionError, JsonConverter, MethodIndex, MethodTable, MethodTableBuilder,
    MethodTableEntry, MethodTableError, ParameterDescriptor, ParameterStyle, ReturnDescriptor,
    TypedConverter, ValueConverter,
};
pub use transport::{ChannelTransport, ClientTransport, IdGenerator};

/// Client that correlates calls with responses.
#[derive(Debug)]
pub struct RpcClient<T> {
    transport: T,
    table: MethodTable,
}

impl<T: ClientTransport> RpcClient<T> {
    pub fn new(transport: T, table: MethodTable) -> Self {
        Self { transport, table }
    }

    pub fn table(&self) -> &MethodTable {
        &self.table
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Call the method at `method` with `args`.
    ///
    /// Returns `Ok(None)` for notifications and for methods declared to
    /// return no value.
    pub async fn call(
        &self,
        method: MethodIndex,
        args: Vec<Value>,
        cancel: CancellationToken,
    ) -> Result<Option<Value>, CallError> {
        let entry = self
            .table
            .get(method)
            .ok_or_else(|| CallError::contract(format!("unknown method index {}", method.0)))?;
        let params = entry.marshal(args)?;

        if cancel.is_cancelled() {
            return Err(CallError::Cancelled);
        }

        let request = if entry.notification {
            RequestMessage::notification(entry.name.as_str(), params)
        } else {
            RequestMessage::request(self.transport.next_request_id(), entry.name.as_str(), params)
        };
        debug!(id = ?request.id, method = %entry.name, "sending call");

        // Kept for diagnostics on result conversion failure.
        let sent = request.clone();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            response = self.transport.send(request, cancel.clone()) => response?,
        };

        if entry.notification {
            return Ok(None);
        }

        let Some(response) = response else {
            return Err(CallError::Transport {
                reason: format!("no response for request to '{}'", entry.name),
            });
        };

        if let Some(error) = response.error {
            return Err(CallError::Remote(error));
        }

        match &entry.returns {
            ReturnDescriptor::Void => Ok(None),
            ReturnDescriptor::Value(converter) => {
                let result = response.result.unwrap_or(Value::Null);
                converter
                    .from_wire(result)
                    .map(Some)
                    .map_err(|e| CallError::Contract {
                        message: format!("result of '{}': {e}", entry.name),
                        request: Some(Box::new(sent)),
                    })
            }
        }
    }

    /// Call and deserialize the result into `R`.
    ///
    /// Void methods deserialize from `null`, so `R = ()` fits them.
    pub async fn call_as<R: DeserializeOwned>(
        &self,
        method: MethodIndex,
        args: Vec<Value>,
        cancel: CancellationToken,
    ) -> Result<R, CallError> {
        let value = self.call(method, args, cancel).await?.unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            CallError::contract(format!(
                "result is not a valid {}: {e}",
                std::any::type_name::<R>()
            ))
        })
    }

    /// Send a notification. Fails with a contract error if the method at
    /// `method` is not declared as a notification.
    pub async fn notify(
        &self,
        method: MethodIndex,
        args: Vec<Value>,
        cancel: CancellationToken,
    ) -> Result<(), CallError> {
        match self.table.get(method) {
            Some(entry) if entry.notification => {}
            Some(entry) => {
                return Err(CallError::contract(format!(
                    "'{}' is not a notification",
                    entry.name
                )));
            }
            None => {
                return Err(CallError::contract(format!(
                    "unknown method index {}",
                    method.0
                )));
            }
        }
        self.call(method, args, cancel).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::error::jsonrpc::ResponseError;
    use crate::jsonrpc::{MessageId, ResponseMessage};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Answers every request from a fixed closure and records what was sent.
    struct ScriptedTransport {
        reply: fn(&RequestMessage) -> Option<ResponseMessage>,
        sent: Mutex<Vec<RequestMessage>>,
        ids: AtomicI64,
    }

    impl ScriptedTransport {
        fn new(reply: fn(&RequestMessage) -> Option<ResponseMessage>) -> Self {
            Self {
                reply,
                sent: Mutex::new(Vec::new()),
                ids: AtomicI64::new(9),
            }
        }
    }

    #[async_trait]
    impl ClientTransport for ScriptedTransport {
        async fn send(
            &self,
            request: RequestMessage,
            _cancel: CancellationToken,
        ) -> Result<Option<ResponseMessage>, TransportError> {
            let response = if request.is_notification() {
                None
            } else {
                (self.reply)(&request)
            };
            self.sent.lock().push(request);
            Ok(response)
        }

        fn next_request_id(&self) -> MessageId {
            MessageId::Number(self.ids.fetch_add(1, Ordering::SeqCst))
        }
    }

    fn table() -> MethodTable {
        MethodTable::builder()
            .method(MethodTableEntry::request("echo").param("value", JsonConverter))
            .method(MethodTableEntry::request("reset").returns_void())
            .method(MethodTableEntry::notification("log").param("line", TypedConverter::<String>::new()))
            .method(MethodTableEntry::request("count").returns(TypedConverter::<u32>::new()))
            .build()
            .unwrap()
    }

    fn answer_42(request: &RequestMessage) -> Option<ResponseMessage> {
        Some(ResponseMessage::success(request.id.clone(), json!(42)))
    }

    #[tokio::test]
    async fn test_void_call_discards_result() {
        let client = RpcClient::new(ScriptedTransport::new(answer_42), table());
        let reset = client.table().index_of("reset").unwrap();
        let result = client.call(reset, vec![], CancellationToken::new()).await;
        assert_eq!(result, Ok(None));

        let sent = client.transport().sent.lock();
        assert_eq!(sent[0].id, Some(MessageId::Number(9)));
    }

    #[tokio::test]
    async fn test_call_as_typed_result() {
        let client = RpcClient::new(ScriptedTransport::new(answer_42), table());
        let count = client.table().index_of("count").unwrap();
        let n: u32 = client.call_as(count, vec![], CancellationToken::new()).await.unwrap();
        assert_eq!(n, 42);
    }

    #[tokio::test]
    async fn test_result_conversion_failure_carries_request() {
        fn answer_text(request: &RequestMessage) -> Option<ResponseMessage> {
            Some(ResponseMessage::success(request.id.clone(), json!("many")))
        }
        let client = RpcClient::new(ScriptedTransport::new(answer_text), table());
        let count = client.table().index_of("count").unwrap();
        let err = client.call(count, vec![], CancellationToken::new()).await.unwrap_err();
        let CallError::Contract { request, .. } = err else {
            panic!("expected contract error, got {err:?}");
        };
        assert_eq!(request.unwrap().method, "count");
    }

    #[tokio::test]
    async fn test_remote_error_surfaces_verbatim() {
        fn answer_error(request: &RequestMessage) -> Option<ResponseMessage> {
            Some(ResponseMessage::error(
                request.id.clone(),
                ResponseError::new(-32001, "busy").with_data(json!({"retry": 5})),
            ))
        }
        let client = RpcClient::new(ScriptedTransport::new(answer_error), table());
        let echo = client.table().index_of("echo").unwrap();
        let err = client
            .call(echo, vec![json!("hi")], CancellationToken::new())
            .await
            .unwrap_err();
        let remote = err.as_remote().unwrap();
        assert_eq!(remote.code, -32001);
        assert_eq!(remote.message, "busy");
        assert_eq!(remote.data, Some(json!({"retry": 5})));
    }

    #[tokio::test]
    async fn test_notification_allocates_no_id() {
        let client = RpcClient::new(ScriptedTransport::new(answer_42), table());
        let log = client.table().index_of("log").unwrap();
        client
            .notify(log, vec![json!("x")], CancellationToken::new())
            .await
            .unwrap();

        let sent = client.transport().sent.lock();
        assert!(sent[0].is_notification());
        // The id counter was never touched.
        assert_eq!(client.transport().ids.load(Ordering::SeqCst), 9);
    }

    #[tokio::test]
    async fn test_notify_rejects_request_method() {
        let client = RpcClient::new(ScriptedTransport::new(answer_42), table());
        let echo = client.table().index_of("echo").unwrap();
        let err = client
            .notify(echo, vec![json!("x")], CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Contract { .. }));
        assert!(client.transport().sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_contract_error_sends_nothing() {
        let client = RpcClient::new(ScriptedTransport::new(answer_42), table());
        let log = client.table().index_of("log").unwrap();
        let err = client
            .call(log, vec![json!(12)], CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Contract { request: None, .. }));
        assert!(client.transport().sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let client = RpcClient::new(ScriptedTransport::new(answer_42), table());
        let echo = client.table().index_of("echo").unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = client.call(echo, vec![json!(1)], cancel).await.unwrap_err();
        assert_eq!(err, CallError::Cancelled);
        assert!(client.transport().sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_response_is_transport_error() {
        fn no_answer(_request: &RequestMessage) -> Option<ResponseMessage> {
            None
        }
        let client = RpcClient::new(ScriptedTransport::new(no_answer), table());
        let echo = client.table().index_of("echo").unwrap();
        let err = client
            .call(echo, vec![json!(1)], CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Transport { .. }));
    }

    #[tokio::test]
    async fn test_unknown_index() {
        let client = RpcClient::new(ScriptedTransport::new(answer_42), table());
        let err = client
            .call(MethodIndex(99), vec![], CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Contract { .. }));
    }
}

//! The single receive-loop task: the one consumer of `Transport::receive`, demultiplexing
//! responses (to pending callers), notifications (to the notification registry), and
//! server-initiated requests (to the pluggable handlers) — §4.6, §5.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use mcp_protocol::jsonrpc::{
    JsonRpcError, JsonRpcErrorCode, JsonRpcMessage, JsonRpcMessageKind, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse,
};
use mcp_protocol::{Error, MessageId};
use mcp_transport::validate_url;
use mcp_transport_traits::Transport;

use crate::client::core::ClientInner;
use crate::handlers::{ElicitationMode, ElicitationOutcome, ElicitationRequest, HandlerError, SamplingRequest};

/// Spawn the background task that owns `transport.receive()` for the lifetime of one
/// connection. Returns the `JoinHandle` so `disconnect` can abort it.
pub(crate) fn spawn<T: Transport + 'static>(inner: Arc<ClientInner<T>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if inner.shutdown.load(Ordering::SeqCst) {
                break;
            }
            match inner.transport.receive().await {
                Ok(value) => dispatch_one(&inner, value).await,
                Err(e) => {
                    error!("transport receive failed, tearing down: {e}");
                    inner
                        .pending
                        .drain(|| Error::network(format!("transport failed: {e}")));
                    inner.connected.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
    })
}

async fn dispatch_one<T: Transport + 'static>(inner: &Arc<ClientInner<T>>, value: Value) {
    match JsonRpcMessage::classify(&value) {
        Some(JsonRpcMessageKind::Response) => handle_response(inner, value),
        Some(JsonRpcMessageKind::Request) => handle_request(inner, value).await,
        Some(JsonRpcMessageKind::Notification) => handle_notification(inner, value),
        Some(JsonRpcMessageKind::Unknown) | None => {
            warn!(?value, "discarding frame with no method/id");
        }
    }
}

fn handle_response<T: Transport>(inner: &Arc<ClientInner<T>>, value: Value) {
    let response: JsonRpcResponse = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            warn!("malformed response frame: {e}");
            return;
        }
    };
    let Some(id) = response.id.as_ref().and_then(MessageId::as_i64) else {
        warn!(?response.id, "response id is missing or non-integer, cannot correlate");
        return;
    };
    let result = match response.payload {
        mcp_protocol::jsonrpc::JsonRpcResponsePayload::Success { result } => Ok(result),
        mcp_protocol::jsonrpc::JsonRpcResponsePayload::Error { error } => {
            Err(Error::rpc_with_data(error.code, error.message, error.data))
        }
    };
    inner.pending.complete(id, result);
}

fn handle_notification<T: Transport>(inner: &Arc<ClientInner<T>>, value: Value) {
    let notification: JsonRpcNotification = match serde_json::from_value(value) {
        Ok(n) => n,
        Err(e) => {
            warn!("malformed notification frame: {e}");
            return;
        }
    };
    debug!(method = %notification.method, "dispatching notification");
    inner
        .notifications
        .dispatch(&notification.method, notification.params.as_ref());
}

async fn handle_request<T: Transport + 'static>(inner: &Arc<ClientInner<T>>, value: Value) {
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            warn!("malformed server-request frame: {e}");
            return;
        }
    };
    let id = request.id.clone();
    let payload = match request.method.as_str() {
        "elicitation/create" => handle_elicitation(inner, request).await,
        "sampling/createMessage" => handle_sampling(inner, request).await,
        "roots/list" => handle_roots_list(inner).await,
        other => Err(JsonRpcErrorCode::MethodNotFound
            .into_error_with(format!("unknown server-initiated method: {other}"))),
    };
    let response = match payload {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::error(Some(id), error),
    };
    match serde_json::to_value(&response) {
        Ok(v) => {
            if let Err(e) = inner.transport.send(v).await {
                error!("failed to send response to server-initiated request: {e}");
            }
        }
        Err(e) => error!("failed to serialize server-request response: {e}"),
    }
}

trait ErrorCodeExt {
    fn into_error_with(self, message: impl Into<String>) -> JsonRpcError;
}

impl ErrorCodeExt for JsonRpcErrorCode {
    fn into_error_with(self, message: impl Into<String>) -> JsonRpcError {
        JsonRpcError::new(self.code(), message.into())
    }
}

async fn handle_elicitation<T: Transport + 'static>(
    inner: &Arc<ClientInner<T>>,
    request: JsonRpcRequest,
) -> Result<Value, JsonRpcError> {
    let params = request.params.unwrap_or(Value::Null);
    let message = params
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let mode = match params.get("mode").and_then(Value::as_str) {
        Some("url") => {
            let url = params
                .get("url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let validation = validate_url(&url, &inner.config.url_validator);
            if !validation.safe {
                debug!(url, ?validation.warning, ?validation.error, "declining unsafe elicitation url without invoking handler");
                return Ok(ElicitationOutcome::Decline.into_result_value());
            }
            ElicitationMode::Url { url }
        }
        _ => ElicitationMode::Form {
            schema: params.get("schema").cloned().unwrap_or(Value::Null),
        },
    };

    let handler = inner.handlers.elicitation.read().clone();
    let fut = handler.handle_elicitation(ElicitationRequest { message, mode });
    match tokio::time::timeout(inner.config.handler_timeout, fut).await {
        Ok(Ok(outcome)) => Ok(outcome.into_result_value()),
        Ok(Err(err)) => Err(err.into_jsonrpc_error()),
        Err(_) => Err(HandlerError::Timeout(inner.config.handler_timeout).into_jsonrpc_error()),
    }
}

async fn handle_sampling<T: Transport + 'static>(
    inner: &Arc<ClientInner<T>>,
    request: JsonRpcRequest,
) -> Result<Value, JsonRpcError> {
    let Some(handler) = inner.handlers.sampling.read().clone() else {
        return Err(JsonRpcError::new(
            -32601,
            "sampling not supported: no handler registered",
        ));
    };
    let params = request.params.unwrap_or(Value::Null);
    let sampling_request = SamplingRequest {
        messages: params.get("messages").cloned().unwrap_or(Value::Null),
        params,
    };
    let fut = handler.handle_sampling(sampling_request);
    match tokio::time::timeout(inner.config.handler_timeout, fut).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err.into_jsonrpc_error()),
        Err(_) => Err(HandlerError::Timeout(inner.config.handler_timeout).into_jsonrpc_error()),
    }
}

async fn handle_roots_list<T: Transport + 'static>(
    inner: &Arc<ClientInner<T>>,
) -> Result<Value, JsonRpcError> {
    let handler = inner.handlers.roots.read().clone();
    let roots = handler.list_roots().await;
    serde_json::to_value(serde_json::json!({ "roots": roots }))
        .map_err(|e| JsonRpcError::new(-32603, format!("failed to serialize roots: {e}")))
}

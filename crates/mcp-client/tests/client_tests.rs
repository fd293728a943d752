use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;

use mcp_client::{
    Client, ClientBuilder, ElicitationHandler, ElicitationOutcome, ElicitationRequest, Error,
    HandlerError,
};

mod common;
use common::MockTransport;

fn new_client() -> (MockTransport, ClientBuilder<MockTransport>) {
    let transport = MockTransport::new();
    (transport.clone(), ClientBuilder::new(transport))
}

async fn wait_until(mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}

/// Drive a bare `initialize()` handshake with an empty capability set, for tests that only
/// care about being past the handshake, not its content.
async fn initialize_quietly(client: &Client<MockTransport>, transport: &MockTransport) {
    let responder = transport.clone();
    let handle = tokio::spawn(async move {
        responder.respond_success(0, json!({ "capabilities": {} })).await;
    });
    client.initialize().await.unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn initialize_populates_server_state_and_sends_initialized() {
    let (transport, builder) = new_client();
    let client = builder.auto_initialize(false).build();
    client.connect().await.unwrap();

    let responder = transport.clone();
    let responded = tokio::spawn(async move {
        responder
            .respond_success(
                0,
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": { "resources": { "subscribe": true } },
                    "serverInfo": { "name": "demo-server", "version": "9.9.9" },
                    "instructions": "be nice",
                }),
            )
            .await;
    });

    let state = client.initialize().await.unwrap();
    responded.await.unwrap();

    assert!(client.is_initialized());
    assert_eq!(
        state.server_info.unwrap()["name"].as_str().unwrap(),
        "demo-server"
    );
    assert_eq!(state.instructions.as_deref(), Some("be nice"));
    assert!(client.server_state().supports_resource_subscriptions());

    let sent = transport.wait_for_sent(2).await;
    assert_eq!(sent[1]["method"], "notifications/initialized");
}

#[tokio::test]
async fn tool_call_round_trips_through_correlation_table() {
    let (transport, builder) = new_client();
    let client = builder.auto_initialize(false).build();
    client.connect().await.unwrap();
    initialize_quietly(&client, &transport).await;

    let responder = transport.clone();
    tokio::spawn(async move {
        responder
            .respond_success(2, json!({ "content": [{ "type": "text", "text": "42" }] }))
            .await;
    });

    let result = client.call_tool("answer", None).await.unwrap();
    assert_eq!(result["content"][0]["text"], "42");

    let sent = transport.sent();
    assert_eq!(sent[2]["method"], "tools/call");
    assert_eq!(sent[2]["params"]["name"], "answer");
}

#[tokio::test]
async fn request_times_out_and_clears_pending_table() {
    let (_transport, builder) = new_client();
    let client = builder
        .auto_initialize(false)
        .request_timeout(Some(Duration::from_millis(30)))
        .build();
    client.connect().await.unwrap();

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, Error::TransportTimeout(_)), "got {err:?}");
}

#[tokio::test]
async fn disconnect_cancels_in_flight_requests() {
    let (_transport, builder) = new_client();
    let client = builder.auto_initialize(false).build();
    client.connect().await.unwrap();

    let waiter = client.clone();
    let call = tokio::spawn(async move { waiter.ping().await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    client.disconnect().await.unwrap();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled(_)), "got {err:?}");
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let (_transport, builder) = new_client();
    let client = builder.auto_initialize(false).build();
    client.connect().await.unwrap();
    client.disconnect().await.unwrap();
    client.disconnect().await.unwrap();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn circuit_breaker_opens_after_repeated_transport_failures() {
    let (transport, builder) = new_client();
    let client = builder.auto_initialize(false).build();
    client.connect().await.unwrap();
    transport.set_fail_send(true);

    for _ in 0..5 {
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, Error::TransportNetwork(_)));
    }

    let before = transport.sent().len();
    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, Error::CircuitOpen), "got {err:?}");
    assert_eq!(
        transport.sent().len(),
        before,
        "circuit-open rejection must short-circuit before touching the transport"
    );
}

#[tokio::test]
async fn notifications_dispatch_to_generic_callback() {
    let (transport, builder) = new_client();
    let client = builder.auto_initialize(false).build();
    client.connect().await.unwrap();

    let seen = Arc::new(AtomicBool::new(false));
    let flag = seen.clone();
    client.on_notification(move |method, _| {
        if method == "notifications/message" {
            flag.store(true, Ordering::SeqCst);
        }
    });

    transport.push_inbound(json!({
        "jsonrpc": "2.0",
        "method": "notifications/message",
        "params": { "level": "info", "data": "hello" },
    }));

    wait_until(|| seen.load(Ordering::SeqCst)).await;
}

#[tokio::test]
async fn notifications_dispatch_to_recognized_per_method_callback() {
    let (transport, builder) = new_client();
    let client = builder.auto_initialize(false).build();
    client.connect().await.unwrap();

    let generic_hits = Arc::new(AtomicBool::new(false));
    let g = generic_hits.clone();
    client.on_notification(move |_, _| g.store(true, Ordering::SeqCst));

    let tools_changed = Arc::new(AtomicBool::new(false));
    let t = tools_changed.clone();
    client.on_tools_list_changed(move |_| t.store(true, Ordering::SeqCst));

    let prompts_changed = Arc::new(AtomicBool::new(false));
    let p = prompts_changed.clone();
    client.on_prompts_list_changed(move |_| p.store(true, Ordering::SeqCst));

    transport.push_inbound(json!({
        "jsonrpc": "2.0",
        "method": "notifications/tools/list_changed",
    }));

    wait_until(|| tools_changed.load(Ordering::SeqCst)).await;
    assert!(generic_hits.load(Ordering::SeqCst));
    assert!(
        !prompts_changed.load(Ordering::SeqCst),
        "unrelated per-method callback must not fire"
    );
}

#[derive(Debug)]
struct RecordingElicitationHandler {
    invoked: Arc<AtomicBool>,
}

#[async_trait]
impl ElicitationHandler for RecordingElicitationHandler {
    async fn handle_elicitation(
        &self,
        _request: ElicitationRequest,
    ) -> Result<ElicitationOutcome, HandlerError> {
        self.invoked.store(true, Ordering::SeqCst);
        Ok(ElicitationOutcome::Accept(json!({ "ok": true })))
    }
}

#[tokio::test]
async fn elicitation_declines_unsafe_url_without_invoking_handler() {
    let invoked = Arc::new(AtomicBool::new(false));
    let (transport, builder) = new_client();
    let client = builder
        .auto_initialize(false)
        .elicitation_handler(Arc::new(RecordingElicitationHandler {
            invoked: invoked.clone(),
        }))
        .build();
    client.connect().await.unwrap();

    transport.push_inbound(json!({
        "jsonrpc": "2.0",
        "id": 7001,
        "method": "elicitation/create",
        "params": { "message": "sign in", "mode": "url", "url": "http://localhost/admin" },
    }));

    let sent = transport.wait_for_sent(1).await;
    assert_eq!(sent[0]["id"], 7001);
    assert_eq!(sent[0]["result"]["action"], "decline");
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn sampling_without_handler_returns_jsonrpc_error() {
    let (transport, builder) = new_client();
    let client = builder.auto_initialize(false).build();
    client.connect().await.unwrap();

    transport.push_inbound(json!({
        "jsonrpc": "2.0",
        "id": 7002,
        "method": "sampling/createMessage",
        "params": { "messages": [] },
    }));

    let sent = transport.wait_for_sent(1).await;
    assert_eq!(sent[0]["id"], 7002);
    assert_eq!(sent[0]["error"]["code"], -32601);
}

#[tokio::test]
async fn resources_subscribe_is_gated_by_advertised_capability() {
    let (transport, builder) = new_client();
    let client = builder.auto_initialize(false).build();
    client.connect().await.unwrap();
    initialize_quietly(&client, &transport).await; // capabilities: {} — no subscribe support

    let before = transport.sent().len();
    let err = client.subscribe_resource("file:///tmp/x").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    assert_eq!(
        transport.sent().len(),
        before,
        "must not send a request the server never advertised support for"
    );
}

//! HTTP backend against a local mock server.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use walink::adapters::ReqwestHttpClient;
use walink::backend::{HttpBackend, LinkBackend, SendRequest};
use walink::domain::{ChannelId, Identity, LinkStatus};
use walink::error::{LinkError, NetworkError};
use walink::lifecycle::{LifecycleController, LifecyclePolicy};
use walink::sse::LinkEvent;

fn backend(server: &MockServer) -> HttpBackend<ReqwestHttpClient> {
    HttpBackend::new(ReqwestHttpClient::new(), server.uri())
}

#[tokio::test]
async fn test_connect_decodes_pairing_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/channels/ch1/connect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "qr_pending",
            "qrCode": "2@abc",
            "sessionId": "s-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = backend(&server)
        .connect(&ChannelId::from("ch1"))
        .await
        .unwrap();

    assert_eq!(response.status, LinkStatus::QrPending);
    assert_eq!(response.pairing_payload.as_deref(), Some("2@abc"));
    assert_eq!(response.session_id.as_deref(), Some("s-1"));
}

#[tokio::test]
async fn test_server_error_becomes_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/channels/ch1/status"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .status(&ChannelId::from("ch1"))
        .await
        .unwrap_err();

    match err {
        LinkError::Network(NetworkError::HttpStatus { status, message }) => {
            assert_eq!(status, 503);
            assert_eq!(message, "maintenance");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_send_posts_request_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/channels/ch1/send"))
        .and(body_partial_json(json!({
            "destination": "+15550199",
            "body": "ping",
            "clientRef": "ref-1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "messageId": "wamid.1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = SendRequest {
        destination: "+15550199".to_string(),
        body: "ping".to_string(),
        client_ref: "ref-1".to_string(),
    };
    let response = backend(&server)
        .send(&ChannelId::from("ch1"), &request)
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.message_id.as_deref(), Some("wamid.1"));
}

#[tokio::test]
async fn test_subscribe_parses_event_stream() {
    let server = MockServer::start().await;
    let body = concat!(
        ": keepalive\n\n",
        "event: pairing_issued\n",
        "data: {\"channelId\":\"ch1\",\"sessionId\":\"s-1\",\"payload\":{\"qr\":\"2@abc\"}}\n\n",
        "data: {\"type\":\"connected\",\"channelId\":\"ch1\",\"payload\":{\"number\":\"+100\",\"name\":\"Demo\"}}\n\n",
    );
    Mock::given(method("GET"))
        .and(path("/events"))
        .and(query_param("operator", "op-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .mount(&server)
        .await;

    let stream = backend(&server).subscribe("op-1").await.unwrap();
    let items: Vec<_> = stream.collect().await;

    assert_eq!(items.len(), 2);
    let first = items[0].as_ref().unwrap();
    assert_eq!(first.session_id.as_deref(), Some("s-1"));
    assert_eq!(
        first.event,
        LinkEvent::PairingIssued {
            payload: "2@abc".into()
        }
    );
    assert_eq!(
        items[1].as_ref().unwrap().event,
        LinkEvent::Connected {
            identity: Identity::new("+100", "Demo")
        }
    );
}

#[tokio::test]
async fn test_subscribe_rejected_by_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = backend(&server).subscribe("op-1").await;

    assert!(matches!(result, Err(LinkError::Stream(_))));
}

#[tokio::test]
async fn test_controller_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/channels/ch1/connect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "qr_pending",
            "pairingPayload": "2@abc"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/channels/ch1/disconnect"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "disconnected" })))
        .expect(1)
        .mount(&server)
        .await;

    let controller = LifecycleController::new(Arc::new(backend(&server)), LifecyclePolicy::default());
    let channel = controller.register("ch1").channel_id().clone();

    let state = controller.connect(&channel).await.unwrap();
    assert_eq!(state.status(), LinkStatus::QrPending);
    assert_eq!(state.pairing_payload(), Some("2@abc"));

    let state = controller.disconnect(&channel).await.unwrap();
    assert_eq!(state.status(), LinkStatus::Disconnected);
}

//! End-to-end relying-party flows against a mock OpenID provider.
//!
//! Each test starts a wiremock server acting as the provider: discovery,
//! a real Diffie-Hellman association and a signed positive assertion.

mod common;

use std::time::Duration;

use common::{MockOp, OpOptions, RETURN_URL, callback_url};
use openid2_rp::ax::{TYPE_EMAIL, TYPE_FULL_NAME, TYPE_GENDER, TYPE_NICKNAME};
use openid2_rp::message::IDENTIFIER_SELECT;
use openid2_rp::{
    AssociationConfig, AssociationError, AssociationType, DiscoveryError, Message,
    RelyingPartyConfig, RpError, ServiceKind, SessionType, VerificationError,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn full_ax() -> Vec<(&'static str, &'static str)> {
    vec![
        ("ns.ax", "http://openid.net/srv/ax/1.0"),
        ("ax.mode", "fetch_response"),
        ("ax.type.fullname", TYPE_FULL_NAME),
        ("ax.value.fullname", "Alice Liddell"),
        ("ax.type.nickname", TYPE_NICKNAME),
        ("ax.value.nickname", "alice"),
        ("ax.type.email", TYPE_EMAIL),
        ("ax.value.email", "alice@example.com"),
        ("ax.type.gender", TYPE_GENDER),
        ("ax.value.gender", "F"),
    ]
}

#[tokio::test]
async fn test_discovery_flow_builds_request() {
    let op = MockOp::start().await;
    let consumer = op.consumer();

    let (state, request) = consumer
        .start_discovery_flow("google", RETURN_URL)
        .await
        .unwrap();

    assert_eq!(request.return_to.as_str(), RETURN_URL);
    assert_eq!(request.endpoint.as_str(), op.endpoint());
    assert_eq!(request.param("mode"), Some("checkid_setup"));
    assert_eq!(request.param("claimed_id"), Some(IDENTIFIER_SELECT));
    assert_eq!(request.param("realm"), Some("https://app.example.com/"));
    assert_eq!(request.assoc_handle(), Some(state.assoc_handle.as_str()));

    assert_eq!(state.assoc_type, AssociationType::HmacSha256);
    assert_eq!(state.secret().len(), 32);
    assert!(state.endpoint.supports_ax());
    assert!(!state.is_expired());

    let redirect = request.redirect_url();
    assert!(redirect.as_str().starts_with(&op.endpoint()));
    assert!(redirect.query_pairs().any(|(k, v)| k == "openid.ax.required" && v == "email"));
}

#[tokio::test]
async fn test_complete_flow_with_attributes() {
    let op = MockOp::start().await;
    let consumer = op.consumer();
    let (mut state, request) = consumer
        .start_discovery_flow("google", RETURN_URL)
        .await
        .unwrap();

    let assertion = op.assertion(&state, &request, &op.claimed_id(), &full_ax());
    let callback = callback_url(&request, &assertion);
    let response = Message::from_url_query(&callback);

    let token = consumer
        .complete_flow(&mut state, &response, callback.as_str())
        .unwrap();

    assert_eq!(token.identifier(), op.claimed_id());
    assert_eq!(token.provider().as_str(), op.endpoint());
    assert_eq!(token.full_name(), Some("Alice Liddell"));
    assert_eq!(token.nickname(), Some("alice"));
    assert_eq!(token.email(), Some("alice@example.com"));
    assert_eq!(token.gender(), Some("F"));
}

#[tokio::test]
async fn test_email_only_response() {
    let op = MockOp::start().await;
    let consumer = op.consumer();
    let (mut state, request) = consumer
        .start_discovery_flow("google", RETURN_URL)
        .await
        .unwrap();

    let ax = [
        ("ns.ax", "http://openid.net/srv/ax/1.0"),
        ("ax.mode", "fetch_response"),
        ("ax.type.email", TYPE_EMAIL),
        ("ax.value.email", "alice@example.com"),
    ];
    let assertion = op.assertion(&state, &request, &op.claimed_id(), &ax);

    let token = consumer
        .complete_flow(&mut state, &assertion, RETURN_URL)
        .unwrap();
    assert_eq!(token.email(), Some("alice@example.com"));
    assert_eq!(token.full_name(), None);
    assert_eq!(token.nickname(), None);
    assert_eq!(token.gender(), None);
}

#[tokio::test]
async fn test_flipped_signature_bit_fails() {
    let op = MockOp::start().await;
    let consumer = op.consumer();
    let (mut state, request) = consumer
        .start_discovery_flow("google", RETURN_URL)
        .await
        .unwrap();

    let mut assertion = op.assertion(&state, &request, &op.claimed_id(), &[]);
    let mut sig = base64_decode(assertion.get("sig").unwrap());
    sig[0] ^= 0x80;
    assertion.set("sig", base64_encode(&sig));

    let err = consumer
        .complete_flow(&mut state, &assertion, RETURN_URL)
        .unwrap_err();
    assert!(matches!(
        err,
        RpError::VerificationFailed(VerificationError::InvalidSignature)
    ));
    assert_eq!(err.user_message(), "Authentication failed.");
}

#[tokio::test]
async fn test_replayed_response_fails() {
    let op = MockOp::start().await;
    let consumer = op.consumer();
    let (mut state, request) = consumer
        .start_discovery_flow("google", RETURN_URL)
        .await
        .unwrap();

    let assertion = op.assertion(&state, &request, &op.claimed_id(), &[]);
    assert!(consumer.complete_flow(&mut state, &assertion, RETURN_URL).is_ok());

    // The caller stores the state back; a serialized copy still remembers the nonce.
    let stored = serde_json::to_string(&state).unwrap();
    let mut restored = serde_json::from_str(&stored).unwrap();

    let err = consumer
        .complete_flow(&mut restored, &assertion, RETURN_URL)
        .unwrap_err();
    assert!(err.is_replay());
}

#[tokio::test]
async fn test_expired_association() {
    let op = MockOp::start_with(OpOptions {
        expires_in: 0,
        ..OpOptions::default()
    })
    .await;
    let consumer = op.consumer();
    let (mut state, request) = consumer
        .start_discovery_flow("google", RETURN_URL)
        .await
        .unwrap();

    let assertion = op.assertion(&state, &request, &op.claimed_id(), &[]);
    let err = consumer
        .complete_flow(&mut state, &assertion, RETURN_URL)
        .unwrap_err();
    assert!(matches!(err, RpError::AssociationExpired { .. }));
}

#[tokio::test]
async fn test_cancel_ignores_signature() {
    let op = MockOp::start().await;
    let consumer = op.consumer();
    let (mut state, _request) = consumer
        .start_discovery_flow("google", RETURN_URL)
        .await
        .unwrap();

    let cancel = Message::from_pairs([
        ("openid.ns", "http://specs.openid.net/auth/2.0"),
        ("openid.mode", "cancel"),
        ("openid.sig", "garbage"),
    ]);
    let err = consumer
        .complete_flow(&mut state, &cancel, RETURN_URL)
        .unwrap_err();

    assert!(matches!(&err, RpError::SetupFailed(f) if f.is_cancelled()));
    assert_eq!(err.reason_code(), "setup_failed");
}

#[tokio::test]
async fn test_unknown_service_not_configured() {
    let op = MockOp::start().await;
    let err = op
        .consumer()
        .start_discovery_flow("unknownservice", RETURN_URL)
        .await
        .unwrap_err();
    assert!(matches!(err, RpError::NotConfigured(_)));
}

#[tokio::test]
async fn test_sha1_association() {
    let op = MockOp::start().await;
    let config = RelyingPartyConfig::default().with_association(AssociationConfig {
        assoc_type: AssociationType::HmacSha1,
        session_type: SessionType::DhSha1,
        allow_cleartext_over_tls: false,
    });
    let consumer = op.consumer_with(config);

    let (mut state, request) = consumer
        .start_discovery_flow("google", RETURN_URL)
        .await
        .unwrap();
    assert_eq!(state.assoc_type, AssociationType::HmacSha1);
    assert_eq!(state.secret().len(), 20);

    let assertion = op.assertion(&state, &request, &op.claimed_id(), &[]);
    assert!(consumer.complete_flow(&mut state, &assertion, RETURN_URL).is_ok());
}

#[tokio::test]
async fn test_unsupported_association_type() {
    let op = MockOp::start_with(OpOptions {
        reject_association: true,
        ..OpOptions::default()
    })
    .await;

    let err = op
        .consumer()
        .start_discovery_flow("google", RETURN_URL)
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        RpError::AssociationFailed(e) if e.is_unsupported_type()
    ));
    assert!(err.is_external_error());
}

#[tokio::test]
async fn test_direct_flow_html_discovery() {
    let op = MockOp::start().await;
    let consumer = op.consumer();

    let (mut state, request) = consumer
        .start_direct_flow(&op.identity_page(), RETURN_URL)
        .await
        .unwrap();

    assert_eq!(state.endpoint.kind, ServiceKind::ClaimedIdentifier);
    assert_eq!(request.param("claimed_id"), Some(op.identity_page().as_str()));
    assert_eq!(request.param("identity"), Some(op.identity_page().as_str()));

    let assertion = op.assertion(&state, &request, &op.identity_page(), &[]);
    let token = consumer
        .complete_flow(&mut state, &assertion, RETURN_URL)
        .unwrap();
    assert_eq!(token.identifier(), op.identity_page());
}

#[tokio::test]
async fn test_direct_flow_rejects_foreign_claimed_id() {
    let op = MockOp::start().await;
    let consumer = op.consumer();

    let (mut state, request) = consumer
        .start_direct_flow(&op.identity_page(), RETURN_URL)
        .await
        .unwrap();

    let assertion = op.assertion(&state, &request, "https://mallory.example.com/", &[]);
    let err = consumer
        .complete_flow(&mut state, &assertion, RETURN_URL)
        .unwrap_err();
    assert!(matches!(
        err,
        RpError::VerificationFailed(VerificationError::ClaimedIdMismatch { .. })
    ));
}

#[tokio::test]
async fn test_op_identifier_cannot_assert_other_provider_identity() {
    let op = MockOp::start().await;
    let consumer = op.consumer();

    // The user typed the URL of a provider they run themselves.
    let (mut state, request) = consumer
        .start_direct_flow(&op.discovery_url(), RETURN_URL)
        .await
        .unwrap();
    assert!(state.endpoint.is_op_identifier());

    let victim = "https://www.google.com/accounts/o8/id?id=VICTIM";
    let assertion = op.assertion(&state, &request, victim, &[]);
    let err = consumer
        .complete_flow(&mut state, &assertion, RETURN_URL)
        .unwrap_err();
    assert!(matches!(
        err,
        RpError::VerificationFailed(VerificationError::ForeignIdentifier { .. })
    ));

    let own = op.assertion(&state, &request, &op.claimed_id(), &[]);
    let token = consumer.complete_flow(&mut state, &own, RETURN_URL).unwrap();
    assert_eq!(token.provider().as_str(), op.endpoint());
}

#[tokio::test]
async fn test_xrds_location_header() {
    let op = MockOp::start().await;
    Mock::given(method("GET"))
        .and(path("/bob"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("X-XRDS-Location", op.discovery_url().as_str())
                .set_body_raw("<html></html>", "text/html"),
        )
        .mount(&op.server)
        .await;

    let target = op
        .consumer()
        .resolver()
        .resolve_identifier(&format!("{}/bob", op.server.uri()))
        .unwrap();
    let endpoints = op.consumer().discover(&target).await.unwrap();

    assert_eq!(endpoints.len(), 1);
    assert_eq!(endpoints[0].endpoint.as_str(), op.endpoint());
    assert!(endpoints[0].is_op_identifier());
}

#[tokio::test]
async fn test_discovery_failures() {
    let op = MockOp::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&op.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                "<html><head><title>nothing</title></head></html>",
                "text/html",
            ),
        )
        .mount(&op.server)
        .await;

    let consumer = op.consumer();

    let err = consumer
        .start_direct_flow(&format!("{}/missing", op.server.uri()), RETURN_URL)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RpError::DiscoveryFailed(DiscoveryError::HttpError(404))
    ));

    let err = consumer
        .start_direct_flow(&format!("{}/plain", op.server.uri()), RETURN_URL)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RpError::DiscoveryFailed(DiscoveryError::NoEndpoints(_))
    ));
}

#[tokio::test]
async fn test_response_size_limit() {
    let op = MockOp::start().await;
    let consumer = op.consumer_with(RelyingPartyConfig::default().with_max_response_size(64));

    let err = consumer
        .start_discovery_flow("google", RETURN_URL)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RpError::DiscoveryFailed(DiscoveryError::ResponseTooLarge { max_size: 64 })
    ));
}

#[tokio::test]
async fn test_require_https_rejects_plain_http_provider() {
    let op = MockOp::start().await;
    let consumer = op.consumer_with(RelyingPartyConfig::default().with_require_https(true));

    let err = consumer
        .start_discovery_flow("google", RETURN_URL)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RpError::DiscoveryFailed(DiscoveryError::InvalidScheme(_))
    ));
}

#[tokio::test]
async fn test_association_timeout() {
    let op = MockOp::start().await;
    let slow = wiremock::MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&slow)
        .await;

    let consumer = op.consumer_with(
        RelyingPartyConfig::default().with_request_timeout(Duration::from_millis(200)),
    );
    let endpoint = openid2_rp::EndpointDescriptor::op_identifier(
        url::Url::parse(&format!("{}/auth", slow.uri())).unwrap(),
    );
    let engine = openid2_rp::AssociationEngine::new(
        reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap(),
        consumer.config().clone(),
    );

    let err = engine.associate(&[endpoint]).await.unwrap_err();
    assert!(matches!(err, AssociationError::Timeout(_)));
}

fn base64_decode(value: &str) -> Vec<u8> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(value).unwrap()
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

#[tokio::test]
async fn test_chunked_body_stops_at_size_limit() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // A chunked response with no Content-Length that never finishes.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await.unwrap();

        let chunk = "x".repeat(4096);
        let head = "HTTP/1.1 200 OK\r\n\
                    Content-Type: application/xrds+xml\r\n\
                    Transfer-Encoding: chunked\r\n\r\n";
        socket.write_all(head.as_bytes()).await.unwrap();
        socket
            .write_all(format!("{:x}\r\n{chunk}\r\n", chunk.len()).as_bytes())
            .await
            .unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let op = MockOp::start().await;
    let consumer = op.consumer_with(
        RelyingPartyConfig::default()
            .with_max_response_size(1024)
            .with_request_timeout(Duration::from_secs(10)),
    );

    let started = std::time::Instant::now();
    let err = consumer
        .start_direct_flow(&format!("http://{addr}/"), RETURN_URL)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RpError::DiscoveryFailed(DiscoveryError::ResponseTooLarge { max_size: 1024 })
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
    server.abort();
}

//! Refresh client tests against a local token endpoint
//!
//! Each test spins up an axum server on an ephemeral port that records the
//! requests it receives and answers with a canned status and body.

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use edr_core::token::claims;
use edr_core::{ClaimToken, Credential, KeyPair};
use edr_refresh::{
    EmbeddedSecureTokenService, HttpTokenRefreshClient, MemoryVault, RefreshError,
    SecureTokenService, StsError, TokenRefreshClient, TokenRepresentation, Vault,
};

const CONSUMER: &str = "did:web:consumer";
const PROVIDER: &str = "did:web:provider";

#[derive(Debug, Clone)]
struct RecordedRequest {
    path: String,
    query: HashMap<String, String>,
    authorization: Option<String>,
    content_type: Option<String>,
}

#[derive(Clone)]
struct MockEndpoint {
    status: StatusCode,
    body: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

async fn token_handler(
    State(endpoint): State<MockEndpoint>,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, String) {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    endpoint.requests.lock().push(RecordedRequest {
        path: uri.path().to_string(),
        query,
        authorization: header_value(header::AUTHORIZATION),
        content_type: header_value(header::CONTENT_TYPE),
    });
    (endpoint.status, endpoint.body.clone())
}

async fn spawn_endpoint(
    status: StatusCode,
    body: &str,
) -> (SocketAddr, Arc<Mutex<Vec<RecordedRequest>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = MockEndpoint {
        status,
        body: body.to_string(),
        requests: requests.clone(),
    };
    let app = Router::new()
        .route("/refresh/token", post(token_handler))
        .route("/token", post(token_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, requests)
}

async fn consumer_sts() -> (Arc<EmbeddedSecureTokenService>, KeyPair) {
    let key = KeyPair::generate("consumer-key-1");
    let vault = Arc::new(MemoryVault::new());
    vault
        .store_secret(CONSUMER, "consumer-private-key", key.to_base64())
        .await
        .unwrap();
    let sts = EmbeddedSecureTokenService::new(vault, CONSUMER, "consumer-private-key", "consumer-key-1");
    (Arc::new(sts), key)
}

fn credential(refresh_endpoint: String) -> Credential {
    Credential::default()
        .with_endpoint("http://provider/public")
        .with_authorization("old-access-token")
        .with_refresh_token("old-refresh-token")
        .with_refresh_endpoint(refresh_endpoint)
        .with_refresh_audience(PROVIDER)
        .with_expires_in(60)
        .with_created_at(1_000)
        .with_property("custom", serde_json::json!("kept"))
}

const SUCCESS_BODY: &str =
    r#"{"access_token":"new-access-token","refresh_token":"new-refresh-token","expires_in":300,"token_type":"Bearer"}"#;

#[tokio::test]
async fn test_refresh_round_trip_replaces_only_token_fields() {
    let (addr, requests) = spawn_endpoint(StatusCode::OK, SUCCESS_BODY).await;
    let (sts, _) = consumer_sts().await;
    let client = HttpTokenRefreshClient::new(CONSUMER, sts);

    let original = credential(format!("http://{}/refresh", addr));
    let renewed = client.refresh_token("tp-1", &original).await.unwrap();

    assert_eq!(renewed.authorization.as_deref(), Some("new-access-token"));
    assert_eq!(renewed.refresh_token.as_deref(), Some("new-refresh-token"));
    assert_eq!(renewed.expires_in, Some(300));

    let mut expected = original.clone();
    expected.authorization = renewed.authorization.clone();
    expected.refresh_token = renewed.refresh_token.clone();
    expected.expires_in = renewed.expires_in;
    assert_eq!(renewed, expected);
    assert_eq!(requests.lock().len(), 1);
}

#[tokio::test]
async fn test_request_shape_and_assertion_claims() {
    let (addr, requests) = spawn_endpoint(StatusCode::OK, SUCCESS_BODY).await;
    let (sts, key) = consumer_sts().await;
    let client = HttpTokenRefreshClient::new(CONSUMER, sts);

    client
        .refresh_token("tp-1", &credential(format!("http://{}/refresh", addr)))
        .await
        .unwrap();

    let recorded = requests.lock()[0].clone();
    assert_eq!(recorded.path, "/refresh/token");
    assert_eq!(recorded.query.get("grant_type").map(String::as_str), Some("refresh_token"));
    assert_eq!(
        recorded.query.get("refresh_token").map(String::as_str),
        Some("old-refresh-token")
    );
    assert_eq!(
        recorded.content_type.as_deref(),
        Some("application/x-www-form-urlencoded")
    );

    let assertion = recorded
        .authorization
        .as_deref()
        .and_then(|v| v.strip_prefix("Bearer "))
        .expect("bearer assertion");
    let verified = key.public_key().verify_jwt(assertion).unwrap();
    assert_eq!(verified.token_id(), Some("tp-1"));
    assert_eq!(verified.issuer(), Some(CONSUMER));
    assert_eq!(verified.subject(), Some(CONSUMER));
    assert_eq!(verified.audience(), Some(PROVIDER));
    assert_eq!(verified.string_claim(claims::TOKEN), Some("old-access-token"));
}

#[tokio::test]
async fn test_endpoint_already_ending_in_token_is_not_suffixed() {
    let (addr, requests) = spawn_endpoint(StatusCode::OK, SUCCESS_BODY).await;
    let (sts, _) = consumer_sts().await;
    let client = HttpTokenRefreshClient::new(CONSUMER, sts);

    client
        .refresh_token("tp-1", &credential(format!("http://{}/token", addr)))
        .await
        .unwrap();
    assert_eq!(requests.lock()[0].path, "/token");
}

#[tokio::test]
async fn test_each_missing_property_fails_by_name_without_request() {
    let (addr, requests) = spawn_endpoint(StatusCode::OK, SUCCESS_BODY).await;
    let (sts, _) = consumer_sts().await;
    let client = HttpTokenRefreshClient::new(CONSUMER, sts);
    let full = credential(format!("http://{}/refresh", addr));

    let cases: [(&str, fn(&mut Credential)); 4] = [
        ("authorization", |c| c.authorization = None),
        ("refreshToken", |c| c.refresh_token = None),
        ("refreshEndpoint", |c| c.refresh_endpoint = None),
        ("refreshAudience", |c| c.refresh_audience = None),
    ];

    for (name, strip) in cases {
        let mut cred = full.clone();
        strip(&mut cred);
        let err = client.refresh_token("tp-1", &cred).await.unwrap_err();
        assert_eq!(err, RefreshError::MissingProperty(name));
        assert!(err.to_string().contains(name));
        assert!(!err.is_transient());
    }
    assert!(requests.lock().is_empty());
}

struct FailingSts;

#[async_trait]
impl SecureTokenService for FailingSts {
    async fn create_token(
        &self,
        _claims: ClaimToken,
        _scope: Option<&str>,
    ) -> Result<TokenRepresentation, StsError> {
        Err(StsError::Signing("hsm offline".into()))
    }
}

#[tokio::test]
async fn test_assertion_failure_short_circuits() {
    let (addr, requests) = spawn_endpoint(StatusCode::OK, SUCCESS_BODY).await;
    let client = HttpTokenRefreshClient::new(CONSUMER, Arc::new(FailingSts));

    let err = client
        .refresh_token("tp-1", &credential(format!("http://{}/refresh", addr)))
        .await
        .unwrap_err();

    assert!(matches!(err, RefreshError::Assertion(ref m) if m.contains("hsm offline")));
    assert!(requests.lock().is_empty());
}

#[tokio::test]
async fn test_error_statuses_map_to_distinct_failures() {
    let (sts, _) = consumer_sts().await;
    let client = HttpTokenRefreshClient::new(CONSUMER, sts);

    let (addr, _) = spawn_endpoint(StatusCode::UNAUTHORIZED, "invalid assertion").await;
    let err = client
        .refresh_token("tp-1", &credential(format!("http://{}/refresh", addr)))
        .await
        .unwrap_err();
    assert_eq!(err, RefreshError::Unauthorized("invalid assertion".into()));

    let (addr, _) = spawn_endpoint(StatusCode::CONFLICT, "stale").await;
    let err = client
        .refresh_token("tp-1", &credential(format!("http://{}/refresh", addr)))
        .await
        .unwrap_err();
    assert_eq!(err, RefreshError::Conflict("stale".into()));

    let (addr, _) = spawn_endpoint(StatusCode::NOT_FOUND, "unknown token").await;
    let err = client
        .refresh_token("tp-1", &credential(format!("http://{}/refresh", addr)))
        .await
        .unwrap_err();
    assert_eq!(err, RefreshError::NotFound("unknown token".into()));

    let (addr, _) = spawn_endpoint(StatusCode::SERVICE_UNAVAILABLE, "maintenance").await;
    let err = client
        .refresh_token("tp-1", &credential(format!("http://{}/refresh", addr)))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RefreshError::Remote {
            status: 503,
            message: "maintenance".into()
        }
    );
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_empty_success_body_is_failure() {
    let (addr, _) = spawn_endpoint(StatusCode::OK, "").await;
    let (sts, _) = consumer_sts().await;
    let client = HttpTokenRefreshClient::new(CONSUMER, sts);

    let err = client
        .refresh_token("tp-1", &credential(format!("http://{}/refresh", addr)))
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_transport_failure_carries_error_text() {
    // Bind and drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (sts, _) = consumer_sts().await;
    let client = HttpTokenRefreshClient::new(CONSUMER, sts);

    let err = client
        .refresh_token("tp-1", &credential(format!("http://{}/refresh", addr)))
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::Transport(ref m) if !m.is_empty()));
    assert!(err.is_transient());
}

use crate::config::BrokerConfig;
use crate::create_app;
use crate::identity::{END_USER_CLAIM, SUBSCRIBER_CLAIM};
use crate::keys::PUBLIC_KEY_PATH;
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use jsonwebtoken::{Algorithm, EncodingKey};
use log::LevelFilter;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::{X509Builder, X509NameBuilder};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::OnceLock;
use tower::ServiceExt;
use wiremock::matchers;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

/// Signing key and matching self-signed certificate shared by all tests
pub struct TestKeys {
    pub encoding_key: EncodingKey,
    pub certificate_pem: String,
    pub certificate_der_base64: String,
}

/// Generating RSA keys is slow, so one pair is created per test binary
pub fn test_keys() -> &'static TestKeys {
    static KEYS: OnceLock<TestKeys> = OnceLock::new();
    KEYS.get_or_init(|| {
        let rsa = Rsa::generate(2048).expect("Failed to generate RSA key");
        let encoding_key = EncodingKey::from_rsa_pem(
            &rsa.private_key_to_pem()
                .expect("Failed to export private key"),
        )
        .expect("Failed to load signing key");
        let pkey = PKey::from_rsa(rsa).expect("Failed to wrap RSA key");

        let mut name = X509NameBuilder::new().expect("Failed to create X509 name");
        name.append_entry_by_text("CN", "auth-broker-test")
            .expect("Failed to set common name");
        let name = name.build();

        let mut builder = X509Builder::new().expect("Failed to create X509 builder");
        builder.set_version(2).expect("Failed to set version");
        let serial = BigNum::from_u32(1)
            .and_then(|serial| serial.to_asn1_integer())
            .expect("Failed to create serial number");
        builder
            .set_serial_number(&serial)
            .expect("Failed to set serial number");
        builder.set_subject_name(&name).expect("Failed to set subject");
        builder.set_issuer_name(&name).expect("Failed to set issuer");
        builder.set_pubkey(&pkey).expect("Failed to set public key");
        builder
            .set_not_before(&Asn1Time::days_from_now(0).expect("Invalid time"))
            .expect("Failed to set not before");
        builder
            .set_not_after(&Asn1Time::days_from_now(1).expect("Invalid time"))
            .expect("Failed to set not after");
        builder
            .sign(&pkey, MessageDigest::sha256())
            .expect("Failed to sign certificate");
        let certificate = builder.build();

        TestKeys {
            encoding_key,
            certificate_pem: String::from_utf8(
                certificate.to_pem().expect("Failed to encode PEM"),
            )
            .expect("PEM is not UTF-8"),
            certificate_der_base64: STANDARD
                .encode(certificate.to_der().expect("Failed to encode DER")),
        }
    })
}

/// Claims of a tenant user token expiring `expires_in_secs` from now
pub fn identity_claims(subscriber: &str, end_user: &str, expires_in_secs: i64) -> Value {
    json!({
        SUBSCRIBER_CLAIM: subscriber,
        END_USER_CLAIM: end_user,
        "exp": chrono::Utc::now().timestamp() + expires_in_secs
    })
}

/// Signs `claims` with the shared test key
pub fn sign_jwt(claims: &Value) -> String {
    sign_jwt_with("RS256", &test_keys().encoding_key, claims)
}

/// Signs `claims` with RSA-SHA256 under an arbitrary `alg` header value
pub fn sign_jwt_with(alg: &str, key: &EncodingKey, claims: &Value) -> String {
    let header = json!({"alg": alg, "typ": "JWT"});
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    );
    let signature = jsonwebtoken::crypto::sign(signing_input.as_bytes(), key, Algorithm::RS256)
        .expect("Failed to sign JWT");
    format!("{signing_input}.{signature}")
}

/// Test fixture for exercising the router against a mocked tenant.
///
/// The tenant `acme-corp` resolves to `tenant_mock`, which stands in for the
/// tenant's public key, token and client registry endpoints.
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// Mock server for the `acme-corp` tenant
    pub tenant_mock: MockServer,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let tenant_mock = MockServer::start().await;
        let config = BrokerConfig::for_test_with_mock(&tenant_mock);
        let state = AppState::for_testing(&config);
        let app = create_app(state);

        Self { app, tenant_mock }
    }

    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    /// Serves the test certificate as the tenant's public key
    pub async fn mount_public_key(&self, expected_calls: u64) {
        Mock::given(matchers::method("GET"))
            .and(matchers::path(PUBLIC_KEY_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(test_keys().certificate_pem.clone()),
            )
            .expect(expected_calls)
            .mount(&self.tenant_mock)
            .await;
    }

    pub async fn add_tenant_mock(
        &self,
        method: Method,
        path: impl Into<String>,
        response_body: impl Serialize,
        status_code: StatusCode,
        expected_calls: u64,
    ) {
        Mock::given(matchers::method(method.as_str()))
            .and(matchers::path(path.into()))
            .respond_with(ResponseTemplate::new(status_code.as_u16()).set_body_json(response_body))
            .expect(expected_calls)
            .mount(&self.tenant_mock)
            .await;
    }

    pub fn request_builder(
        &self,
        method: Method,
        uri: impl AsRef<str>,
        headers: &[(&str, &str)],
    ) -> http::request::Builder {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri.as_ref())
            .header("Content-Type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder
    }

    pub async fn get(&self, uri: impl AsRef<str>, headers: &[(&str, &str)]) -> TestResponse {
        let request = self
            .request_builder(Method::GET, uri, headers)
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    pub async fn send_json(
        &self,
        method: Method,
        uri: impl AsRef<str>,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let body = match body {
            Some(body) => Body::from(serde_json::to_vec(&body).expect("Failed to serialize body")),
            None => Body::empty(),
        };
        let request = self
            .request_builder(method, uri, headers)
            .body(body)
            .expect("Failed to build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| json!({}))
        } else {
            json!({})
        };

        TestResponse { status, json }
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub json: Value,
}

impl TestResponse {
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {} but got {} with body: {}",
            expected,
            self.status,
            serde_json::to_string_pretty(&self.json).unwrap_or_default()
        );
        self
    }

    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }
}

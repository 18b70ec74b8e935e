//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use lyve_bridge::config::{
    AuthConfig, BridgeConfig, CircuitBreakerConfig, HikCentralConfig, ResidentConfig,
};

pub const APP_KEY: &str = "27108141";
pub const APP_SECRET: &str = "c3U7KikkPGo2Yka6GMZ5";
pub const API_KEY: &str = "test-api-key";

/// One request as the mock appliance received it.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

/// Handle to a running mock HikCentral.
pub struct MockHikCentral {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockHikCentral {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

/// `{"code": "0", "data": ...}` with status 200.
pub fn success(data: Value) -> (u16, String) {
    (200, json!({ "code": "0", "msg": "success", "data": data }).to_string())
}

/// Gateway-level rejection: HTTP 200 with a non-zero code.
pub fn api_error(code: &str, msg: &str) -> (u16, String) {
    (200, json!({ "code": code, "msg": msg }).to_string())
}

type Responder = dyn Fn(&CapturedRequest) -> (u16, String) + Send + Sync;

#[derive(Clone)]
struct MockState {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    respond: Arc<Responder>,
    delay: Duration,
}

/// Start a programmable mock appliance on an ephemeral port.
///
/// Every request is captured before `respond` decides the reply.
pub async fn start_mock_hikcentral<F>(respond: F) -> MockHikCentral
where
    F: Fn(&CapturedRequest) -> (u16, String) + Send + Sync + 'static,
{
    start_mock_hikcentral_with_delay(Duration::ZERO, respond).await
}

/// Like [`start_mock_hikcentral`], but every reply is held back for `delay`.
pub async fn start_mock_hikcentral_with_delay<F>(delay: Duration, respond: F) -> MockHikCentral
where
    F: Fn(&CapturedRequest) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));

    let state = MockState {
        requests: requests.clone(),
        respond: Arc::new(respond),
        delay,
    };
    let app = Router::new().fallback(capture).with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockHikCentral { addr, requests }
}

async fn capture(
    State(state): State<MockState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = CapturedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect(),
        body: String::from_utf8_lossy(&body).to_string(),
    };
    state.requests.lock().unwrap().push(request.clone());

    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    let (status, body) = (state.respond)(&request);
    (
        StatusCode::from_u16(status).unwrap(),
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// Bridge config pointed at `mock`, with API key auth on.
pub fn test_config(mock: &MockHikCentral) -> BridgeConfig {
    BridgeConfig {
        hikcentral: HikCentralConfig {
            base_url: mock.base_url(),
            app_key: APP_KEY.to_string(),
            app_secret: APP_SECRET.to_string(),
            timeout_secs: 5,
            ..HikCentralConfig::default()
        },
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout_secs: 60,
            redis_url: None,
        },
        auth: AuthConfig {
            require_api_key: true,
            api_key: API_KEY.to_string(),
        },
        residents: ResidentConfig::default(),
        ..BridgeConfig::default()
    }
}

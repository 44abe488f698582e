#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use smartpark_api::{app, metrics, middleware::auth::issue_token, AppState};
use smartpark_core::{DocumentStore, MockPaymentGateway};
use smartpark_store::app_config::{
    AuthConfig, Config, PaynowConfig, PaynowCredentials, ServerConfig,
};
use smartpark_store::MemoryStore;
use std::sync::Arc;
use tower::ServiceExt;

pub const USD_KEY: &str = "usd-test-key";
pub const ZWL_KEY: &str = "zwl-test-key";

pub struct TestApp {
    pub state: AppState,
    pub gateway: Arc<MockPaymentGateway>,
    pub router: Router,
}

fn test_config() -> Config {
    Config {
        server: ServerConfig { port: 0 },
        store: Default::default(),
        redis: Default::default(),
        auth: AuthConfig {
            jwt_secret: "integration-secret".to_string(),
            jwt_expiration_seconds: 3600,
        },
        paynow: PaynowConfig {
            usd: PaynowCredentials { integration_id: "1001".to_string(), integration_key: USD_KEY.to_string() },
            zwl: PaynowCredentials { integration_id: "1002".to_string(), integration_key: ZWL_KEY.to_string() },
            ..Default::default()
        },
        reservations: Default::default(),
        payments: Default::default(),
        sweeper: Default::default(),
        billing: Default::default(),
        rate_limit: Default::default(),
    }
}

pub fn test_app() -> TestApp {
    metrics::register_metrics();
    let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
    let gateway = Arc::new(MockPaymentGateway::new());
    let state = AppState::new(&test_config(), store, gateway.clone(), None);
    let router = app(state.clone());
    TestApp { state, gateway, router }
}

impl TestApp {
    pub fn customer(&self, user_id: &str) -> String {
        issue_token(&self.state.auth, user_id, &format!("{}@example.com", user_id), "CUSTOMER").unwrap()
    }

    pub fn admin(&self) -> String {
        issue_token(&self.state.auth, "admin_1", "admin@example.com", "ADMIN").unwrap()
    }

    pub async fn call(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        self.send(request).await
    }

    pub async fn post_form(&self, uri: &str, form: String) -> StatusCode {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .unwrap();
        self.send(request).await.0
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    /// Lot with slots P1 and P2, created through the admin API
    pub async fn create_lot(&self, name: &str, hourly_rate: f64) -> String {
        let (status, lot) = self
            .call(
                Method::POST,
                "/v1/admin/lots",
                Some(&self.admin()),
                Some(serde_json::json!({
                    "name": name,
                    "address": "Samora Machel Ave",
                    "location": { "lat": -17.83, "lng": 31.05 },
                    "hourlyRate": hourly_rate,
                    "slots": [{ "id": "P1" }, { "id": "P2" }]
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{lot}");
        lot["id"].as_str().unwrap().to_string()
    }
}

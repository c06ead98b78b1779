#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use gatehouse::{
    ServerConfig,
    auth::{AuthService, IpSource},
    create_app,
    jwt::JwtConfig,
    store::{MemoryStore, Role, Stores},
};
use serde_json::Value;
use tower::ServiceExt;

pub const ACCESS_SECRET: &[u8] = b"integration-access-secret-0000000";
pub const REFRESH_SECRET: &[u8] = b"integration-refresh-secret-000000";

/// Cheap bcrypt cost so tests stay fast.
pub const TEST_BCRYPT_COST: u32 = 4;

pub struct TestApp {
    pub app: Router,
    pub config: ServerConfig,
    pub service: AuthService,
}

impl TestApp {
    pub fn jwt(&self) -> JwtConfig {
        self.config.jwt_config()
    }

    pub fn stores(&self) -> &Stores {
        &self.config.stores
    }

    /// Grant a role directly, the way `--grant-role` does at startup.
    pub async fn grant(&self, username: &str, role: Role) {
        self.service
            .grant_role(username, role)
            .await
            .expect("Failed to grant role");
    }
}

pub fn test_config(stores: Stores) -> ServerConfig {
    ServerConfig {
        stores,
        access_token_secret: ACCESS_SECRET.to_vec(),
        refresh_token_secret: REFRESH_SECRET.to_vec(),
        access_token_ttl: 100,
        refresh_token_ttl: 86400,
        secure_cookies: false,
        bcrypt_cost: TEST_BCRYPT_COST,
        store_timeout: Duration::from_secs(5),
        login_rate_per_minute: 10_000,
        ip_source: IpSource::Socket,
    }
}

pub fn build_app(config: ServerConfig) -> TestApp {
    let app = create_app(&config);
    let service = config.auth_service(Arc::new(config.jwt_config()));
    TestApp {
        app,
        config,
        service,
    }
}

/// App backed by a purely in-memory store.
pub fn create_test_app() -> TestApp {
    build_app(test_config(Stores::from_backend(MemoryStore::new())))
}

/// A response reduced to what the tests look at.
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn set_cookie(&self) -> Option<&str> {
        self.headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
    }

    pub fn access_token(&self) -> String {
        self.body["accessToken"]
            .as_str()
            .expect("Response has no accessToken")
            .to_string()
    }

    /// Value of the `jwt` cookie being set, if any.
    pub fn refresh_token(&self) -> Option<String> {
        let cookie = self.set_cookie()?;
        let first = cookie.split(';').next()?;
        let value = first.strip_prefix("jwt=")?;
        (!value.is_empty()).then(|| value.to_string())
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn credentials(user: &str, pwd: &str) -> Value {
    serde_json::json!({ "user": user, "pwd": pwd })
}

pub fn with_cookie(uri: &str, refresh_token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, format!("jwt={}", refresh_token))
        .body(Body::empty())
        .unwrap()
}

pub fn bearer(method: Method, uri: &str, access_token: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", access_token));

    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn register(app: &Router, user: &str, pwd: &str) -> TestResponse {
    send(
        app,
        json_request(Method::POST, "/register", credentials(user, pwd)),
    )
    .await
}

pub async fn login(app: &Router, user: &str, pwd: &str) -> TestResponse {
    send(
        app,
        json_request(Method::POST, "/auth", credentials(user, pwd)),
    )
    .await
}

/// Register, grant roles, log in. Returns (access_token, refresh_token).
pub async fn user_with_roles(test: &TestApp, user: &str, roles: &[Role]) -> (String, String) {
    let response = register(&test.app, user, "password123").await;
    assert_eq!(response.status, StatusCode::CREATED);

    for role in roles {
        test.grant(user, *role).await;
    }

    let response = login(&test.app, user, "password123").await;
    assert_eq!(response.status, StatusCode::OK);
    let refresh = response.refresh_token().expect("Login set no refresh cookie");
    (response.access_token(), refresh)
}

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use farmgate::{
    AuthClient, ClientConfig, HttpTransport, MemoryTokenStore, ReqwestTransport, TokenStore,
    TokenTriple,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn fresh(access: &str, refresh: &str) -> TokenTriple {
    TokenTriple::new(access, refresh, Utc::now() + chrono::Duration::hours(1))
}

pub fn expired(access: &str, refresh: &str) -> TokenTriple {
    TokenTriple::new(access, refresh, Utc::now() - chrono::Duration::seconds(1))
}

/// Body the login and refresh endpoints answer with.
pub fn token_body(access: &str, refresh: &str) -> serde_json::Value {
    serde_json::json!({
        "accessToken": access,
        "refreshToken": refresh,
        "expiresAt": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
    })
}

pub fn profile_body() -> serde_json::Value {
    serde_json::json!({
        "id": 42,
        "username": "ana",
        "firstName": "Ana",
        "lastName": "Silva",
        "email": "ana@farm.test",
        "phone": "555-0100",
        "role": "FARMER",
    })
}

/// Config pointing at `server` over plain http.
pub fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig {
        allow_http: true,
        refresh_timeout_ms: 5_000,
        ..ClientConfig::for_base_url(&server.uri())
    }
}

/// A client over the real reqwest transport and an in-memory store.
pub fn client_with(server: &MockServer, tokens: Option<TokenTriple>) -> (Arc<AuthClient>, Arc<dyn TokenStore>) {
    let config = config_for(server);
    let transport: Arc<dyn HttpTransport> =
        Arc::new(ReqwestTransport::new(&config.base_url, &config.headers, true).unwrap());
    let store: Arc<dyn TokenStore> = match tokens {
        Some(t) => Arc::new(MemoryTokenStore::with_tokens(t)),
        None => Arc::new(MemoryTokenStore::new()),
    };
    let client = AuthClient::new(&config, transport, Arc::clone(&store));
    (Arc::new(client), store)
}

/// Answer refreshes with a new triple after `delay`.
pub async fn mount_refresh(
    server: &MockServer,
    access: &str,
    refresh: &str,
    delay: Duration,
    expected: u64,
) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body(access, refresh))
                .set_delay(delay),
        )
        .expect(expected)
        .mount(server)
        .await;
}

/// Wait until `count` callers share the in-flight refresh.
pub async fn wait_for_waiters(client: &AuthClient, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while client.refresh_coordinator().waiter_count() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("callers never joined the refresh");
}

/// Write a farmgate.json for `base_url` that stores tokens under `dir`.
pub fn write_config(dir: &Path, base_url: &str) -> PathBuf {
    let config_path = dir.join("farmgate.json");
    let config = serde_json::json!({
        "baseUrl": base_url,
        "allowHttp": true,
        "tokenFile": dir.join("tokens.json"),
        "refreshTimeoutMs": 5000,
    });
    std::fs::write(&config_path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    config_path
}

pub fn write_tokens(dir: &Path, tokens: &TokenTriple) {
    std::fs::write(
        dir.join("tokens.json"),
        serde_json::to_string_pretty(tokens).unwrap(),
    )
    .unwrap();
}

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::session::token_path;

/// Connection and token-lifecycle settings for one backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    #[serde(default = "default_logout_path")]
    pub logout_path: String,
    #[serde(default = "default_profile_path")]
    pub profile_path: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Bound on a refresh exchange; every waiter fails once it elapses.
    #[serde(default = "default_refresh_timeout_ms")]
    pub refresh_timeout_ms: u64,
    #[serde(default)]
    pub allow_http: bool,
    /// Names the token directory under `~/.farmgate/`.
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_login_path() -> String {
    "/auth/login".into()
}

fn default_refresh_path() -> String {
    "/auth/refresh".into()
}

fn default_logout_path() -> String {
    "/auth/logout".into()
}

fn default_profile_path() -> String {
    "/auth/me".into()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_refresh_timeout_ms() -> u64 {
    10_000
}

fn default_profile() -> String {
    "default".into()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            login_path: default_login_path(),
            refresh_path: default_refresh_path(),
            logout_path: default_logout_path(),
            profile_path: default_profile_path(),
            request_timeout_ms: default_request_timeout_ms(),
            refresh_timeout_ms: default_refresh_timeout_ms(),
            allow_http: false,
            profile: default_profile(),
            token_file: None,
            headers: HashMap::new(),
        }
    }
}

impl ClientConfig {
    pub fn for_base_url(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.refresh_timeout_ms)
    }

    /// Reject settings the client cannot run with. An empty auth path
    /// would match every request path.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("missing baseUrl (set it in the config file or FARMGATE_BASE_URL)".into());
        }
        for (field, value) in [
            ("loginPath", &self.login_path),
            ("refreshPath", &self.refresh_path),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{field} must not be empty"));
            }
        }
        if self.request_timeout_ms == 0 {
            return Err("requestTimeoutMs must be greater than 0".into());
        }
        if self.refresh_timeout_ms == 0 {
            return Err("refreshTimeoutMs must be greater than 0".into());
        }
        Ok(())
    }

    /// Where tokens are persisted: `tokenFile` if set, else the profile's
    /// default location.
    pub fn token_file(&self) -> PathBuf {
        self.token_file
            .clone()
            .unwrap_or_else(|| token_path(&self.profile))
    }
}

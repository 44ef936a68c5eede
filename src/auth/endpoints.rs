use crate::config::ClientConfig;
use crate::error::FarmgateError;

/// The backend's base URL and the paths of its auth endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub base_url: String,
    pub login: String,
    pub refresh: String,
    pub logout: String,
    pub profile: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            login: "/auth/login".into(),
            refresh: "/auth/refresh".into(),
            logout: "/auth/logout".into(),
            profile: "/auth/me".into(),
        }
    }
}

impl Endpoints {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            login: config.login_path.clone(),
            refresh: config.refresh_path.clone(),
            logout: config.logout_path.clone(),
            profile: config.profile_path.clone(),
        }
    }

    /// Login and refresh requests never carry a bearer token and never
    /// trigger recovery. Matched by substring so query strings and
    /// prefixed base paths still count.
    pub fn is_auth_endpoint(&self, path: &str) -> bool {
        path.contains(&self.login) || path.contains(&self.refresh)
    }

    /// Relative paths always resolve against the backend. An absolute URL
    /// is only accepted on the backend's own origin, so the bearer token is
    /// never sent anywhere else.
    pub fn check_origin(&self, path: &str) -> Result<(), FarmgateError> {
        let lower = path.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return Ok(());
        }
        let target = reqwest::Url::parse(path)
            .map_err(|e| FarmgateError::InvalidArgument(format!("invalid URL '{path}': {e}")))?;
        let same_origin = reqwest::Url::parse(&self.base_url)
            .is_ok_and(|base| base.origin() == target.origin());
        if !same_origin {
            return Err(FarmgateError::InvalidArgument(format!(
                "'{path}' is outside the configured backend '{}'",
                self.base_url
            )));
        }
        Ok(())
    }
}

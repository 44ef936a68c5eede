pub mod output;
pub mod profile;
pub mod request;
pub mod session;

use crate::auth::AuthClient;
use crate::config::load_config;
use crate::error::FarmgateError;

/// Load configuration and build a client over the persisted session.
pub fn connect(config_path: Option<&str>) -> Result<AuthClient, FarmgateError> {
    let config = load_config(config_path)?;
    tracing::debug!(base_url = %config.base_url, token_file = %config.token_file().display(), "connecting");
    AuthClient::from_config(&config)
}

/// Commands that need a session fail fast instead of sending anonymously.
pub(crate) fn require_session(client: &AuthClient) -> Result<(), FarmgateError> {
    if client.current_tokens().is_none() {
        return Err(FarmgateError::NotLoggedIn);
    }
    Ok(())
}

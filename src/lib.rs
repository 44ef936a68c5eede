pub mod args;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod session;
pub mod transport;
pub mod transports;
pub mod types;

#[cfg(test)]
mod test_support;

pub use auth::{AuthClient, RefreshCoordinator, RequestAuthorizer, ResponseRecoveryHandler};
pub use config::{load_config, ClientConfig};
pub use error::{FarmgateError, RefreshFailure};
pub use session::{
    FileTokenStore, MemoryTokenStore, SessionEvent, SessionState, TokenStore, TokenTriple,
    UserProfile,
};
pub use transport::HttpTransport;
pub use transports::ReqwestTransport;
pub use types::{ApiRequest, ApiResponse};

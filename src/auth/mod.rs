pub mod authorizer;
pub mod client;
pub mod endpoints;
pub mod recovery;
pub mod refresh;

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::FarmgateError;

pub use authorizer::{decide, AuthDecision, RequestAuthorizer};
pub use client::AuthClient;
pub use endpoints::Endpoints;
pub use recovery::ResponseRecoveryHandler;
pub use refresh::{RefreshCoordinator, RefreshOutcome};

/// Await `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    request: &str,
    fut: F,
) -> Result<T, FarmgateError>
where
    F: Future<Output = Result<T, FarmgateError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(FarmgateError::Cancelled(request.to_string())),
        out = fut => out,
    }
}

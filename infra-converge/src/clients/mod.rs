//! Cloud provider capabilities.
//!
//! One trait per resource kind, implemented by a vendor SDK adapter:
//! - [`LoadBalancerApi`]: load balancers, backends, frontends, ACL rules
//! - [`GatewayApi`]: public gateways of the cluster's private network
//!
//! Every operation is zone-scoped. Calls go through [`call`], which races
//! them against the caller's cancellation token and names the failing
//! operation in the returned error.

pub mod gateway;
pub mod lb;

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, ProviderError, Result};

pub use gateway::GatewayApi;
pub use lb::{CreateBackendRequest, CreateFrontendRequest, CreateLoadBalancerRequest, LoadBalancerApi};

/// Run a provider call, aborting it when `cancel` fires.
pub async fn call<T, F>(cancel: &CancellationToken, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, ProviderError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!(operation, "Provider call cancelled");
            Err(Error::provider(operation, ProviderError::Cancelled))
        }
        result = fut => result.map_err(|e| Error::provider(operation, e)),
    }
}

/// Exactly one match, otherwise NotFound or TooManyFound.
pub fn find_one<T>(
    mut items: Vec<T>,
    kind: &'static str,
    selector: &str,
) -> std::result::Result<T, ProviderError> {
    match items.len() {
        0 => Err(ProviderError::not_found(kind, selector)),
        1 => Ok(items.remove(0)),
        count => Err(ProviderError::too_many_found(kind, selector, count)),
    }
}

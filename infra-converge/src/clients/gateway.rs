//! Public gateway capability.

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::Gateway;
use crate::zone::{Zone, ZonedProduct};

/// Public gateway API of the cloud provider.
#[async_trait]
pub trait GatewayApi: ZonedProduct + Send + Sync {
    /// Gateways of `zone` carrying every tag in `tags`.
    async fn list_gateways(
        &self,
        zone: &Zone,
        tags: &[String],
    ) -> std::result::Result<Vec<Gateway>, ProviderError>;
}

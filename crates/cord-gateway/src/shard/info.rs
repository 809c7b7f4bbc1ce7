//! Source of server shard guidance

use async_trait::async_trait;
use cord_common::SdkError;
use cord_rest::{GatewayBotInfo, RequestExecutor};
use tokio_util::sync::CancellationToken;

/// Fetches `GET /gateway/bot` style guidance
#[async_trait]
pub trait GatewayInfoSource: Send + Sync {
    async fn gateway_bot(&self, cancel: &CancellationToken) -> Result<GatewayBotInfo, SdkError>;
}

#[async_trait]
impl GatewayInfoSource for RequestExecutor {
    async fn gateway_bot(&self, cancel: &CancellationToken) -> Result<GatewayBotInfo, SdkError> {
        Self::gateway_bot(self, cancel).await
    }
}

//! Gateway connection guidance
//!
//! `GET /gateway/bot` tells a bot which gateway URL to use, how many shards
//! the server recommends, and how many session starts remain.

use crate::executor::RequestExecutor;
use cord_common::SdkResult;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub const GATEWAY_BOT_PATH: &str = "/gateway/bot";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayBotInfo {
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until the limit resets
    pub reset_after: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_max_concurrency() -> u32 {
    1
}

impl RequestExecutor {
    /// Fetch gateway guidance for the executor's bot token
    pub async fn gateway_bot(&self, cancel: &CancellationToken) -> SdkResult<GatewayBotInfo> {
        self.get_json(cancel, GATEWAY_BOT_PATH).await
    }
}

//! Gateway error types

use crate::transport::TransportError;
use cord_common::{ErrorList, SdkError, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("already connected")]
    AlreadyConnected,

    #[error("not connected")]
    NotConnected,

    #[error("no session to resume")]
    SessionRequired,

    #[error("bot token is required")]
    TokenRequired,

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid gateway payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("shard {id}: {source}")]
    Shard {
        id: u32,
        #[source]
        source: Box<GatewayError>,
    },

    #[error(transparent)]
    Shards(ErrorList<GatewayError>),

    #[error("rest error: {0}")]
    Rest(#[source] SdkError),
}

impl GatewayError {
    pub(crate) fn shard(id: u32, source: Self) -> Self {
        Self::Shard {
            id,
            source: Box::new(source),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Rest(err) => err.is_cancelled(),
            _ => false,
        }
    }
}

impl From<SdkError> for GatewayError {
    fn from(err: SdkError) -> Self {
        match err {
            SdkError::Cancelled => Self::Cancelled,
            SdkError::TokenRequired => Self::TokenRequired,
            SdkError::Validation(err) => Self::Validation(err),
            other => Self::Rest(other),
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

//! # cord-rest
//!
//! Generic REST request execution with client-side rate limiting.
//!
//! Every request goes through [`RequestExecutor::execute`], which consults the
//! configured strategy and bucket tracker before sending, records rate limit
//! headers from every response, and retries 429s, 5xx responses, and network
//! failures with exponential backoff.
//!
//! ## Example
//!
//! ```ignore
//! use cord_rest::RequestExecutor;
//!
//! let executor = RequestExecutor::builder(token)
//!     .settings(&config.client)
//!     .build()?;
//!
//! let info = executor.gateway_bot(&cancel).await?;
//! ```

mod executor;
mod gateway_info;
mod transport;

pub use executor::{RequestExecutor, RequestExecutorBuilder, USER_AGENT};
pub use gateway_info::{GatewayBotInfo, SessionStartLimit, GATEWAY_BOT_PATH};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

pub use http::{HeaderMap, Method, StatusCode};

//! Error types

mod error_list;
mod sdk_error;

pub use error_list::ErrorList;
pub use sdk_error::{ApiError, SdkError, SdkResult, ValidationError, MAX_RETRY_AFTER};

mod classifier;
mod config;
mod gateway;
mod oauth;
mod provider;

pub use classifier::{UpstreamErrorInfo, classify, parse_duration};
pub use config::ConfigError;
pub use gateway::{ApiErrorBody, ApiErrorObject, GatewayError, build_error_payload};
pub use oauth::OauthError;
pub use provider::ProviderError;

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

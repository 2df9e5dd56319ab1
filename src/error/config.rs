use thiserror::Error as ThisError;

/// Failures encountered while loading or resolving configuration.
#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("missing required config value: {0}")]
    Missing(String),

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("unknown vendor/route: {0}")]
    UnknownRoute(String),
}

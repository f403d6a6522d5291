use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("required resource is missing: {key}")]
    MissingResource { key: String },
}

impl ConfigError {
    pub(crate) fn missing(key: impl ToString) -> Self {
        ConfigError::MissingResource {
            key: key.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid pacer config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: u64 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("executor has shut down")]
    Shutdown,
    #[error("blocking call from the executor's own thread")]
    Reentrant,
    #[error("failed to spawn executor thread: {0}")]
    Spawn(String),
}

use thiserror::Error;

/// Error kinds the API and the request manager must tell apart. Everything
/// else travels as `anyhow::Error`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An active request already exists for this (media, user).
    #[error("request already processed")]
    AlreadyProcessed,

    /// The media was flagged non-keepable by an operator.
    #[error("media can no longer be kept")]
    Unkeepable,

    #[error("{0} not found")]
    NotFound(&'static str),
}

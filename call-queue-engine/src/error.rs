use thiserror::Error;

/// Engine-wide error type.
///
/// Variants are grouped by the taxonomy the supervisor and dispatcher reason
/// about: transient errors are retried, permanent ones terminate a call,
/// contract violations are rejected at the ingress boundary, and internal
/// errors are contained to a single job.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A call to an external collaborator (provider, agent, sink) failed in a
    /// way that is expected to succeed on retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// A call to an external collaborator failed in a way retrying cannot fix.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// The caller violated a contract (duplicate id, write to a terminal job).
    #[error("contract violation: {0}")]
    Contract(String),

    /// An invariant was violated inside the engine itself.
    #[error("internal error: {0}")]
    Internal(String),

    /// The state store rejected or failed to perform a mutation.
    #[error("store error: {0}")]
    Store(String),

    /// Database errors bubbled up from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration errors at startup.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Configuration is missing or inconsistent.
    #[error("config error: {0}")]
    Config(String),

    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl EngineError {
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent<S: Into<String>>(msg: S) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn contract<S: Into<String>>(msg: S) -> Self {
        Self::Contract(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Whether a retry is worth attempting for this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Database(_))
    }
}

/// Result type used throughout the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

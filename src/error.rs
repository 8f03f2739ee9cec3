use thiserror::Error;

/// Top-level engine error. Most internal operations use `anyhow`; this enum
/// exists so that callers can distinguish the one fatal condition (no
/// session) from everything that degrades to a toast.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No authenticated session exists. The front end must redirect to the
    /// login page; nothing else in the engine is recoverable from this.
    #[error("not authenticated; login required")]
    AuthRequired,

    #[error("api request failed: {0}")]
    Api(#[from] reqwest::Error),

    #[error("realtime channel error: {0}")]
    Realtime(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

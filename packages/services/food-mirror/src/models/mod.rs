pub mod product;
pub mod sync;

pub use product::*;
pub use sync::*;

#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("TLS trust error: {0}")]
    Trust(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote catalog returned status {status}: {body_preview}")]
    Remote { status: u16, body_preview: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MirrorError {
    /// Errors that end a run instead of being counted against a page or batch.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MirrorError::Configuration(_) | MirrorError::Trust(_) | MirrorError::Migration(_)
        )
    }

    /// Errors worth another attempt at the same page.
    pub fn is_retryable(&self) -> bool {
        match self {
            MirrorError::Transport(_) | MirrorError::Decode(_) => true,
            MirrorError::Remote { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, MirrorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(MirrorError::Trust("bad chain".into()).is_fatal());
        assert!(MirrorError::Configuration("both".into()).is_fatal());
        assert!(!MirrorError::Transport("reset".into()).is_fatal());

        assert!(MirrorError::Transport("timeout".into()).is_retryable());
        assert!(MirrorError::Decode("eof".into()).is_retryable());
        assert!(MirrorError::Remote { status: 503, body_preview: String::new() }.is_retryable());
        assert!(MirrorError::Remote { status: 429, body_preview: String::new() }.is_retryable());
        assert!(!MirrorError::Remote { status: 403, body_preview: String::new() }.is_retryable());
        assert!(!MirrorError::Trust("x".into()).is_retryable());
    }
}

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Two providers claimed the same source id. This is a wiring bug,
    /// not a runtime condition, so the cycle fails instead of guessing.
    #[error("duplicate source_id discovered: {0}")]
    DuplicateSource(String),

    #[error("failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Transient failure reported by the external summarizer.
    #[error("summarizer error: {0}")]
    Summarizer(String),
}

impl IndexError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IndexError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

pub type IndexResult<T> = std::result::Result<T, IndexError>;

//! Central error types for the engine (thiserror-based).

use thiserror::Error;

/// Media open/decode errors.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Media file not found: {path}")]
    NotFound { path: String },

    #[error("Decode failed in {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("Seek to {target}s failed in {path}: {reason}")]
    Seek {
        path: String,
        target: f64,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Display driver errors.
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Image import failed: {0}")]
    Import(String),

    #[error("Out of GPU memory importing {width}x{height} buffer")]
    OutOfMemory { width: u32, height: u32 },

    #[error("Atomic commit rejected on connector {connector_id}: {reason}")]
    CommitRejected { connector_id: u32, reason: String },

    #[error("Connector {connector_id} lost")]
    ConnectorLost { connector_id: u32 },

    #[error("Unsupported buffer: {0}")]
    UnsupportedBuffer(String),
}

impl DisplayError {
    /// Transient errors are retried with backoff rather than freezing the
    /// component that hit them.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}

/// Terminal error frozen into a loader's published content.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("decode: {0}")]
    Media(#[from] MediaError),

    #[error("import: {0}")]
    Import(#[from] DisplayError),
}

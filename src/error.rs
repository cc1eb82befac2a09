use thiserror::Error;

/// Typed outcomes for the drop/log taxonomy in the design notes: every
/// silently-dropped condition gets its own variant instead of a bare
/// `Err(_) => {}`, so call sites and tests can assert on what was dropped.
#[derive(Debug, Error)]
pub enum RendezError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("envelope decode failed: {0}")]
    EnvelopeDecode(String),

    #[error("agent handoff write failed: {0}")]
    HandoffIo(String),
}

pub type RendezResult<T> = std::result::Result<T, RendezError>;

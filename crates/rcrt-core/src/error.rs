//! Error taxonomy shared by the substrate API and its consumers (§7).

use thiserror::Error;

/// The stable machine-readable error taxonomy from the substrate design.
///
/// Synchronous callers (the HTTP API) map this directly onto status codes;
/// asynchronous consumers (entity worker, edge builder, assembler) log it and
/// move on -- their work is derived and rebuildable.
#[derive(Debug, Error)]
pub enum RcrtError {
    #[error("bad request: {0}")]
    BadRequest(String),

    /// RLS/ACL denial and missing-row are indistinguishable on purpose, so a
    /// cross-tenant probe can't tell the difference between "doesn't exist"
    /// and "exists but you can't see it".
    #[error("not found")]
    NotFound,

    #[error("version conflict")]
    VersionConflict,

    #[error("If-Match header required")]
    PreconditionRequired,

    #[error("idempotency key reuse with a different payload")]
    IdempotencyConflict,

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RcrtError>;

/// Shared error type used across all Engram crates.
///
/// Variants are grouped by the taxonomy the HTTP layer maps onto status
/// codes: auth (401/403), policy (403), validation (400/422), not-found
/// (404), transient (503) and fatal (500). Conflict outcomes that are part
/// of normal control flow (auto-stash, version retry) are *not* errors —
/// they are modeled as explicit result variants at the call sites.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    // ── Auth ─────────────────────────────────────────────────────────
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid session token")]
    InvalidToken,

    #[error("session expired")]
    SessionExpired,

    #[error("admin key required")]
    AdminKeyRequired,

    // ── Policy ───────────────────────────────────────────────────────
    #[error("capability denied: {0}")]
    CapabilityDenied(String),

    #[error("confidentiality scope denied: {0}")]
    ScopeDenied(String),

    #[error("namespace denied: {0}")]
    NamespaceDenied(String),

    #[error("no agent policy configured for {0}")]
    NoPolicyConfigured(String),

    #[error("write quota exceeded: {0}")]
    QuotaExceeded(String),

    // ── Validation ───────────────────────────────────────────────────
    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid column: {0}")]
    InvalidColumn(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    // ── Not found ────────────────────────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    // ── Transient ────────────────────────────────────────────────────
    #[error("vector index unavailable: {0}")]
    VectorIndexUnavailable(String),

    #[error("LLM timeout: {0}")]
    LlmTimeout(String),

    #[error("HTTP: {0}")]
    Http(String),

    // ── Fatal ────────────────────────────────────────────────────────
    #[error("integrity error: {0}")]
    IntegrityError(String),

    #[error("migration failed: {0}")]
    MigrationFailed(String),

    // ── Plumbing ─────────────────────────────────────────────────────
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Coarse classification used by the HTTP layer for status mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Auth,
    Policy,
    Validation,
    NotFound,
    Transient,
    Fatal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Unauthorized(_)
            | Error::InvalidToken
            | Error::SessionExpired
            | Error::AdminKeyRequired => ErrorKind::Auth,
            Error::CapabilityDenied(_)
            | Error::ScopeDenied(_)
            | Error::NamespaceDenied(_)
            | Error::NoPolicyConfigured(_)
            | Error::QuotaExceeded(_) => ErrorKind::Policy,
            Error::InvalidStatus(_) | Error::InvalidColumn(_) | Error::BadRequest(_) => {
                ErrorKind::Validation
            }
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::VectorIndexUnavailable(_) | Error::LlmTimeout(_) | Error::Http(_) => {
                ErrorKind::Transient
            }
            _ => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

//! Caller-visible resolution failures.
//!
//! Every strategy swallows its own upstream failures, so these only surface
//! from the façade: bad input before any resolver runs, an empty result after
//! all strategies, or the YouTube extraction path re-raising.

/// Coarse failure class, mirrored by an HTTP-like status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadInput,
    NotFound,
    UpstreamUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadInput => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::UpstreamUnavailable => 503,
            ErrorKind::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::BadInput => "bad_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::UpstreamUnavailable => "upstream_unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Missing url parameter")]
    MissingUrl,

    #[error("Unsupported URL. We currently support TikTok, YouTube, and X (Twitter)")]
    UnsupportedUrl,

    #[error("Invalid {provider} URL")]
    InvalidUrl { provider: &'static str },

    #[error("No downloadable sources found for this {provider} link. The post may be private, region-restricted, or has no video.")]
    NoSourcesFound { provider: &'static str },

    #[error("No downloadable formats available for this video")]
    NoDownloadableFormat,

    #[error("Service temporarily unavailable. Please try again later.")]
    UpstreamUnavailable { reason: String },

    #[error("{0}")]
    Internal(String),
}

/// Phrases upstream extractors use when a platform demands sign-in or a bot
/// check.
const UNAVAILABLE_MARKERS: &[&str] = &["Sign in", "bot"];

impl ResolveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::MissingUrl
            | ResolveError::UnsupportedUrl
            | ResolveError::InvalidUrl { .. } => ErrorKind::BadInput,
            ResolveError::NoSourcesFound { .. } | ResolveError::NoDownloadableFormat => {
                ErrorKind::NotFound
            }
            ResolveError::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            ResolveError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.kind().status_code()
    }

    /// Classifies an extraction failure by its message: sign-in walls and
    /// bot checks are transient, everything else is internal.
    pub fn from_extraction(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        if UNAVAILABLE_MARKERS.iter().any(|m| message.contains(m)) {
            ResolveError::UpstreamUnavailable { reason: message }
        } else {
            ResolveError::Internal(message)
        }
    }
}

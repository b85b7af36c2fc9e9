//! Crate-wide error types.
//!
//! Mirrors the enum-over-`Box<dyn Error>` convention used elsewhere in this
//! codebase for hot-path error types: no heap allocation or fat pointers on
//! every error return, and each variant carries exactly the context callers
//! need to decide whether to retry, fall back, or surface the failure.

use std::fmt;

/// Result type alias for the aggregation core.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors surfaced by the public `Aggregator` contract (see `aggregator.rs`).
#[derive(Debug, Clone)]
pub enum CoreError {
    /// Fewer healthy providers than `min_providers` were registered.
    InsufficientProviders { healthy: usize, required: usize },
    /// Fan-out completed but fewer providers than `min_providers` responded in time.
    InsufficientResponses { responses: usize, required: usize },
    /// The configured combination strategy could not produce a price (e.g. zero total weight).
    AggregationError(String),
    /// The combined result failed a post-hoc quality check.
    QualityRejected(QualityRejection),
    /// A single provider call failed; absorbed by the Aggregator and never surfaced on its own,
    /// but returned to callers of adapter-facing APIs directly (e.g. `ProviderAdapter::get_price`).
    Provider(crate::providers::ProviderError),
    /// The caller's deadline elapsed before the pipeline finished.
    DeadlineExceeded,
    /// The operation was cancelled before it completed.
    Cancelled,
    /// Malformed input: empty batch, invalid symbol, unrecognized option.
    BadRequest(String),
}

/// Reason an otherwise-valid aggregated price was rejected by validation.
#[derive(Debug, Clone)]
pub enum QualityRejection {
    LowConfidence { confidence: f64, min_confidence: f64 },
    ExcessiveDeviation { deviation_pct: f64, max_pct: f64 },
    NoQuorum { filtered: usize, survivors: usize },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientProviders { healthy, required } => write!(
                f,
                "insufficient healthy providers: have {healthy}, need {required}"
            ),
            Self::InsufficientResponses { responses, required } => write!(
                f,
                "insufficient fan-out responses: got {responses}, need {required}"
            ),
            Self::AggregationError(msg) => write!(f, "aggregation error: {msg}"),
            Self::QualityRejected(reason) => write!(f, "quality rejected: {reason}"),
            Self::Provider(e) => write!(f, "provider error: {e}"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
        }
    }
}

impl fmt::Display for QualityRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LowConfidence { confidence, min_confidence } => write!(
                f,
                "confidence {confidence:.4} below floor {min_confidence:.4}"
            ),
            Self::ExcessiveDeviation { deviation_pct, max_pct } => write!(
                f,
                "deviation {deviation_pct:.2}% exceeds ceiling {max_pct:.2}%"
            ),
            Self::NoQuorum { filtered, survivors } => write!(
                f,
                "quorum not met: {filtered} of {survivors} survivors remain after filtering"
            ),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Provider(e) => Some(e),
            _ => None,
        }
    }
}

impl From<crate::providers::ProviderError> for CoreError {
    fn from(e: crate::providers::ProviderError) -> Self {
        Self::Provider(e)
    }
}

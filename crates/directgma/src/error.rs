//! Error taxonomy for discovery, setup, transfer and validation failures.
//!
//! Every variant that wraps an [`ApiError`] keeps the name of the device API
//! call that failed together with its raw status code, so the first failure
//! of a run can be reported verbatim.

use crate::api::ApiError;

/// Failures while locating a vendor platform with two capable devices.
///
/// These abort the run before any context, queue or buffer exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no platform from vendor '{vendor}' found ({scanned} platform(s) scanned)")]
    NoCapablePlatform { vendor: String, scanned: usize },
    #[error("two GPUs required on platform '{vendor}', found {found}")]
    InsufficientDevices { vendor: String, found: usize },
    #[error("{name} is not available on {target}")]
    MissingExtension { target: String, name: String },
    #[error("device query failed: {0}")]
    Query(ApiError),
}

/// Failures while building a session or its buffer triple.
///
/// Handles created before the failure are released when the partially built
/// session or triple is dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    #[error("context creation failed: {0}")]
    ContextCreationFailed(ApiError),
    #[error("command queue creation failed: {0}")]
    QueueCreationFailed(ApiError),
    #[error("buffer allocation ({size} bytes) failed: {source}")]
    BufferAllocFailed { size: usize, source: ApiError },
    #[error("making buffer resident failed: {0}")]
    ResidencyPinFailed(ApiError),
    #[error("external physical buffer creation failed: {0}")]
    AliasCreationFailed(ApiError),
    #[error("uploading the seed pattern failed: {0}")]
    SeedUploadFailed(ApiError),
    #[error("zero-copy transfers need the residency extension, which was not resolved")]
    ResidencyUnavailable,
}

/// Failures of copy, map, unmap, read or write calls and of timing queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("warm-up transfer failed: {0}")]
    WarmupFailed(ApiError),
    #[error("transfer failed at iteration {iteration}: {source}")]
    TransferFailed { iteration: u32, source: ApiError },
    #[error("queue finish failed: {0}")]
    FinishFailed(ApiError),
    #[error("profiling query failed: {0}")]
    ProfilingFailed(ApiError),
    #[error("destination read-back failed: {0}")]
    ReadbackFailed(ApiError),
}

/// Failures of the post-transfer correctness and timing checks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error(
        "memory copy failed: word {word} (byte offset {offset}) expected {expected:#010x}, \
         read back {actual:#010x} ({mismatched_words} word(s) differ)"
    )]
    DataMismatch { word: usize, offset: usize, expected: u32, actual: u32, mismatched_words: usize },
    #[error("measured elapsed time must be positive, got {seconds} s")]
    NonPositiveElapsed { seconds: f64 },
}

/// Umbrella error for one trial or a whole run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DirectGmaError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl DirectGmaError {
    /// The API call and status code behind this error, when there is one.
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Discovery(DiscoveryError::Query(e)) => Some(e),
            Self::Discovery(_) => None,
            Self::Setup(e) => match e {
                SetupError::ContextCreationFailed(e)
                | SetupError::QueueCreationFailed(e)
                | SetupError::ResidencyPinFailed(e)
                | SetupError::AliasCreationFailed(e)
                | SetupError::SeedUploadFailed(e) => Some(e),
                SetupError::BufferAllocFailed { source, .. } => Some(source),
                SetupError::ResidencyUnavailable => None,
            },
            Self::Transfer(e) => match e {
                TransferError::WarmupFailed(e)
                | TransferError::FinishFailed(e)
                | TransferError::ProfilingFailed(e)
                | TransferError::ReadbackFailed(e) => Some(e),
                TransferError::TransferFailed { source, .. } => Some(source),
            },
            Self::Validation(_) => None,
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, DirectGmaError>;

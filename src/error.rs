use crate::quota::QuotaState;
use blsttc::error::FromBytesError;
use std::array::TryFromSliceError;
use std::fmt;
use thiserror::Error;

/// Specialisation of `std::Result`.
pub type Result<T, E = BlindIdError> = std::result::Result<T, E>;
pub type Error = BlindIdError;

/// The top-up sub-step that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopUpStep {
    /// Reading the allowance granted to the payments contract.
    ReadAllowance,
    /// Submitting or confirming the allowance increase.
    IncreaseAllowance,
    /// Submitting or confirming the quota payment.
    Payment,
    /// Re-checking quota after a confirmed payment.
    QuotaRefresh,
}

impl fmt::Display for TopUpStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ReadAllowance => "read_allowance",
            Self::IncreaseAllowance => "increase_allowance",
            Self::Payment => "payment",
            Self::QuotaRefresh => "quota_refresh",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
/// error variants.
pub enum BlindIdError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication rejected by identifier service (status {status})")]
    Authentication { status: u16 },

    #[error("network error calling {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("identifier service rate limited the request")]
    RateLimited,

    #[error("identifier service rejected the request: {0}")]
    ServiceRejected(String),

    #[error("signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("finalize called before blind in this session")]
    Sequence,

    #[error("quota top-up refused in state {state:?}; check quota first")]
    TopUpRefused { state: QuotaState },

    #[error("quota top-up failed at {step}: {reason}")]
    TopUpFailed { step: TopUpStep, reason: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("deserialization from bytes failed")]
    BlsttcFromBytes(#[from] FromBytesError),

    #[error("deserialization from bytes failed")]
    InvalidBytes(#[from] TryFromSliceError),
}

impl BlindIdError {
    pub(crate) fn top_up(step: TopUpStep, reason: impl fmt::Display) -> Self {
        Self::TopUpFailed {
            step,
            reason: reason.to_string(),
        }
    }
}

impl From<base64::DecodeError> for BlindIdError {
    fn from(e: base64::DecodeError) -> Self {
        Self::InvalidInput(format!("invalid base64: {}", e))
    }
}

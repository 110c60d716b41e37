//! Closed error taxonomy shared by every adapter, strategy and lifecycle module.
//!
//! Mirrors the recovery table in the spec's error-handling design: each
//! variant maps to exactly one row, so callers can match on `EngineError`
//! instead of re-deriving policy from a string.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("transient network error: {0}")]
    Network(String),

    #[error("rate limited")]
    RateLimited,

    #[error("invalid nonce: {0}")]
    InvalidNonce(String),

    #[error("post-only order would cross the book")]
    PostOnlyReject,

    #[error("reduce-only order rejected on margin grounds")]
    ReduceOnlyMarginReject,

    #[error("order book sequence gap detected")]
    SequenceGap,

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("stop price breached")]
    StopPriceBreached,

    #[error("excessive position: |position| exceeds quantity * max_orders")]
    ExcessivePosition,

    #[error("unknown ticker: {0}")]
    UnknownTicker(String),

    #[error("order not found: {0}")]
    NotFound(String),

    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),
}

impl EngineError {
    /// True for errors the nonce/signer layer should retry up to 3x at 0.5s, per spec §7.
    pub fn is_retryable_nonce_error(&self) -> bool {
        matches!(self, EngineError::InvalidNonce(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

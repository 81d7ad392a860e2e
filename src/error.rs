// Error taxonomy shared by the walker, server and finalizer

use thiserror::Error;

/// Core error kinds, per the submission/finalization contract.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("bad request")]
    BadRequest,

    #[error("invalid result data format")]
    InvalidResultFormat,

    #[error("bad hash length")]
    BadHashLength,

    #[error("bad username and/or usertoken")]
    AuthFailure,

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("dp does not satisfy the configured dp_bits predicate")]
    ConfigMismatch,

    #[error("distinguished-point buffer overflowed this dispatch")]
    DpOverflow,

    #[error("the two starts share a chain; no collision witness exists")]
    NoCollision,
}

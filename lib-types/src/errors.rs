//! Data-model level errors.

use thiserror::Error;

/// Errors raised while constructing or parsing primitive values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("invalid decimal amount: {value:?}")]
    InvalidAmount { value: String },

    #[error("invalid public key: {public_key:?}")]
    InvalidPublicKey { public_key: String },

    #[error("invalid address: {address:?}")]
    InvalidAddress { address: String },
}

//! Cryptography boundary for the DPoS chain core.
//!
//! Canonical hashing plus the [`CryptoClient`] trait through which the core
//! signs and verifies blocks, block co-signatures, and transactions under a
//! stateful key-evolving scheme.

pub mod client;
pub mod dev;
pub mod hashing;

pub use client::{CryptoClient, CryptoError, CryptoResult, KeyType};
pub use dev::{sign_message, DevConnectOptions, DevCryptoClient};
pub use hashing::{block_id, sha256_hex, transaction_id, CONSENSUS_HASH_FUNCTION};

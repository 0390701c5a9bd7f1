//! DPoS chain node.
//!
//! Configuration, module lifecycle, encrypted credential handling, and the
//! RPC surface. The chain core itself lives in lib-blockchain and
//! lib-consensus; this crate wires it to a store, a network channel, and
//! operator configuration.

pub mod config;
pub mod module;
pub mod passphrase;
pub mod rpc;

pub use config::{ConfigError, ForgingCredential, NodeConfig};
pub use module::ChainModule;
pub use passphrase::{
    decrypt_passphrase, encrypt_passphrase, PassphraseError, FORGING_KEY_INDEX_ENV_VAR,
    PASSWORD_ENV_VAR,
};
pub use rpc::{ApiScope, RpcApi, RpcError, RpcResult};

//! Node configuration.
//!
//! A flat, fully defaulted configuration surface. Users provide a minimal
//! JSON file with just the fields they care about; everything else falls
//! back to network defaults. `validate()` rejects the configurations the
//! node cannot safely run with, before anything else starts.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use lib_blockchain::ChainParams;
use lib_consensus::{ConsensusParams, PropagationMode};
use lib_types::{Amount, TransactionType};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("minForgerBlockSignatureRatio {0} is below 0.5")]
    SignatureRatioTooLow(f64),

    #[error("blockSignaturesToFetch {to_fetch} is below blockSignaturesToProvide {to_provide}")]
    SignatureFetchBelowProvide { to_fetch: usize, to_provide: usize },

    #[error("forgingInterval must be positive")]
    ZeroForgingInterval,

    #[error("forgerCount must be positive")]
    ZeroForgerCount,

    #[error("networkSymbol must not be empty")]
    EmptyNetworkSymbol,

    #[error("invalid fee amount for {transaction_type}: {value}")]
    InvalidFee {
        transaction_type: String,
        value: String,
    },

    #[error("forging credential for {wallet_address} carries no passphrase")]
    MissingPassphrase { wallet_address: String },
}

/// One hosted forging delegate.
#[derive(Debug, Clone, Deserialize)]
pub struct ForgingCredential {
    pub wallet_address: String,
    #[serde(default)]
    pub forging_passphrase: Option<String>,
    /// AES-192-CBC ciphertext, hex encoded, keyed from the password
    /// environment variable.
    #[serde(default)]
    pub encrypted_forging_passphrase: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub network_symbol: String,
    pub forging_interval: u64,
    pub forger_count: usize,
    pub min_forger_block_signature_ratio: f64,
    pub block_signatures_to_provide: usize,
    pub block_signatures_to_fetch: usize,
    pub block_signatures_indicator: String,
    pub fetch_block_limit: usize,
    pub fetch_block_pause: u64,
    pub fetch_block_end_confirmations: usize,
    pub forging_block_broadcast_delay: u64,
    pub forging_signature_broadcast_delay: u64,
    pub auto_sync_forging_key_index: bool,
    pub propagation_timeout: u64,
    pub propagation_randomness: u64,
    /// "relay" or "none".
    pub propagation_mode: String,
    pub time_poll_interval: u64,
    pub min_transactions_per_block: usize,
    pub max_transactions_per_block: usize,
    pub min_multisig_members: usize,
    pub max_multisig_members: usize,
    pub min_multisig_registration_fee_per_member: String,
    pub min_multisig_transaction_fee_per_member: String,
    pub pending_transaction_expiry: u64,
    pub pending_transaction_expiry_check_interval: u64,
    pub max_spendable_digits: usize,
    pub max_transaction_message_length: usize,
    pub max_votes_per_account: usize,
    pub max_transaction_backpressure_per_account: usize,
    pub max_pending_transactions_per_account: usize,
    pub max_consecutive_block_fetch_failures: usize,
    pub max_consecutive_transaction_fetch_failures: usize,
    pub catch_up_consensus_poll_count: usize,
    pub catch_up_consensus_min_ratio: f64,
    /// Default page size for listing queries.
    pub api_limit: usize,
    pub max_public_api_limit: usize,
    pub max_public_api_offset: usize,
    pub max_private_api_limit: usize,
    pub max_private_api_offset: usize,
    /// Minimum fee per transaction type, decimal strings.
    pub min_transaction_fees: HashMap<String, String>,
    pub forging_credentials: Vec<ForgingCredential>,
    pub genesis_path: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let min_transaction_fees = [
            ("transfer", "10000000"),
            ("vote", "20000000"),
            ("unvote", "20000000"),
            ("registerSigDetails", "10000000"),
            ("registerMultisigDetails", "10000000"),
            ("registerForgingDetails", "10000000"),
            ("registerMultisigWallet", "50000000"),
        ]
        .into_iter()
        .map(|(transaction_type, fee)| (transaction_type.to_string(), fee.to_string()))
        .collect();
        Self {
            network_symbol: "ldpos".to_string(),
            forging_interval: 30_000,
            forger_count: 21,
            min_forger_block_signature_ratio: 0.6,
            block_signatures_to_provide: 12,
            block_signatures_to_fetch: 12,
            block_signatures_indicator: "bsi".to_string(),
            fetch_block_limit: 10,
            fetch_block_pause: 100,
            fetch_block_end_confirmations: 10,
            forging_block_broadcast_delay: 2_000,
            forging_signature_broadcast_delay: 5_000,
            auto_sync_forging_key_index: true,
            propagation_timeout: 15_000,
            propagation_randomness: 3_000,
            propagation_mode: "relay".to_string(),
            time_poll_interval: 200,
            min_transactions_per_block: 1,
            max_transactions_per_block: 300,
            min_multisig_members: 1,
            max_multisig_members: 100,
            min_multisig_registration_fee_per_member: "100000000".to_string(),
            min_multisig_transaction_fee_per_member: "500000".to_string(),
            pending_transaction_expiry: 24 * 60 * 60 * 1000,
            pending_transaction_expiry_check_interval: 60 * 60 * 1000,
            max_spendable_digits: 25,
            max_transaction_message_length: 256,
            max_votes_per_account: 5,
            max_transaction_backpressure_per_account: 32,
            max_pending_transactions_per_account: 64,
            max_consecutive_block_fetch_failures: 5,
            max_consecutive_transaction_fetch_failures: 3,
            catch_up_consensus_poll_count: 6,
            catch_up_consensus_min_ratio: 0.5,
            api_limit: 100,
            max_public_api_limit: 100,
            max_public_api_offset: 10_000,
            max_private_api_limit: 1_000,
            max_private_api_offset: 100_000,
            min_transaction_fees,
            forging_credentials: Vec::new(),
            genesis_path: PathBuf::from("genesis.json"),
        }
    }
}

impl NodeConfig {
    /// Reject configurations the protocol cannot run safely with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_forger_block_signature_ratio < 0.5 {
            return Err(ConfigError::SignatureRatioTooLow(
                self.min_forger_block_signature_ratio,
            ));
        }
        if self.block_signatures_to_fetch < self.block_signatures_to_provide {
            return Err(ConfigError::SignatureFetchBelowProvide {
                to_fetch: self.block_signatures_to_fetch,
                to_provide: self.block_signatures_to_provide,
            });
        }
        if self.forging_interval == 0 {
            return Err(ConfigError::ZeroForgingInterval);
        }
        if self.forger_count == 0 {
            return Err(ConfigError::ZeroForgerCount);
        }
        if self.network_symbol.is_empty() {
            return Err(ConfigError::EmptyNetworkSymbol);
        }
        for credential in &self.forging_credentials {
            if credential.forging_passphrase.is_none()
                && credential.encrypted_forging_passphrase.is_none()
            {
                return Err(ConfigError::MissingPassphrase {
                    wallet_address: credential.wallet_address.clone(),
                });
            }
        }
        self.chain_params().map(|_| ())
    }

    /// Consensus-critical protocol parameters for the chain core.
    pub fn chain_params(&self) -> Result<ChainParams, ConfigError> {
        let mut min_transaction_fees = HashMap::new();
        for transaction_type in TransactionType::ALL {
            if let Some(value) = self.min_transaction_fees.get(transaction_type.as_str()) {
                let fee = Amount::from_dec_str(value).map_err(|_| ConfigError::InvalidFee {
                    transaction_type: transaction_type.as_str().to_string(),
                    value: value.clone(),
                })?;
                min_transaction_fees.insert(transaction_type, fee);
            }
        }
        let parse = |value: &str, transaction_type: &str| {
            Amount::from_dec_str(value).map_err(|_| ConfigError::InvalidFee {
                transaction_type: transaction_type.to_string(),
                value: value.to_string(),
            })
        };
        Ok(ChainParams {
            network_symbol: self.network_symbol.clone(),
            max_transaction_message_length: self.max_transaction_message_length,
            max_spendable_digits: self.max_spendable_digits,
            min_transaction_fees,
            min_multisig_registration_fee_per_member: parse(
                &self.min_multisig_registration_fee_per_member,
                "multisigRegistrationPerMember",
            )?,
            min_multisig_transaction_fee_per_member: parse(
                &self.min_multisig_transaction_fee_per_member,
                "multisigTransactionPerMember",
            )?,
            min_multisig_members: self.min_multisig_members,
            max_multisig_members: self.max_multisig_members,
            max_votes_per_account: self.max_votes_per_account,
            min_transactions_per_block: self.min_transactions_per_block,
            max_transactions_per_block: self.max_transactions_per_block,
            block_signatures_to_provide: self.block_signatures_to_provide,
            max_pending_transactions_per_account: self.max_pending_transactions_per_account,
            max_transaction_backpressure_per_account: self
                .max_transaction_backpressure_per_account,
            pending_transaction_expiry: self.pending_transaction_expiry,
        })
    }

    pub fn consensus_params(&self) -> ConsensusParams {
        ConsensusParams {
            forging_interval: self.forging_interval,
            forger_count: self.forger_count,
            min_forger_block_signature_ratio: self.min_forger_block_signature_ratio,
            time_poll_interval: self.time_poll_interval,
            forging_block_broadcast_delay: self.forging_block_broadcast_delay,
            forging_signature_broadcast_delay: self.forging_signature_broadcast_delay,
            propagation_timeout: self.propagation_timeout,
            propagation_randomness: self.propagation_randomness,
            propagation_mode: if self.propagation_mode.eq_ignore_ascii_case("none") {
                PropagationMode::None
            } else {
                PropagationMode::Relay
            },
            fetch_block_limit: self.fetch_block_limit,
            fetch_block_pause: self.fetch_block_pause,
            fetch_block_end_confirmations: self.fetch_block_end_confirmations,
            block_signatures_to_fetch: self.block_signatures_to_fetch,
            block_signatures_indicator: self.block_signatures_indicator.clone(),
            max_consecutive_block_fetch_failures: self.max_consecutive_block_fetch_failures,
            max_consecutive_transaction_fetch_failures: self
                .max_consecutive_transaction_fetch_failures,
            catch_up_consensus_poll_count: self.catch_up_consensus_poll_count,
            catch_up_consensus_min_ratio: self.catch_up_consensus_min_ratio,
            auto_sync_forging_key_index: self.auto_sync_forging_key_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        NodeConfig::default().validate().unwrap();
    }

    #[test]
    fn low_signature_ratio_is_fatal() {
        let mut config = NodeConfig::default();
        config.min_forger_block_signature_ratio = 0.4;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SignatureRatioTooLow(_))
        ));
    }

    #[test]
    fn fetch_below_provide_is_fatal() {
        let mut config = NodeConfig::default();
        config.block_signatures_to_fetch = 5;
        config.block_signatures_to_provide = 12;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SignatureFetchBelowProvide { .. })
        ));
    }

    #[test]
    fn minimal_json_config_inherits_defaults() {
        let config: NodeConfig =
            serde_json::from_str(r#"{ "network_symbol": "clux", "forger_count": 5 }"#).unwrap();
        assert_eq!(config.network_symbol, "clux");
        assert_eq!(config.forger_count, 5);
        assert_eq!(config.forging_interval, 30_000);
        config.validate().unwrap();
    }
}

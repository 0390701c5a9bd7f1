//! Stateless transaction validation.
//!
//! Schema checks and signature/key-correspondence authentication for sig and
//! multisig transactions. Everything here is a pure function of the supplied
//! transaction, sender snapshot, and protocol parameters; callers own the
//! account fetching and any balance bookkeeping across a pending stream.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use lib_crypto::CryptoClient;
use lib_types::{Account, Address, Amount, Timestamp, Transaction, TransactionType};

use crate::config::ChainParams;

/// How deep authentication digs into signatures.
///
/// `Full` verifies the actual signatures a freshly submitted transaction
/// carries. `IdOnly` is for simplified in-block transactions, which only
/// carry signature hashes; there the id derivation itself is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMode {
    Full,
    IdOnly,
}

/// Member snapshots needed to authenticate a multisig-sent transaction.
#[derive(Debug, Clone, Default)]
pub struct MultisigContext {
    pub members: HashMap<Address, Account>,
    pub required_signature_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("schema violation: {reason}")]
    Schema { reason: String },

    #[error("sender address {address} does not belong to this network")]
    WrongNetwork { address: Address },

    #[error("transaction timestamp {timestamp} is in the future")]
    FutureTimestamp { timestamp: Timestamp },

    #[error("sig public key does not match the sender account key state")]
    SigKeyMismatch,

    #[error("invalid sender signature")]
    InvalidSignature,

    #[error("invalid transaction id")]
    InvalidId,

    #[error("signer {address} appears more than once")]
    DuplicateSigner { address: Address },

    #[error("signer {address} is not a member of the wallet")]
    NotAMember { address: Address },

    #[error("member {address} multisig key does not match the packet")]
    MultisigKeyMismatch { address: Address },

    #[error("invalid multisig signature from {address}")]
    InvalidMultisigSignature { address: Address },

    #[error("{provided} signatures provided, {required} required")]
    NotEnoughSignatures { provided: usize, required: u32 },

    #[error("fee {fee} is below the minimum {minimum}")]
    FeeBelowMinimum { fee: Amount, minimum: Amount },

    #[error("insufficient balance: needs {required}, has {available}")]
    InsufficientBalance { required: Amount, available: Amount },

    #[error("crypto backend failure: {0}")]
    Crypto(String),
}

pub type ValidationResult<T> = Result<T, ValidationError>;

fn schema(reason: impl Into<String>) -> ValidationError {
    ValidationError::Schema {
        reason: reason.into(),
    }
}

fn require_amount_fits(params: &ChainParams, amount: &Amount, field: &str) -> ValidationResult<()> {
    if amount.digits() > params.max_spendable_digits {
        return Err(schema(format!(
            "{field} exceeds {} digits",
            params.max_spendable_digits
        )));
    }
    Ok(())
}

fn require_address(params: &ChainParams, address: &Address, field: &str) -> ValidationResult<()> {
    if !address.is_valid_for_network(&params.network_symbol) {
        return Err(schema(format!("{field} {address} is malformed")));
    }
    Ok(())
}

/// Structural checks: required per-type fields, lengths, digit caps, and
/// network prefixes. No account state is consulted.
pub fn validate_transaction_schema(
    params: &ChainParams,
    transaction: &Transaction,
) -> ValidationResult<()> {
    if transaction.id.is_empty() {
        return Err(schema("missing transaction id"));
    }
    if !transaction
        .sender_address
        .is_valid_for_network(&params.network_symbol)
    {
        return Err(ValidationError::WrongNetwork {
            address: transaction.sender_address.clone(),
        });
    }
    require_amount_fits(params, &transaction.fee, "fee")?;
    if let Some(message) = &transaction.message {
        if message.len() > params.max_transaction_message_length {
            return Err(schema(format!(
                "message exceeds {} characters",
                params.max_transaction_message_length
            )));
        }
    }

    match transaction.transaction_type {
        TransactionType::Transfer => {
            let amount = transaction
                .amount
                .as_ref()
                .ok_or_else(|| schema("transfer without amount"))?;
            require_amount_fits(params, amount, "amount")?;
            let recipient = transaction
                .recipient_address
                .as_ref()
                .ok_or_else(|| schema("transfer without recipient"))?;
            require_address(params, recipient, "recipient")?;
        }
        TransactionType::Vote | TransactionType::Unvote => {
            let delegate = transaction
                .delegate_address
                .as_ref()
                .ok_or_else(|| schema("vote without delegate address"))?;
            require_address(params, delegate, "delegate")?;
        }
        TransactionType::RegisterSigDetails => {
            if transaction.new_sig_public_key.is_none()
                || transaction.new_next_sig_public_key.is_none()
                || transaction.new_next_sig_key_index.is_none()
            {
                return Err(schema("registerSigDetails without a full key triple"));
            }
        }
        TransactionType::RegisterMultisigDetails => {
            if transaction.new_multisig_public_key.is_none()
                || transaction.new_next_multisig_public_key.is_none()
                || transaction.new_next_multisig_key_index.is_none()
            {
                return Err(schema("registerMultisigDetails without a full key triple"));
            }
        }
        TransactionType::RegisterForgingDetails => {
            if transaction.new_forging_public_key.is_none()
                || transaction.new_next_forging_public_key.is_none()
                || transaction.new_next_forging_key_index.is_none()
            {
                return Err(schema("registerForgingDetails without a full key triple"));
            }
        }
        TransactionType::RegisterMultisigWallet => {
            let members = transaction
                .member_addresses
                .as_ref()
                .ok_or_else(|| schema("registerMultisigWallet without members"))?;
            if members.len() < params.min_multisig_members
                || members.len() > params.max_multisig_members
            {
                return Err(schema(format!(
                    "member count {} outside [{}, {}]",
                    members.len(),
                    params.min_multisig_members,
                    params.max_multisig_members
                )));
            }
            let mut seen = HashSet::new();
            for member in members {
                require_address(params, member, "member")?;
                if !seen.insert(member) {
                    return Err(schema(format!("duplicate member {member}")));
                }
            }
            let required = transaction
                .required_signature_count
                .ok_or_else(|| schema("registerMultisigWallet without required count"))?;
            if required == 0 || required as usize > members.len() {
                return Err(schema(format!(
                    "required signature count {required} outside [1, {}]",
                    members.len()
                )));
            }
        }
    }
    Ok(())
}

/// Total balance a transaction consumes: its amount (if any) plus its fee.
pub fn spend_of(transaction: &Transaction) -> Amount {
    &transaction.amount_or_zero() + &transaction.fee
}

/// Full authentication of a transaction against a sender account snapshot.
///
/// Covers key correspondence for both authentication regimes, the
/// future-timestamp rule, the minimum fee schedule (full mode only), and
/// the balance check. The snapshot's balance is expected to already reflect
/// any earlier pending transactions from the same sender.
pub async fn authenticate_transaction(
    crypto: &dyn CryptoClient,
    params: &ChainParams,
    sender: &Account,
    multisig: Option<&MultisigContext>,
    transaction: &Transaction,
    mode: VerificationMode,
    now: Timestamp,
) -> ValidationResult<()> {
    validate_transaction_schema(params, transaction)?;

    if transaction.timestamp > now {
        return Err(ValidationError::FutureTimestamp {
            timestamp: transaction.timestamp,
        });
    }

    if sender.is_multisig() {
        let context = multisig.ok_or_else(|| schema("missing multisig wallet context"))?;
        authenticate_multisig(crypto, context, transaction, mode).await?;
    } else {
        authenticate_sig(crypto, params, sender, transaction, mode).await?;
    }

    if mode == VerificationMode::Full {
        check_minimum_fee(params, transaction, multisig)?;
    }

    let required = spend_of(transaction);
    if sender.balance < required {
        return Err(ValidationError::InsufficientBalance {
            required,
            available: sender.balance.clone(),
        });
    }
    Ok(())
}

async fn authenticate_sig(
    crypto: &dyn CryptoClient,
    params: &ChainParams,
    sender: &Account,
    transaction: &Transaction,
    mode: VerificationMode,
) -> ValidationResult<()> {
    let public_key = transaction
        .sig_public_key
        .as_deref()
        .ok_or_else(|| schema("sig transaction without sigPublicKey"))?;
    if transaction.next_sig_public_key.is_none() || transaction.next_sig_key_index.is_none() {
        return Err(schema("sig transaction without next key commitment"));
    }

    let key_known = match sender.sig_public_key.as_deref() {
        Some(current) => {
            public_key == current || sender.next_sig_public_key.as_deref() == Some(public_key)
        }
        // First use: the address itself commits to the key prefix.
        None => transaction
            .sender_address
            .matches_sig_public_key(&params.network_symbol, public_key),
    };
    if !key_known {
        return Err(ValidationError::SigKeyMismatch);
    }

    let verified = match mode {
        VerificationMode::Full => crypto
            .verify_transaction(transaction)
            .await
            .map_err(|err| ValidationError::Crypto(err.to_string()))?,
        VerificationMode::IdOnly => crypto
            .verify_transaction_id(transaction)
            .await
            .map_err(|err| ValidationError::Crypto(err.to_string()))?,
    };
    if !verified {
        return Err(match mode {
            VerificationMode::Full => ValidationError::InvalidSignature,
            VerificationMode::IdOnly => ValidationError::InvalidId,
        });
    }
    Ok(())
}

async fn authenticate_multisig(
    crypto: &dyn CryptoClient,
    context: &MultisigContext,
    transaction: &Transaction,
    mode: VerificationMode,
) -> ValidationResult<()> {
    let mut signers = HashSet::new();
    for packet in &transaction.signatures {
        if !signers.insert(packet.signer_address.clone()) {
            return Err(ValidationError::DuplicateSigner {
                address: packet.signer_address.clone(),
            });
        }
        let member = context.members.get(&packet.signer_address).ok_or_else(|| {
            ValidationError::NotAMember {
                address: packet.signer_address.clone(),
            }
        })?;
        let key_known = member.multisig_public_key.as_deref()
            == Some(packet.multisig_public_key.as_str())
            || member.next_multisig_public_key.as_deref()
                == Some(packet.multisig_public_key.as_str());
        if !key_known {
            return Err(ValidationError::MultisigKeyMismatch {
                address: packet.signer_address.clone(),
            });
        }
        if mode == VerificationMode::Full {
            let verified = crypto
                .verify_multisig_transaction_signature(transaction, packet)
                .await
                .map_err(|err| ValidationError::Crypto(err.to_string()))?;
            if !verified {
                return Err(ValidationError::InvalidMultisigSignature {
                    address: packet.signer_address.clone(),
                });
            }
        }
    }

    if signers.len() < context.required_signature_count as usize {
        return Err(ValidationError::NotEnoughSignatures {
            provided: signers.len(),
            required: context.required_signature_count,
        });
    }

    // Both modes confirm the id derivation; member packets sign the id.
    let verified = crypto
        .verify_transaction_id(transaction)
        .await
        .map_err(|err| ValidationError::Crypto(err.to_string()))?;
    if !verified {
        return Err(ValidationError::InvalidId);
    }
    Ok(())
}

fn check_minimum_fee(
    params: &ChainParams,
    transaction: &Transaction,
    multisig: Option<&MultisigContext>,
) -> ValidationResult<()> {
    let mut minimum = params.min_fee(transaction.transaction_type);
    if transaction.transaction_type == TransactionType::RegisterMultisigWallet {
        let member_count = transaction
            .member_addresses
            .as_ref()
            .map(|members| members.len() as u64)
            .unwrap_or(0);
        minimum += &params
            .min_multisig_registration_fee_per_member
            .times(member_count);
    }
    if let Some(context) = multisig {
        minimum += &params
            .min_multisig_transaction_fee_per_member
            .times(context.members.len() as u64);
    }
    if transaction.fee < minimum {
        return Err(ValidationError::FeeBelowMinimum {
            fee: transaction.fee.clone(),
            minimum,
        });
    }
    Ok(())
}

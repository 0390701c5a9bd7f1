//! Chain data model primitives.
//! Stable, protocol-neutral, behavior-light.

pub mod account;
pub mod block;
pub mod delegate;
pub mod errors;
pub mod primitives;
pub mod transaction;

pub use account::{Account, AccountType};
pub use block::{Block, BlockSignature, SimplifiedBlock};
pub use delegate::{Delegate, Vote};
pub use errors::TypeError;
pub use primitives::{Address, Amount, BlockHeight, KeyIndex, Timestamp, ADDRESS_BODY_LENGTH};
pub use transaction::{signature_hash, SignaturePacket, Transaction, TransactionType};

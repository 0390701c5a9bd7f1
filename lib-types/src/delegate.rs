//! Delegate and vote records.

use serde::{Deserialize, Serialize};

use crate::primitives::{Address, Amount, BlockHeight};

/// A forging delegate, ranked by accumulated vote weight.
///
/// `vote_weight` is the sum of the balances of every account currently
/// voting for this delegate, as of each voter's own update height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegate {
    pub address: Address,
    pub vote_weight: Amount,
    pub update_height: BlockHeight,
}

/// A standing vote from a voter account for a delegate.
///
/// The (voter, delegate) pair is unique; a voter holds at most the
/// configured maximum number of votes at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vote {
    pub voter_address: Address,
    pub delegate_address: Address,
}

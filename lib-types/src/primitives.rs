//! Canonical primitive types for the DPoS chain.
//!
//! These types are the foundational building blocks for all consensus-critical
//! data structures. They are designed to be:
//! - Deterministically serializable
//! - Cheap to compare and hash
//! - Free of protocol behavior (validation logic lives in lib-blockchain)

use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::Zero;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::TypeError;

// ============================================================================
// TYPE ALIASES
// ============================================================================

/// Block height in the chain (genesis tip is height 0)
pub type BlockHeight = u64;

/// Wall-clock timestamp in milliseconds since the UNIX epoch
pub type Timestamp = u64;

/// Index into a stateful (key-evolving) signature chain
pub type KeyIndex = u64;

/// Number of hex characters of a sig public key embedded in an address body
pub const ADDRESS_BODY_LENGTH: usize = 40;

// ============================================================================
// WALLET ADDRESS
// ============================================================================

/// Wallet address: a network symbol prefix followed by a 40-char hex body.
///
/// The body is the first 40 hex characters of the wallet's original sig
/// public key, which is what allows first-use authentication before any
/// key has been registered on chain.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Wrap an already-formed address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Derive the address committed to by a sig public key.
    pub fn from_sig_public_key(network_symbol: &str, sig_public_key: &str) -> Result<Self, TypeError> {
        if sig_public_key.len() < ADDRESS_BODY_LENGTH
            || !sig_public_key.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(TypeError::InvalidPublicKey {
                public_key: sig_public_key.to_string(),
            });
        }
        Ok(Self(format!(
            "{network_symbol}{}",
            &sig_public_key[..ADDRESS_BODY_LENGTH].to_lowercase()
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex body of the address if it is well formed for `network_symbol`.
    pub fn body<'a>(&'a self, network_symbol: &str) -> Option<&'a str> {
        let body = self.0.strip_prefix(network_symbol)?;
        if body.len() == ADDRESS_BODY_LENGTH && body.chars().all(|c| c.is_ascii_hexdigit()) {
            Some(body)
        } else {
            None
        }
    }

    /// Whether the address carries the expected network symbol and hex body.
    pub fn is_valid_for_network(&self, network_symbol: &str) -> bool {
        self.body(network_symbol).is_some()
    }

    /// Whether `sig_public_key` commits to this address (first-use rule).
    pub fn matches_sig_public_key(&self, network_symbol: &str, sig_public_key: &str) -> bool {
        match self.body(network_symbol) {
            Some(body) => {
                sig_public_key.len() >= ADDRESS_BODY_LENGTH
                    && body.eq_ignore_ascii_case(&sig_public_key[..ADDRESS_BODY_LENGTH])
            }
            None => false,
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

impl From<String> for Address {
    fn from(address: String) -> Self {
        Self(address)
    }
}

// ============================================================================
// AMOUNT
// ============================================================================

/// Arbitrary-precision, non-negative token amount.
///
/// Balances, fees, and vote weights all use this type. The canonical
/// serialized form is a decimal string, which is also what the store
/// persists.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(BigUint);

impl Amount {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn from_u64(value: u64) -> Self {
        Self(BigUint::from(value))
    }

    /// Parse a decimal string. Rejects empty strings and non-digit input.
    pub fn from_dec_str(value: &str) -> Result<Self, TypeError> {
        if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
            return Err(TypeError::InvalidAmount {
                value: value.to_string(),
            });
        }
        Ok(Self(BigUint::parse_bytes(value.as_bytes(), 10).ok_or(
            TypeError::InvalidAmount {
                value: value.to_string(),
            },
        )?))
    }

    /// Number of decimal digits in the canonical representation.
    pub fn digits(&self) -> usize {
        self.0.to_str_radix(10).len()
    }

    /// Scale by an integer count (fee-per-member style schedules).
    pub fn times(&self, count: u64) -> Amount {
        Amount(&self.0 * count)
    }

    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if self.0 >= other.0 {
            Some(Amount(&self.0 - &other.0))
        } else {
            None
        }
    }

    /// Signed view, for delta arithmetic on vote weights.
    pub fn to_bigint(&self) -> BigInt {
        BigInt::from_biguint(Sign::Plus, self.0.clone())
    }

    /// Clamp a signed value to a non-negative amount.
    pub fn from_bigint_clamped(value: &BigInt) -> Amount {
        match value.to_biguint() {
            Some(magnitude) => Amount(magnitude),
            None => Amount::zero(),
        }
    }
}

impl Add<&Amount> for &Amount {
    type Output = Amount;

    fn add(self, rhs: &Amount) -> Amount {
        Amount(&self.0 + &rhs.0)
    }
}

impl AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        self.0 += &rhs.0;
    }
}

impl fmt::Debug for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Amount({})", self.0.to_str_radix(10))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_str_radix(10))
    }
}

impl FromStr for Amount {
    type Err = TypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_dec_str(value)
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_str_radix(10))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Amount::from_dec_str(&raw).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_body_requires_network_symbol_and_hex() {
        let address = Address::new("clux93efae1582437d410fb5cbc5d7e3dee1bb8194e7");
        assert!(address.is_valid_for_network("clux"));
        assert!(!address.is_valid_for_network("ldpos"));

        let truncated = Address::new("clux93efae");
        assert!(!truncated.is_valid_for_network("clux"));
    }

    #[test]
    fn address_derivation_commits_to_key_prefix() {
        let public_key = "93efae1582437d410fb5cbc5d7e3dee1bb8194e7aa55b2fcb6fbd1a0deadbeef";
        let address = Address::from_sig_public_key("clux", public_key).unwrap();
        assert_eq!(address.as_str(), "clux93efae1582437d410fb5cbc5d7e3dee1bb8194e7");
        assert!(address.matches_sig_public_key("clux", public_key));
        assert!(!address.matches_sig_public_key("clux", &public_key.replace('9', "a")));
    }

    #[test]
    fn amount_round_trips_decimal_strings() {
        let amount = Amount::from_dec_str("340282366920938463463374607431768211456").unwrap();
        assert_eq!(amount.to_string(), "340282366920938463463374607431768211456");
        assert_eq!(amount.digits(), 39);
        assert!(Amount::from_dec_str("").is_err());
        assert!(Amount::from_dec_str("12a4").is_err());
        assert!(Amount::from_dec_str("-5").is_err());
    }

    #[test]
    fn amount_checked_sub_refuses_underflow() {
        let hundred = Amount::from_u64(100);
        let sixty = Amount::from_u64(60);
        assert_eq!(hundred.checked_sub(&sixty), Some(Amount::from_u64(40)));
        assert_eq!(sixty.checked_sub(&hundred), None);
    }
}

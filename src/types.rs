//! Shared data model
//!
//! All amounts are integer atoms. Hashes print in the chain's byte-reversed
//! hex form so they match what block explorers and the backend show.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::BridgeError;

pub const ATOMS_PER_COIN: i64 = 100_000_000;

// ============================================================================
// Amount
// ============================================================================

/// Signed amount in atoms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(pub i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_atoms(atoms: i64) -> Self {
        Self(atoms)
    }

    pub const fn atoms(self) -> i64 {
        self.0
    }

    pub fn to_coins(self) -> f64 {
        self.0 as f64 / ATOMS_PER_COIN as f64
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Sum that reports overflow as `None`
    pub fn checked_sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Option<Amount> {
        amounts
            .into_iter()
            .try_fold(Amount::ZERO, |acc, amount| acc.checked_add(amount))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / ATOMS_PER_COIN as u64;
        let frac = abs % ATOMS_PER_COIN as u64;
        if frac == 0 {
            return write!(f, "{}{} DCR", sign, whole);
        }
        let frac = format!("{:08}", frac);
        write!(f, "{}{}.{} DCR", sign, whole, frac.trim_end_matches('0'))
    }
}

impl Add for Amount {
    type Output = Amount;
    fn add(self, rhs: Amount) -> Amount {
        Amount(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Amount;
    fn sub(self, rhs: Amount) -> Amount {
        Amount(self.0 - rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Amount) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Amount) {
        self.0 -= rhs.0;
    }
}

impl Neg for Amount {
    type Output = Amount;
    fn neg(self) -> Amount {
        Amount(-self.0)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Amount {
        iter.copied().sum()
    }
}

// ============================================================================
// Hash / OutputKey
// ============================================================================

/// 32-byte transaction or block hash
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, BridgeError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| BridgeError::invalid_input(format!("hash must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(reversed))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl FromStr for Hash {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 64 {
            return Err(BridgeError::invalid_input(format!("invalid hash length: {}", s)));
        }
        let mut bytes = hex::decode(s)
            .map_err(|e| BridgeError::invalid_input(format!("invalid hash {}: {}", s, e)))?;
        bytes.reverse();
        Hash::from_slice(&bytes)
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Composite `hash:index` key naming an unspent output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputKey {
    pub hash: Hash,
    pub index: u32,
}

impl OutputKey {
    pub fn new(hash: Hash, index: u32) -> Self {
        Self { hash, index }
    }
}

impl fmt::Display for OutputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.hash, self.index)
    }
}

impl FromStr for OutputKey {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hash, index) = s
            .split_once(':')
            .ok_or_else(|| BridgeError::invalid_input(format!("invalid output key: {}", s)))?;
        let index = index
            .parse::<u32>()
            .map_err(|_| BridgeError::invalid_input(format!("invalid output index in {}", s)))?;
        Ok(Self {
            hash: hash.parse()?,
            index,
        })
    }
}

impl Serialize for OutputKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OutputKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Transaction tree an output lives in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tree {
    #[default]
    Regular,
    Stake,
}

impl Tree {
    pub fn as_u8(self) -> u8 {
        match self {
            Tree::Regular => 0,
            Tree::Stake => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Tree::Regular),
            1 => Some(Tree::Stake),
            _ => None,
        }
    }
}

// ============================================================================
// Network
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    #[default]
    Testnet,
    Simnet,
}

impl Network {
    /// Target time between blocks, in seconds
    pub fn target_block_spacing(self) -> i64 {
        match self {
            Network::Mainnet => 300,
            Network::Testnet => 120,
            Network::Simnet => 1,
        }
    }

    /// Default wallet backend port
    pub fn default_port(self) -> u16 {
        match self {
            Network::Mainnet => 9111,
            Network::Testnet => 19111,
            Network::Simnet => 19558,
        }
    }

    /// Address prefix used by this network
    pub fn address_prefix(self) -> &'static str {
        match self {
            Network::Mainnet => "Ds",
            Network::Testnet => "Ts",
            Network::Simnet => "Ss",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet3",
            Network::Simnet => "simnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" | "testnet3" => Ok(Network::Testnet),
            "simnet" => Ok(Network::Simnet),
            other => Err(BridgeError::Config(format!("unknown network: {}", other))),
        }
    }
}

// ============================================================================
// Accounts
// ============================================================================

/// Account balance snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub total: Amount,
    pub spendable: Amount,
    pub locked_by_tickets: Amount,
    pub voting_authority: Amount,
    pub unconfirmed: Amount,
}

impl Balance {
    /// `total >= spendable`
    pub fn is_consistent(&self) -> bool {
        self.total >= self.spendable
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub number: u32,
    pub name: String,
    pub balance: Balance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    pub is_mine: bool,
    pub account_number: Option<u32>,
    pub account_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub network: Network,
    pub total_balance: Amount,
    pub best_block: u32,
    pub best_block_timestamp: i64,
    pub peer_count: i32,
}

// ============================================================================
// Unspent outputs and destinations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub key: OutputKey,
    pub amount: Amount,
    pub receive_time: i64,
    pub confirmations: i32,
    pub tree: Tree,
    pub address: String,
}

impl UnspentOutput {
    pub fn hash(&self) -> Hash {
        self.key.hash
    }

    pub fn index(&self) -> u32 {
        self.key.index
    }
}

/// Requested payment output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionDestination {
    pub address: String,
    #[serde(default)]
    pub amount: Amount,
    #[serde(default)]
    pub send_max: bool,
}

impl TransactionDestination {
    pub fn new(address: impl Into<String>, amount: Amount) -> Self {
        Self {
            address: address.into(),
            amount,
            send_max: false,
        }
    }

    pub fn send_max(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            amount: Amount::ZERO,
            send_max: true,
        }
    }
}

// ============================================================================
// Transactions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionDirection {
    Sent,
    Received,
    Transferred,
    Unclassified,
}

impl fmt::Display for TransactionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sent => "sent",
            Self::Received => "received",
            Self::Transferred => "transferred",
            Self::Unclassified => "unclassified",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    #[default]
    Regular,
    Ticket,
    Vote,
    Revocation,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Regular => "regular",
            Self::Ticket => "ticket",
            Self::Vote => "vote",
            Self::Revocation => "revocation",
        };
        f.write_str(s)
    }
}

/// Reconciled history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: Hash,
    pub amount: Amount,
    pub fee: Amount,
    /// Atoms per kB
    pub fee_rate: Amount,
    pub size: usize,
    pub tx_type: TransactionType,
    pub direction: TransactionDirection,
    pub timestamp: i64,
    pub formatted_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInputDetail {
    pub previous_output: OutputKey,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutputDetail {
    pub index: u32,
    pub amount: Amount,
    pub script_version: u16,
    pub script: String,
}

/// Single transaction with chain position and decoded body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub transaction: Transaction,
    /// -1 while unmined
    pub block_height: i32,
    pub confirmations: i32,
    pub inputs: Vec<TxInputDetail>,
    pub outputs: Vec<TxOutputDetail>,
}

/// Format a unix timestamp the way history listings show it
pub fn format_timestamp(timestamp: i64) -> String {
    chrono::DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%a %b %-d, %Y %-I:%M%p").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_display() {
        assert_eq!(Amount(150_000_000).to_string(), "1.5 DCR");
        assert_eq!(Amount(100_000_000).to_string(), "1 DCR");
        assert_eq!(Amount(-1).to_string(), "-0.00000001 DCR");
        assert_eq!(Amount::ZERO.to_string(), "0 DCR");
    }

    #[test]
    fn test_checked_sum_reports_overflow() {
        assert_eq!(Amount::checked_sum([Amount(1), Amount(2)]), Some(Amount(3)));
        assert_eq!(Amount::checked_sum([Amount(i64::MAX), Amount(1)]), None);
        assert_eq!(Amount(i64::MIN).checked_sub(Amount(1)), None);
    }

    #[test]
    fn test_hash_string_is_byte_reversed() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0xab;
        let hash = Hash(bytes);
        let s = hash.to_string();
        assert!(s.ends_with("ab"));
        assert_eq!(s.parse::<Hash>().unwrap(), hash);
    }

    #[test]
    fn test_hash_rejects_garbage() {
        assert!(matches!("zz".parse::<Hash>(), Err(BridgeError::InvalidInput(_))));
        assert!("g".repeat(64).parse::<Hash>().is_err());
    }

    #[test]
    fn test_output_key_parse() {
        let hash = Hash([7u8; 32]);
        let key: OutputKey = format!("{}:3", hash).parse().unwrap();
        assert_eq!(key, OutputKey::new(hash, 3));
        assert!(format!("{}", hash).parse::<OutputKey>().is_err());
        assert!(format!("{}:x", hash).parse::<OutputKey>().is_err());
    }

    #[test]
    fn test_network_parse() {
        assert_eq!("MAINNET".parse::<Network>().unwrap(), Network::Mainnet);
        assert_eq!("testnet3".parse::<Network>().unwrap(), Network::Testnet);
        assert!("regtest".parse::<Network>().is_err());
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "Thu Jan 1, 1970 12:00AM");
    }
}

//! Shared types for connection state, presale and stake snapshots
//!
//! Snapshots are immutable point-in-time reads of on-chain aggregate state.
//! Token-denominated values are converted from their fixed-point on-chain
//! representation to `f64` for display and limit calculations.

use alloy::primitives::{
    utils::{format_units, parse_units},
    Address, U256,
};
use eyre::{eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::evm::provider::PresaleStates;

/// Default fixed-point exponent of ETH and the sale token
pub const DEFAULT_DECIMALS: u8 = 18;

/// Seconds added to every "time to next event" so the local countdown never
/// fires before the chain has actually flipped state
pub const NEXT_EVENT_BUFFER_SECS: u64 = 20;

// ============================================================================
// Network target
// ============================================================================

/// Chain ids with a well-known network name
const KNOWN_NETWORKS: &[(u64, &str)] = &[(1, "mainnet"), (4, "rinkeby"), (1337, "private")];

/// Network the client points its connections at
///
/// Selected once at startup (optionally from the `?network=` query parameter)
/// and afterwards replaced by the network reported by the connected wallet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkTarget {
    pub name: String,
}

impl NetworkTarget {
    pub const PRIVATE: &'static str = "private";

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_lowercase(),
        }
    }

    pub fn mainnet() -> Self {
        Self::new("mainnet")
    }

    /// Network name for a chain id reported by a provider
    pub fn for_chain(chain_id: u64) -> Self {
        match KNOWN_NETWORKS.iter().find(|(id, _)| *id == chain_id) {
            Some((_, name)) => Self::new(*name),
            None => Self::new(format!("chain-{}", chain_id)),
        }
    }

    /// Chain id this network is expected to report, if known
    pub fn expected_chain_id(&self) -> Option<u64> {
        KNOWN_NETWORKS
            .iter()
            .find(|(_, name)| *name == self.name)
            .map(|(id, _)| *id)
    }

    /// The private network talks to a local node and signs with a local key
    pub fn is_private(&self) -> bool {
        self.name == Self::PRIVATE
    }
}

impl Default for NetworkTarget {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl fmt::Display for NetworkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

// ============================================================================
// Connection state
// ============================================================================

/// Which provider connections are currently established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionKind {
    /// Neither connection is live
    Disconnected,
    /// Only the read-only event stream is live
    EventOnly,
    /// A signing wallet is attached on top of a live event stream
    Interactive,
}

impl ConnectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Disconnected => "disconnected",
            ConnectionKind::EventOnly => "event-only",
            ConnectionKind::Interactive => "interactive",
        }
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative connection model, owned by the connectivity core
///
/// `address` is only ever set when `kind` is [`ConnectionKind::Interactive`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    pub kind: ConnectionKind,
    pub address: Option<Address>,
    pub chain_id: u64,
    pub network_name: String,
}

impl ConnectionState {
    pub fn disconnected(network: &NetworkTarget) -> Self {
        Self {
            kind: ConnectionKind::Disconnected,
            address: None,
            chain_id: 0,
            network_name: network.name.clone(),
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.kind == ConnectionKind::Interactive
    }

    /// Header label: `0x1234...abcd(network)` or `CONNECT WALLET`
    pub fn display_name(&self) -> String {
        match self.address {
            Some(address) => {
                let full = address.to_checksum(None);
                format!(
                    "{}...{}({})",
                    &full[..6],
                    &full[full.len() - 4..],
                    self.network_name
                )
            }
            None => "CONNECT WALLET".to_string(),
        }
    }
}

// ============================================================================
// Presale
// ============================================================================

/// Sale phase derived from `(is_open, has_closed)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    NotOpen,
    Live,
    Closed,
}

impl Phase {
    pub fn from_flags(is_open: bool, has_closed: bool) -> Self {
        if has_closed {
            Phase::Closed
        } else if is_open {
            Phase::Live
        } else {
            Phase::NotOpen
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::NotOpen => "PRE-SALE COUNTDOWN IS ON",
            Phase::Live => "PRE-SALE IS LIVE NOW",
            Phase::Closed => "PRE-SALE IS OVER",
        }
    }

    pub fn color_hint(&self) -> &'static str {
        match self {
            Phase::Live => "lime",
            Phase::NotOpen | Phase::Closed => "red",
        }
    }
}

/// Point-in-time read of the presale contract for the current user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresaleSnapshot {
    pub eth_raised: f64,
    pub has_closed: bool,
    pub is_open: bool,
    /// Seconds until the sale opens (or closes, when open); zero once closed
    pub time_to_next_event_secs: u64,
    pub eth_user_balance: f64,
    pub eth_user_invested: f64,
    pub token_user_amount: f64,
}

impl PresaleSnapshot {
    /// Derive a snapshot from the raw `getStates` read and the user's balance
    ///
    /// All timestamps come from the chain, so the phase is decided by the
    /// chain clock (`time_now`) and never by local time.
    pub fn from_chain(states: &PresaleStates, user_balance: U256, decimals: u8) -> Self {
        let has_closed = states.time_now > states.time_close;
        let is_open = !has_closed && states.time_now >= states.time_open;

        let time_to_next_event_secs = if has_closed {
            0
        } else if is_open {
            seconds_until(states.time_close, states.time_now).saturating_add(NEXT_EVENT_BUFFER_SECS)
        } else {
            seconds_until(states.time_open, states.time_now).saturating_add(NEXT_EVENT_BUFFER_SECS)
        };

        Self {
            eth_raised: from_wei(states.eth_raised, decimals),
            has_closed,
            is_open,
            time_to_next_event_secs,
            eth_user_balance: from_wei(user_balance, decimals),
            eth_user_invested: from_wei(states.user_eth_invested, decimals),
            token_user_amount: from_wei(states.user_token_amount, decimals),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_flags(self.is_open, self.has_closed)
    }

    /// Raised amount as a percentage of `hard_cap`, capped at 100
    pub fn progress_percent(&self, hard_cap: f64) -> f64 {
        if hard_cap <= 0.0 {
            return 0.0;
        }
        (self.eth_raised * 100.0 / hard_cap).clamp(0.0, 100.0)
    }
}

fn seconds_until(target: U256, now: U256) -> u64 {
    target.saturating_sub(now).try_into().unwrap_or(u64::MAX)
}

// ============================================================================
// Stake
// ============================================================================

/// Liquidity pool and staking figures from `getUIData`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StakeSnapshot {
    /// Amount of LP tokens in the pool
    pub pool_supply: f64,
    /// Pair reserve of token0
    pub reserve0: f64,
    /// Pair reserve of token1
    pub reserve1: f64,
    /// Price per token0
    pub price_reserve0: f64,
    /// Total LP tokens staked
    pub stake_supply: f64,
    /// LP tokens staked by the user
    pub stake_supply_user: f64,
    /// Duration in seconds the reward is based on (not scaled)
    pub rewards_duration: u64,
    /// Reward per `rewards_duration`
    pub reward_per_duration: f64,
    /// Reward tokens earned by the user
    pub earned: f64,
}

impl StakeSnapshot {
    /// Map the nine positional values of `getUIData`
    pub fn from_ui_data(data: &[U256; 9], decimals: u8) -> Self {
        Self {
            pool_supply: from_wei(data[0], decimals),
            reserve0: from_wei(data[1], decimals),
            reserve1: from_wei(data[2], decimals),
            price_reserve0: from_wei(data[3], decimals),
            stake_supply: from_wei(data[4], decimals),
            stake_supply_user: from_wei(data[5], decimals),
            rewards_duration: data[6].try_into().unwrap_or(u64::MAX),
            reward_per_duration: from_wei(data[7], decimals),
            earned: from_wei(data[8], decimals),
        }
    }
}

// ============================================================================
// Purchases
// ============================================================================

/// Presale entry point used by a purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PurchaseKind {
    /// `buyTokens`
    Tokens,
    /// `buyTokensAddLiquidity`
    TokensWithLiquidity,
}

impl PurchaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseKind::Tokens => "buy",
            PurchaseKind::TokensWithLiquidity => "buy-with-liquidity",
        }
    }
}

/// Validated decimal ETH amount for a purchase
///
/// Kept as text so the conversion to wei is exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseAmount(String);

impl PurchaseAmount {
    /// Accepts a plain decimal (`"1"`, `"0.25"`, `".5"`)
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (int_part, frac_part) = match text.split_once('.') {
            Some((i, f)) => (i, f),
            None => (text, ""),
        };

        let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty())
            || !digits_only(int_part)
            || !digits_only(frac_part)
        {
            return Err(eyre!("Invalid purchase amount: {:?}", text));
        }

        let normalized = match (int_part.is_empty(), frac_part.is_empty()) {
            (true, _) => format!("0.{}", frac_part),
            (false, true) => int_part.to_string(),
            (false, false) => format!("{}.{}", int_part, frac_part),
        };
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0.parse().unwrap_or(0.0)
    }

    /// Fixed-point value sent with the transaction
    pub fn to_wei(&self, decimals: u8) -> Result<U256> {
        to_wei(&self.0, decimals)
    }
}

impl fmt::Display for PurchaseAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Unit conversion
// ============================================================================

/// Fixed-point on-chain value to decimal
pub fn from_wei(value: U256, decimals: u8) -> f64 {
    format_units(value, decimals)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Decimal text to fixed-point on-chain value
pub fn to_wei(amount: &str, decimals: u8) -> Result<U256> {
    let parsed =
        parse_units(amount, decimals).map_err(|e| eyre!("Invalid amount {}: {}", amount, e))?;
    Ok(parsed.get_absolute())
}

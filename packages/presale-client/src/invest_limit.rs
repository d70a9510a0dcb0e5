//! Invest-limit validation
//!
//! Computes how much ETH the current user may still put into the sale and
//! validates the free-text amount typed into the purchase form. An amount
//! outside the allowed range marks the input invalid but the text is kept,
//! so the user can correct it.

use serde::{Deserialize, Serialize};

use crate::types::{PresaleSnapshot, PurchaseAmount};

/// Sale-wide purchase rules
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InvestPolicy {
    /// Smallest accepted purchase in ETH
    pub min: f64,
    /// Maximum total investment per wallet in ETH
    pub cap: f64,
    /// ETH needed per ETH of purchase when liquidity is added alongside
    pub liquidity_ratio: f64,
}

impl Default for InvestPolicy {
    fn default() -> Self {
        Self {
            min: 0.2,
            cap: 3.0,
            liquidity_ratio: 2.0,
        }
    }
}

impl InvestPolicy {
    /// `max(0, min(balance, cap - invested))`
    pub fn purchase_ceiling(&self, balance: f64, invested: f64) -> f64 {
        balance.min(self.cap - invested).max(0.0)
    }

    /// Purchase ceiling scaled by the liquidity ratio, never above the balance
    pub fn liquidity_ceiling(&self, balance: f64, invested: f64) -> f64 {
        (self.purchase_ceiling(balance, invested) * self.liquidity_ratio)
            .min(balance)
            .max(0.0)
    }

    /// Accepted range for a plain purchase given the latest snapshot
    pub fn limit_for(&self, snapshot: &PresaleSnapshot) -> InvestLimit {
        InvestLimit {
            min: self.min,
            max: self.purchase_ceiling(snapshot.eth_user_balance, snapshot.eth_user_invested),
        }
    }

    /// Accepted range for a purchase with liquidity given the latest snapshot
    pub fn liquidity_limit_for(&self, snapshot: &PresaleSnapshot) -> InvestLimit {
        InvestLimit {
            min: self.min,
            max: self.liquidity_ceiling(snapshot.eth_user_balance, snapshot.eth_user_invested),
        }
    }
}

/// Inclusive `[min, max]` range an amount must fall into
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InvestLimit {
    pub min: f64,
    pub max: f64,
}

impl InvestLimit {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Sanitized amount text plus its validity against a limit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountInput {
    pub text: String,
    pub valid: bool,
}

impl AmountInput {
    /// Sanitize `raw` and check it against `limit`
    pub fn evaluate(raw: &str, limit: &InvestLimit) -> Self {
        let text = sanitize(raw);
        let valid = match text.parse::<f64>() {
            Ok(value) => value.is_finite() && limit.contains(value),
            Err(_) => false,
        };
        Self { text, valid }
    }

    /// The amount to submit, only when the input is valid
    pub fn purchase_amount(&self) -> Option<PurchaseAmount> {
        if !self.valid {
            return None;
        }
        PurchaseAmount::parse(&self.text).ok()
    }
}

/// Keep digits and the first decimal separator (`.` or `,`, normalized to `.`)
pub fn sanitize(raw: &str) -> String {
    let mut seen_separator = false;
    raw.chars()
        .filter_map(|c| match c {
            '0'..='9' => Some(c),
            '.' | ',' if !seen_separator => {
                seen_separator = true;
                Some('.')
            }
            _ => None,
        })
        .collect()
}

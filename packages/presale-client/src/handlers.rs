//! Chain query and command handlers
//!
//! Each handler publishes exactly one terminal result event per invocation,
//! whatever happens. Failures (no connection, RPC errors, rejected or
//! reverted transactions) become the failure side of that result.

use alloy::primitives::{Address, TxHash, U256};
use eyre::{eyre, Result, WrapErr};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus};
use crate::connectivity::ConnectivityCore;
use crate::types::{from_wei, PresaleSnapshot, PurchaseAmount, PurchaseKind, StakeSnapshot};

/// Request/response adapters over the connectivity core's contract handles
pub struct ChainHandlers {
    core: Arc<ConnectivityCore>,
    bus: EventBus,
    decimals: u8,
}

impl ChainHandlers {
    pub fn new(core: Arc<ConnectivityCore>, bus: EventBus, decimals: u8) -> Self {
        Self {
            core,
            bus,
            decimals,
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn query_presale_state(&self) {
        let result = self.presale_state().await.map_err(describe);
        if let Err(e) = &result {
            warn!(error = %e, "Presale state query failed");
        }
        self.bus.publish(Event::PresaleStateResult(result));
    }

    async fn presale_state(&self) -> Result<PresaleSnapshot> {
        let ctx = self
            .core
            .read_context()
            .await
            .ok_or_else(|| eyre!("Presale contract is not available"))?;

        let states = ctx
            .stream
            .presale_states(ctx.contracts.presale, ctx.user.unwrap_or(Address::ZERO))
            .await?;

        let balance = match ctx.user {
            Some(user) => ctx
                .stream
                .balance(user)
                .await
                .wrap_err("Failed to read account balance")?,
            None => U256::ZERO,
        };

        let snapshot = PresaleSnapshot::from_chain(&states, balance, self.decimals);
        debug!(
            eth_raised = snapshot.eth_raised,
            is_open = snapshot.is_open,
            has_closed = snapshot.has_closed,
            next_event_secs = snapshot.time_to_next_event_secs,
            "Presale state"
        );
        Ok(snapshot)
    }

    pub async fn query_stake_state(&self) {
        let result = self.stake_state().await.map_err(describe);
        if let Err(e) = &result {
            warn!(error = %e, "Stake state query failed");
        }
        self.bus.publish(Event::StakeStateResult(result));
    }

    async fn stake_state(&self) -> Result<StakeSnapshot> {
        let ctx = self
            .core
            .read_context()
            .await
            .ok_or_else(|| eyre!("Stake contract is not available"))?;
        let data = ctx
            .stream
            .stake_ui_data(
                ctx.contracts.liquidity_pool,
                ctx.user.unwrap_or(Address::ZERO),
            )
            .await?;
        Ok(StakeSnapshot::from_ui_data(&data, self.decimals))
    }

    /// Sale token balance of the connected account
    pub async fn query_token_amount(&self) {
        let result = self.token_amount().await.map_err(describe);
        self.bus.publish(Event::TokenAmountResult(result));
    }

    async fn token_amount(&self) -> Result<f64> {
        let ctx = self
            .core
            .read_context()
            .await
            .ok_or_else(|| eyre!("Token contract is not available"))?;
        let Some(user) = ctx.user else {
            return Ok(0.0);
        };
        let balance = ctx.stream.token_balance(ctx.contracts.token, user).await?;
        Ok(from_wei(balance, self.decimals))
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Send a purchase, publish its hash, then its terminal result
    pub async fn submit_purchase(&self, kind: PurchaseKind, amount: PurchaseAmount) {
        let result = self.purchase(kind, &amount).await;
        match &result {
            Ok(hash) => info!(
                kind = kind.as_str(),
                tx_hash = %hash,
                amount = %amount,
                "Purchase confirmed"
            ),
            Err(e) => warn!(
                kind = kind.as_str(),
                amount = %amount,
                error = %format!("{:#}", e),
                "Purchase failed"
            ),
        }
        self.bus.publish(Event::PurchaseResult {
            kind,
            result: result.map_err(describe),
        });
    }

    async fn purchase(&self, kind: PurchaseKind, amount: &PurchaseAmount) -> Result<TxHash> {
        let ctx = self
            .core
            .write_context()
            .await
            .ok_or_else(|| eyre!("No wallet connected"))?;
        let value = amount.to_wei(self.decimals)?;

        let submitted = ctx
            .wallet
            .submit_purchase(ctx.contracts.presale, kind, ctx.address, value)
            .await?;
        let hash = submitted.hash;
        self.bus.publish(Event::TransactionSubmitted { kind, hash });

        submitted.confirmation.await?;
        Ok(hash)
    }
}

/// Failure text carried by result events
fn describe(e: eyre::Report) -> String {
    format!("{:#}", e)
}

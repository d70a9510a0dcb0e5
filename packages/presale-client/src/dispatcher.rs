//! Command dispatcher
//!
//! Routes each [`Command`] to its handler synchronously at dispatch time;
//! the handler body then runs on its own task and reports through the bus.
//! At most one amount-bearing command may be in flight per session: a second
//! submission is rejected with [`DispatchError::PurchasePending`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::debug;

use crate::handlers::ChainHandlers;
use crate::types::{PurchaseAmount, PurchaseKind};

/// Inbound requests from UI state holders
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    RequestPresaleState,
    RequestStakeState,
    RequestTokenAmount,
    SubmitPurchase { amount: PurchaseAmount },
    SubmitPurchaseWithLiquidity { amount: PurchaseAmount },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::RequestPresaleState => "request-presale-state",
            Command::RequestStakeState => "request-stake-state",
            Command::RequestTokenAmount => "request-token-amount",
            Command::SubmitPurchase { .. } => "submit-purchase",
            Command::SubmitPurchaseWithLiquidity { .. } => "submit-purchase-with-liquidity",
        }
    }
}

/// Why a command was not accepted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("a purchase is already pending")]
    PurchasePending,

    #[error("the purchase amount is not valid")]
    InvalidAmount,

    #[error("session is shut down")]
    SessionClosed,

    #[error("no async runtime available to run the handler")]
    NoRuntime,
}

/// Holds the session's single purchase slot until dropped
struct PurchaseGuard(Arc<AtomicBool>);

impl Drop for PurchaseGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<ChainHandlers>,
    purchase_pending: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(handlers: Arc<ChainHandlers>) -> Self {
        Self {
            handlers,
            purchase_pending: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Route a command to its handler
    ///
    /// Returns once the handler is scheduled; its outcome arrives on the bus.
    pub fn dispatch(&self, command: Command) -> Result<(), DispatchError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::SessionClosed);
        }
        let runtime = Handle::try_current().map_err(|_| DispatchError::NoRuntime)?;
        debug!(command = command.name(), "Dispatching command");

        let handlers = self.handlers.clone();
        match command {
            Command::RequestPresaleState => {
                runtime.spawn(async move { handlers.query_presale_state().await });
            }
            Command::RequestStakeState => {
                runtime.spawn(async move { handlers.query_stake_state().await });
            }
            Command::RequestTokenAmount => {
                runtime.spawn(async move { handlers.query_token_amount().await });
            }
            Command::SubmitPurchase { amount } => {
                let guard = self.claim_purchase_slot()?;
                runtime.spawn(async move {
                    handlers.submit_purchase(PurchaseKind::Tokens, amount).await;
                    drop(guard);
                });
            }
            Command::SubmitPurchaseWithLiquidity { amount } => {
                let guard = self.claim_purchase_slot()?;
                runtime.spawn(async move {
                    handlers
                        .submit_purchase(PurchaseKind::TokensWithLiquidity, amount)
                        .await;
                    drop(guard);
                });
            }
        }
        Ok(())
    }

    /// An amount-bearing command is in flight
    pub fn purchase_pending(&self) -> bool {
        self.purchase_pending.load(Ordering::SeqCst)
    }

    /// Reject every later command
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn claim_purchase_slot(&self) -> Result<PurchaseGuard, DispatchError> {
        self.purchase_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| DispatchError::PurchasePending)?;
        Ok(PurchaseGuard(self.purchase_pending.clone()))
    }
}

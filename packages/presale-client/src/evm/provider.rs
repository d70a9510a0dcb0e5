//! Provider capabilities the connectivity core depends on
//!
//! The core never talks to alloy directly. Any wallet that can list accounts,
//! report its chain and sign purchases can back the interactive connection;
//! any node that can serve reads and push blocks/logs can back the event
//! stream. Push notifications from a wallet are optional.

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use eyre::Result;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::types::{NetworkTarget, PurchaseKind};

/// Raw result of the presale contract's `getStates(address)`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresaleStates {
    pub eth_raised: U256,
    pub time_open: U256,
    pub time_close: U256,
    /// Block timestamp at the time of the read
    pub time_now: U256,
    pub user_eth_invested: U256,
    pub user_token_amount: U256,
}

// ============================================================================
// Interactive (signing) connection
// ============================================================================

/// Notifications a wallet may push after authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletNotification {
    /// Transport closed by the wallet
    Close,
    /// Wallet session disconnected
    Disconnect,
    /// Account list changed; the first entry is the primary account
    AccountsChanged(Vec<Address>),
    /// EIP-1193 `chainChanged`
    ChainChanged(u64),
    /// Legacy `networkChanged`; carries the network id, not necessarily the chain id
    NetworkChanged(u64),
}

/// A transaction that has been accepted by the node but not yet mined
pub struct SubmittedTx {
    pub hash: TxHash,
    /// Resolves once the transaction is mined; fails when it reverted
    pub confirmation: BoxFuture<'static, Result<()>>,
}

impl fmt::Debug for SubmittedTx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmittedTx")
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

/// An authorized wallet able to sign transactions
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Accounts exposed to the client, primary first
    async fn list_accounts(&self) -> Result<Vec<Address>>;

    /// Chain id as seen by the wallet
    async fn chain_id(&self) -> Result<u64>;

    /// Attach a notification listener, if the wallet can push notifications
    ///
    /// Dropping the receiver detaches the listener.
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<WalletNotification>>;

    /// Send a value-bearing purchase to the presale contract
    async fn submit_purchase(
        &self,
        presale: Address,
        kind: PurchaseKind,
        beneficiary: Address,
        value: U256,
    ) -> Result<SubmittedTx>;
}

/// External wallet-selection mechanism
///
/// Owns the cached authorization, an opaque token the core only checks for
/// presence and clears.
#[async_trait]
pub trait WalletConnector: Send + Sync {
    /// Ask the user (or the local key store) for an authorized wallet
    async fn connect(&self, network: &NetworkTarget) -> Result<Arc<dyn WalletProvider>>;

    /// Authorization cached from a previous session
    fn cached_authorization(&self) -> Option<String>;

    fn clear_cached_authorization(&self);
}

// ============================================================================
// Event-streaming (read-only) connection
// ============================================================================

/// Which contract logs the stream should forward
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamFilter {
    /// Presale contract whose `TokensPurchased` logs are forwarded
    pub presale: Option<Address>,
    /// Forward `Staked` logs for this account only
    pub staker: Option<Address>,
}

/// Notifications pushed by the event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamNotification {
    NewBlock(u64),
    TokensPurchased {
        beneficiary: Address,
        value: U256,
    },
    Staked {
        user: Address,
        amount: U256,
    },
    /// The transport closed or failed; the connection is unusable
    Closed(String),
}

/// Read-only connection used for contract reads and log/block monitoring
#[async_trait]
pub trait StreamProvider: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// Native balance of `account`
    async fn balance(&self, account: Address) -> Result<U256>;

    async fn presale_states(&self, presale: Address, account: Address) -> Result<PresaleStates>;

    async fn stake_ui_data(&self, pool: Address, account: Address) -> Result<[U256; 9]>;

    async fn token_balance(&self, token: Address, account: Address) -> Result<U256>;

    /// Start forwarding blocks and matching logs
    ///
    /// Each call replaces the previous watch on this connection.
    async fn watch(&self, filter: StreamFilter)
        -> Result<mpsc::UnboundedReceiver<StreamNotification>>;

    /// Release the transport; must be safe to call more than once
    async fn shutdown(&self);
}

/// Opens event-streaming connections
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn open(&self, network: &NetworkTarget) -> Result<Arc<dyn StreamProvider>>;
}

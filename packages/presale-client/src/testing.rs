//! In-memory providers for tests and offline runs
//!
//! A [`MockChain`] is the shared world: accounts, chain ids, contract state
//! and the push channels of every live wallet/stream listener. The mock
//! connectors hand out providers backed by it, and tests drive provider
//! notifications through [`MockChain::emit_wallet`] and
//! [`MockChain::emit_stream`].
//!
//! ```ignore
//! let chain = MockChain::new().with_account(user).with_chain(4);
//! let session = Session::create(config, chain.wallet_connector(), chain.stream_connector())?;
//! session.connect().await;
//! chain.emit_wallet(WalletNotification::ChainChanged(1337));
//! ```

use alloy::primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use eyre::{eyre, Result};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::evm::provider::{
    PresaleStates, StreamConnector, StreamFilter, StreamNotification, StreamProvider, SubmittedTx,
    WalletConnector, WalletNotification, WalletProvider,
};
use crate::types::{NetworkTarget, PurchaseKind};

/// How the mock wallet answers a purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseBehavior {
    /// Accepted and mined
    Confirm,
    /// Refused by the user before submission
    Reject,
    /// Submitted, then reverted on chain
    Revert,
}

/// A purchase the mock wallet received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPurchase {
    pub presale: Address,
    pub kind: PurchaseKind,
    pub beneficiary: Address,
    pub value: U256,
}

struct WatchRegistration {
    stream_id: u64,
    filter: StreamFilter,
    sender: mpsc::UnboundedSender<StreamNotification>,
}

struct ChainState {
    accounts: Vec<Address>,
    wallet_chain_id: u64,
    stream_chain_id: u64,
    presale: PresaleStates,
    stake: [U256; 9],
    balances: HashMap<Address, U256>,
    token_balances: HashMap<Address, U256>,
    cached_authorization: Option<String>,
    fail_wallet_connect: bool,
    fail_stream_open: bool,
    fail_reads: bool,
    wallet_pushes: bool,
    purchase_behavior: PurchaseBehavior,
    confirmation_delay: Duration,
    wallet_connects: usize,
    stream_opens: usize,
    stream_shutdowns: usize,
    opened_networks: Vec<String>,
    presale_reads: usize,
    purchases: Vec<RecordedPurchase>,
    wallet_listeners: Vec<mpsc::UnboundedSender<WalletNotification>>,
    stream_watchers: Vec<WatchRegistration>,
    next_stream_id: u64,
}

impl Default for ChainState {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            wallet_chain_id: 4,
            stream_chain_id: 4,
            presale: PresaleStates::default(),
            stake: [U256::ZERO; 9],
            balances: HashMap::new(),
            token_balances: HashMap::new(),
            cached_authorization: None,
            fail_wallet_connect: false,
            fail_stream_open: false,
            fail_reads: false,
            wallet_pushes: true,
            purchase_behavior: PurchaseBehavior::Confirm,
            confirmation_delay: Duration::from_secs(1),
            wallet_connects: 0,
            stream_opens: 0,
            stream_shutdowns: 0,
            opened_networks: Vec::new(),
            presale_reads: 0,
            purchases: Vec::new(),
            wallet_listeners: Vec::new(),
            stream_watchers: Vec::new(),
            next_stream_id: 0,
        }
    }
}

/// Shared in-memory chain and wallet
#[derive(Clone, Default)]
pub struct MockChain {
    inner: Arc<Mutex<ChainState>>,
}

impl MockChain {
    /// Chain 4 for both wallet and stream, no accounts, all-zero contract state
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // ========================================================================
    // Setup
    // ========================================================================

    pub fn with_account(self, account: Address) -> Self {
        self.state().accounts.push(account);
        self
    }

    /// Wallet and newly opened streams both report `chain_id`
    pub fn with_chain(self, chain_id: u64) -> Self {
        self.set_chain(chain_id);
        self
    }

    pub fn set_chain(&self, chain_id: u64) {
        let mut state = self.state();
        state.wallet_chain_id = chain_id;
        state.stream_chain_id = chain_id;
    }

    pub fn set_wallet_chain(&self, chain_id: u64) {
        self.state().wallet_chain_id = chain_id;
    }

    pub fn set_accounts(&self, accounts: Vec<Address>) {
        self.state().accounts = accounts;
    }

    pub fn set_presale_states(&self, states: PresaleStates) {
        self.state().presale = states;
    }

    /// Sale window relative to the chain clock, in seconds
    pub fn set_sale_window(&self, open: u64, close: u64, now: u64) {
        let mut state = self.state();
        state.presale.time_open = U256::from(open);
        state.presale.time_close = U256::from(close);
        state.presale.time_now = U256::from(now);
    }

    pub fn set_stake_data(&self, data: [U256; 9]) {
        self.state().stake = data;
    }

    pub fn set_balance(&self, account: Address, balance: U256) {
        self.state().balances.insert(account, balance);
    }

    pub fn set_token_balance(&self, account: Address, balance: U256) {
        self.state().token_balances.insert(account, balance);
    }

    pub fn set_cached_authorization(&self, token: Option<&str>) {
        self.state().cached_authorization = token.map(str::to_string);
    }

    pub fn fail_wallet_connect(&self, fail: bool) {
        self.state().fail_wallet_connect = fail;
    }

    pub fn fail_stream_open(&self, fail: bool) {
        self.state().fail_stream_open = fail;
    }

    /// Make every contract read fail
    pub fn fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    /// Whether wallets hand out a notification channel
    pub fn set_wallet_pushes(&self, pushes: bool) {
        self.state().wallet_pushes = pushes;
    }

    pub fn set_purchase_behavior(&self, behavior: PurchaseBehavior) {
        self.state().purchase_behavior = behavior;
    }

    pub fn set_confirmation_delay(&self, delay: Duration) {
        self.state().confirmation_delay = delay;
    }

    pub fn wallet_connector(&self) -> Arc<MockWalletConnector> {
        Arc::new(MockWalletConnector {
            chain: self.clone(),
        })
    }

    pub fn stream_connector(&self) -> Arc<MockStreamConnector> {
        Arc::new(MockStreamConnector {
            chain: self.clone(),
        })
    }

    // ========================================================================
    // Push notifications
    // ========================================================================

    /// Push to every live wallet listener; returns how many received it
    pub fn emit_wallet(&self, notification: WalletNotification) -> usize {
        let mut state = self.state();
        state.wallet_listeners.retain(|tx| !tx.is_closed());
        state
            .wallet_listeners
            .iter()
            .filter(|tx| tx.send(notification.clone()).is_ok())
            .count()
    }

    /// Push to every live stream watcher; returns how many received it
    ///
    /// Log notifications only reach watchers whose filter matches.
    pub fn emit_stream(&self, notification: StreamNotification) -> usize {
        let mut state = self.state();
        state.stream_watchers.retain(|w| !w.sender.is_closed());
        state
            .stream_watchers
            .iter()
            .filter(|w| match &notification {
                StreamNotification::TokensPurchased { .. } => w.filter.presale.is_some(),
                StreamNotification::Staked { user, .. } => w.filter.staker == Some(*user),
                StreamNotification::NewBlock(_) | StreamNotification::Closed(_) => true,
            })
            .filter(|w| w.sender.send(notification.clone()).is_ok())
            .count()
    }

    // ========================================================================
    // Observations
    // ========================================================================

    pub fn live_wallet_listeners(&self) -> usize {
        let mut state = self.state();
        state.wallet_listeners.retain(|tx| !tx.is_closed());
        state.wallet_listeners.len()
    }

    pub fn live_stream_watchers(&self) -> usize {
        let mut state = self.state();
        state.stream_watchers.retain(|w| !w.sender.is_closed());
        state.stream_watchers.len()
    }

    /// Filter of the most recent live watch, if any
    pub fn current_stream_filter(&self) -> Option<StreamFilter> {
        let mut state = self.state();
        state.stream_watchers.retain(|w| !w.sender.is_closed());
        state.stream_watchers.last().map(|w| w.filter)
    }

    pub fn cached_authorization(&self) -> Option<String> {
        self.state().cached_authorization.clone()
    }

    pub fn wallet_connects(&self) -> usize {
        self.state().wallet_connects
    }

    pub fn stream_opens(&self) -> usize {
        self.state().stream_opens
    }

    pub fn stream_shutdowns(&self) -> usize {
        self.state().stream_shutdowns
    }

    pub fn opened_networks(&self) -> Vec<String> {
        self.state().opened_networks.clone()
    }

    pub fn presale_reads(&self) -> usize {
        self.state().presale_reads
    }

    pub fn purchases(&self) -> Vec<RecordedPurchase> {
        self.state().purchases.clone()
    }
}

// ============================================================================
// Wallet
// ============================================================================

pub struct MockWalletConnector {
    chain: MockChain,
}

#[async_trait]
impl WalletConnector for MockWalletConnector {
    async fn connect(&self, _network: &NetworkTarget) -> Result<Arc<dyn WalletProvider>> {
        let mut state = self.chain.state();
        state.wallet_connects += 1;
        if state.fail_wallet_connect {
            return Err(eyre!("User closed the wallet selection"));
        }
        state.cached_authorization = Some("mock-wallet".to_string());
        Ok(Arc::new(MockWallet {
            chain: self.chain.clone(),
        }))
    }

    fn cached_authorization(&self) -> Option<String> {
        self.chain.state().cached_authorization.clone()
    }

    fn clear_cached_authorization(&self) {
        self.chain.state().cached_authorization = None;
    }
}

pub struct MockWallet {
    chain: MockChain,
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn list_accounts(&self) -> Result<Vec<Address>> {
        Ok(self.chain.state().accounts.clone())
    }

    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain.state().wallet_chain_id)
    }

    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<WalletNotification>> {
        let mut state = self.chain.state();
        if !state.wallet_pushes {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.wallet_listeners.push(tx);
        Some(rx)
    }

    async fn submit_purchase(
        &self,
        presale: Address,
        kind: PurchaseKind,
        beneficiary: Address,
        value: U256,
    ) -> Result<SubmittedTx> {
        let (behavior, delay, hash) = {
            let mut state = self.chain.state();
            if state.purchase_behavior == PurchaseBehavior::Reject {
                return Err(eyre!("User denied transaction signature"));
            }
            state.purchases.push(RecordedPurchase {
                presale,
                kind,
                beneficiary,
                value,
            });
            let nonce = state.purchases.len() as u8;
            (
                state.purchase_behavior,
                state.confirmation_delay,
                TxHash::with_last_byte(nonce),
            )
        };

        let confirmation = async move {
            tokio::time::sleep(delay).await;
            match behavior {
                PurchaseBehavior::Revert => Err(eyre!("Purchase transaction reverted")),
                PurchaseBehavior::Confirm | PurchaseBehavior::Reject => Ok(()),
            }
        }
        .boxed();

        Ok(SubmittedTx { hash, confirmation })
    }
}

// ============================================================================
// Event stream
// ============================================================================

pub struct MockStreamConnector {
    chain: MockChain,
}

#[async_trait]
impl StreamConnector for MockStreamConnector {
    async fn open(&self, network: &NetworkTarget) -> Result<Arc<dyn StreamProvider>> {
        let mut state = self.chain.state();
        state.stream_opens += 1;
        state.opened_networks.push(network.name.clone());
        if state.fail_stream_open {
            return Err(eyre!("WebSocket connection refused"));
        }
        state.next_stream_id += 1;
        Ok(Arc::new(MockStream {
            id: state.next_stream_id,
            chain_id: state.stream_chain_id,
            chain: self.chain.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A node connection; its chain id is fixed when opened
pub struct MockStream {
    id: u64,
    chain_id: u64,
    chain: MockChain,
    closed: AtomicBool,
}

impl MockStream {
    fn check(&self, state: &ChainState) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(eyre!("Event stream {} is closed", self.id));
        }
        if state.fail_reads {
            return Err(eyre!("execution reverted"));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamProvider for MockStream {
    async fn chain_id(&self) -> Result<u64> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(eyre!("Event stream {} is closed", self.id));
        }
        Ok(self.chain_id)
    }

    async fn balance(&self, account: Address) -> Result<U256> {
        let state = self.chain.state();
        self.check(&state)?;
        Ok(state.balances.get(&account).copied().unwrap_or_default())
    }

    async fn presale_states(&self, _presale: Address, account: Address) -> Result<PresaleStates> {
        let mut state = self.chain.state();
        self.check(&state)?;
        state.presale_reads += 1;
        let mut states = state.presale.clone();
        if account == Address::ZERO {
            states.user_eth_invested = U256::ZERO;
            states.user_token_amount = U256::ZERO;
        }
        Ok(states)
    }

    async fn stake_ui_data(&self, _pool: Address, _account: Address) -> Result<[U256; 9]> {
        let state = self.chain.state();
        self.check(&state)?;
        Ok(state.stake)
    }

    async fn token_balance(&self, _token: Address, account: Address) -> Result<U256> {
        let state = self.chain.state();
        self.check(&state)?;
        Ok(state.token_balances.get(&account).copied().unwrap_or_default())
    }

    async fn watch(
        &self,
        filter: StreamFilter,
    ) -> Result<mpsc::UnboundedReceiver<StreamNotification>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(eyre!("Event stream {} is closed", self.id));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.chain.state();
        state.stream_watchers.retain(|w| w.stream_id != self.id);
        state.stream_watchers.push(WatchRegistration {
            stream_id: self.id,
            filter,
            sender: tx,
        });
        Ok(rx)
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.chain.state();
        state.stream_shutdowns += 1;
        state.stream_watchers.retain(|w| w.stream_id != self.id);
    }
}

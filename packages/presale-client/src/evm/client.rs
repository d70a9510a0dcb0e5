//! alloy-backed wallet and event-stream providers
//!
//! # Wallet
//!
//! [`LocalSignerConnector`] authorizes a [`SignerWallet`] from a configured
//! private key. Transactions are built with
//! `ProviderBuilder::with_recommended_fillers()` so nonce, gas and fees are
//! filled automatically.
//!
//! # Event stream
//!
//! [`WsStreamConnector`] opens a WebSocket [`WsStreamProvider`] that serves
//! contract reads and pushes new block headers plus presale logs.

use alloy::{
    network::EthereumWallet,
    primitives::{Address, U256},
    providers::{Provider, ProviderBuilder, RootProvider, WsConnect},
    pubsub::PubSubFrontend,
    rpc::types::Filter,
    signers::local::PrivateKeySigner,
    sol_types::SolEvent,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use eyre::{eyre, Result, WrapErr};
use futures::{FutureExt, StreamExt};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::NodeEndpoints;
use crate::evm::contracts::{Crowdsale, StakeFarm, Token};
use crate::evm::provider::{
    PresaleStates, StreamConnector, StreamFilter, StreamNotification, StreamProvider, SubmittedTx,
    WalletConnector, WalletNotification, WalletProvider,
};
use crate::redact::Redacted;
use crate::types::{NetworkTarget, PurchaseKind};

/// Token written to the authorization cache by the local signer
const LOCAL_SIGNER_AUTHORIZATION: &str = "local-signer";

// ============================================================================
// Authorization cache
// ============================================================================

/// File-backed cache of the opaque wallet authorization
///
/// I/O failures are logged and treated as "nothing cached".
#[derive(Debug, Clone)]
pub struct AuthorizationCache {
    path: PathBuf,
}

impl AuthorizationCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Option<String> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                (!token.is_empty()).then(|| token.to_string())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to read wallet authorization cache");
                None
            }
        }
    }

    pub fn store(&self, token: &str) {
        if let Err(e) = fs::write(&self.path, token) {
            warn!(path = ?self.path, error = %e, "Failed to write wallet authorization cache");
        }
    }

    pub fn clear(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Cleared wallet authorization cache"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = ?self.path, error = %e, "Failed to clear wallet authorization cache");
            }
        }
    }
}

// ============================================================================
// Local signer wallet
// ============================================================================

/// Wallet backed by a local private key and a JSON-RPC endpoint
pub struct SignerWallet {
    rpc_url: Url,
    /// Read-only provider for chain queries
    provider: RootProvider<Http<Client>>,
    signer: PrivateKeySigner,
}

impl SignerWallet {
    pub fn new(rpc_url: &str, private_key: &str) -> Result<Self> {
        let signer: PrivateKeySigner = private_key.parse().wrap_err("Invalid private key")?;
        let url: Url = rpc_url.parse().wrap_err("Invalid RPC URL")?;
        let provider = ProviderBuilder::new().on_http(url.clone());

        info!(
            address = %signer.address(),
            rpc_url = %rpc_url,
            "Local signer wallet initialized"
        );

        Ok(Self {
            rpc_url: url,
            provider,
            signer,
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

#[async_trait]
impl WalletProvider for SignerWallet {
    async fn list_accounts(&self) -> Result<Vec<Address>> {
        Ok(vec![self.signer.address()])
    }

    async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| eyre!("Failed to get chain id: {}", e))
    }

    /// A local key has nothing to push
    fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<WalletNotification>> {
        None
    }

    async fn submit_purchase(
        &self,
        presale: Address,
        kind: PurchaseKind,
        beneficiary: Address,
        value: U256,
    ) -> Result<SubmittedTx> {
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.clone());

        let contract = Crowdsale::new(presale, &provider);

        debug!(
            kind = kind.as_str(),
            presale = %presale,
            beneficiary = %beneficiary,
            value = %value,
            "Submitting purchase"
        );

        let pending_tx = match kind {
            PurchaseKind::Tokens => contract.buyTokens(beneficiary).value(value).send().await,
            PurchaseKind::TokensWithLiquidity => {
                contract
                    .buyTokensAddLiquidity(beneficiary)
                    .value(value)
                    .send()
                    .await
            }
        }
        .map_err(|e| eyre!("Failed to send purchase tx: {}", e))?;

        let hash = *pending_tx.tx_hash();
        info!(tx_hash = %hash, kind = kind.as_str(), "Purchase transaction sent");

        let confirmation = async move {
            let receipt = pending_tx
                .get_receipt()
                .await
                .map_err(|e| eyre!("Failed to get receipt: {}", e))?;
            if !receipt.status() {
                return Err(eyre!("Purchase transaction reverted"));
            }
            Ok(())
        }
        .boxed();

        Ok(SubmittedTx { hash, confirmation })
    }
}

/// Authorizes a [`SignerWallet`] from the configured private key
pub struct LocalSignerConnector {
    endpoints: NodeEndpoints,
    private_key: Option<Redacted<String>>,
    cache: AuthorizationCache,
}

impl LocalSignerConnector {
    pub fn new(
        endpoints: NodeEndpoints,
        private_key: Option<Redacted<String>>,
        cache: AuthorizationCache,
    ) -> Self {
        Self {
            endpoints,
            private_key,
            cache,
        }
    }
}

#[async_trait]
impl WalletConnector for LocalSignerConnector {
    async fn connect(&self, network: &NetworkTarget) -> Result<Arc<dyn WalletProvider>> {
        let key = self
            .private_key
            .as_ref()
            .ok_or_else(|| eyre!("WALLET_PRIVATE_KEY is not set"))?;
        let rpc_url = self.endpoints.rpc_url(network)?;
        let wallet = SignerWallet::new(&rpc_url, key.expose())?;

        self.cache.store(LOCAL_SIGNER_AUTHORIZATION);
        Ok(Arc::new(wallet))
    }

    fn cached_authorization(&self) -> Option<String> {
        // A cached token is useless once the key is gone
        self.private_key.as_ref()?;
        self.cache.load()
    }

    fn clear_cached_authorization(&self) {
        self.cache.clear();
    }
}

// ============================================================================
// WebSocket event stream
// ============================================================================

/// Read-only WebSocket connection
pub struct WsStreamProvider {
    provider: RootProvider<PubSubFrontend>,
    url: String,
    watchers: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl WsStreamProvider {
    pub async fn connect(url: &str) -> Result<Self> {
        let provider = ProviderBuilder::new()
            .on_ws(WsConnect::new(url))
            .await
            .map_err(|e| eyre!("Failed to open WebSocket {}: {}", url, e))?;

        info!(url = %url, "Event stream connected");

        Ok(Self {
            provider,
            url: url.to_string(),
            watchers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(eyre!("Event stream {} is closed", self.url));
        }
        Ok(())
    }
}

#[async_trait]
impl StreamProvider for WsStreamProvider {
    async fn chain_id(&self) -> Result<u64> {
        self.ensure_open()?;
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| eyre!("Failed to get chain id: {}", e))
    }

    async fn balance(&self, account: Address) -> Result<U256> {
        self.ensure_open()?;
        self.provider
            .get_balance(account)
            .await
            .map_err(|e| eyre!("Failed to get balance of {}: {}", account, e))
    }

    async fn presale_states(&self, presale: Address, account: Address) -> Result<PresaleStates> {
        self.ensure_open()?;
        let contract = Crowdsale::new(presale, &self.provider);
        let states = contract
            .getStates(account)
            .call()
            .await
            .map_err(|e| eyre!("Failed to get presale states: {}", e))?;

        Ok(PresaleStates {
            eth_raised: states.ethRaised,
            time_open: states.timeOpen,
            time_close: states.timeClose,
            time_now: states.timeNow,
            user_eth_invested: states.userEthInvested,
            user_token_amount: states.userTokenAmount,
        })
    }

    async fn stake_ui_data(&self, pool: Address, account: Address) -> Result<[U256; 9]> {
        self.ensure_open()?;
        let contract = StakeFarm::new(pool, &self.provider);
        let data = contract
            .getUIData(account)
            .call()
            .await
            .map_err(|e| eyre!("Failed to get stake UI data: {}", e))?;
        Ok(data._0)
    }

    async fn token_balance(&self, token: Address, account: Address) -> Result<U256> {
        self.ensure_open()?;
        let contract = Token::new(token, &self.provider);
        let balance = contract
            .balanceOf(account)
            .call()
            .await
            .map_err(|e| eyre!("Failed to get token balance: {}", e))?;
        Ok(balance._0)
    }

    async fn watch(
        &self,
        filter: StreamFilter,
    ) -> Result<mpsc::UnboundedReceiver<StreamNotification>> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handles = Vec::new();

        let blocks = self
            .provider
            .subscribe_blocks()
            .await
            .map_err(|e| eyre!("Failed to subscribe to blocks: {}", e))?;
        let block_tx = tx.clone();
        handles.push(tokio::spawn(async move {
            let mut stream = blocks.into_stream();
            while let Some(header) = stream.next().await {
                if block_tx.send(StreamNotification::NewBlock(header.number)).is_err() {
                    return;
                }
            }
            let _ = block_tx.send(StreamNotification::Closed(
                "block subscription ended".to_string(),
            ));
        }));

        if let Some(presale) = filter.presale {
            let purchases = Filter::new()
                .address(presale)
                .event_signature(Crowdsale::TokensPurchased::SIGNATURE_HASH);
            let sub = self
                .provider
                .subscribe_logs(&purchases)
                .await
                .map_err(|e| eyre!("Failed to subscribe to purchase logs: {}", e))?;
            let log_tx = tx.clone();
            handles.push(tokio::spawn(async move {
                let mut stream = sub.into_stream();
                while let Some(log) = stream.next().await {
                    match log.log_decode::<Crowdsale::TokensPurchased>() {
                        Ok(decoded) => {
                            let event = decoded.inner.data;
                            let notification = StreamNotification::TokensPurchased {
                                beneficiary: event.beneficiary,
                                value: event.value,
                            };
                            if log_tx.send(notification).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to decode TokensPurchased log"),
                    }
                }
            }));

            if let Some(staker) = filter.staker {
                let stakes = Filter::new()
                    .address(presale)
                    .event_signature(Crowdsale::Staked::SIGNATURE_HASH)
                    .topic1(staker.into_word());
                let sub = self
                    .provider
                    .subscribe_logs(&stakes)
                    .await
                    .map_err(|e| eyre!("Failed to subscribe to stake logs: {}", e))?;
                let log_tx = tx.clone();
                handles.push(tokio::spawn(async move {
                    let mut stream = sub.into_stream();
                    while let Some(log) = stream.next().await {
                        match log.log_decode::<Crowdsale::Staked>() {
                            Ok(decoded) => {
                                let event = decoded.inner.data;
                                let notification = StreamNotification::Staked {
                                    user: event.user,
                                    amount: event.amount,
                                };
                                if log_tx.send(notification).is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!(error = %e, "Failed to decode Staked log"),
                        }
                    }
                }));
            }
        }

        let mut watchers = self.watchers.lock().await;
        for old in watchers.drain(..) {
            old.abort();
        }
        *watchers = handles;

        debug!(
            url = %self.url,
            presale = ?filter.presale,
            staker = ?filter.staker,
            "Event stream watch attached"
        );

        Ok(rx)
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for handle in self.watchers.lock().await.drain(..) {
            handle.abort();
        }
        info!(url = %self.url, "Event stream shut down");
    }
}

/// Opens [`WsStreamProvider`]s for the configured endpoints
pub struct WsStreamConnector {
    endpoints: NodeEndpoints,
}

impl WsStreamConnector {
    pub fn new(endpoints: NodeEndpoints) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl StreamConnector for WsStreamConnector {
    async fn open(&self, network: &NetworkTarget) -> Result<Arc<dyn StreamProvider>> {
        let url = self.endpoints.ws_url(network)?;
        Ok(Arc::new(WsStreamProvider::connect(&url).await?))
    }
}

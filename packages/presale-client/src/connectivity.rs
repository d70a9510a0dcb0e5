//! Connectivity core
//!
//! Owns the interactive (signing) wallet connection and the read-only event
//! stream, reconciles their notifications into one [`ConnectionState`] and
//! resolves the contract addresses for the active chain.
//!
//! # Lifecycle
//!
//! All lifecycle operations (`connect`, `autoconnect`, `disconnect`, `close`
//! and provider-driven reconciliation) are serialized by one lifecycle lock,
//! so they never interleave. Failures are logged and leave the core in a
//! clean state; nothing is propagated to the caller.
//!
//! # Reconciliation
//!
//! Provider notifications arrive through the [`Reconciler`], which must be
//! running for wallet/stream notifications to have any effect. Chain changes
//! from either notification kind go through one entry point that reconnects
//! only when the observed chain id differs from the cached one.

use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::addresses::{AddressBook, ChainAddresses};
use crate::bus::{Event, EventBus};
use crate::evm::provider::{
    StreamConnector, StreamNotification, StreamProvider, WalletConnector, WalletNotification,
    WalletProvider,
};
use crate::stream::{Listener, Signal, StreamLink};
use crate::types::{ConnectionKind, ConnectionState, NetworkTarget};

/// The attached signing wallet
struct WalletLink {
    provider: Arc<dyn WalletProvider>,
    contracts: ChainAddresses,
    generation: u64,
    _listener: Option<Listener>,
}

struct CoreState {
    network: NetworkTarget,
    /// Configured for the private network; its name never follows the chain id
    pinned_private: bool,
    /// Chain id reported by the wallet (or the stream before any wallet); 0 = unknown
    chain_id: u64,
    address: Option<Address>,
    wallet: Option<WalletLink>,
    stream: Option<StreamLink>,
    next_generation: u64,
}

impl CoreState {
    fn generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn connection_state(&self) -> ConnectionState {
        let kind = match (&self.stream, &self.wallet, self.address) {
            (Some(_), Some(_), Some(_)) => ConnectionKind::Interactive,
            (Some(_), _, _) => ConnectionKind::EventOnly,
            (None, _, _) => ConnectionKind::Disconnected,
        };
        ConnectionState {
            kind,
            address: self.address.filter(|_| kind == ConnectionKind::Interactive),
            chain_id: self.chain_id,
            network_name: self.network.name.clone(),
        }
    }
}

/// Everything a read-only query needs
#[derive(Clone)]
pub struct ReadContext {
    pub stream: Arc<dyn StreamProvider>,
    pub contracts: ChainAddresses,
    /// Connected account, `None` in read-only mode
    pub user: Option<Address>,
}

/// Everything a transaction needs
#[derive(Clone)]
pub struct WriteContext {
    pub wallet: Arc<dyn WalletProvider>,
    pub contracts: ChainAddresses,
    pub address: Address,
}

/// Owner of both provider connections
pub struct ConnectivityCore {
    bus: EventBus,
    addresses: AddressBook,
    wallets: Arc<dyn WalletConnector>,
    streams: Arc<dyn StreamConnector>,
    state: Mutex<CoreState>,
    lifecycle: Mutex<()>,
    signals: mpsc::UnboundedSender<Signal>,
}

/// Drives provider-driven reconciliation for one [`ConnectivityCore`]
///
/// Holds only a weak reference; it stops once the core is dropped.
pub struct Reconciler {
    core: Weak<ConnectivityCore>,
    inbox: mpsc::UnboundedReceiver<Signal>,
}

impl Reconciler {
    pub async fn run(mut self) {
        while let Some(signal) = self.inbox.recv().await {
            let Some(core) = self.core.upgrade() else {
                break;
            };
            core.reconcile(signal).await;
        }
        debug!("Connectivity reconciler stopped");
    }
}

impl ConnectivityCore {
    pub fn new(
        bus: EventBus,
        addresses: AddressBook,
        network: NetworkTarget,
        wallets: Arc<dyn WalletConnector>,
        streams: Arc<dyn StreamConnector>,
    ) -> (Arc<Self>, Reconciler) {
        let (signals, inbox) = mpsc::unbounded_channel();
        let core = Arc::new(Self {
            bus,
            addresses,
            wallets,
            streams,
            state: Mutex::new(CoreState {
                pinned_private: network.is_private(),
                network,
                chain_id: 0,
                address: None,
                wallet: None,
                stream: None,
                next_generation: 0,
            }),
            lifecycle: Mutex::new(()),
            signals,
        });
        let reconciler = Reconciler {
            core: Arc::downgrade(&core),
            inbox,
        };
        (core, reconciler)
    }

    // ========================================================================
    // Public lifecycle
    // ========================================================================

    /// Authorize a wallet and go interactive
    pub async fn connect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.connect_locked().await;
    }

    /// Reconnect silently with a cached authorization, else go read-only
    pub async fn autoconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.wallets.cached_authorization().is_some() {
            info!("Cached wallet authorization found, reconnecting");
            self.connect_locked().await;
            return;
        }

        if let Err(e) = self.ensure_stream_locked(None).await {
            warn!(error = %format!("{:#}", e), "Failed to establish event stream");
            self.publish_state().await;
        }
    }

    /// Drop the interactive connection; always publishes the resulting state
    pub async fn disconnect(&self, clear_authorization: bool) {
        let _lifecycle = self.lifecycle.lock().await;
        self.disconnect_locked(clear_authorization).await;
    }

    /// Tear down both connections and all listeners
    pub async fn close(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.close_locked().await;
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub async fn connection_state(&self) -> ConnectionState {
        self.state.lock().await.connection_state()
    }

    /// A signing wallet is attached
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.wallet.is_some()
    }

    pub async fn is_event_connected(&self) -> bool {
        self.state.lock().await.stream.is_some()
    }

    pub async fn network(&self) -> NetworkTarget {
        self.state.lock().await.network.clone()
    }

    /// Presale contract on the streamed chain, for direct ETH transfers
    pub async fn presale_address(&self) -> Option<Address> {
        let state = self.state.lock().await;
        state.stream.as_ref()?.contracts.map(|c| c.presale)
    }

    /// Read-only handles, `None` while no stream with resolved contracts is live
    pub async fn read_context(&self) -> Option<ReadContext> {
        let state = self.state.lock().await;
        let stream = state.stream.as_ref()?;
        Some(ReadContext {
            stream: stream.provider.clone(),
            contracts: stream.contracts?,
            user: state.wallet.as_ref().and(state.address),
        })
    }

    /// Signing handles, `None` unless interactive
    pub async fn write_context(&self) -> Option<WriteContext> {
        let state = self.state.lock().await;
        let wallet = state.wallet.as_ref()?;
        state.stream.as_ref()?;
        Some(WriteContext {
            wallet: wallet.provider.clone(),
            contracts: wallet.contracts,
            address: state.address?,
        })
    }

    // ========================================================================
    // Lifecycle internals (lifecycle lock held)
    // ========================================================================

    async fn connect_locked(&self) {
        if self.state.lock().await.wallet.is_some() {
            self.disconnect_locked(false).await;
        }

        if let Err(e) = self.try_connect().await {
            warn!(error = %format!("{:#}", e), "Wallet connection failed");
            self.disconnect_locked(true).await;
        }
    }

    async fn try_connect(&self) -> Result<()> {
        let network = self.state.lock().await.network.clone();

        let wallet = self
            .wallets
            .connect(&network)
            .await
            .wrap_err("Wallet authorization failed")?;
        let accounts = wallet
            .list_accounts()
            .await
            .wrap_err("Failed to list wallet accounts")?;
        let address = *accounts
            .first()
            .ok_or_else(|| eyre!("Wallet exposed no accounts"))?;
        let chain_id = wallet
            .chain_id()
            .await
            .wrap_err("Failed to read wallet chain id")?;

        {
            let mut state = self.state.lock().await;
            state.chain_id = chain_id;
            if !state.pinned_private {
                state.network = NetworkTarget::for_chain(chain_id);
            }
        }

        self.ensure_stream_locked(Some(address)).await?;

        let Some(contracts) = self.addresses.resolve(chain_id) else {
            warn!(chain_id, "No contract addresses for chain, staying read-only");
            self.disconnect_locked(false).await;
            return Ok(());
        };

        let mut state = self.state.lock().await;
        let generation = state.generation();
        let listener = wallet
            .subscribe()
            .map(|rx| Listener::forward_wallet(generation, rx, self.signals.clone()));
        state.wallet = Some(WalletLink {
            provider: wallet,
            contracts,
            generation,
            _listener: listener,
        });
        state.address = Some(address);

        let connection = state.connection_state();
        drop(state);

        info!(
            address = %address,
            chain_id,
            network = %connection.network_name,
            "Wallet connected"
        );
        self.bus.publish(Event::ConnectivityChanged(connection));
        Ok(())
    }

    /// Reuse the live stream when it is on the cached chain, otherwise replace it
    async fn ensure_stream_locked(&self, staker: Option<Address>) -> Result<()> {
        let mut state = self.state.lock().await;
        let expected = state.chain_id;

        if let Some(link) = state.stream.as_mut() {
            if link.is_alive_on(expected).await {
                debug!(chain_id = link.chain_id, "Reusing event stream");
                link.attach(staker, &self.signals).await?;
                return Ok(());
            }
        }

        if let Some(old) = state.stream.take() {
            info!(chain_id = old.chain_id, "Replacing event stream");
            old.shutdown().await;
        }

        let network = state.network.clone();
        let generation = state.generation();
        drop(state);

        let (mut link, observed) =
            StreamLink::open(self.streams.as_ref(), &network, generation).await?;

        let mut state = self.state.lock().await;
        if state.chain_id == 0 {
            state.chain_id = observed;
        } else if observed != state.chain_id {
            let expected = state.chain_id;
            drop(state);
            link.shutdown().await;
            return Err(eyre!(
                "Event stream reports chain {} but the wallet is on chain {}",
                observed,
                expected
            ));
        }
        link.chain_id = state.chain_id;
        link.contracts = self.addresses.resolve(state.chain_id);
        if link.contracts.is_none() {
            warn!(chain_id = state.chain_id, "No contract addresses for streamed chain");
        }

        if let Err(e) = link.attach(staker, &self.signals).await {
            link.shutdown().await;
            return Err(e.wrap_err("Failed to attach event stream listeners"));
        }

        state.stream = Some(link);
        let connection = state.connection_state();
        drop(state);

        self.bus.publish(Event::ConnectivityChanged(connection));
        Ok(())
    }

    async fn disconnect_locked(&self, clear_authorization: bool) {
        let (released, connection) = {
            let mut state = self.state.lock().await;
            state.address = None;
            let released = state.wallet.take();
            (released, state.connection_state())
        };

        if let Some(link) = released {
            debug!(generation = link.generation, "Wallet listeners released");
            drop(link);
        }
        if clear_authorization {
            self.wallets.clear_cached_authorization();
        }

        info!(kind = %connection.kind, clear_authorization, "Wallet disconnected");
        self.bus.publish(Event::ConnectivityChanged(connection));
    }

    async fn close_locked(&self) {
        let stream = self.state.lock().await.stream.take();
        if let Some(link) = stream {
            link.shutdown().await;
        }
        self.disconnect_locked(false).await;
    }

    async fn publish_state(&self) {
        let connection = self.connection_state().await;
        self.bus.publish(Event::ConnectivityChanged(connection));
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    async fn reconcile(&self, signal: Signal) {
        match signal {
            Signal::Stream {
                generation,
                notification,
            } => self.on_stream_notification(generation, notification).await,
            Signal::Wallet {
                generation,
                notification,
            } => {
                let _lifecycle = self.lifecycle.lock().await;
                let current = self.state.lock().await.wallet.as_ref().map(|w| w.generation);
                if current != Some(generation) {
                    debug!(generation, ?notification, "Ignoring notification from released wallet");
                    return;
                }
                self.on_wallet_notification(notification).await;
            }
        }
    }

    async fn on_wallet_notification(&self, notification: WalletNotification) {
        match notification {
            WalletNotification::Close | WalletNotification::Disconnect => {
                info!(?notification, "Wallet went away");
                self.disconnect_locked(true).await;
            }
            WalletNotification::AccountsChanged(accounts) => {
                let Some(primary) = accounts.first().copied() else {
                    info!("Wallet exposes no accounts anymore");
                    self.disconnect_locked(false).await;
                    return;
                };

                let mut state = self.state.lock().await;
                if state.address == Some(primary) {
                    return;
                }
                info!(address = %primary, "Primary account changed");
                state.address = Some(primary);
                if let Some(link) = state.stream.as_mut() {
                    if let Err(e) = link.attach(Some(primary), &self.signals).await {
                        warn!(error = %format!("{:#}", e), "Failed to re-attach stake listener");
                    }
                }
                let connection = state.connection_state();
                drop(state);
                self.bus.publish(Event::ConnectivityChanged(connection));
            }
            WalletNotification::ChainChanged(chain_id) => {
                self.on_chain_observed(chain_id).await;
            }
            WalletNotification::NetworkChanged(network_id) => {
                // The network id is not the chain id; ask the wallet
                let wallet = self.state.lock().await.wallet.as_ref().map(|w| w.provider.clone());
                let Some(wallet) = wallet else {
                    return;
                };
                match wallet.chain_id().await {
                    Ok(chain_id) => self.on_chain_observed(chain_id).await,
                    Err(e) => {
                        warn!(network_id, error = %e, "Failed to read chain id after network change");
                    }
                }
            }
        }
    }

    /// Single entry point for chain changes
    async fn on_chain_observed(&self, chain_id: u64) {
        let cached = self.state.lock().await.chain_id;
        if chain_id == cached {
            debug!(chain_id, "Chain unchanged");
            return;
        }
        info!(from = cached, to = chain_id, "Chain changed, reconnecting");
        self.connect_locked().await;
    }

    async fn on_stream_notification(&self, generation: u64, notification: StreamNotification) {
        let current = self.state.lock().await.stream.as_ref().map(|s| s.generation);
        if current != Some(generation) {
            debug!(generation, ?notification, "Ignoring notification from released stream");
            return;
        }

        match notification {
            StreamNotification::NewBlock(number) => {
                self.bus.publish(Event::NewBlock { number });
            }
            StreamNotification::TokensPurchased { beneficiary, value } => {
                debug!(beneficiary = %beneficiary, value = %value, "Tokens purchased");
                self.bus.publish(Event::PresaleActivity);
            }
            StreamNotification::Staked { user, amount } => {
                debug!(user = %user, amount = %amount, "Staked");
                self.bus.publish(Event::PresaleActivity);
            }
            StreamNotification::Closed(reason) => {
                let _lifecycle = self.lifecycle.lock().await;
                // Re-check under the lifecycle lock; a reconnect may have replaced it
                let current = self.state.lock().await.stream.as_ref().map(|s| s.generation);
                if current != Some(generation) {
                    return;
                }
                warn!(reason = %reason, "Event stream closed, tearing down connections");
                self.close_locked().await;
            }
        }
    }
}

//! Event-streaming connection lifecycle and listener forwarding
//!
//! Provider notifications are forwarded into the connectivity core's signal
//! channel, tagged with the generation of the connection they came from.
//! Each connection gets a fresh generation, so a late notification from a
//! superseded connection is recognized and dropped by the reconciler.
//!
//! A [`Listener`] owns its forwarding task and aborts it when dropped:
//! releasing a connection's listeners is just dropping them.

use alloy::primitives::Address;
use eyre::{Result, WrapErr};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::addresses::ChainAddresses;
use crate::evm::provider::{
    StreamConnector, StreamFilter, StreamNotification, StreamProvider, WalletNotification,
};
use crate::types::NetworkTarget;

/// Provider notification tagged with its connection generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Signal {
    Wallet {
        generation: u64,
        notification: WalletNotification,
    },
    Stream {
        generation: u64,
        notification: StreamNotification,
    },
}

/// Forwarding task that is aborted on drop
#[derive(Debug)]
pub(crate) struct Listener(JoinHandle<()>);

impl Listener {
    pub(crate) fn forward_wallet(
        generation: u64,
        mut notifications: mpsc::UnboundedReceiver<WalletNotification>,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        Self(tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                let signal = Signal::Wallet {
                    generation,
                    notification,
                };
                if signals.send(signal).is_err() {
                    break;
                }
            }
        }))
    }

    pub(crate) fn forward_stream(
        generation: u64,
        mut notifications: mpsc::UnboundedReceiver<StreamNotification>,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        Self(tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                let signal = Signal::Stream {
                    generation,
                    notification,
                };
                if signals.send(signal).is_err() {
                    break;
                }
            }
        }))
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The one live event-streaming connection
pub(crate) struct StreamLink {
    pub(crate) provider: Arc<dyn StreamProvider>,
    /// Chain the connection was opened for
    pub(crate) chain_id: u64,
    /// Read-only contract addresses, `None` when the chain is unknown
    pub(crate) contracts: Option<ChainAddresses>,
    pub(crate) generation: u64,
    listener: Option<Listener>,
}

impl StreamLink {
    /// Open a connection to `network`
    ///
    /// Returns the link and the chain id the node reported.
    pub(crate) async fn open(
        connector: &dyn StreamConnector,
        network: &NetworkTarget,
        generation: u64,
    ) -> Result<(Self, u64)> {
        let provider = connector
            .open(network)
            .await
            .wrap_err_with(|| format!("Failed to open event stream for {}", network))?;
        let observed = match provider.chain_id().await {
            Ok(id) => id,
            Err(e) => {
                provider.shutdown().await;
                return Err(e.wrap_err("Event stream did not report a chain id"));
            }
        };

        info!(network = %network, chain_id = observed, generation, "Event stream opened");

        Ok((
            Self {
                provider,
                chain_id: observed,
                contracts: None,
                generation,
                listener: None,
            },
            observed,
        ))
    }

    /// Reusable when the node still answers and is on the expected chain
    ///
    /// `expected == 0` means no chain has been pinned yet.
    pub(crate) async fn is_alive_on(&self, expected: u64) -> bool {
        match self.provider.chain_id().await {
            Ok(id) => expected == 0 || id == expected,
            Err(e) => {
                debug!(error = %e, "Event stream liveness probe failed");
                false
            }
        }
    }

    /// (Re)register block and log forwarding; replaces previous listeners
    pub(crate) async fn attach(
        &mut self,
        staker: Option<Address>,
        signals: &mpsc::UnboundedSender<Signal>,
    ) -> Result<()> {
        let filter = StreamFilter {
            presale: self.contracts.map(|c| c.presale),
            staker: staker.filter(|_| self.contracts.is_some()),
        };
        // Drop the old forwarder before the provider replaces its watch
        self.listener = None;
        let notifications = self.provider.watch(filter).await?;
        self.listener = Some(Listener::forward_stream(
            self.generation,
            notifications,
            signals.clone(),
        ));
        debug!(
            generation = self.generation,
            presale = ?filter.presale,
            staker = ?filter.staker,
            "Event stream listeners attached"
        );
        Ok(())
    }

    /// Detach listeners and release the transport
    pub(crate) async fn shutdown(mut self) {
        self.listener = None;
        self.provider.shutdown().await;
        debug!(generation = self.generation, chain_id = self.chain_id, "Event stream released");
    }
}

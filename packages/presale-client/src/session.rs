//! Session wiring
//!
//! A [`Session`] owns one bus, one connectivity core, one dispatcher and
//! one countdown engine, plus the background tasks that connect them.
//! Sessions share nothing, so several can run side by side (tests do).

use eyre::{eyre, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::addresses::AddressBook;
use crate::bus::{Event, EventBus};
use crate::connectivity::ConnectivityCore;
use crate::countdown::{CountdownEngine, CountdownState};
use crate::dispatcher::{Command, DispatchError, Dispatcher};
use crate::evm::provider::{StreamConnector, WalletConnector};
use crate::handlers::ChainHandlers;
use crate::invest_limit::{AmountInput, InvestLimit, InvestPolicy};
use crate::types::{ConnectionKind, ConnectionState, NetworkTarget, PresaleSnapshot, PurchaseKind};

/// Settings fixed for the lifetime of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Startup network target (after any query-string override)
    pub network: NetworkTarget,
    pub addresses: AddressBook,
    pub decimals: u8,
    pub invest: InvestPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            network: NetworkTarget::default(),
            addresses: AddressBook::with_defaults(),
            decimals: crate::types::DEFAULT_DECIMALS,
            invest: InvestPolicy::default(),
        }
    }
}

pub struct Session {
    bus: EventBus,
    core: Arc<ConnectivityCore>,
    dispatcher: Dispatcher,
    countdown: CountdownEngine,
    invest: InvestPolicy,
    tasks: Vec<JoinHandle<()>>,
}

impl Session {
    /// Wire up a session and start its background tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn create(
        config: SessionConfig,
        wallets: Arc<dyn WalletConnector>,
        streams: Arc<dyn StreamConnector>,
    ) -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map_err(|_| eyre!("Session::create requires a tokio runtime"))?;

        let bus = EventBus::new();
        let (core, reconciler) = ConnectivityCore::new(
            bus.clone(),
            config.addresses,
            config.network.clone(),
            wallets,
            streams,
        );
        let handlers = Arc::new(ChainHandlers::new(core.clone(), bus.clone(), config.decimals));
        let dispatcher = Dispatcher::new(handlers);
        let countdown = CountdownEngine::new(bus.clone(), dispatcher.clone());

        let tasks = vec![
            tokio::spawn(reconciler.run()),
            countdown.spawn(),
            spawn_refresh_loop(bus.subscribe(), dispatcher.clone()),
        ];

        info!(network = %config.network, decimals = config.decimals, "Session created");

        Ok(Self {
            bus,
            core,
            dispatcher,
            countdown,
            invest: config.invest,
            tasks,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn core(&self) -> &Arc<ConnectivityCore> {
        &self.core
    }

    pub async fn autoconnect(&self) {
        self.core.autoconnect().await;
    }

    pub async fn connect(&self) {
        self.core.connect().await;
    }

    pub async fn disconnect(&self, clear_authorization: bool) {
        self.core.disconnect(clear_authorization).await;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.core.connection_state().await
    }

    pub fn dispatch(&self, command: Command) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(command)
    }

    pub fn purchase_pending(&self) -> bool {
        self.dispatcher.purchase_pending()
    }

    pub fn countdown_state(&self) -> CountdownState {
        self.countdown.state()
    }

    /// Limit for `kind` given the latest presale snapshot
    pub fn invest_limit(&self, kind: PurchaseKind, snapshot: &PresaleSnapshot) -> InvestLimit {
        match kind {
            PurchaseKind::Tokens => self.invest.limit_for(snapshot),
            PurchaseKind::TokensWithLiquidity => self.invest.liquidity_limit_for(snapshot),
        }
    }

    /// Dispatch a purchase for validated form input
    ///
    /// Invalid input is rejected here and never reaches the dispatcher.
    pub fn submit_purchase(
        &self,
        kind: PurchaseKind,
        input: &AmountInput,
    ) -> Result<(), DispatchError> {
        let amount = input.purchase_amount().ok_or(DispatchError::InvalidAmount)?;
        let command = match kind {
            PurchaseKind::Tokens => Command::SubmitPurchase { amount },
            PurchaseKind::TokensWithLiquidity => Command::SubmitPurchaseWithLiquidity { amount },
        };
        self.dispatcher.dispatch(command)
    }

    /// Stop background tasks and tear down both connections
    pub async fn shutdown(mut self) {
        self.dispatcher.close();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.core.close().await;
        info!("Session shut down");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Keep presale and stake state fresh as connectivity and on-chain activity change
fn spawn_refresh_loop(
    mut events: broadcast::Receiver<Event>,
    dispatcher: Dispatcher,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let commands = match events.recv().await {
                Ok(Event::ConnectivityChanged(state)) => match state.kind {
                    ConnectionKind::EventOnly | ConnectionKind::Interactive => {
                        vec![Command::RequestPresaleState, Command::RequestStakeState]
                    }
                    ConnectionKind::Disconnected => Vec::new(),
                },
                Ok(Event::PresaleActivity) => vec![Command::RequestPresaleState],
                Ok(_) => Vec::new(),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Refresh loop lagged behind the event bus");
                    vec![Command::RequestPresaleState]
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };

            for command in commands {
                let name = command.name();
                if let Err(e) = dispatcher.dispatch(command) {
                    debug!(command = name, error = %e, "Refresh dispatch rejected");
                }
            }
        }
    })
}

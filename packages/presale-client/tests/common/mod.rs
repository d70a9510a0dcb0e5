//! Shared fixtures for the session scenario tests
//!
//! All scenarios run on a paused tokio clock: sleeps and timeouts advance
//! virtual time instantly once every task is idle.

#![allow(dead_code)]

use alloy::primitives::{Address, U256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use presale_client::evm::provider::{StreamConnector, WalletConnector};
use presale_client::testing::MockChain;
use presale_client::{ConnectionKind, ConnectionState, Event, Session, SessionConfig};

/// Upper bound on virtual time spent waiting for one event
const EVENT_TIMEOUT: Duration = Duration::from_secs(3600);

pub fn user() -> Address {
    Address::with_last_byte(0xaa)
}

pub fn other_user() -> Address {
    Address::with_last_byte(0xbb)
}

/// Whole ETH in wei
pub fn eth(amount: u64) -> U256 {
    U256::from(amount) * U256::from(10u64).pow(U256::from(18))
}

/// Rinkeby (chain 4) with one funded account and a sale opening in 100s
pub fn rinkeby_chain() -> MockChain {
    let chain = MockChain::new().with_account(user()).with_chain(4);
    chain.set_balance(user(), eth(10));
    chain.set_sale_window(1_100, 2_000, 1_000);
    chain
}

pub fn start_session(chain: &MockChain) -> Session {
    start_session_with(chain, SessionConfig::default())
}

pub fn start_session_with(chain: &MockChain, config: SessionConfig) -> Session {
    let wallets: Arc<dyn WalletConnector> = chain.wallet_connector();
    let streams: Arc<dyn StreamConnector> = chain.stream_connector();
    Session::create(config, wallets, streams).expect("session")
}

/// Let spawned tasks run (and aborted ones drop) without crossing real deadlines
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Wait for the next event matching `pred`, skipping the rest
pub async fn next_matching<F>(rx: &mut broadcast::Receiver<Event>, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    };
    tokio::time::timeout(EVENT_TIMEOUT, wait)
        .await
        .expect("timed out waiting for event")
}

/// Everything published so far, after letting tasks settle
pub async fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    settle().await;
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}

pub async fn next_connectivity(rx: &mut broadcast::Receiver<Event>) -> ConnectionState {
    match next_matching(rx, |e| matches!(e, Event::ConnectivityChanged(_))).await {
        Event::ConnectivityChanged(state) => state,
        _ => unreachable!(),
    }
}

pub fn count_kind(events: &[Event], kind: ConnectionKind) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Event::ConnectivityChanged(s) if s.kind == kind))
        .count()
}

/// Connect the wallet and wait until the interactive state is published
pub async fn connect_interactive(session: &Session, rx: &mut broadcast::Receiver<Event>) {
    session.connect().await;
    let state = next_matching(rx, |e| {
        matches!(e, Event::ConnectivityChanged(s) if s.kind == ConnectionKind::Interactive)
    })
    .await;
    assert!(matches!(state, Event::ConnectivityChanged(_)));
    settle().await;
}

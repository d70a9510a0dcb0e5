//! Connection lifecycle scenarios against the in-memory chain

mod common;

use common::*;
use presale_client::evm::provider::{StreamNotification, WalletNotification};
use presale_client::testing::MockChain;
use presale_client::{ConnectionKind, ConnectionState, Event, NetworkTarget, SessionConfig};
use tokio::sync::broadcast;

/// Switch the whole mock chain and wait for the reconnected interactive state
async fn switch_chain(
    chain: &MockChain,
    rx: &mut broadcast::Receiver<Event>,
    chain_id: u64,
) -> ConnectionState {
    chain.set_chain(chain_id);
    chain.emit_wallet(WalletNotification::ChainChanged(chain_id));
    match next_matching(rx, |e| {
        matches!(e, Event::ConnectivityChanged(s)
            if s.kind == ConnectionKind::Interactive && s.chain_id == chain_id)
    })
    .await
    {
        Event::ConnectivityChanged(state) => state,
        _ => unreachable!(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_fresh_load_is_event_only() {
    let chain = rinkeby_chain();
    let session = start_session(&chain);
    let mut rx = session.subscribe();

    session.autoconnect().await;

    let state = next_connectivity(&mut rx).await;
    assert_eq!(state.kind, ConnectionKind::EventOnly);
    assert_eq!(state.address, None);
    assert_eq!(state.chain_id, 4);
    assert_eq!(state.display_name(), "CONNECT WALLET");

    let events = drain(&mut rx).await;
    let snapshot = events
        .iter()
        .find_map(|e| match e {
            Event::PresaleStateResult(Ok(snapshot)) => Some(snapshot.clone()),
            _ => None,
        })
        .expect("presale snapshot");
    assert_eq!(snapshot.eth_user_balance, 0.0);
    assert!(!snapshot.is_open);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::StakeStateResult(Ok(_)))));

    assert_eq!(chain.wallet_connects(), 0);
    assert_eq!(chain.opened_networks(), vec!["mainnet".to_string()]);
    assert!(session.core().is_event_connected().await);
    assert!(!session.core().is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_autoconnect_with_cached_authorization() {
    let chain = rinkeby_chain();
    chain.set_cached_authorization(Some("mock-wallet"));
    let session = start_session(&chain);
    let mut rx = session.subscribe();

    session.autoconnect().await;

    let state = next_matching(&mut rx, |e| {
        matches!(e, Event::ConnectivityChanged(s) if s.kind == ConnectionKind::Interactive)
    })
    .await;
    match state {
        Event::ConnectivityChanged(state) => {
            assert_eq!(state.address, Some(user()));
            assert_eq!(state.network_name, "rinkeby");
        }
        _ => unreachable!(),
    }
    assert_eq!(chain.wallet_connects(), 1);
    assert_eq!(chain.stream_opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_while_connected_reuses_stream() {
    let chain = rinkeby_chain();
    let session = start_session(&chain);
    let mut rx = session.subscribe();

    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    session.connect().await;
    let events = drain(&mut rx).await;

    assert_eq!(count_kind(&events, ConnectionKind::Interactive), 1);
    assert_eq!(count_kind(&events, ConnectionKind::Disconnected), 0);
    assert_eq!(chain.wallet_connects(), 2);
    assert_eq!(chain.stream_opens(), 1);
    assert_eq!(chain.stream_shutdowns(), 0);
    assert_eq!(chain.live_wallet_listeners(), 1);
    assert_eq!(chain.live_stream_watchers(), 1);
    assert_eq!(session.connection_state().await.kind, ConnectionKind::Interactive);
}

#[tokio::test(start_paused = true)]
async fn test_connect_failure_clears_authorization() {
    let chain = rinkeby_chain();
    chain.set_cached_authorization(Some("mock-wallet"));
    chain.fail_wallet_connect(true);
    let session = start_session(&chain);
    let mut rx = session.subscribe();

    session.autoconnect().await;

    let state = next_connectivity(&mut rx).await;
    assert_eq!(state.kind, ConnectionKind::Disconnected);
    assert_eq!(chain.cached_authorization(), None);
    assert_eq!(chain.stream_opens(), 0);
    assert!(!session.core().is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_stream_open_failure_publishes_disconnected() {
    let chain = rinkeby_chain();
    chain.fail_stream_open(true);
    let session = start_session(&chain);
    let mut rx = session.subscribe();

    session.autoconnect().await;

    let state = next_connectivity(&mut rx).await;
    assert_eq!(state.kind, ConnectionKind::Disconnected);
    assert!(!session.core().is_event_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_chain_stays_event_only() {
    let chain = rinkeby_chain().with_chain(56);
    let session = start_session(&chain);
    let mut rx = session.subscribe();

    session.connect().await;
    let events = drain(&mut rx).await;

    assert_eq!(count_kind(&events, ConnectionKind::Interactive), 0);
    let state = session.connection_state().await;
    assert_eq!(state.kind, ConnectionKind::EventOnly);
    assert_eq!(state.chain_id, 56);
    assert_eq!(state.network_name, "chain-56");
    assert_eq!(state.address, None);
    assert!(!session.core().is_connected().await);
    assert_eq!(chain.cached_authorization().as_deref(), Some("mock-wallet"));

    assert!(events
        .iter()
        .any(|e| matches!(e, Event::PresaleStateResult(Err(_)))));
}

#[tokio::test(start_paused = true)]
async fn test_wallet_without_push_channel_still_connects() {
    let chain = rinkeby_chain();
    chain.set_wallet_pushes(false);
    let session = start_session(&chain);
    let mut rx = session.subscribe();

    connect_interactive(&session, &mut rx).await;

    assert_eq!(chain.live_wallet_listeners(), 0);
    assert!(session.core().is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_same_chain_notification_is_ignored() {
    let chain = rinkeby_chain();
    let session = start_session(&chain);
    let mut rx = session.subscribe();
    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    assert_eq!(chain.emit_wallet(WalletNotification::ChainChanged(4)), 1);
    let events = drain(&mut rx).await;

    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::ConnectivityChanged(_))));
    assert_eq!(chain.wallet_connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_chain_change_reconnects_on_new_stream() {
    let chain = rinkeby_chain();
    let session = start_session(&chain);
    let mut rx = session.subscribe();
    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    chain.set_chain(1337);
    chain.emit_wallet(WalletNotification::ChainChanged(1337));
    let state = next_matching(&mut rx, |e| {
        matches!(e, Event::ConnectivityChanged(s) if s.kind == ConnectionKind::Interactive)
    })
    .await;

    match state {
        Event::ConnectivityChanged(state) => {
            assert_eq!(state.chain_id, 1337);
            assert_eq!(state.network_name, "private");
            assert_eq!(state.address, Some(user()));
        }
        _ => unreachable!(),
    }
    settle().await;
    assert_eq!(chain.wallet_connects(), 2);
    assert_eq!(chain.stream_opens(), 2);
    assert_eq!(chain.stream_shutdowns(), 1);
    assert_eq!(
        chain.opened_networks(),
        vec!["rinkeby".to_string(), "private".to_string()]
    );
    assert_eq!(chain.live_wallet_listeners(), 1);
    assert_eq!(chain.live_stream_watchers(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_leaving_private_chain_restores_public_network() {
    let chain = rinkeby_chain();
    let session = start_session(&chain);
    let mut rx = session.subscribe();
    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    let state = switch_chain(&chain, &mut rx, 1337).await;
    assert_eq!(state.network_name, "private");
    settle().await;

    let state = switch_chain(&chain, &mut rx, 4).await;
    assert_eq!(state.network_name, "rinkeby");
    assert_eq!(state.address, Some(user()));
    settle().await;

    assert_eq!(session.core().network().await, NetworkTarget::new("rinkeby"));
    assert_eq!(
        chain.opened_networks(),
        vec![
            "rinkeby".to_string(),
            "private".to_string(),
            "rinkeby".to_string()
        ]
    );
    assert_eq!(chain.live_stream_watchers(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_configured_private_network_keeps_its_name() {
    let chain = MockChain::new().with_account(user()).with_chain(1337);
    chain.set_sale_window(1_100, 2_000, 1_000);
    let config = SessionConfig {
        network: NetworkTarget::new(NetworkTarget::PRIVATE),
        ..SessionConfig::default()
    };
    let session = start_session_with(&chain, config);
    let mut rx = session.subscribe();
    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    let state = switch_chain(&chain, &mut rx, 4).await;
    assert_eq!(state.network_name, "private");
    settle().await;
    assert_eq!(
        chain.opened_networks(),
        vec!["private".to_string(), "private".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stream_on_other_chain_than_wallet_is_rejected() {
    let chain = rinkeby_chain();
    chain.set_wallet_chain(1337);
    let session = start_session(&chain);
    let mut rx = session.subscribe();

    session.connect().await;
    let events = drain(&mut rx).await;

    assert_eq!(count_kind(&events, ConnectionKind::Interactive), 0);
    assert_eq!(count_kind(&events, ConnectionKind::EventOnly), 0);
    let last = events.iter().rev().find_map(|e| match e {
        Event::ConnectivityChanged(state) => Some(state.kind),
        _ => None,
    });
    assert_eq!(last, Some(ConnectionKind::Disconnected));
    assert_eq!(chain.stream_opens(), 1);
    assert_eq!(chain.stream_shutdowns(), 1);
    assert_eq!(chain.live_stream_watchers(), 0);
    assert_eq!(chain.cached_authorization(), None);
    assert!(!session.core().is_event_connected().await);
    assert!(!session.core().is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_network_changed_asks_wallet_for_chain() {
    let chain = rinkeby_chain();
    let session = start_session(&chain);
    let mut rx = session.subscribe();
    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    chain.set_chain(1);
    chain.emit_wallet(WalletNotification::NetworkChanged(1));
    let state = next_matching(&mut rx, |e| {
        matches!(e, Event::ConnectivityChanged(s) if s.kind == ConnectionKind::Interactive)
    })
    .await;

    match state {
        Event::ConnectivityChanged(state) => {
            assert_eq!(state.chain_id, 1);
            assert_eq!(state.network_name, "mainnet");
        }
        _ => unreachable!(),
    }
}

#[tokio::test(start_paused = true)]
async fn test_accounts_changed() {
    let chain = rinkeby_chain().with_account(other_user());
    let session = start_session(&chain);
    let mut rx = session.subscribe();
    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    // Same primary account: nothing to do
    chain.emit_wallet(WalletNotification::AccountsChanged(vec![user(), other_user()]));
    let events = drain(&mut rx).await;
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::ConnectivityChanged(_))));

    // New primary: stake logs follow the new account
    chain.emit_wallet(WalletNotification::AccountsChanged(vec![other_user()]));
    let state = next_connectivity(&mut rx).await;
    assert_eq!(state.kind, ConnectionKind::Interactive);
    assert_eq!(state.address, Some(other_user()));
    settle().await;
    let filter = chain.current_stream_filter().expect("live watch");
    assert_eq!(filter.staker, Some(other_user()));
    assert_eq!(chain.wallet_connects(), 1);

    // Empty list: back to read-only, authorization kept
    chain.emit_wallet(WalletNotification::AccountsChanged(Vec::new()));
    let state = next_connectivity(&mut rx).await;
    assert_eq!(state.kind, ConnectionKind::EventOnly);
    assert_eq!(state.address, None);
    assert_eq!(chain.cached_authorization().as_deref(), Some("mock-wallet"));
}

#[tokio::test(start_paused = true)]
async fn test_wallet_disconnect_clears_authorization() {
    let chain = rinkeby_chain();
    let session = start_session(&chain);
    let mut rx = session.subscribe();
    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    chain.emit_wallet(WalletNotification::Disconnect);
    let state = next_connectivity(&mut rx).await;

    assert_eq!(state.kind, ConnectionKind::EventOnly);
    assert_eq!(chain.cached_authorization(), None);
    settle().await;
    assert_eq!(chain.live_wallet_listeners(), 0);

    // The released wallet's listener is gone; later pushes reach nobody
    assert_eq!(chain.emit_wallet(WalletNotification::ChainChanged(1)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_user_disconnect_keeps_stream() {
    let chain = rinkeby_chain();
    let session = start_session(&chain);
    let mut rx = session.subscribe();
    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    session.disconnect(true).await;
    let state = next_connectivity(&mut rx).await;

    assert_eq!(state.kind, ConnectionKind::EventOnly);
    assert_eq!(chain.cached_authorization(), None);
    assert!(session.core().is_event_connected().await);
    assert_eq!(chain.stream_shutdowns(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stream_closed_tears_down_everything() {
    let chain = rinkeby_chain();
    let session = start_session(&chain);
    let mut rx = session.subscribe();
    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    chain.emit_stream(StreamNotification::Closed("socket hang up".to_string()));
    let state = next_connectivity(&mut rx).await;

    assert_eq!(state.kind, ConnectionKind::Disconnected);
    assert!(!session.core().is_connected().await);
    assert!(!session.core().is_event_connected().await);
    assert_eq!(chain.stream_shutdowns(), 1);
    assert_eq!(chain.cached_authorization().as_deref(), Some("mock-wallet"));
}

#[tokio::test(start_paused = true)]
async fn test_stream_activity_triggers_requery() {
    let chain = rinkeby_chain();
    let session = start_session(&chain);
    let mut rx = session.subscribe();
    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    chain.emit_stream(StreamNotification::NewBlock(42));
    assert_eq!(
        next_matching(&mut rx, |e| matches!(e, Event::NewBlock { .. })).await,
        Event::NewBlock { number: 42 }
    );

    let reads = chain.presale_reads();
    let delivered = chain.emit_stream(StreamNotification::Staked {
        user: user(),
        amount: eth(1),
    });
    assert_eq!(delivered, 1);
    next_matching(&mut rx, |e| matches!(e, Event::PresaleActivity)).await;
    next_matching(&mut rx, |e| matches!(e, Event::PresaleStateResult(_))).await;
    assert_eq!(chain.presale_reads(), reads + 1);

    // Someone else's stake is filtered out at the source
    let delivered = chain.emit_stream(StreamNotification::Staked {
        user: other_user(),
        amount: eth(1),
    });
    assert_eq!(delivered, 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent() {
    let chain = rinkeby_chain();
    let session = start_session(&chain);
    let mut rx = session.subscribe();
    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    session.core().close().await;
    session.core().close().await;
    let events = drain(&mut rx).await;

    assert_eq!(count_kind(&events, ConnectionKind::Disconnected), 2);
    assert_eq!(chain.stream_shutdowns(), 1);
    assert_eq!(chain.live_wallet_listeners(), 0);
    assert_eq!(chain.live_stream_watchers(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_connections() {
    let chain = rinkeby_chain();
    let session = start_session(&chain);
    let mut rx = session.subscribe();
    connect_interactive(&session, &mut rx).await;
    drain(&mut rx).await;

    session.shutdown().await;
    let events = drain(&mut rx).await;

    assert_eq!(count_kind(&events, ConnectionKind::Disconnected), 1);
    assert_eq!(chain.stream_shutdowns(), 1);
    assert_eq!(chain.live_wallet_listeners(), 0);
}

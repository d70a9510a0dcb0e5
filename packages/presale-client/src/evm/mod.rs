//! EVM Chain Support Module
//!
//! ## Submodules
//!
//! - `provider` - capability traits the connectivity core is written against
//! - `contracts` - contract bindings using alloy sol! macro
//! - `client` - alloy-backed wallet and event-stream implementations

pub mod client;
pub mod contracts;
pub mod provider;

pub use client::{
    AuthorizationCache, LocalSignerConnector, SignerWallet, WsStreamConnector, WsStreamProvider,
};
pub use contracts::{Crowdsale, StakeFarm, Token};
pub use provider::{
    PresaleStates, StreamConnector, StreamFilter, StreamNotification, StreamProvider, SubmittedTx,
    WalletConnector, WalletNotification, WalletProvider,
};

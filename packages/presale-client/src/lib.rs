//! Presale Client: wallet and contract state synchronization core
//!
//! Keeps a presale front-end in sync with two unreliable sources of truth:
//! the user's wallet connection and the on-chain presale / staking contracts.
//!
//! - **Connectivity** - interactive wallet connection plus a read-only event stream
//! - **Bus / Dispatcher** - typed events out, typed commands in
//! - **Handlers** - presale and stake queries, purchase transactions
//! - **Countdown** - sale open/close countdown driven by the chain clock
//! - **Invest limits** - purchase ceiling and input validation
//! - **Session** - explicit wiring of all of the above
//!
//! ## Usage
//!
//! ```ignore
//! let session = Session::create(session_config, wallets, streams)?;
//! let mut events = session.subscribe();
//! session.autoconnect().await;
//! while let Ok(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! session.shutdown().await;
//! ```

pub mod addresses;
pub mod bus;
pub mod config;
pub mod connectivity;
pub mod countdown;
pub mod dispatcher;
pub mod evm;
pub mod handlers;
pub mod invest_limit;
pub mod redact;
pub mod session;
pub mod stream;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use addresses::{AddressBook, ChainAddresses};
pub use bus::{CountdownDisplay, Event, EventBus};
pub use connectivity::ConnectivityCore;
pub use countdown::{format_countdown, CountdownEngine, CountdownMode, CountdownState};
pub use dispatcher::{Command, DispatchError, Dispatcher};
pub use invest_limit::{AmountInput, InvestLimit, InvestPolicy};
pub use session::{Session, SessionConfig};
pub use types::{
    ConnectionKind, ConnectionState, NetworkTarget, Phase, PresaleSnapshot, PurchaseAmount,
    PurchaseKind, StakeSnapshot,
};

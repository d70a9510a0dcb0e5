//! Event bus for connectivity, chain results and countdown updates
//!
//! Every outcome the client produces is published here as a typed [`Event`].
//! Delivery is FIFO per subscriber with no ordering across subscribers.
//! Publishing never blocks and never fails; with no subscribers the event is
//! simply dropped.

use alloy::primitives::TxHash;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{ConnectionState, Phase, PresaleSnapshot, PurchaseKind, StakeSnapshot};

/// Events buffered per subscriber before the oldest are dropped
const BUS_CAPACITY: usize = 256;

/// What the countdown display shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CountdownDisplay {
    /// `DDd:HHh:MMm:SSs` until the next sale event
    Remaining(String),
    /// No countdown is running
    Idle,
}

impl CountdownDisplay {
    pub fn text(&self) -> &str {
        match self {
            CountdownDisplay::Remaining(text) => text,
            CountdownDisplay::Idle => "-- : --",
        }
    }
}

/// Everything published on the bus
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    /// Connection model changed
    ConnectivityChanged(ConnectionState),

    PresaleStateResult(Result<PresaleSnapshot, String>),

    StakeStateResult(Result<StakeSnapshot, String>),

    /// Sale token balance of the connected account
    TokenAmountResult(Result<f64, String>),

    /// Purchase accepted by the node, not yet mined
    TransactionSubmitted { kind: PurchaseKind, hash: TxHash },

    /// Terminal outcome of a purchase
    PurchaseResult {
        kind: PurchaseKind,
        result: Result<TxHash, String>,
    },

    CountdownTick(CountdownDisplay),

    /// Phase label, published once per presale snapshot
    CountdownPhase {
        phase: Phase,
        label: String,
        color_hint: String,
    },

    /// A block arrived on the event stream
    NewBlock { number: u64 },

    /// A purchase or stake log was observed on the presale contract
    PresaleActivity,
}

impl Event {
    /// Short event name for logs
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::ConnectivityChanged(_) => "connectivity.changed",
            Event::PresaleStateResult(_) => "presale.state",
            Event::StakeStateResult(_) => "stake.state",
            Event::TokenAmountResult(_) => "token.amount",
            Event::TransactionSubmitted { .. } => "purchase.submitted",
            Event::PurchaseResult { .. } => "purchase.result",
            Event::CountdownTick(_) => "countdown.tick",
            Event::CountdownPhase { .. } => "countdown.phase",
            Event::NewBlock { .. } => "block.new",
            Event::PresaleActivity => "presale.activity",
        }
    }

    pub fn phase(phase: Phase) -> Self {
        Event::CountdownPhase {
            phase,
            label: phase.label().to_string(),
            color_hint: phase.color_hint().to_string(),
        }
    }
}

/// Process-wide publish/subscribe channel
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publish to all current subscribers
    pub fn publish(&self, event: Event) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(subscribers) => {
                debug!(event_type, subscribers, "Event published");
            }
            Err(_) => {
                debug!(event_type, "Event published but no subscribers listening");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_is_fifo_per_subscriber() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(Event::NewBlock { number: 1 });
        bus.publish(Event::NewBlock { number: 2 });

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.recv().await.unwrap(), Event::NewBlock { number: 1 });
            assert_eq!(rx.recv().await.unwrap(), Event::NewBlock { number: 2 });
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(Event::PresaleActivity);
    }

    #[test]
    fn test_phase_event_carries_label() {
        assert_eq!(
            Event::phase(Phase::Live),
            Event::CountdownPhase {
                phase: Phase::Live,
                label: "PRE-SALE IS LIVE NOW".to_string(),
                color_hint: "lime".to_string(),
            }
        );
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(Event::NewBlock { number: 7 }).unwrap();
        assert_eq!(json["type"], "NewBlock");
        assert_eq!(json["data"]["number"], 7);

        let idle = serde_json::to_value(Event::CountdownTick(CountdownDisplay::Idle)).unwrap();
        assert_eq!(idle["data"], "idle");
        assert_eq!(CountdownDisplay::Idle.text(), "-- : --");
    }
}

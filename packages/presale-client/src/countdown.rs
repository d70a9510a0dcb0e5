//! Countdown timer engine
//!
//! Turns the chain-reported "seconds until next sale event" into a local
//! monotonic countdown:
//!
//! ```text
//! Idle --snapshot(secs > 0)--> Armed --tick*--> Fired --> Idle
//!   ^                            |
//!   +----snapshot(secs == 0)-----+
//! ```
//!
//! Every presale snapshot publishes the phase label once and replaces the
//! current target. The armed timer is a scoped resource: re-arming, disarming
//! or dropping the engine aborts it, so at most one fire is ever scheduled.
//! Ticks recompute the remaining time from the stored deadline rather than
//! counting down, so a late tick never drifts.

use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::bus::{CountdownDisplay, Event, EventBus};
use crate::dispatcher::{Command, Dispatcher};
use crate::types::PresaleSnapshot;

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Added before formatting so the display rounds to the nearest second
const DISPLAY_ROUNDING_MS: u64 = 500;

/// What the countdown counts towards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CountdownMode {
    UntilOpen,
    UntilClose,
    None,
}

impl CountdownMode {
    pub fn for_snapshot(snapshot: &PresaleSnapshot) -> Self {
        if snapshot.has_closed {
            CountdownMode::None
        } else if snapshot.is_open {
            CountdownMode::UntilClose
        } else {
            CountdownMode::UntilOpen
        }
    }
}

/// Deadline derived from one snapshot; never persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownTarget {
    pub deadline: Instant,
    /// Wall-clock deadline in Unix milliseconds, for display
    pub deadline_epoch_ms: i64,
    pub mode: CountdownMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownState {
    Idle,
    Armed(CountdownTarget),
    Fired,
}

/// Monotonic and wall-clock deadlines `secs` from now, `None` past either clock's range
fn deadline_after(now: Instant, secs: u64) -> Option<(Instant, i64)> {
    let deadline = now.checked_add(Duration::from_secs(secs))?;
    let offset_ms = i64::try_from(secs.checked_mul(1000)?).ok()?;
    let deadline_epoch_ms = Utc::now().timestamp_millis().checked_add(offset_ms)?;
    Some((deadline, deadline_epoch_ms))
}

/// `DDd:HHh:MMm:SSs`
pub fn format_countdown(remaining_ms: u64) -> String {
    const MS_PER_MINUTE: u64 = 60 * 1000;
    const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
    const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;

    let days = remaining_ms / MS_PER_DAY;
    let hours = (remaining_ms % MS_PER_DAY) / MS_PER_HOUR;
    let minutes = (remaining_ms % MS_PER_HOUR) / MS_PER_MINUTE;
    let seconds = (remaining_ms % MS_PER_MINUTE) / 1000;
    format!("{:02}d:{:02}h:{:02}m:{:02}s", days, hours, minutes, seconds)
}

/// Ticking task for one armed target; aborted on drop
struct ArmedTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl Drop for ArmedTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Countdown state machine driven by presale snapshots on the bus
#[derive(Clone)]
pub struct CountdownEngine {
    bus: EventBus,
    dispatcher: Dispatcher,
    state: Arc<Mutex<CountdownState>>,
}

impl CountdownEngine {
    pub fn new(bus: EventBus, dispatcher: Dispatcher) -> Self {
        Self {
            bus,
            dispatcher,
            state: Arc::new(Mutex::new(CountdownState::Idle)),
        }
    }

    pub fn state(&self) -> CountdownState {
        match self.state.lock() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Start reacting to presale snapshots
    ///
    /// The bus subscription is taken before this returns, so no snapshot
    /// published afterwards is missed.
    pub fn spawn(&self) -> JoinHandle<()> {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let runner = Runner {
            engine: self.clone(),
            events: self.bus.subscribe(),
            fired_tx,
            fired_rx,
            timer: None,
            generation: 0,
        };
        tokio::spawn(runner.run())
    }

    fn set_state(&self, next: CountdownState) {
        match self.state.lock() {
            Ok(mut state) => *state = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

struct Runner {
    engine: CountdownEngine,
    events: broadcast::Receiver<Event>,
    fired_tx: mpsc::UnboundedSender<u64>,
    fired_rx: mpsc::UnboundedReceiver<u64>,
    timer: Option<ArmedTimer>,
    generation: u64,
}

impl Runner {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Ok(Event::PresaleStateResult(result)) => self.on_snapshot(result),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Countdown lagged behind the event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(generation) = self.fired_rx.recv() => self.on_fire(generation),
            }
        }
        self.timer = None;
        debug!("Countdown engine stopped");
    }

    fn on_snapshot(&mut self, result: Result<PresaleSnapshot, String>) {
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(_) => {
                self.disarm();
                return;
            }
        };

        self.engine.bus.publish(Event::phase(snapshot.phase()));

        if snapshot.time_to_next_event_secs > 0 {
            self.arm(
                snapshot.time_to_next_event_secs,
                CountdownMode::for_snapshot(&snapshot),
            );
        } else {
            self.disarm();
        }
    }

    fn arm(&mut self, secs: u64, mode: CountdownMode) {
        let now = Instant::now();
        let Some((deadline, deadline_epoch_ms)) = deadline_after(now, secs) else {
            warn!(secs, ?mode, "Next sale event is out of range, countdown not armed");
            self.disarm();
            return;
        };

        // Supersede whatever was scheduled before
        self.timer = None;
        self.generation += 1;

        let target = CountdownTarget {
            deadline,
            deadline_epoch_ms,
            mode,
        };
        self.engine.set_state(CountdownState::Armed(target));

        let generation = self.generation;
        let bus = self.engine.bus.clone();
        let fired = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(now + TICK_PERIOD, TICK_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let fire = sleep_until(deadline);
            tokio::pin!(fire);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut fire => {
                        let _ = fired.send(generation);
                        return;
                    }
                    _ = ticker.tick() => {
                        // Past the deadline nothing is shown until the fire lands
                        if let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
                            let ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX / 2);
                            let text = format_countdown(ms + DISPLAY_ROUNDING_MS);
                            bus.publish(Event::CountdownTick(CountdownDisplay::Remaining(text)));
                        }
                    }
                }
            }
        });

        debug!(secs, ?mode, generation, "Countdown armed");
        self.timer = Some(ArmedTimer { generation, handle });
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            debug!(generation = timer.generation, "Countdown disarmed");
        }
        self.engine.set_state(CountdownState::Idle);
        self.engine
            .bus
            .publish(Event::CountdownTick(CountdownDisplay::Idle));
    }

    fn on_fire(&mut self, generation: u64) {
        match &self.timer {
            Some(timer) if timer.generation == generation => {}
            _ => {
                debug!(generation, "Ignoring fire from superseded countdown");
                return;
            }
        }
        self.timer = None;
        self.engine.set_state(CountdownState::Fired);
        info!(generation, "Countdown reached its deadline, refreshing presale state");

        self.engine
            .bus
            .publish(Event::CountdownTick(CountdownDisplay::Idle));
        if let Err(e) = self.engine.dispatcher.dispatch(Command::RequestPresaleState) {
            warn!(error = %e, "Failed to re-query presale state after countdown");
        }
        self.engine.set_state(CountdownState::Idle);
    }
}

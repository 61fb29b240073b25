//! Call lifecycle as observed by the UI.

use std::time::Duration;

use frontdesk_common::CallState;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

const DURATION_TICK: Duration = Duration::from_secs(1);

/// What the UI renders for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSnapshot {
    pub state: CallState,
    /// Seconds since the call reached `connected`.
    pub duration_secs: u64,
    pub retries: u32,
    /// User-visible reason for a `failed` call.
    pub error: Option<String>,
}

pub struct CallStateMachine {
    state: CallState,
    tx: watch::Sender<CallSnapshot>,
    ticker: Option<Interval>,
}

impl Default for CallStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStateMachine {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(CallSnapshot::default());
        Self {
            state: CallState::Idle,
            tx,
            ticker: None,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn snapshot(&self) -> CallSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.tx.subscribe()
    }

    fn allowed(from: CallState, to: CallState) -> bool {
        use CallState::*;
        match (from, to) {
            (Idle, Ringing) | (Ringing, Connecting) | (Connecting, Connected) => true,
            (from, Ended | Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Move to `to`. Returns false, leaving everything untouched, for a transition
    /// the lifecycle does not allow, including any re-entry of a terminal state.
    pub fn transition(&mut self, to: CallState) -> bool {
        let from = self.state;
        if !Self::allowed(from, to) {
            debug!(%from, %to, "ignoring call state transition");
            return false;
        }
        self.state = to;

        if to == CallState::Connected {
            let mut ticker = interval_at(Instant::now() + DURATION_TICK, DURATION_TICK);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.ticker = Some(ticker);
        }
        if to.is_terminal() {
            self.ticker = None;
        }

        self.tx.send_modify(|snapshot| snapshot.state = to);
        info!(%from, %to, "call state changed");
        true
    }

    pub fn is_counting(&self) -> bool {
        self.ticker.is_some()
    }

    /// Next duration tick. Never resolves unless the call is connected.
    pub async fn next_tick(&mut self) {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Count one second of connected time.
    pub fn tick(&mut self) {
        if self.state == CallState::Connected {
            self.tx.send_modify(|snapshot| snapshot.duration_secs += 1);
        }
    }

    pub fn stop_counter(&mut self) {
        self.ticker = None;
    }

    pub fn set_retries(&mut self, retries: u32) {
        self.tx.send_modify(|snapshot| snapshot.retries = retries);
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.tx.send_modify(|snapshot| snapshot.error = Some(error));
    }
}

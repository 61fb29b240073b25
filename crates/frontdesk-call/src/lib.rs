#![forbid(unsafe_code)]

//! Kiosk to front desk voice calls.
//!
//! Two endpoints, a kiosk and a staff console, set up a peer-to-peer audio call with
//! no push channel between them: signaling goes through a per-session append-only log
//! that each side polls. This crate holds everything an endpoint needs for that:
//!
//! - [`transport`]: polled signaling log
//! - [`negotiation`]: offer/answer and ICE candidate exchange
//! - [`watchdog`]: bounded retry around each negotiation attempt
//! - [`state`]: call lifecycle and duration counter
//! - [`session`] and [`orchestrator`]: one task per call, and the API the UI uses

pub mod config;
pub mod error;
pub mod gateway_client;
pub mod media;
pub mod negotiation;
pub mod orchestrator;
pub mod peer;
pub mod rtc;
pub mod session;
pub mod state;
pub mod store;
pub mod transport;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{AudioConstraints, CallConfig, IceServer};
pub use error::{CallError, Result};
pub use gateway_client::GatewayClient;
pub use media::{AudioSource, MediaCapture, SilenceCapture};
pub use negotiation::{NegotiationEngine, NegotiationRole};
pub use orchestrator::CallOrchestrator;
pub use peer::{PeerConnection, PeerConnectionFactory};
pub use rtc::RtcPeerFactory;
pub use session::{CallHandle, CallServices, Endpoint};
pub use state::{CallSnapshot, CallStateMachine};
pub use store::{MemorySessionStore, SessionStore};
pub use transport::{MemoryLog, SignalingLog, SignalingTransport};
pub use watchdog::{RetryWatchdog, WatchdogVerdict};

//! Shared types for Frontdesk: signaling protocol, call records, logging, error types.
//!
//! Both the kiosk/console endpoints and the signaling gateway depend on this crate so
//! that the wire format of the signaling log is defined in exactly one place.

#![forbid(unsafe_code)]

pub mod error;
pub mod helpers;
pub mod protocol;

pub use error::{Error, Result};
pub use protocol::*;

use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, filtered by `RUST_LOG` or `info`.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Like [`init_tracing`] with a caller-chosen fallback directive, e.g.
/// `"frontdesk_call=debug,webrtc=warn"`.
pub fn init_tracing_with_default(fallback: &str) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(fallback),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

//! Call tuning: poll cadence, watchdog bounds, NAT traversal servers and
//! capture constraints.

use std::time::Duration;

use frontdesk_common::helpers::{env_bool, env_parse};
use frontdesk_common::Error;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// A STUN or TURN server handed to the peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Parse `url[|username|credential]`.
    pub fn parse(spec: &str) -> Result<Self, Error> {
        let mut parts = spec.trim().split('|');
        let url = parts.next().unwrap_or_default().trim();
        if !(url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:")) {
            return Err(Error::config(format!("invalid ICE server url '{url}'")));
        }
        let username = parts.next().map(str::to_string);
        let credential = parts.next().map(str::to_string);
        if url.starts_with("turn") && (username.is_none() || credential.is_none()) {
            return Err(Error::config(format!(
                "TURN server '{url}' requires username and credential"
            )));
        }
        Ok(Self {
            urls: vec![url.to_string()],
            username,
            credential,
        })
    }
}

/// Capture constraints requested from the media collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallConfig {
    /// How often the signaling log is polled.
    pub poll_interval: Duration,
    /// Window each negotiation attempt gets before the watchdog fires.
    pub negotiation_timeout: Duration,
    /// Attempts before the call is declared failed.
    pub max_retries: u32,
    pub ice_servers: Vec<IceServer>,
    pub audio: AudioConstraints,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            negotiation_timeout: DEFAULT_NEGOTIATION_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
            audio: AudioConstraints::default(),
        }
    }
}

impl CallConfig {
    /// Build from `FRONTDESK_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, Error> {
        let defaults = Self::default();
        let ice_servers = match std::env::var("FRONTDESK_ICE_SERVERS") {
            Ok(value) if !value.trim().is_empty() => value
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(IceServer::parse)
                .collect::<Result<Vec<_>, _>>()?,
            _ => defaults.ice_servers,
        };

        let config = Self {
            poll_interval: Duration::from_millis(env_parse(
                "FRONTDESK_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            negotiation_timeout: Duration::from_secs(env_parse(
                "FRONTDESK_NEGOTIATION_TIMEOUT_SECS",
                defaults.negotiation_timeout.as_secs(),
            )),
            max_retries: env_parse("FRONTDESK_MAX_RETRIES", defaults.max_retries),
            ice_servers,
            audio: AudioConstraints {
                echo_cancellation: env_bool("FRONTDESK_ECHO_CANCELLATION", true),
                noise_suppression: env_bool("FRONTDESK_NOISE_SUPPRESSION", true),
                auto_gain_control: env_bool("FRONTDESK_AUTO_GAIN_CONTROL", true),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.poll_interval.is_zero() {
            return Err(Error::config("poll interval must be non-zero"));
        }
        if self.negotiation_timeout.is_zero() {
            return Err(Error::config("negotiation timeout must be non-zero"));
        }
        if self.max_retries == 0 {
            return Err(Error::config("max retries must be at least 1"));
        }
        if self.ice_servers.is_empty() {
            return Err(Error::config("at least one ICE server is required"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CallConfig::default();
        assert_eq!(config.negotiation_timeout, Duration::from_secs(15));
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_turn_server_with_credentials() {
        let server = IceServer::parse("turn:relay.hotel.example:3478|kiosk|s3cret").unwrap();
        assert_eq!(server.urls, vec!["turn:relay.hotel.example:3478".to_string()]);
        assert_eq!(server.username.as_deref(), Some("kiosk"));
        assert_eq!(server.credential.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_parse_rejects_turn_without_credentials() {
        assert!(IceServer::parse("turn:relay.hotel.example:3478").is_err());
        assert!(IceServer::parse("http://example.com").is_err());
    }

    #[test]
    fn test_validate_rejects_zero_bounds() {
        let mut config = CallConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.max_retries = 1;
        config.ice_servers.clear();
        assert!(config.validate().is_err());
    }
}

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::protocol::ProtocolConfig;
use crate::network::NatPolicy;
use crate::utils::{P2PError, Result};

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(6);

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_ip: IpAddr,
    pub port: u16,
    pub key_dir: PathBuf,
    pub bootstrap_peer: Option<String>,
    #[serde(with = "serde_secs")]
    pub reconcile_interval: Duration,
    pub nat: NatPolicy,
    /// Greet each peer learned during bootstrap once more.
    pub greet_new_peers: bool,
    /// Bound on dials and bootstrap replies; `None` waits indefinitely.
    #[serde(with = "serde_opt_secs")]
    pub connect_timeout: Option<Duration>,
    pub protocol: ProtocolConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 4001,
            key_dir: PathBuf::from("./config/keys"),
            bootstrap_peer: None,
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            nat: NatPolicy::default(),
            greet_new_peers: false,
            connect_timeout: None,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            P2PError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&text)
            .map_err(|e| P2PError::ConfigError(format!("Invalid {}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.reconcile_interval.is_zero() {
            return Err(P2PError::ConfigError(
                "reconcile_interval must be greater than zero".to_string(),
            ));
        }

        if matches!(self.connect_timeout, Some(limit) if limit.is_zero()) {
            return Err(P2PError::ConfigError(
                "connect_timeout must be greater than zero".to_string(),
            ));
        }

        let protocol = &self.protocol;
        for (name, value) in [
            ("protocol_id", &protocol.protocol_id),
            ("discover_marker", &protocol.discover_marker),
            ("greeting_marker", &protocol.greeting_marker),
            ("ack", &protocol.ack),
        ] {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(P2PError::ConfigError(format!(
                    "{} must be non-empty and contain no whitespace",
                    name
                )));
            }
        }

        if protocol.discover_marker == protocol.greeting_marker {
            return Err(P2PError::ConfigError(
                "discover_marker and greeting_marker must differ".to_string(),
            ));
        }

        Ok(())
    }
}

/// Durations in config files are written in seconds, like the CLI flags.
/// Whole seconds serialize as integers; fractions are accepted both ways.
mod serde_secs {
    use serde::de::{self, Deserialize, Deserializer};
    use serde::ser::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if value.subsec_nanos() == 0 {
            serializer.serialize_u64(value.as_secs())
        } else {
            serializer.serialize_f64(value.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| de::Error::custom(format!("invalid duration {}: {}", secs, e)))
    }
}

mod serde_opt_secs {
    use serde::de::{Deserialize, Deserializer};
    use serde::ser::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => super::serde_secs::serialize(duration, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        #[derive(serde::Deserialize)]
        struct Secs(#[serde(with = "super::serde_secs")] Duration);

        Ok(Option::<Secs>::deserialize(deserializer)?.map(|Secs(duration)| duration))
    }
}

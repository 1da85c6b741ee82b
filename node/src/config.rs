//! The node configuration record.
//!
//! The loader (file format, environment overrides, command line) lives in
//! the server binary; the core only consumes this deserialised shape.

use super::*;
use bpv7::eid::Eid;
use cla::ClaKind;
use serde::{Deserialize, Deserializer};
use std::path::PathBuf;

fn deserialize_eid<'de, D>(deserializer: D) -> Result<Eid, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer)?
        .parse()
        .map_err(serde::de::Error::custom)
}

/// One listening transport endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    pub cla: ClaKind,
    /// Socket address, e.g. `0.0.0.0:16162`.
    pub address: String,
}

/// One statically configured peer.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub cla: ClaKind,
    pub address: String,
    #[serde(deserialize_with = "deserialize_eid")]
    pub endpoint: Eid,
}

/// Routing algorithm selection, discriminated on `algorithm`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "algorithm", rename_all = "kebab-case")]
pub enum RoutingConfig {
    Epidemic,
    SprayAndWait {
        multiplicity: u64,
    },
    BinarySprayAndWait {
        multiplicity: u64,
    },
    Dtlsr,
    Prophet {
        #[serde(default = "default_p_encounter")]
        p_encounter: f64,
        #[serde(default = "default_beta")]
        beta: f64,
        #[serde(default = "default_gamma")]
        gamma: f64,
    },
    SensorMule {
        sensor_pattern: String,
        inner: Box<RoutingConfig>,
    },
}

fn default_p_encounter() -> f64 {
    routing::prophet::DEFAULT_P_ENCOUNTER
}

fn default_beta() -> f64 {
    routing::prophet::DEFAULT_BETA
}

fn default_gamma() -> f64 {
    routing::prophet::DEFAULT_GAMMA
}

impl Default for RoutingConfig {
    fn default() -> Self {
        RoutingConfig::Epidemic
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "deserialize_eid")]
    pub node_id: Eid,

    pub store_path: PathBuf,

    /// When set, administrative records addressed to other nodes are
    /// decoded and logged in transit; forwarding is unaffected.
    #[serde(default)]
    pub inspect_all_bundles: bool,

    #[serde(default)]
    pub routing: RoutingConfig,

    /// Ed25519 keypair (64 bytes, hex-encoded). Locally sourced bundles
    /// are signed with it.
    #[serde(default)]
    pub sign_priv: Option<String>,

    #[serde(default)]
    pub listen: Vec<ListenConfig>,

    #[serde(default)]
    pub peer: Vec<PeerConfig>,

    /// Multicast peer discovery.
    #[serde(default = "default_true")]
    pub discovery: bool,

    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_discovery_interval() -> u64 {
    discovery::DEFAULT_INTERVAL.as_secs()
}

impl Config {
    /// Decodes `sign_priv` into a signing key.
    pub fn signing_key(&self) -> Result<Option<ed25519_dalek::SigningKey>, String> {
        let Some(hex) = &self.sign_priv else {
            return Ok(None);
        };
        let bytes = decode_hex(hex).ok_or_else(|| "sign_priv is not valid hex".to_string())?;
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| "sign_priv must be a 64-byte Ed25519 keypair".to_string())?;
        ed25519_dalek::SigningKey::from_keypair_bytes(&bytes)
            .map(Some)
            .map_err(|e| e.to_string())
    }
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_decoding() {
        assert_eq!(decode_hex("00ff10"), Some(vec![0x00, 0xFF, 0x10]));
        assert_eq!(decode_hex("0"), None);
        assert_eq!(decode_hex("zz"), None);
    }

    #[test]
    fn signing_key_round_trip() {
        let key = ed25519_dalek::SigningKey::from_bytes(&[7; 32]);
        let hex: String = key
            .to_keypair_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        let config = Config {
            node_id: "dtn://n1/".parse().unwrap(),
            store_path: "/tmp/corvid".into(),
            inspect_all_bundles: false,
            routing: RoutingConfig::default(),
            sign_priv: Some(hex),
            listen: vec![],
            peer: vec![],
            discovery: false,
            discovery_interval_secs: 10,
        };
        let decoded = config.signing_key().unwrap().unwrap();
        assert_eq!(decoded.to_bytes(), key.to_bytes());
    }
}

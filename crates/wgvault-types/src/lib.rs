//! wgvault-types: Shared data model for the wgvault ecosystem.
//!
//! This crate contains the entity records persisted by the store (server
//! profiles and generation history), the legacy single-server shape the
//! migrator consumes, and the boundary validation applied to user input.

#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod legacy;

/// A remembered WireGuard server endpoint plus everything needed to generate
/// client configurations against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerProfile {
    /// Opaque stable identifier, unique across the collection.
    pub id: String,
    /// Human-readable name (e.g. "home router", "office").
    pub name: String,
    /// The server's WireGuard public key.
    pub peer_public_key: String,
    /// Optional pre-shared key applied to every peer of this server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preshared_key: Option<String>,
    /// Endpoint address (host:port).
    pub endpoint: String,
    /// Comma-separated CIDR list routed through the tunnel.
    pub allowed_ips: String,
    /// PersistentKeepalive in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_keepalive: Option<u16>,
    /// WireGuard interface name on the router side (e.g. "wg_0").
    pub router_interface: String,
    /// Counter for the next free peer slot on this server. Never decreases.
    #[serde(default = "default_next_peer_id")]
    pub next_peer_id: u32,
    /// When this profile was created.
    pub created_at: DateTime<Utc>,
}

fn default_next_peer_id() -> u32 {
    1
}

impl ServerProfile {
    /// Create an empty profile with a fresh id and the counter at 1.
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            peer_public_key: String::new(),
            preshared_key: None,
            endpoint: String::new(),
            allowed_ips: "0.0.0.0/0, ::/0".to_string(),
            persistent_keepalive: Some(25),
            router_interface: "wg_0".to_string(),
            next_peer_id: 1,
            created_at: now,
        }
    }

    /// Validate the fields that determine store correctness.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("id", &self.id)?;
        require("name", &self.name)?;
        require("peer_public_key", &self.peer_public_key)?;
        validate_endpoint(&self.endpoint)?;
        validate_allowed_ips(&self.allowed_ips)?;
        if self.next_peer_id == 0 {
            return Err(ValidationError::PeerIdZero);
        }
        Ok(())
    }
}

/// A durable record of one completed generation. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Time-derived identifier; lexicographic order is chronological order.
    pub id: String,
    /// When the generation completed.
    pub timestamp: DateTime<Utc>,
    /// Client-side interface name (the `.conf` file stem).
    pub interface_name: String,
    /// Device label entered by the user.
    pub comment: String,
    /// Peer slot consumed from the server profile.
    pub peer_id: u32,
    /// Client tunnel address.
    pub address: String,
    /// The client's public key.
    pub public_key: String,
    /// Rendered wg-quick configuration.
    pub wg_config: String,
    /// Rendered iKuai peer import line.
    pub ikuai_config: String,
    /// Rendered Surge configuration, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub surge_config: Option<String>,
    /// Rendered MikroTik RouterOS script, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mikrotik_config: Option<String>,
    /// Rendered OpenWrt UCI script, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openwrt_config: Option<String>,
    /// Back-reference to the server profile this was generated against.
    /// The profile may have been deleted since; this is never an ownership edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// Copy of the profile name at generation time, kept for display after
    /// the profile is gone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl HistoryEntry {
    /// Derive an entry id from an instant. Zero-padded epoch milliseconds so
    /// that string order matches chronological order.
    pub fn id_for(timestamp: DateTime<Utc>) -> String {
        format!("{:013}", timestamp.timestamp_millis().max(0))
    }

    /// Validate the fields that determine store correctness.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require("id", &self.id)?;
        require("comment", &self.comment)?;
        require("wg_config", &self.wg_config)?;
        Ok(())
    }
}

/// A user-entered field failed boundary validation. Surfaced verbatim.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field is empty.
    #[error("{field} must not be empty")]
    Required {
        /// Name of the offending field.
        field: &'static str,
    },

    /// The endpoint is not a host:port pair.
    #[error("endpoint must be host:port, got \"{0}\"")]
    Endpoint(String),

    /// An allowed_ips element does not parse as a CIDR network.
    #[error("invalid CIDR \"{0}\" in allowed_ips")]
    AllowedIps(String),

    /// The peer counter must start at 1.
    #[error("next_peer_id must be at least 1")]
    PeerIdZero,
}

fn require(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required { field });
    }
    Ok(())
}

fn validate_endpoint(endpoint: &str) -> Result<(), ValidationError> {
    let err = || ValidationError::Endpoint(endpoint.to_string());
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(err)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(err());
    }
    Ok(())
}

fn validate_allowed_ips(allowed_ips: &str) -> Result<(), ValidationError> {
    let mut any = false;
    for part in allowed_ips.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        any = true;
        part.parse::<IpNetwork>()
            .map_err(|_| ValidationError::AllowedIps(part.to_string()))?;
    }
    if !any {
        return Err(ValidationError::Required {
            field: "allowed_ips",
        });
    }
    Ok(())
}

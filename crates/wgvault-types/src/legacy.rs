// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The flat single-server configuration shape written by versions that
//! predate server profiles. Read once by the migrator, converted into a
//! [`ServerProfile`], and never written again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::ServerProfile;

/// The pre-profile configuration record: one implicit server, no `id`, no
/// `name`. Older builds stored keepalive as a string, so deserialization
/// accepts both forms.
#[derive(Debug, Clone, Deserialize)]
pub struct LegacyConfig {
    /// The server's WireGuard public key.
    pub peer_public_key: String,
    /// Optional pre-shared key.
    #[serde(default)]
    pub preshared_key: Option<String>,
    /// Endpoint address (host:port).
    pub endpoint: String,
    /// Comma-separated CIDR list.
    #[serde(default)]
    pub allowed_ips: String,
    /// PersistentKeepalive in seconds, possibly stored as a string.
    #[serde(default, deserialize_with = "lenient_u16")]
    pub persistent_keepalive: Option<u16>,
    /// Router-side interface name.
    #[serde(default, alias = "ikuai_interface")]
    pub router_interface: String,
    /// The peer counter carried over from the single-server store.
    #[serde(default = "one")]
    pub next_peer_id: u32,
}

fn one() -> u32 {
    1
}

impl LegacyConfig {
    /// Whether a parsed JSON document has the legacy flat shape: a single
    /// server's fields at the top level, with no profile identity.
    pub fn is_legacy_shape(value: &serde_json::Value) -> bool {
        let Some(map) = value.as_object() else {
            return false;
        };
        map.contains_key("peer_public_key")
            && !map.contains_key("id")
            && !map.contains_key("name")
    }

    /// Convert into a server profile with the given identity. Fields copy
    /// 1:1; the counter carries over so already-issued peer ids stay burned.
    pub fn into_profile(
        self,
        id: impl Into<String>,
        name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> ServerProfile {
        ServerProfile {
            id: id.into(),
            name: name.into(),
            peer_public_key: self.peer_public_key,
            preshared_key: self.preshared_key.filter(|k| !k.is_empty()),
            endpoint: self.endpoint,
            allowed_ips: if self.allowed_ips.trim().is_empty() {
                "0.0.0.0/0, ::/0".to_string()
            } else {
                self.allowed_ips
            },
            persistent_keepalive: self.persistent_keepalive,
            router_interface: if self.router_interface.is_empty() {
                "wg_0".to_string()
            } else {
                self.router_interface
            },
            next_peer_id: self.next_peer_id.max(1),
            created_at: now,
        }
    }
}

fn lenient_u16<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u16),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::Num(n)) => Some(n),
        Some(Raw::Text(s)) => s.trim().parse().ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_JSON: &str = r#"{
        "peer_public_key": "c2VydmVyLXB1YmxpYy1rZXk=",
        "preshared_key": "",
        "endpoint": "vpn.example.com:51820",
        "allowed_ips": "0.0.0.0/0, ::/0",
        "persistent_keepalive": "25",
        "ikuai_interface": "wg_0",
        "next_peer_id": 7
    }"#;

    #[test]
    fn detects_legacy_shape() {
        let value: serde_json::Value = serde_json::from_str(LEGACY_JSON).unwrap();
        assert!(LegacyConfig::is_legacy_shape(&value));
    }

    #[test]
    fn profile_records_are_not_legacy() {
        let value = serde_json::json!({
            "id": "abc",
            "name": "home",
            "peer_public_key": "k"
        });
        assert!(!LegacyConfig::is_legacy_shape(&value));
    }

    #[test]
    fn string_keepalive_accepted() {
        let legacy: LegacyConfig = serde_json::from_str(LEGACY_JSON).unwrap();
        assert_eq!(legacy.persistent_keepalive, Some(25));
        assert_eq!(legacy.router_interface, "wg_0");
    }

    #[test]
    fn conversion_carries_counter_and_drops_empty_psk() {
        let legacy: LegacyConfig = serde_json::from_str(LEGACY_JSON).unwrap();
        let profile = legacy.into_profile("id-1", "Imported server", Utc::now());
        assert_eq!(profile.next_peer_id, 7);
        assert_eq!(profile.preshared_key, None);
        assert_eq!(profile.endpoint, "vpn.example.com:51820");
        assert!(profile.validate().is_ok());
    }
}

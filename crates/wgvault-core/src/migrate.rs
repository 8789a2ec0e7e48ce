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

//! One-time conversion of the legacy single-server configuration into a
//! server profile. Runs at every start; does real work at most once.

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wgvault_types::legacy::LegacyConfig;

use crate::store::{ConfigStore, StoreError};

/// Name given to the profile synthesized from a legacy config.
pub const IMPORTED_SERVER_NAME: &str = "Imported server";

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Convert a legacy flat config into one server profile, exactly once.
///
/// Returns the new profile id when a migration actually ran, so the caller
/// can surface a one-time notice. All other outcomes are `None`:
/// already migrated, no legacy file, an unreadable legacy file (logged and
/// left alone), or profiles already present (the legacy file is then stale
/// and skipping it is the safe choice; the skip is recorded so later starts
/// do not re-check).
#[tracing::instrument(skip(store))]
pub async fn migrate_if_needed(store: &ConfigStore) -> Result<Option<String>, MigrateError> {
    let mut app_settings = store.settings().await?;
    if app_settings.legacy_migrated {
        debug!("legacy migration already recorded, skipping");
        return Ok(None);
    }

    let legacy_path = store.legacy_path();
    let contents = match tokio::fs::read(&legacy_path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no legacy config present");
            return Ok(None);
        }
        Err(e) => return Err(MigrateError::Store(StoreError::Io(e))),
    };

    let value: serde_json::Value = match serde_json::from_slice(&contents) {
        Ok(value) => value,
        Err(e) => {
            warn!(path = %legacy_path.display(), error = %e, "legacy config unreadable, skipping migration");
            return Ok(None);
        }
    };

    if !LegacyConfig::is_legacy_shape(&value) {
        debug!("config file is not the legacy flat shape");
        return Ok(None);
    }

    if !store.list_servers().await?.is_empty() {
        // A profile collection already exists; converting the stale legacy
        // file now would duplicate a server the user already manages.
        info!("profiles already exist, skipping legacy migration");
        app_settings.legacy_migrated = true;
        store.save_settings(&app_settings).await?;
        return Ok(None);
    }

    let legacy: LegacyConfig = match serde_json::from_value(value) {
        Ok(legacy) => legacy,
        Err(e) => {
            warn!(error = %e, "legacy config has unexpected field types, skipping migration");
            return Ok(None);
        }
    };

    let id = Uuid::new_v4().to_string();
    let profile = legacy.into_profile(&id, IMPORTED_SERVER_NAME, chrono::Utc::now());
    store.put_server(&profile).await?;

    app_settings.legacy_migrated = true;
    store.save_settings(&app_settings).await?;

    info!(id = %id, "migrated legacy config into a server profile");
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_JSON: &str = r#"{
        "peer_public_key": "c2VydmVyLWtleQ==",
        "endpoint": "vpn.example.com:51820",
        "allowed_ips": "0.0.0.0/0, ::/0",
        "persistent_keepalive": 25,
        "ikuai_interface": "wg_0",
        "next_peer_id": 4
    }"#;

    async fn store_with_legacy(dir: &std::path::Path) -> ConfigStore {
        let store = ConfigStore::open(dir).await.unwrap();
        tokio::fs::write(store.legacy_path(), LEGACY_JSON).await.unwrap();
        store
    }

    #[tokio::test]
    async fn migrates_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_legacy(dir.path()).await;

        let id = migrate_if_needed(&store).await.unwrap().unwrap();
        let profile = store.get_server(&id).await.unwrap();
        assert_eq!(profile.name, IMPORTED_SERVER_NAME);
        assert_eq!(profile.next_peer_id, 4);
        assert_eq!(profile.endpoint, "vpn.example.com:51820");
    }

    #[tokio::test]
    async fn second_run_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_legacy(dir.path()).await;

        assert!(migrate_if_needed(&store).await.unwrap().is_some());
        assert!(migrate_if_needed(&store).await.unwrap().is_none());
        assert_eq!(store.list_servers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn skips_when_profiles_already_exist() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with_legacy(dir.path()).await;
        let existing = wgvault_types::ServerProfile {
            peer_public_key: "azE=".to_string(),
            endpoint: "host:1".to_string(),
            ..wgvault_types::ServerProfile::new("manual", chrono::Utc::now())
        };
        store.put_server(&existing).await.unwrap();

        assert!(migrate_if_needed(&store).await.unwrap().is_none());
        assert_eq!(store.list_servers().await.unwrap().len(), 1);

        // The conflict is recorded, so the next start skips straight through.
        assert!(store.settings().await.unwrap().legacy_migrated);
    }

    #[tokio::test]
    async fn no_legacy_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();
        assert!(migrate_if_needed(&store).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_legacy_file_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();
        tokio::fs::write(store.legacy_path(), b"{ nope").await.unwrap();
        assert!(migrate_if_needed(&store).await.unwrap().is_none());
        assert!(store.list_servers().await.unwrap().is_empty());
    }
}

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

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use wgvault_types::{HistoryEntry, ServerProfile, ValidationError};

use crate::settings::{self, AppSettings, SettingsError};

const SERVERS_DIR: &str = "servers";
const HISTORY_DIR: &str = "history";
const LEGACY_FILE: &str = "config.json";
const SETTINGS_FILE: &str = "settings.toml";

/// Which record collection a blob belongs to. The same prefixes name the
/// local directories and the remote store layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Servers,
    History,
}

impl RecordKind {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Servers => SERVERS_DIR,
            Self::History => HISTORY_DIR,
        }
    }
}

/// A record file as seen by the sync engine: its blob name and the local
/// mutation time.
#[derive(Debug, Clone)]
pub struct LocalRecord {
    pub name: String,
    pub modified: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("server profile not found: {0}")]
    ProfileNotFound(String),

    #[error("history entry not found: {0}")]
    EntryNotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode record: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid record name: {0}")]
    InvalidName(String),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

type Result<T> = std::result::Result<T, StoreError>;

/// Persistent keyed collections of server profiles and history entries.
///
/// One JSON file per record under `servers/` and `history/`. Every mutation
/// holds the write lock for its whole read-modify-persist span and commits
/// through a temp-file rename, so a crash mid-write leaves the previous
/// record intact and concurrent mutations never interleave.
pub struct ConfigStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Open (and lay out) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(SERVERS_DIR)).await?;
        tokio::fs::create_dir_all(root.join(HISTORY_DIR)).await?;
        debug!(root = %root.display(), "opened config store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.prefix())
    }

    fn record_path(&self, kind: RecordKind, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
        {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.dir(kind).join(name))
    }

    fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }

    pub fn legacy_path(&self) -> PathBuf {
        self.root.join(LEGACY_FILE)
    }

    // -- Settings ------------------------------------------------------------

    pub async fn settings(&self) -> Result<AppSettings> {
        Ok(settings::load(&self.settings_path()).await?)
    }

    pub async fn save_settings(&self, app_settings: &AppSettings) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        settings::save(&self.settings_path(), app_settings).await?;
        Ok(())
    }

    // -- Server profiles -----------------------------------------------------

    #[tracing::instrument(skip(self))]
    pub async fn list_servers(&self) -> Result<Vec<ServerProfile>> {
        let mut servers: Vec<ServerProfile> = self.read_all(RecordKind::Servers).await?;
        servers.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(servers)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_server(&self, id: &str) -> Result<ServerProfile> {
        let path = self.record_path(RecordKind::Servers, &json_name(id))?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::ProfileNotFound(id.to_string()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    /// Upsert a profile, keyed by its id. Validates at the boundary and
    /// persists before returning.
    #[tracing::instrument(skip(self, profile), fields(id = %profile.id))]
    pub async fn put_server(&self, profile: &ServerProfile) -> Result<()> {
        profile.validate()?;
        let path = self.record_path(RecordKind::Servers, &json_name(&profile.id))?;
        let _guard = self.write_lock.lock().await;
        write_atomic(&path, profile).await?;
        debug!(id = %profile.id, name = %profile.name, "stored server profile");
        Ok(())
    }

    /// Delete a profile. Deleting an absent id is a no-op, and history
    /// entries referencing the profile are left untouched.
    #[tracing::instrument(skip(self))]
    pub async fn delete_server(&self, id: &str) -> Result<()> {
        let path = self.record_path(RecordKind::Servers, &json_name(id))?;
        let _guard = self.write_lock.lock().await;
        remove_if_present(&path).await?;
        Ok(())
    }

    // -- History -------------------------------------------------------------

    /// List history entries, newest first, optionally restricted to one
    /// server id. Entries keep matching on the stored id even after the
    /// profile itself is deleted.
    #[tracing::instrument(skip(self))]
    pub async fn list_history(&self, server_id: Option<&str>) -> Result<Vec<HistoryEntry>> {
        let mut entries: Vec<HistoryEntry> = self.read_all(RecordKind::History).await?;
        if let Some(server_id) = server_id {
            entries.retain(|e| e.server_id.as_deref() == Some(server_id));
        }
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(entries)
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_history(&self, id: &str) -> Result<HistoryEntry> {
        let path = self.record_path(RecordKind::History, &json_name(id))?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::EntryNotFound(id.to_string()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    #[tracing::instrument(skip(self, entry), fields(id = %entry.id))]
    pub async fn append_history(&self, entry: &HistoryEntry) -> Result<()> {
        entry.validate()?;
        let path = self.record_path(RecordKind::History, &json_name(&entry.id))?;
        let _guard = self.write_lock.lock().await;
        write_atomic(&path, entry).await?;
        debug!(id = %entry.id, comment = %entry.comment, "appended history entry");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_history(&self, id: &str) -> Result<()> {
        let path = self.record_path(RecordKind::History, &json_name(id))?;
        let _guard = self.write_lock.lock().await;
        remove_if_present(&path).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn clear_history(&self) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        for record in self.scan(RecordKind::History).await? {
            let path = self.record_path(RecordKind::History, &record.name)?;
            remove_if_present(&path).await?;
            removed += 1;
        }
        debug!(removed, "cleared history");
        Ok(removed)
    }

    // -- Raw record access (used by the sync engine) --------------------------

    /// Snapshot the record files of one collection with their local mtimes.
    pub async fn record_files(&self, kind: RecordKind) -> Result<Vec<LocalRecord>> {
        self.scan(kind).await
    }

    pub async fn read_record(&self, kind: RecordKind, name: &str) -> Result<Vec<u8>> {
        let path = self.record_path(kind, name)?;
        Ok(tokio::fs::read(&path).await?)
    }

    /// Upsert a record from raw remote bytes, overwriting any local copy.
    /// The blob must decode as the collection's record type; undecodable
    /// bytes are rejected rather than written into the store.
    pub async fn write_record(&self, kind: RecordKind, name: &str, bytes: &[u8]) -> Result<()> {
        match kind {
            RecordKind::Servers => {
                serde_json::from_slice::<ServerProfile>(bytes)?;
            }
            RecordKind::History => {
                serde_json::from_slice::<HistoryEntry>(bytes)?;
            }
        }
        let path = self.record_path(kind, name)?;
        let _guard = self.write_lock.lock().await;
        write_atomic_bytes(&path, bytes).await?;
        Ok(())
    }

    // -- Internals -----------------------------------------------------------

    async fn read_all<T: DeserializeOwned>(&self, kind: RecordKind) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for record in self.scan(kind).await? {
            let path = self.dir(kind).join(&record.name);
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice(&bytes) {
                Ok(value) => out.push(value),
                Err(e) => {
                    // A single bad file must not take down the whole listing.
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping undecodable record"
                    );
                }
            }
        }
        Ok(out)
    }

    async fn scan(&self, kind: RecordKind) -> Result<Vec<LocalRecord>> {
        let dir = self.dir(kind);
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(StoreError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.ends_with(".json") {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().map(DateTime::<Utc>::from)?;
            records.push(LocalRecord { name, modified });
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

fn json_name(id: &str) -> String {
    format!("{id}.json")
}

async fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic_bytes(path, &bytes).await
}

async fn write_atomic_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_profile(id: &str) -> ServerProfile {
        ServerProfile {
            id: id.to_string(),
            name: format!("server {id}"),
            peer_public_key: "c2VydmVyLWtleQ==".to_string(),
            preshared_key: None,
            endpoint: "vpn.example.com:51820".to_string(),
            allowed_ips: "0.0.0.0/0".to_string(),
            persistent_keepalive: Some(25),
            router_interface: "wg_0".to_string(),
            next_peer_id: 1,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();

        let profile = sample_profile("srv1");
        store.put_server(&profile).await.unwrap();
        assert_eq!(store.get_server("srv1").await.unwrap(), profile);

        store.delete_server("srv1").await.unwrap();
        assert!(matches!(
            store.get_server("srv1").await,
            Err(StoreError::ProfileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_absent_id_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();
        store.delete_server("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn upsert_overwrites_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();

        let mut profile = sample_profile("srv1");
        store.put_server(&profile).await.unwrap();
        profile.endpoint = "other.example.com:51821".to_string();
        store.put_server(&profile).await.unwrap();

        assert_eq!(store.list_servers().await.unwrap().len(), 1);
        assert_eq!(
            store.get_server("srv1").await.unwrap().endpoint,
            "other.example.com:51821"
        );
    }

    #[tokio::test]
    async fn invalid_profile_rejected_before_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();

        let mut profile = sample_profile("srv1");
        profile.endpoint = "not-an-endpoint".to_string();
        assert!(matches!(
            store.put_server(&profile).await,
            Err(StoreError::Validation(_))
        ));
        assert!(store.list_servers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_record_skipped_in_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();
        store.put_server(&sample_profile("srv1")).await.unwrap();

        tokio::fs::write(dir.path().join("servers/garbage.json"), b"{ not json")
            .await
            .unwrap();

        let servers = store.list_servers().await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, "srv1");
    }

    #[tokio::test]
    async fn record_names_with_path_separators_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();
        let result = store
            .read_record(RecordKind::Servers, "../settings.toml")
            .await;
        assert!(matches!(result, Err(StoreError::InvalidName(_))));
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();
        store.put_server(&sample_profile("srv1")).await.unwrap();

        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir.path().join("servers")).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().into_string().unwrap());
        }
        assert_eq!(names, vec!["srv1.json"]);
    }
}

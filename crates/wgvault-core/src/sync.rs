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

//! Reconciliation of the local store against a remote copy.
//!
//! Three operations, all idempotent: upload (local wins everywhere),
//! download (remote wins everywhere), and bidirectional (per-blob
//! newest-wins). A blob that fails is recorded in the result and never
//! aborts the rest of the pass. Sync never deletes: a blob present on only
//! one side is copied, because the engine cannot tell "never existed" from
//! "was deleted".

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::remote::{RemoteError, RemoteStore};
use crate::store::{ConfigStore, RecordKind, StoreError};

/// Counts for one completed sync pass, plus the blobs that failed.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SyncResult {
    pub servers_uploaded: usize,
    pub servers_downloaded: usize,
    pub history_uploaded: usize,
    pub history_downloaded: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<SyncFailure>,
}

/// One blob that could not be reconciled in this pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncFailure {
    pub name: String,
    pub error: String,
}

impl SyncResult {
    pub fn total_uploaded(&self) -> usize {
        self.servers_uploaded + self.history_uploaded
    }

    pub fn total_downloaded(&self) -> usize {
        self.servers_downloaded + self.history_downloaded
    }

    pub fn is_partial(&self) -> bool {
        !self.failed.is_empty()
    }

    fn count(&mut self, kind: RecordKind, direction: Direction) {
        let slot = match (kind, direction) {
            (RecordKind::Servers, Direction::Up) => &mut self.servers_uploaded,
            (RecordKind::Servers, Direction::Down) => &mut self.servers_downloaded,
            (RecordKind::History, Direction::Up) => &mut self.history_uploaded,
            (RecordKind::History, Direction::Down) => &mut self.history_downloaded,
        };
        *slot += 1;
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

/// Which side of a same-id pair holds the value to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockWinner {
    Local,
    Remote,
    Tie,
}

/// The one newest-wins comparison used everywhere in the engine.
///
/// The remote clock is HTTP `Last-Modified`, which has whole-second
/// precision, so both sides are compared at second granularity; otherwise a
/// local sub-second mtime would spuriously beat the remote copy it was just
/// downloaded from. An exact tie means the blobs need no transfer and the
/// local copy stands.
pub fn compare_clocks(local: DateTime<Utc>, remote: DateTime<Utc>) -> ClockWinner {
    match local.timestamp().cmp(&remote.timestamp()) {
        Ordering::Greater => ClockWinner::Local,
        Ordering::Less => ClockWinner::Remote,
        Ordering::Equal => ClockWinner::Tie,
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

#[derive(Debug, Error)]
enum BlobError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("blob vanished between list and read")]
    Vanished,
}

/// Reconciles the store's persisted records against a [`RemoteStore`].
pub struct SyncEngine<R> {
    store: Arc<ConfigStore>,
    remote: R,
    in_flight: Mutex<()>,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(store: Arc<ConfigStore>, remote: R) -> Self {
        Self {
            store,
            remote,
            in_flight: Mutex::new(()),
        }
    }

    /// Push every local record to the remote, overwriting remote copies.
    #[tracing::instrument(skip(self))]
    pub async fn upload(&self) -> Result<SyncResult, SyncError> {
        let _guard = self.in_flight.lock().await;
        let mut result = SyncResult::default();
        for kind in [RecordKind::Servers, RecordKind::History] {
            self.upload_kind(kind, &mut result).await?;
        }
        info!(
            uploaded = result.total_uploaded(),
            failed = result.failed.len(),
            "upload pass complete"
        );
        Ok(result)
    }

    /// Pull every remote record into the store, overwriting local copies.
    #[tracing::instrument(skip(self))]
    pub async fn download(&self) -> Result<SyncResult, SyncError> {
        let _guard = self.in_flight.lock().await;
        let mut result = SyncResult::default();
        for kind in [RecordKind::Servers, RecordKind::History] {
            self.download_kind(kind, &mut result).await?;
        }
        info!(
            downloaded = result.total_downloaded(),
            failed = result.failed.len(),
            "download pass complete"
        );
        Ok(result)
    }

    /// Newest-wins reconciliation in both directions.
    #[tracing::instrument(skip(self))]
    pub async fn bidirectional(&self) -> Result<SyncResult, SyncError> {
        let _guard = self.in_flight.lock().await;
        self.run_bidirectional().await
    }

    /// Bidirectional sync unless a pass is already in flight. The periodic
    /// timer uses this so a slow pass makes the next tick skip, not queue.
    pub async fn try_bidirectional(&self) -> Result<Option<SyncResult>, SyncError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("sync already in flight, skipping tick");
            return Ok(None);
        };
        self.run_bidirectional().await.map(Some)
    }

    async fn run_bidirectional(&self) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::default();
        for kind in [RecordKind::Servers, RecordKind::History] {
            self.bidirectional_kind(kind, &mut result).await?;
        }
        info!(
            uploaded = result.total_uploaded(),
            downloaded = result.total_downloaded(),
            failed = result.failed.len(),
            "bidirectional pass complete"
        );
        Ok(result)
    }

    // -- Per-collection passes ----------------------------------------------

    async fn upload_kind(
        &self,
        kind: RecordKind,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        self.remote.ensure_dir(kind.prefix()).await?;
        for record in self.store.record_files(kind).await? {
            match self.upload_one(kind, &record.name).await {
                Ok(()) => result.count(kind, Direction::Up),
                Err(e) => fail(result, kind, &record.name, e),
            }
        }
        Ok(())
    }

    async fn download_kind(
        &self,
        kind: RecordKind,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        for entry in self.remote.list(kind.prefix()).await? {
            match self.download_one(kind, &entry.name).await {
                Ok(()) => result.count(kind, Direction::Down),
                Err(e) => fail(result, kind, &entry.name, e),
            }
        }
        Ok(())
    }

    async fn bidirectional_kind(
        &self,
        kind: RecordKind,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        self.remote.ensure_dir(kind.prefix()).await?;

        let mut local: BTreeMap<String, DateTime<Utc>> = self
            .store
            .record_files(kind)
            .await?
            .into_iter()
            .map(|r| (r.name, r.modified))
            .collect();

        for entry in self.remote.list(kind.prefix()).await? {
            let name = entry.name.clone();
            match local.remove(&name) {
                Some(local_time) => {
                    let outcome = self
                        .reconcile_overlap(kind, &name, local_time, entry.last_modified)
                        .await;
                    match outcome {
                        Ok(Some(direction)) => result.count(kind, direction),
                        Ok(None) => {}
                        Err(e) => fail(result, kind, &name, e),
                    }
                }
                None => match self.download_one(kind, &name).await {
                    Ok(()) => result.count(kind, Direction::Down),
                    Err(e) => fail(result, kind, &name, e),
                },
            }
        }

        // Whatever is left exists only locally.
        for name in local.into_keys() {
            match self.upload_one(kind, &name).await {
                Ok(()) => result.count(kind, Direction::Up),
                Err(e) => fail(result, kind, &name, e),
            }
        }

        Ok(())
    }

    /// Decide one same-id pair. Returns the direction transferred, or `None`
    /// when the copies are considered equal.
    async fn reconcile_overlap(
        &self,
        kind: RecordKind,
        name: &str,
        local_time: DateTime<Utc>,
        listed_time: Option<DateTime<Utc>>,
    ) -> Result<Option<Direction>, BlobError> {
        let remote_time = match listed_time {
            Some(t) => Some(t),
            None => self.remote.last_modified(&blob_path(kind, name)).await?,
        };
        let Some(remote_time) = remote_time else {
            // The remote reports no clock for this blob; without a basis for
            // comparison the local copy stands.
            debug!(name, "remote reports no last-modified, leaving both sides");
            return Ok(None);
        };

        match compare_clocks(local_time, remote_time) {
            ClockWinner::Remote => {
                self.download_one(kind, name).await?;
                Ok(Some(Direction::Down))
            }
            ClockWinner::Local => {
                self.upload_one(kind, name).await?;
                Ok(Some(Direction::Up))
            }
            ClockWinner::Tie => Ok(None),
        }
    }

    // -- Per-blob transfers --------------------------------------------------

    async fn upload_one(&self, kind: RecordKind, name: &str) -> Result<(), BlobError> {
        let bytes = self.store.read_record(kind, name).await?;
        self.remote.write(&blob_path(kind, name), &bytes).await?;
        debug!(name, prefix = kind.prefix(), "uploaded record");
        Ok(())
    }

    async fn download_one(&self, kind: RecordKind, name: &str) -> Result<(), BlobError> {
        let bytes = self
            .remote
            .read(&blob_path(kind, name))
            .await?
            .ok_or(BlobError::Vanished)?;
        self.store.write_record(kind, name, &bytes).await?;
        debug!(name, prefix = kind.prefix(), "downloaded record");
        Ok(())
    }
}

fn blob_path(kind: RecordKind, name: &str) -> String {
    format!("{}/{}", kind.prefix(), name)
}

fn fail(result: &mut SyncResult, kind: RecordKind, name: &str, error: BlobError) {
    warn!(
        name,
        prefix = kind.prefix(),
        error = %error,
        "record failed to sync, continuing pass"
    );
    result.failed.push(SyncFailure {
        name: name.to_string(),
        error: error.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test_case("2024-06-01T12:00:01Z", "2024-06-01T12:00:00Z", ClockWinner::Local ; "local newer")]
    #[test_case("2024-06-01T12:00:00Z", "2024-06-01T12:00:01Z", ClockWinner::Remote ; "remote newer")]
    #[test_case("2024-06-01T12:00:00Z", "2024-06-01T12:00:00Z", ClockWinner::Tie ; "exact tie")]
    #[test_case("2024-06-01T12:00:00.750Z", "2024-06-01T12:00:00Z", ClockWinner::Tie ; "sub second difference is a tie")]
    fn comparator(local: &str, remote: &str, expected: ClockWinner) {
        assert_eq!(compare_clocks(at(local), at(remote)), expected);
    }

    #[test]
    fn totals_sum_both_collections() {
        let result = SyncResult {
            servers_uploaded: 2,
            history_uploaded: 3,
            servers_downloaded: 1,
            history_downloaded: 4,
            failed: vec![],
        };
        assert_eq!(result.total_uploaded(), 5);
        assert_eq!(result.total_downloaded(), 5);
        assert!(!result.is_partial());
    }
}

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

//! The capability the sync engine needs from a remote blob store: read,
//! write, list with last-modified metadata. Implemented over WebDAV in
//! [`crate::webdav`] and by an in-memory mock in tests.

use std::future::Future;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// One blob in a remote listing. `last_modified` is the remote's own clock
/// and is the comparison basis for bidirectional sync.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub name: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    #[error("authentication rejected by remote store")]
    Auth,

    #[error("request timed out")]
    Timeout,

    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },
}

pub trait RemoteStore {
    /// Read a blob. `None` means the path does not exist remotely.
    fn read(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, RemoteError>> + Send;

    /// Write a blob, creating or overwriting it.
    fn write(
        &self,
        path: &str,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// List the blobs directly under a prefix. A missing prefix lists as
    /// empty, not as an error.
    fn list(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<RemoteEntry>, RemoteError>> + Send;

    /// The remote's last-modified time for one blob, when it reports one.
    fn last_modified(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<DateTime<Utc>>, RemoteError>> + Send;

    /// Make sure a prefix exists so writes under it succeed.
    fn ensure_dir(&self, prefix: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;
}

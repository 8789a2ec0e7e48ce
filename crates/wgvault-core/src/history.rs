//! Domain operations over the generation history, on top of the store's
//! record primitives: per-server filtering and the two bulk exports.

use std::io::Write as _;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};
use wgvault_types::HistoryEntry;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::store::{ConfigStore, StoreError};

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("archive io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Append/query/delete/export over history entries.
pub struct HistoryLedger<'a> {
    store: &'a ConfigStore,
}

impl<'a> HistoryLedger<'a> {
    pub fn new(store: &'a ConfigStore) -> Self {
        Self { store }
    }

    pub async fn append(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        Ok(self.store.append_history(entry).await?)
    }

    pub async fn list(&self) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(self.store.list_history(None).await?)
    }

    /// Entries generated against one server, newest first. Matches on the
    /// stored id, so entries keep showing up after the profile is deleted.
    pub async fn list_by_server(&self, server_id: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
        Ok(self.store.list_history(Some(server_id)).await?)
    }

    pub async fn get(&self, id: &str) -> Result<HistoryEntry, HistoryError> {
        Ok(self.store.get_history(id).await?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), HistoryError> {
        Ok(self.store.delete_history(id).await?)
    }

    pub async fn clear(&self) -> Result<usize, HistoryError> {
        Ok(self.store.clear_history().await?)
    }

    /// Join the router-side peer lines of the given entries, in the given
    /// order, into one importable blob.
    pub async fn export_concatenated(&self, ids: &[String]) -> Result<String, HistoryError> {
        let mut out = String::new();
        for id in ids {
            let entry = self.get(id).await?;
            out.push_str(entry.ikuai_config.trim_end());
            out.push('\n');
        }
        debug!(count = ids.len(), "exported concatenated peer config");
        Ok(out)
    }

    /// Write a zip archive with one client `.conf` per entry.
    pub async fn export_archive(&self, ids: &[String], dest: &Path) -> Result<usize, HistoryError> {
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            entries.push(self.get(id).await?);
        }

        let file = std::fs::File::create(dest)?;
        let mut archive = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut written = 0;
        for entry in &entries {
            archive.start_file(archive_file_name(entry), options)?;
            archive.write_all(entry.wg_config.as_bytes())?;
            written += 1;
        }
        archive.finish()?;

        info!(count = written, dest = %dest.display(), "exported history archive");
        Ok(written)
    }
}

fn archive_file_name(entry: &HistoryEntry) -> String {
    let comment: String = entry
        .comment
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}-{}.conf", comment, entry.peer_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_entry(id: &str, peer_id: u32, server_id: Option<&str>) -> HistoryEntry {
        HistoryEntry {
            id: id.to_string(),
            timestamp: Utc::now(),
            interface_name: "wg0".to_string(),
            comment: format!("device {peer_id}"),
            peer_id,
            address: "192.168.199.10/32".to_string(),
            public_key: "cHVi".to_string(),
            wg_config: format!("[Interface]\n# peer {peer_id}\n"),
            ikuai_config: format!("id={peer_id} interface=wg_0"),
            surge_config: None,
            mikrotik_config: None,
            openwrt_config: None,
            server_id: server_id.map(str::to_string),
            server_name: server_id.map(|_| "home".to_string()),
        }
    }

    #[tokio::test]
    async fn concatenated_export_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();
        let ledger = HistoryLedger::new(&store);

        ledger.append(&sample_entry("a", 1, None)).await.unwrap();
        ledger.append(&sample_entry("b", 2, None)).await.unwrap();

        let blob = ledger
            .export_concatenated(&["b".to_string(), "a".to_string()])
            .await
            .unwrap();
        assert_eq!(blob, "id=2 interface=wg_0\nid=1 interface=wg_0\n");
    }

    #[tokio::test]
    async fn missing_entry_fails_export() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();
        let ledger = HistoryLedger::new(&store);

        let result = ledger.export_concatenated(&["nope".to_string()]).await;
        assert!(matches!(
            result,
            Err(HistoryError::Store(StoreError::EntryNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn archive_contains_one_conf_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path()).await.unwrap();
        let ledger = HistoryLedger::new(&store);

        ledger.append(&sample_entry("a", 1, None)).await.unwrap();
        ledger.append(&sample_entry("b", 2, None)).await.unwrap();

        let dest = dir.path().join("export.zip");
        let written = ledger
            .export_archive(&["a".to_string(), "b".to_string()], &dest)
            .await
            .unwrap();
        assert_eq!(written, 2);

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&dest).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"device_1-1.conf".to_string()));
        assert!(names.contains(&"device_2-2.conf".to_string()));
    }

    #[test]
    fn archive_names_are_sanitized() {
        let mut entry = sample_entry("a", 3, None);
        entry.comment = "../etc/passwd".to_string();
        assert_eq!(archive_file_name(&entry), "___etc_passwd-3.conf");
    }
}

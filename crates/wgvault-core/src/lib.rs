//! wgvault-core: profile store, peer id allocation, legacy migration,
//! generation history, and remote synchronization.
//!
//! The store owns every persisted record; callers get copies. Sync runs
//! against anything implementing [`remote::RemoteStore`]; the shipped
//! implementation is WebDAV.

pub mod alloc;
pub mod history;
pub mod keys;
pub mod migrate;
pub mod qr;
pub mod remote;
pub mod render;
pub mod settings;
pub mod store;
pub mod sync;
pub mod webdav;

pub use history::HistoryLedger;
pub use settings::AppSettings;
pub use store::ConfigStore;
pub use sync::{SyncEngine, SyncResult};
pub use webdav::WebDavClient;

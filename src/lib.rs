//! LAN file sharing library
//!
//! Peers find each other with UDP broadcasts, search each other's shared
//! folders by file name and fetch files over HTTP with resumable downloads.

pub mod core;
pub mod network;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export main types
pub use core::{Config, Daemon, DaemonHandle};
pub use network::{DiscoveryClient, Host, PollMode, Step};
pub use storage::{DirectoryEntry, EntrySize, FileIndex};
pub use transfer::{DownloadClient, DownloadEvent, RemoteClient};
pub use utils::{
    NetUtils,
    error::{DownloadError, Result, ShareError},
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

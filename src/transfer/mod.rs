pub mod downloader;
pub mod remote;
pub mod server;

pub use downloader::{Download, DownloadClient, DownloadEvent};
pub use remote::{RemoteClient, RemoteEntry};
pub use server::TransferServer;

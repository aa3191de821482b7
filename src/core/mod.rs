pub mod config;
pub mod daemon;
pub mod protocol;

pub use config::Config;
pub use daemon::{Daemon, DaemonHandle};
pub use protocol::Request;

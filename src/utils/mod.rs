pub mod cache;
pub mod crypto;
pub mod error;
pub mod format;
pub mod icons;
pub mod logger;
pub mod metrics;
pub mod net_utils;

pub use cache::{Cache, CacheStats};
pub use crypto::{Cipher, PasswordCipher};
pub use error::{DownloadError, Result, ShareError};
pub use format::{byteformat, quote_path, unquote_path};
pub use icons::{IconFactory, UrlIconFactory};
pub use logger::setup_logging;
pub use metrics::MetricsCollector;
pub use net_utils::NetUtils;

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShareError>;

#[derive(Error, Debug)]
pub enum ShareError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid search pattern: {0}")]
    InvalidPattern(String),

    #[error("HTTP error {status} for {url}")]
    Http { url: String, status: u16 },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<std::io::Error> for ShareError {
    fn from(err: std::io::Error) -> Self {
        ShareError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ShareError {
    fn from(err: serde_json::Error) -> Self {
        ShareError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for ShareError {
    fn from(err: reqwest::Error) -> Self {
        match (err.status(), err.url()) {
            (Some(status), Some(url)) => ShareError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            },
            _ => ShareError::NetworkError(err.to_string()),
        }
    }
}

impl From<regex::Error> for ShareError {
    fn from(err: regex::Error) -> Self {
        ShareError::InvalidPattern(err.to_string())
    }
}

/// Failures surfaced by the download client.
#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Refusing path with parent directory segment: {0}")]
    Traversal(String),

    #[error("{} already exists", .0.display())]
    Exists(PathBuf),

    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("Invalid download url: {0}")]
    InvalidUrl(String),

    #[error("HTTP error {status} while downloading {url}")]
    Http { url: String, status: u16 },

    #[error("Network error while downloading: {0}")]
    Network(String),

    #[error("I/O error while downloading: {0}")]
    Io(String),

    #[error("Download failed after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: usize, reason: String },
}

impl DownloadError {
    /// The colliding destination when the download target already exists.
    pub fn existing_path(&self) -> Option<&PathBuf> {
        match self {
            DownloadError::Exists(path) => Some(path),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        DownloadError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        match (err.status(), err.url()) {
            (Some(status), Some(url)) => DownloadError::Http {
                url: url.to_string(),
                status: status.as_u16(),
            },
            _ => DownloadError::Network(err.to_string()),
        }
    }
}

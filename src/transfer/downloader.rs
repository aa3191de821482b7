use futures::TryStreamExt;
use log::{debug, info, warn};
use reqwest::StatusCode;
use reqwest::header::RANGE;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::time::{Duration, sleep};
use tokio_util::io::StreamReader;

use crate::core::Config;
use crate::core::config::STAGING_SUFFIX;
use crate::utils::{DownloadError, unquote_path};

type DownloadResult<T> = std::result::Result<T, DownloadError>;
type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

/// Progress reported by [`Download::next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// Destination path and expected final size, if the server sent one.
    Started { path: PathBuf, total: Option<u64> },
    /// Bytes already present in the staging file.
    Resumed(u64),
    /// One block written.
    Chunk(usize),
}

/// Fetches remote files into the incoming directory, mirroring their path.
#[derive(Clone)]
pub struct DownloadClient {
    config: Arc<Config>,
    http: reqwest::Client,
}

impl DownloadClient {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Prepare a download whose local path is the URL path.
    pub async fn download(&self, url: &str) -> DownloadResult<Download> {
        url::Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{}: {}", url, e)))?;
        // The parsed path has its dot segments resolved already.
        let relative = raw_path(url)
            .ok_or_else(|| DownloadError::InvalidUrl(format!("{} has no path", url)))?;
        self.prepare(url, relative.trim_start_matches('/')).await
    }

    /// Prepare a download whose local path is the part of `url` after
    /// `base`.
    pub async fn download_relative(&self, url: &str, base: &str) -> DownloadResult<Download> {
        let relative = url
            .strip_prefix(base)
            .ok_or_else(|| DownloadError::InvalidUrl(format!("{} is not below {}", url, base)))?;
        self.prepare(url, relative).await
    }

    async fn prepare(&self, url: &str, relative: &str) -> DownloadResult<Download> {
        let decoded = unquote_path(relative);
        let parts: Vec<&str> = decoded.split('/').filter(|part| !part.is_empty()).collect();
        if parts.contains(&"..") {
            return Err(DownloadError::Traversal(decoded.clone()));
        }
        let Some((_, parent_parts)) = parts.split_last() else {
            return Err(DownloadError::InvalidUrl(format!("{} has no file name", url)));
        };

        let incoming = std::path::absolute(&self.config.incoming_path)?;
        let destination = parts.iter().fold(incoming.clone(), |path, part| path.join(part));
        if tokio::fs::symlink_metadata(&destination).await.is_ok() {
            return Err(DownloadError::Exists(destination));
        }

        let staging = staging_path(&destination);
        let resuming = tokio::fs::metadata(&staging).await.is_ok();

        tokio::fs::create_dir_all(&incoming).await?;
        let mut current = incoming;
        for part in parent_parts {
            current.push(part);
            match tokio::fs::metadata(&current).await {
                Ok(metadata) if metadata.is_dir() => {}
                Ok(_) => return Err(DownloadError::NotADirectory(current)),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tokio::fs::create_dir(&current).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            "{} {} -> {:?}",
            if resuming { "Resuming" } else { "Downloading" },
            url,
            destination
        );
        Ok(Download {
            http: self.http.clone(),
            url: url.to_string(),
            staging,
            destination,
            resuming,
            block_size: self.config.download_block_size.max(1),
            retry_delay: self.config.download_retry_delay(),
            max_retries: self.config.download_retries,
            file: None,
            body: None,
            written: 0,
            resumed: None,
            retries: 0,
            finished: false,
        })
    }
}

/// Path of `url` exactly as written, without query or fragment.
fn raw_path(url: &str) -> Option<&str> {
    let (_, rest) = url.split_once("://")?;
    let start = rest.find('/')?;
    let path = &rest[start..];
    let end = path.find(['?', '#']).unwrap_or(path.len());
    Some(&path[..end])
}

fn staging_path(destination: &Path) -> PathBuf {
    let mut staging = destination.as_os_str().to_owned();
    staging.push(STAGING_SUFFIX);
    PathBuf::from(staging)
}

/// A prepared transfer, driven by repeated calls to [`Download::next`].
///
/// The staging file stays on disk when the download fails so that a later
/// attempt resumes it.
pub struct Download {
    http: reqwest::Client,
    url: String,
    staging: PathBuf,
    destination: PathBuf,
    resuming: bool,
    block_size: usize,
    retry_delay: Duration,
    max_retries: usize,
    file: Option<File>,
    body: Option<BodyReader>,
    written: u64,
    resumed: Option<u64>,
    retries: usize,
    finished: bool,
}

impl Download {
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }

    pub fn is_resuming(&self) -> bool {
        self.resuming
    }

    /// Advance the transfer by one step. `Ok(None)` means the file is
    /// complete and in place.
    pub async fn next(&mut self) -> DownloadResult<Option<DownloadEvent>> {
        if self.finished {
            return Ok(None);
        }
        if self.file.is_none() {
            return self.start().await.map(Some);
        }
        if let Some(present) = self.resumed.take() {
            return Ok(Some(DownloadEvent::Resumed(present)));
        }

        let mut block = vec![0u8; self.block_size];
        loop {
            let failure = match self.read_block(&mut block).await {
                Ok(0) => {
                    self.finish().await?;
                    return Ok(None);
                }
                Ok(n) => {
                    let file = self.file.as_mut().ok_or_else(not_started)?;
                    file.write_all(&block[..n]).await?;
                    self.written += n as u64;
                    return Ok(Some(DownloadEvent::Chunk(n)));
                }
                Err(e) => e,
            };
            self.retry(failure).await?;
        }
    }

    /// Drive the download to completion, returning the bytes written by this
    /// call.
    pub async fn run(mut self) -> DownloadResult<u64> {
        let mut transferred = 0;
        while let Some(event) = self.next().await? {
            if let DownloadEvent::Chunk(n) = event {
                transferred += n as u64;
            }
        }
        Ok(transferred)
    }

    async fn start(&mut self) -> DownloadResult<DownloadEvent> {
        let file = if self.resuming {
            OpenOptions::new().append(true).open(&self.staging).await?
        } else {
            File::create(&self.staging).await?
        };
        self.written = file.metadata().await?.len();
        self.file = Some(file);

        let response = self.request().await?;
        let total = response.content_length().map(|length| length + self.written);
        self.body = Some(body_reader(response));
        self.resumed = Some(self.written);

        Ok(DownloadEvent::Started {
            path: self.destination.clone(),
            total,
        })
    }

    /// Issue the request for everything after the bytes already written.
    async fn request(&mut self) -> DownloadResult<reqwest::Response> {
        let mut request = self.http.get(&self.url);
        if self.written > 0 {
            request = request.header(RANGE, format!("bytes={}-", self.written));
        }
        let response = request.send().await?;

        let status = response.status();
        if self.written > 0 && status == StatusCode::OK {
            warn!("{} ignored the range request, starting over", self.url);
            let file = self.file.as_mut().ok_or_else(not_started)?;
            file.set_len(0).await?;
            file.seek(SeekFrom::Start(0)).await?;
            self.written = 0;
        } else if !status.is_success() {
            return Err(DownloadError::Http {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Fill `block` from the body; short only at the end of the body.
    async fn read_block(&mut self, block: &mut [u8]) -> io::Result<usize> {
        let body = self
            .body
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no response body"))?;
        let mut filled = 0;
        while filled < block.len() {
            let n = body.read(&mut block[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    async fn retry(&mut self, failure: io::Error) -> DownloadResult<()> {
        let mut reason = failure.to_string();
        loop {
            self.retries += 1;
            if self.retries > self.max_retries {
                return Err(DownloadError::RetriesExhausted {
                    attempts: self.retries,
                    reason,
                });
            }
            warn!(
                "Transfer of {} interrupted at {} bytes ({}), retrying in {:?}",
                self.url, self.written, reason, self.retry_delay
            );
            sleep(self.retry_delay).await;

            match self.request().await {
                Ok(response) => {
                    self.body = Some(body_reader(response));
                    return Ok(());
                }
                Err(DownloadError::Network(e)) => reason = e,
                Err(e) => return Err(e),
            }
        }
    }

    async fn finish(&mut self) -> DownloadResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        self.body = None;
        tokio::fs::rename(&self.staging, &self.destination).await?;
        self.finished = true;
        debug!("Finished {:?} ({} bytes)", self.destination, self.written);
        Ok(())
    }
}

fn body_reader(response: reqwest::Response) -> BodyReader {
    Box::pin(StreamReader::new(
        response.bytes_stream().map_err(io::Error::other),
    ))
}

fn not_started() -> DownloadError {
    DownloadError::Io("download has not been started".to_string())
}

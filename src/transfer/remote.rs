use log::debug;
use reqwest::header::ACCEPT;
use std::sync::Arc;

use crate::core::Config;
use crate::storage::{DirectoryEntry, EntrySize};
use crate::utils::{Cache, CacheStats, Result, ShareError, quote_path};

const PAGE_CACHE_ITEMS: usize = 64;
const LISTING_CACHE_ITEMS: usize = 2048;

const PREVIEW_EXTENSIONS: [&str; 4] = ["jpg", "png", "jpeg", "gif"];

/// A listing row with absolute URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub url: String,
    pub size: EntrySize,
    pub icon: Option<String>,
}

/// Browses peers over HTTP. Responses are cached for `cache_timeout`.
#[derive(Clone)]
pub struct RemoteClient {
    config: Arc<Config>,
    http: reqwest::Client,
    pages: Cache<String, Vec<u8>>,
    listings: Cache<String, Arc<Vec<DirectoryEntry>>>,
}

impl RemoteClient {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            pages: Cache::new(config.cache_timeout(), PAGE_CACHE_ITEMS),
            listings: Cache::new(config.cache_timeout(), LISTING_CACHE_ITEMS),
            http: reqwest::Client::new(),
            config,
        }
    }

    /// Raw body of `url`.
    pub async fn get_url(&self, url: &str) -> Result<Vec<u8>> {
        let http = self.http.clone();
        let target = url.to_string();
        self.pages
            .get_or_try_insert_with(url.to_string(), || async move {
                let response = http.get(&target).send().await?.error_for_status()?;
                Ok::<_, ShareError>(response.bytes().await?.to_vec())
            })
            .await
    }

    /// Parsed JSON listing of the directory at `url`.
    pub async fn get_json(&self, url: &str) -> Result<Arc<Vec<DirectoryEntry>>> {
        let http = self.http.clone();
        let target = url.to_string();
        self.listings
            .get_or_try_insert_with(url.to_string(), || async move {
                let response = http
                    .get(&target)
                    .header(ACCEPT, "application/json")
                    .send()
                    .await?
                    .error_for_status()?;
                let body = response.bytes().await?;
                Ok::<_, ShareError>(Arc::new(serde_json::from_slice(&body)?))
            })
            .await
    }

    /// URLs of the entries of a directory.
    pub async fn ls(&self, url: &str) -> Result<Vec<String>> {
        let url = directory_url(url);
        let entries = self.get_json(&url).await?;
        Ok(entries
            .iter()
            .map(|entry| format!("{}{}", url, quote_path(&entry.name)))
            .collect())
    }

    /// Entries of a directory with sizes and preview images.
    pub async fn ls_l(&self, url: &str) -> Result<Vec<RemoteEntry>> {
        let url = directory_url(url);
        let entries = self.get_json(&url).await?;
        Ok(entries
            .iter()
            .map(|entry| {
                let file_url = format!("{}{}", url, quote_path(&entry.name));
                let icon = match (&entry.icon, &entry.size) {
                    (Some(cover), _) => Some(format!("{}{}", file_url, quote_path(cover))),
                    (None, EntrySize::File(size))
                        if *size < self.config.max_image_size && is_previewable(&entry.name) =>
                    {
                        Some(file_url.clone())
                    }
                    _ => None,
                };
                RemoteEntry {
                    url: file_url,
                    size: entry.size.clone(),
                    icon,
                }
            })
            .collect())
    }

    /// Size and preview of a single entry, looked up in its parent
    /// listing. `None` for peer roots and entries the peer does not list.
    pub async fn stat(&self, url: &str) -> Result<Option<RemoteEntry>> {
        let trimmed = url.strip_suffix('/').unwrap_or(url);
        if trimmed.matches('/').count() < 3 {
            return Ok(None);
        }
        let Some((parent, _)) = trimmed.rsplit_once('/') else {
            return Ok(None);
        };
        Ok(self
            .ls_l(parent)
            .await?
            .into_iter()
            .find(|entry| entry.url == url))
    }

    /// Every file below `url`, depth first. Subdirectories that fail to list
    /// are skipped.
    pub async fn ls_r(&self, url: &str) -> Result<Vec<String>> {
        if !url.ends_with('/') {
            return Ok(vec![url.to_string()]);
        }

        let mut files = Vec::new();
        let mut stack = vec![self.ls(url).await?.into_iter()];
        while let Some(level) = stack.last_mut() {
            match level.next() {
                None => {
                    stack.pop();
                }
                Some(child) if child.ends_with('/') => match self.ls(&child).await {
                    Ok(children) => stack.push(children.into_iter()),
                    Err(e) => debug!("Skipping {}: {}", child, e),
                },
                Some(child) => files.push(child),
            }
        }
        Ok(files)
    }

    pub async fn reset_cache(&self) {
        self.pages.reset().await;
        self.listings.reset().await;
    }

    /// Hit and miss counters of the listing cache.
    pub async fn listing_stats(&self) -> CacheStats {
        self.listings.stats().await
    }
}

fn directory_url(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{}/", url)
    }
}

fn is_previewable(name: &str) -> bool {
    name.rsplit_once('.').is_some_and(|(_, extension)| {
        PREVIEW_EXTENSIONS.contains(&extension.to_lowercase().as_str())
    })
}

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::Response;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::io::ReaderStream;

use crate::core::Config;
use crate::core::config::DATA_PREFIX;
use crate::storage::listing::{self, ListingOptions};
use crate::storage::{DirectoryEntry, PatternList};
use crate::utils::{IconFactory, MetricsCollector, Result, UrlIconFactory, unquote_path};

type HttpResult = std::result::Result<Response, axum::http::Error>;

struct ServerState {
    config: Arc<Config>,
    share_root: watch::Receiver<PathBuf>,
    hidden: PatternList,
    covers: PatternList,
    icons: Box<dyn IconFactory>,
    metrics: MetricsCollector,
}

/// HTTP side of the daemon: directory listings and file downloads.
pub struct TransferServer {
    listener: TcpListener,
    router: Router,
}

impl TransferServer {
    /// Bind to the configured address. The share root is read from
    /// `share_root` on every request.
    pub async fn bind(
        config: Arc<Config>,
        share_root: watch::Receiver<PathBuf>,
        metrics: MetricsCollector,
    ) -> Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        let router = Self::router(config, share_root, metrics)?;
        info!("Transfer server listening on {}", listener.local_addr()?);
        Ok(Self { listener, router })
    }

    pub fn router(
        config: Arc<Config>,
        share_root: watch::Receiver<PathBuf>,
        metrics: MetricsCollector,
    ) -> Result<Router> {
        let state = ServerState {
            hidden: PatternList::new(&config.hidden_files, false)?,
            covers: PatternList::new(&config.folder_images, true)?,
            icons: Box::new(UrlIconFactory::new(
                config.icon_path(),
                &format!("/{}/icons/32x32/", DATA_PREFIX),
                ".png",
            )),
            config,
            share_root,
            metrics,
        };
        Ok(Router::new().fallback(handle).with_state(Arc::new(state)))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn serve(self) -> Result<()> {
        axum::serve(self.listener, self.router).await?;
        Ok(())
    }
}

async fn handle(
    State(state): State<Arc<ServerState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return plain(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    let share_root = state.share_root.borrow().clone();
    let path = translate_path(uri.path(), &share_root, &state.config.data_path);
    debug!("{} {} -> {:?}", method, uri, path);

    let result = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_dir() => {
            list_directory(&state, &path, uri.path(), &headers).await
        }
        _ => send_file(&state, &path, &headers).await,
    };

    result.unwrap_or_else(|e| {
        error!("Failed to build response for {}: {}", uri, e);
        plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    })
}

/// Map a request path onto the filesystem. `.` and `..` are resolved
/// lexically and can never leave the mapped root.
pub fn translate_path(url_path: &str, share_root: &Path, data_root: &Path) -> PathBuf {
    let decoded = unquote_path(url_path);
    let mut words: Vec<&str> = Vec::new();
    for word in decoded.split('/') {
        match word {
            "" | "." => {}
            ".." => {
                words.pop();
            }
            word => words.push(word),
        }
    }

    let mut path = if words.first() == Some(&DATA_PREFIX) {
        words.remove(0);
        data_root.to_path_buf()
    } else {
        share_root.to_path_buf()
    };
    for word in words {
        path.push(word);
    }
    path
}

/// Start offset of an open ended `bytes=N-` range.
pub fn parse_range(value: &str) -> Option<u64> {
    value
        .strip_prefix("bytes=")?
        .strip_suffix('-')?
        .trim()
        .parse()
        .ok()
}

fn wants_json(headers: &HeaderMap) -> bool {
    match headers.get(header::ACCEPT) {
        None => true,
        Some(accept) => accept.to_str().is_ok_and(|accept| accept.contains("json")),
    }
}

async fn list_directory(
    state: &Arc<ServerState>,
    path: &Path,
    url_path: &str,
    headers: &HeaderMap,
) -> HttpResult {
    let listing_state = state.clone();
    let listing_path = path.to_path_buf();
    let listed = tokio::task::spawn_blocking(move || {
        let options = ListingOptions {
            hidden: &listing_state.hidden,
            covers: &listing_state.covers,
            max_image_size: listing_state.config.max_image_size,
        };
        listing::list_directory(&listing_path, &options)
    })
    .await;

    let entries: Vec<DirectoryEntry> = match listed {
        Ok(Ok(entries)) => entries,
        Ok(Err(e)) => {
            error!("Exception while listing {:?}: {}", path, e);
            state.metrics.record_not_found().await;
            return Ok(plain(StatusCode::NOT_FOUND, "File not found"));
        }
        Err(e) => {
            error!("Listing {:?} panicked: {}", path, e);
            return Ok(plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"));
        }
    };
    state.metrics.record_listing().await;

    let (content_type, body) = if wants_json(headers) {
        let json = serde_json::to_vec(&entries).unwrap_or_else(|e| {
            error!("Failed to serialize listing of {:?}: {}", path, e);
            b"[]".to_vec()
        });
        ("application/json", json)
    } else if state.config.disable_webinterface {
        ("text/html; charset=utf-8", Vec::new())
    } else {
        let html = listing::render_html(
            &unquote_path(url_path),
            &entries,
            state.icons.as_ref(),
            state.config.max_image_size,
        );
        ("text/html; charset=utf-8", html.into_bytes())
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
}

async fn send_file(state: &ServerState, path: &Path, headers: &HeaderMap) -> HttpResult {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            debug!("Cannot open {:?}: {}", path, e);
            state.metrics.record_not_found().await;
            return Ok(plain(StatusCode::NOT_FOUND, "File not found"));
        }
    };
    let metadata = match file.metadata().await {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!("Cannot stat {:?}: {}", path, e);
            state.metrics.record_not_found().await;
            return Ok(plain(StatusCode::NOT_FOUND, "File not found"));
        }
    };
    let size = metadata.len();

    let mut response = Response::builder().header(header::ACCEPT_RANGES, "bytes");
    let offset = headers
        .get(header::RANGE)
        .and_then(|range| range.to_str().ok())
        .and_then(parse_range);

    let length = match offset {
        Some(offset) if offset > size => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{}", size))
                .header(header::CONTENT_LENGTH, 0)
                .body(Body::empty());
        }
        Some(offset) => {
            if let Err(e) = file.seek(SeekFrom::Start(offset)).await {
                error!("Cannot seek {:?} to {}: {}", path, offset, e);
                return Ok(plain(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"));
            }
            response = response
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_RANGE, format!("bytes {}-{}/{}", offset, size, size));
            size - offset
        }
        None => {
            response = response.status(StatusCode::OK);
            size
        }
    };

    if let Ok(modified) = metadata.modified() {
        let modified: DateTime<Utc> = modified.into();
        response = response.header(
            header::LAST_MODIFIED,
            modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
        );
    }

    state.metrics.record_file_served(length).await;
    let content_type = mime_guess::from_path(path).first_or_octet_stream();
    response
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, length)
        .body(Body::from_stream(ReaderStream::new(file.take(length))))
}

fn plain(status: StatusCode, message: &'static str) -> Response {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(message.len()));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tokio::io::AsyncWriteExt;

    struct Fixture {
        _share: tempfile::TempDir,
        _data: tempfile::TempDir,
        base: String,
        content: Vec<u8>,
    }

    async fn start_server(disable_webinterface: bool) -> Fixture {
        let share = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        fs::create_dir_all(share.path().join("Foo/bar")).unwrap();
        fs::write(share.path().join(".invisible"), b"secret").unwrap();
        fs::write(share.path().join("Foo/bar/spam"), b"eggs").unwrap();
        let content: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        fs::write(share.path().join("data.bin"), &content).unwrap();
        fs::write(data.path().join("directoryindex.css"), b"body {}").unwrap();

        let config = Arc::new(Config {
            port: 0,
            bind_ip: "127.0.0.1".parse().unwrap(),
            data_path: data.path().to_path_buf(),
            disable_webinterface,
            ..Config::default()
        });
        let (_root_tx, root_rx) = watch::channel(share.path().to_path_buf());
        let server = TransferServer::bind(config, root_rx, MetricsCollector::new())
            .await
            .unwrap();
        let base = format!("http://{}", server.local_addr().unwrap());
        tokio::spawn(server.serve());

        Fixture {
            _share: share,
            _data: data,
            base,
            content,
        }
    }

    #[test]
    fn test_translate_path() {
        let share = Path::new("/srv/share");
        let data = Path::new("/usr/share/lan-share");
        assert_eq!(translate_path("/", share, data), share);
        assert_eq!(translate_path("/a%20b/c", share, data), share.join("a b/c"));
        assert_eq!(translate_path("/../../etc/passwd", share, data), share.join("etc/passwd"));
        assert_eq!(translate_path("/a/../../b/./c", share, data), share.join("b/c"));
        assert_eq!(translate_path("/__data__/icons/x.png", share, data), data.join("icons/x.png"));
        assert_eq!(translate_path("/%2e%2e/secret", share, data), share.join("secret"));
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=100-"), Some(100));
        assert_eq!(parse_range("bytes=0-"), Some(0));
        assert_eq!(parse_range("bytes=abc-"), None);
        assert_eq!(parse_range("bytes=0-10"), None);
    }

    #[tokio::test]
    async fn test_json_listing() {
        let fixture = start_server(false).await;
        let response = reqwest::Client::new()
            .get(format!("{}/", fixture.base))
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert!(response.headers().contains_key(header::CONTENT_LENGTH));

        let entries: Vec<DirectoryEntry> = response.json().await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Foo/", "data.bin"]);
    }

    #[tokio::test]
    async fn test_listing_negotiation() {
        let fixture = start_server(false).await;
        let addr = fixture.base.trim_start_matches("http://");

        // A request without any Accept header.
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET / HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();
        assert!(raw.starts_with("HTTP/1.1 200"));
        assert!(raw.to_lowercase().contains("content-type: application/json"));
        assert!(raw.ends_with(r#"[["Foo/",[1,0],null],["data.bin",1000,null]]"#));

        let response = reqwest::get(format!("{}/", fixture.base)).await.unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
    }

    #[tokio::test]
    async fn test_html_listing() {
        let fixture = start_server(false).await;
        let client = reqwest::Client::new();
        let response = client
            .get(format!("{}/Foo/", fixture.base))
            .header(header::ACCEPT, "text/html")
            .send()
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html; charset=utf-8");
        let body = response.text().await.unwrap();
        assert!(body.contains("Index of /Foo/"));
        assert!(body.contains("href=\"bar/\""));

        let fixture = start_server(true).await;
        let response = client
            .get(format!("{}/Foo/", fixture.base))
            .header(header::ACCEPT, "text/html")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(response.text().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_full_and_partial_file() {
        let fixture = start_server(false).await;
        let client = reqwest::Client::new();
        let url = format!("{}/data.bin", fixture.base);

        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(response.bytes().await.unwrap().as_ref(), fixture.content.as_slice());

        let response = client
            .get(&url)
            .header(header::RANGE, "bytes=100-")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 206);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 100-1000/1000");
        assert_eq!(response.headers()[header::CONTENT_LENGTH], "900");
        assert_eq!(response.bytes().await.unwrap().as_ref(), &fixture.content[100..]);

        let response = client
            .get(&url)
            .header(header::RANGE, "bytes=nonsense-")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let response = client
            .get(&url)
            .header(header::RANGE, "bytes=5000-")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 416);
    }

    #[tokio::test]
    async fn test_not_found_and_data_prefix() {
        let fixture = start_server(false).await;
        let response = reqwest::get(format!("{}/nope.txt", fixture.base)).await.unwrap();
        assert_eq!(response.status(), 404);

        let response = reqwest::get(format!("{}/__data__/directoryindex.css", fixture.base))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "body {}");

        let response = reqwest::get(format!("{}/Foo/bar/../../Foo/bar/spam?x=1", fixture.base))
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "eggs");
    }
}

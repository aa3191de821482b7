use log::{error, info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::core::Config;
use crate::network::Responder;
use crate::storage::{FileIndex, PatternList};
use crate::transfer::TransferServer;
use crate::utils::{MetricsCollector, Result};

/// Controls a running [`Daemon`] from other tasks.
#[derive(Clone)]
pub struct DaemonHandle {
    shutdown: mpsc::Sender<()>,
    share_path: Arc<watch::Sender<PathBuf>>,
}

impl DaemonHandle {
    /// Serve a different directory. The index is rebuilt for it.
    pub fn set_share_path(&self, path: PathBuf) {
        info!("Share path changed to {:?}", path);
        self.share_path.send_replace(path);
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(()).await;
    }
}

/// The serving side: file index, discovery responder and transfer server.
pub struct Daemon {
    config: Arc<Config>,
    index: Option<FileIndex>,
    responder: Option<Responder>,
    server: TransferServer,
    share_path: Arc<watch::Sender<PathBuf>>,
    share_root: watch::Receiver<PathBuf>,
    metrics: MetricsCollector,
    shutdown_tx: mpsc::Sender<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl Daemon {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let metrics = MetricsCollector::new();
        let (share_path, share_root) = watch::channel(config.share_path.clone());

        let (index, responder) = if config.invisible {
            info!("Invisible mode, not answering discovery or search requests");
            (None, None)
        } else {
            let hidden = PatternList::new(&config.hidden_files, false)?;
            let index = FileIndex::start(
                config.share_path.clone(),
                hidden,
                config.max_search_results,
                config.index_interval(),
            );
            let responder = Responder::bind(config.clone(), index.clone(), metrics.clone()).await?;
            (Some(index), Some(responder))
        };

        let server =
            TransferServer::bind(config.clone(), share_root.clone(), metrics.clone()).await?;
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        Ok(Self {
            config,
            index,
            responder,
            server,
            share_path: Arc::new(share_path),
            share_root,
            metrics,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            shutdown: self.shutdown_tx.clone(),
            share_path: self.share_path.clone(),
        }
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        self.server.local_addr()
    }

    /// `None` in invisible mode.
    pub fn udp_addr(&self) -> Option<SocketAddr> {
        self.responder
            .as_ref()
            .and_then(|responder| responder.local_addr().ok())
    }

    pub fn index(&self) -> Option<&FileIndex> {
        self.index.as_ref()
    }

    pub fn metrics(&self) -> MetricsCollector {
        self.metrics.clone()
    }

    /// Serve until Ctrl+C or [`DaemonHandle::shutdown`].
    pub async fn run(mut self) -> Result<()> {
        info!(
            "Sharing {:?} as {} on port {}",
            self.config.share_path, self.config.hostname, self.config.port
        );

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();
        if let Some(responder) = self.responder.take() {
            tasks.push(tokio::spawn(responder.run()));
        }
        if let Some(index) = self.index.clone() {
            tasks.push(follow_share_path(self.share_root.clone(), index));
        }

        let mut server = tokio::spawn(self.server.serve());
        let result = tokio::select! {
            _ = self.shutdown_rx.recv() => {
                info!("Shutdown signal received");
                Ok(())
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                Ok(())
            }
            served = &mut server => match served {
                Ok(result) => result,
                Err(e) => {
                    error!("Transfer server task failed: {}", e);
                    Ok(())
                }
            },
        };

        server.abort();
        for task in tasks {
            task.abort();
        }
        self.metrics.print_stats().await;
        result
    }
}

fn follow_share_path(mut share_root: watch::Receiver<PathBuf>, index: FileIndex) -> JoinHandle<()> {
    tokio::spawn(async move {
        while share_root.changed().await.is_ok() {
            let path = share_root.borrow_and_update().clone();
            index.set_root(path);
        }
        warn!("Share path channel closed");
    })
}

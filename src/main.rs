use clap::{Args, Parser, Subcommand};
use lan_share::utils::{byteformat, setup_logging};
use lan_share::{
    Config, Daemon, DiscoveryClient, DownloadClient, DownloadError, DownloadEvent, EntrySize,
    PollMode, RemoteClient, Result, ShareError, Step,
};
use log::{LevelFilter, error, warn};
use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "lan-share")]
#[command(about = "Share, find and fetch files on the local network")]
#[command(version)]
struct Cli {
    /// Log informational messages
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Log debug messages
    #[arg(short, long, global = true)]
    debug: bool,
    /// JSON configuration file, command line flags take precedence
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(flatten)]
    network: NetworkArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct NetworkArgs {
    /// UDP and HTTP port
    #[arg(short, long, global = true)]
    port: Option<u16>,
    /// Discovery word shared by all peers
    #[arg(long, global = true)]
    network_name: Option<String>,
    /// Encrypt discovery traffic with this password
    #[arg(long, global = true)]
    password: Option<String>,
    /// Broadcast address for discovery and search
    #[arg(long, global = true)]
    broadcast: Option<IpAddr>,
    /// Peer that is always listed (host:port), may be repeated
    #[arg(long = "static-host", global = true)]
    static_hosts: Vec<String>,
    /// Show host names instead of addresses
    #[arg(long, global = true)]
    resolve: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Share a directory with the network
    Serve {
        /// Directory to share
        #[arg(short, long)]
        share: Option<PathBuf>,
        /// Name announced to other peers
        #[arg(long)]
        hostname: Option<String>,
        /// Serve files but do not answer discovery or search
        #[arg(long)]
        invisible: bool,
        /// Send empty pages to browsers
        #[arg(long)]
        no_web: bool,
    },
    /// List peers on the network
    Discover,
    /// Search all peers for file names starting with a pattern
    Search {
        /// Case-insensitive regular expression
        pattern: String,
    },
    /// List a remote directory
    Ls {
        url: String,
        /// Show sizes
        #[arg(short, long)]
        long: bool,
        /// List every file below the directory
        #[arg(short, long)]
        recursive: bool,
    },
    /// Download files or whole directories
    Download {
        urls: Vec<String>,
        /// Directory to download into
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => Config::default(),
    };

    let network = &cli.network;
    if let Some(port) = network.port {
        config.port = port;
    }
    if let Some(name) = &network.network_name {
        config.network_name = name.clone();
    }
    if network.password.is_some() {
        config.network_password = network.password.clone();
    }
    if let Some(broadcast) = network.broadcast {
        config.broadcast_ip = broadcast;
    }
    config.static_hosts.extend(network.static_hosts.iter().cloned());
    config.resolve_hosts |= network.resolve;

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(if cli.debug {
        LevelFilter::Debug
    } else if cli.verbose {
        LevelFilter::Info
    } else {
        LevelFilter::Warn
    });

    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Serve {
            share,
            hostname,
            invisible,
            no_web,
        } => {
            if let Some(share) = share {
                config.share_path = share;
            }
            if let Some(hostname) = hostname {
                config.hostname = hostname;
            }
            config.invisible |= invisible;
            config.disable_webinterface |= no_web;

            let daemon = Daemon::new(config).await?;
            println!("Serving on http://{}", daemon.http_addr()?);
            daemon.run().await?;
        }
        Commands::Discover => {
            let client = DiscoveryClient::new(Arc::new(config));
            let mut discovery = client.discover(PollMode::Blocking);
            while let Some(step) = discovery.next().await? {
                if let Step::Item(host) = step {
                    println!("{}\t{}", host.name, host.url);
                }
            }
        }
        Commands::Search { pattern } => {
            let client = DiscoveryClient::new(Arc::new(config));
            for hit in client.search_all(&pattern).await? {
                println!("{}", hit);
            }
        }
        Commands::Ls {
            url,
            long,
            recursive,
        } => {
            let client = RemoteClient::new(Arc::new(config));
            if recursive {
                for file in client.ls_r(&url).await? {
                    println!("{}", file);
                }
            } else if long {
                for entry in client.ls_l(&url).await? {
                    let size = match entry.size {
                        EntrySize::File(bytes) => byteformat(bytes),
                        EntrySize::Directory(dirs, files) => {
                            format!("{} dirs, {} files", dirs, files)
                        }
                    };
                    println!("{:>20}  {}", size, entry.url);
                }
            } else {
                for entry in client.ls(&url).await? {
                    println!("{}", entry);
                }
            }
        }
        Commands::Download { urls, output } => {
            if let Some(output) = output {
                config.incoming_path = output;
            }
            let config = Arc::new(config);
            let remote = RemoteClient::new(config.clone());
            let downloader = DownloadClient::new(config);

            let mut failed = 0;
            for url in urls {
                let jobs: Vec<(String, Option<String>)> = if url.ends_with('/') {
                    let base = parent_url(&url);
                    remote
                        .ls_r(&url)
                        .await?
                        .into_iter()
                        .map(|file| (file, Some(base.clone())))
                        .collect()
                } else {
                    vec![(url, None)]
                };

                for (file, base) in jobs {
                    if let Err(e) = fetch(&downloader, &file, base.as_deref()).await {
                        match e.existing_path() {
                            Some(path) => warn!("Skipping {}, {:?} already exists", file, path),
                            None => {
                                error!("Failed to download {}: {}", file, e);
                                failed += 1;
                            }
                        }
                    }
                }
            }
            if failed > 0 {
                return Err(ShareError::NetworkError(format!(
                    "{} downloads failed",
                    failed
                )));
            }
        }
    }

    Ok(())
}

fn parent_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, _)) => format!("{}/", parent),
        None => url.to_string(),
    }
}

async fn fetch(
    client: &DownloadClient,
    url: &str,
    base: Option<&str>,
) -> std::result::Result<(), DownloadError> {
    let mut download = match base {
        Some(base) => client.download_relative(url, base).await?,
        None => client.download(url).await?,
    };

    let mut total = None;
    let mut done = 0u64;
    while let Some(event) = download.next().await? {
        match event {
            DownloadEvent::Started { path, total: size } => {
                println!("{} -> {}", url, path.display());
                total = size;
            }
            DownloadEvent::Resumed(present) => done = present,
            DownloadEvent::Chunk(n) => {
                done += n as u64;
                match total {
                    Some(total) => print!("\r{} / {}", byteformat(done), byteformat(total)),
                    None => print!("\r{}", byteformat(done)),
                }
                let _ = std::io::stdout().flush();
            }
        }
    }
    println!();
    Ok(())
}

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use waypost::auth::{self, CredentialStore, PasswordDigest, Secret};
use waypost::config::{Config, LoggerMode, DEFAULT_CONFIG_PATH};
use waypost::filter;
use waypost::proxy::LocalAddrs;
use waypost::server::pool::WorkerPool;
use waypost::server::{Server, Worker};

#[derive(Debug, Parser)]
#[command(name = "waypost", version, about = "Forward HTTP proxy with CONNECT tunneling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the proxy server
    Serve {
        /// Path to the YAML config file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
    /// Read a password from stdin and print a passwords-file entry
    Passwd {
        username: String,
        /// Base64 pepper, must match `filters.auth.pepper`
        #[arg(long, default_value = "")]
        pepper: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config } => serve(&config).await,
        Command::Passwd { username, pepper } => passwd(&username, &pepper),
    }
}

async fn serve(path: &Path) -> anyhow::Result<()> {
    let cfg = Config::load(path).with_context(|| format!("error while reading config {}", path.display()))?;
    init_logging(cfg.logger.mode);

    let credentials = Arc::new(load_credentials(&cfg)?);
    if cfg.filters.auth.enabled {
        tracing::info!(users = credentials.len(), "Loaded proxy credentials");
    }

    let local_addrs = LocalAddrs::new();
    let pool = WorkerPool::new(cfg.worker.pool_size, |id| {
        Worker::new(id, filter::chain_from_config(&cfg, credentials.clone(), &local_addrs))
    });

    let mut server = Server::new(pool)
        .local_addrs(local_addrs)
        .read_timeout(cfg.read_timeout())
        .shutdown_timeout(cfg.shutdown_timeout());

    for addr in cfg.listen_addrs()? {
        server
            .listen(&addr)
            .await
            .with_context(|| format!("failed to listen on {}", addr))?;
    }

    tracing::info!(workers = cfg.worker.pool_size, "Waypost started");

    shutdown_signal().await;
    tracing::info!("Shutdown signal received");
    server.close().await;

    Ok(())
}

fn load_credentials(cfg: &Config) -> anyhow::Result<CredentialStore> {
    let cfa = &cfg.filters.auth;
    if !cfa.enabled {
        return Ok(CredentialStore::new());
    }

    let pepper = auth::decode_pepper(&cfa.pepper).context("error while decoding pepper")?;

    let mut store: CredentialStore = cfa
        .users
        .iter()
        .map(|(user, pass)| (user.clone(), Secret::Plaintext(pass.clone())))
        .collect();

    if let Some(file) = &cfa.passwords_file {
        let from_file = auth::read_passwords_file(file, &pepper)
            .context("error while reading passwords file")?;
        // File entries take precedence over inline users.
        store.extend(from_file);
    }

    Ok(store)
}

fn init_logging(mode: LoggerMode) {
    let default_level = match mode {
        LoggerMode::Development => "debug",
        LoggerMode::Production => "info",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match mode {
        LoggerMode::Development => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_level(true)
            .init(),
        LoggerMode::Production => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_level(true)
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for interrupt");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn passwd(username: &str, pepper: &str) -> anyhow::Result<()> {
    let pepper = auth::decode_pepper(pepper).context("error while decoding pepper")?;

    let mut password = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut password)
        .context("failed to read password from stdin")?;
    let password = password.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        anyhow::bail!("password must not be empty");
    }

    let digest = PasswordDigest::generate(password, &pepper).context("error while hashing password")?;
    println!("{}", auth::format_entry(username, &digest));
    Ok(())
}

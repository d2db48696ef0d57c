mod bitbucket;
mod docker;
mod operator;
mod pool;
mod server;
mod shared;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bitbucket::BitbucketClient;
use crate::docker::{DockerClient, DockerConfig};
use crate::operator::Operator;
use crate::pool::PoolManager;
use crate::shared::{AppState, Config};

#[derive(Parser)]
#[command(name = "bbpool")]
#[command(version, about = "bbpool - pool of ready-to-use Bitbucket Server containers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Add-on jar installed into every new container
    #[arg(short = 'a', long = "addonpath", global = true)]
    addon_path: Option<PathBuf>,

    /// License file applied to the add-on
    #[arg(short = 'l', long = "licensepath", global = true)]
    license_path: Option<PathBuf>,

    /// Path to the YAML config file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    debug: bool,

    /// Directory for log files
    #[arg(long, default_value = "./logs", global = true)]
    log_dir: String,

    /// Docker socket; the local default is used when unset
    #[arg(long, env = "BBPOOL_DOCKER_SOCKET", global = true)]
    docker_socket: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the REST API together with the reclaim loop and bootstrap (default)
    Serve,

    /// Run one reclaim pass and exit
    Reclaim,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if let Err(e) = shared::logging::init_logging(&cli.log_dir, "bbpool", cli.debug) {
        eprintln!("Failed to initialize logging: {e:#}");
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let addon_path = cli
        .addon_path
        .context("the --addonpath argument is required")?;
    let license_path = cli
        .license_path
        .context("the --licensepath argument is required")?;

    let config = Config::load(&cli.config, addon_path, license_path)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    let config = Arc::new(config);

    if config.database.is_some() {
        warn!("The database section of the config is ignored; pool state lives in container names");
    }

    let runtime = DockerClient::new(DockerConfig {
        socket_path: cli.docker_socket,
        ..DockerConfig::default()
    })
    .await
    .context("Failed to connect to Docker")?;

    let app = BitbucketClient::new(&config.bitbucket.username, &config.bitbucket.password)
        .context("Failed to build Bitbucket client")?;

    let pool = Arc::new(PoolManager::new(
        config.clone(),
        Arc::new(runtime),
        Arc::new(app),
    ));

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    ctrlc::set_handler(move || {
        if signal.is_cancelled() {
            process::exit(130);
        }
        info!("Shutting down bbpool...");
        signal.cancel();
    })?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config, pool, cancel).await,
        Commands::Reclaim => {
            let report = pool.reclaim_expired().await?;
            info!(
                removed = report.removed.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "Reclaim pass finished"
            );
            Ok(())
        }
    }
}

async fn serve(config: Arc<Config>, pool: Arc<PoolManager>, cancel: CancellationToken) -> Result<()> {
    info!(
        r#"
 _     _                     _
| |__ | |__  _ __   ___   ___ | |
| '_ \| '_ \| '_ \ / _ \ / _ \| |
| |_) | |_) | |_) | (_) | (_) | |
|_.__/|_.__/| .__/ \___/ \___/|_|
            |_|
Starting bbpool {}...
PID: {}
"#,
        env!("CARGO_PKG_VERSION"),
        process::id()
    );
    info!(
        prefix = %config.prefix,
        version = %config.bitbucket.version,
        max_size = config.pool.max_size,
        initial_size = config.pool.initial_size,
        "Pool configuration"
    );

    let mut operator = Operator::new(pool.clone(), cancel.clone());
    operator.start().await?;

    let state = Arc::new(AppState {
        pool,
        cancel: cancel.clone(),
    });
    let result = server::rest::server::run_rest_server(&config, state, cancel.clone()).await;

    operator.shutdown().await;
    result
}

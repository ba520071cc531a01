use clap::{Parser, Subcommand};
use memcached_harness::{Address, HarnessConfig, Supervisor};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_appender::non_blocking;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[derive(Parser)]
#[command(name = "memcached-harness")]
#[command(about = "Start and supervise memcached servers for client test suites")]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print where a usable memcached binary was found
    Locate,
    /// Start a flushed server and keep it running until interrupted
    Run {
        /// TCP port to listen on
        #[arg(short, long, conflicts_with = "socket")]
        port: Option<u16>,
        /// Unix socket path to listen on
        #[arg(short, long)]
        socket: Option<PathBuf>,
        /// Extra arguments for memcached, e.g. "-m 64 -vv"
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        args: String,
    },
}

fn init_logging() {
    let (non_blocking_writer, guard) = non_blocking(std::io::stderr());
    // Keep guard alive for the program lifetime to avoid log loss
    let _ = LOG_GUARD.set(guard);

    let fmt = tracing_subscriber::fmt()
        .with_writer(non_blocking_writer)
        .with_ansi(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .compact();

    // Map RUST_LOG to a max level (debug/info/warn/error/trace)
    let level = match std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let _ = fmt.with_max_level(level).try_init();
}

async fn load_config(path: Option<&str>) -> Result<HarnessConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(HarnessConfig::from_yaml_file(path).await?),
        None => Ok(HarnessConfig::default()),
    }
}

fn address_from(port: Option<u16>, socket: Option<PathBuf>) -> Address {
    match (port, socket) {
        (_, Some(path)) => Address::UnixPath(path),
        (Some(port), None) => Address::tcp(port),
        (None, None) => Address::tcp(memcached_harness::supervisor::DEFAULT_PERSISTENT_PORT),
    }
}

async fn run_with_shutdown(
    config: HarnessConfig,
    address: Address,
    extra_args: &str,
    shutdown: impl std::future::Future<Output = ()> + Send,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut supervisor = Supervisor::new(config)?;
    let options = supervisor.client_options();

    let mut client = match supervisor
        .start_and_flush_with_retry(address.clone(), extra_args, &options)
        .await
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to start memcached on {}: {}", address, e);
            return Err(e.into());
        }
    };

    match client.version().await {
        Ok(version) => info!("memcached {} ready on {}", version, address),
        Err(e) => info!("memcached ready on {} (version unavailable: {})", address, e),
    }

    shutdown.await;
    info!("Shutdown signal received");
    supervisor.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = Args::parse();
    let config = load_config(args.config.as_deref()).await?;

    match args.command {
        Commands::Locate => {
            let supervisor = Supervisor::new(config)?;
            let location = supervisor.locate().await?;
            println!("{}", location.executable().display());
        }
        Commands::Run { port, socket, args } => {
            run_with_shutdown(config, address_from(port, socket), &args, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
            info!("memcached stopped");
        }
    }
    Ok(())
}

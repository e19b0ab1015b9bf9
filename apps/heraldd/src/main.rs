use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    clap::{Parser, Subcommand},
    herald_config::HeraldConfig,
    herald_monitor::{
        ConfigWatchStore, EngineSettings, Monitor, MonitorDeps, PooledSink, SqliteStatusCache,
        StatusCache,
    },
    herald_onebot::{ClientPool, Endpoint, Target},
    herald_upstream::{BiliClient, HttpRenderer, NoopRenderer, ScreenshotRenderer},
    sqlx::SqlitePool,
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "heraldd", about = "Herald — creator-feed watcher and notifier")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Explicit config file; the default is discovery from ./ and
    /// ~/.config/herald/.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring daemon (the default).
    Run,
    /// Print cached account status as JSON.
    Status,
    /// Send a one-off message through an account binding.
    Send {
        /// Account uid the binding belongs to.
        #[arg(long)]
        uid: String,
        /// Binding id within the account.
        #[arg(long, default_value_t = 1)]
        binding: i64,
        #[arg(short, long)]
        message: String,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<HeraldConfig> {
    match &cli.config {
        Some(path) => herald_config::load_config(path),
        None => Ok(herald_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "heraldd starting");
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::Status => print_status(config).await,
        Commands::Send {
            uid,
            binding,
            message,
        } => send_once(config, &uid, binding, &message).await,
    }
}

async fn run_daemon(config: HeraldConfig) -> anyhow::Result<()> {
    if config.accounts.iter().filter(|a| a.enabled).count() == 0 {
        warn!("no enabled accounts configured, nothing to watch");
    }

    let db = SqlitePool::connect(&config.status_db).await?;
    let cache = Arc::new(SqliteStatusCache::init(db).await?);

    let http_timeout = Duration::from_secs(config.http_timeout_secs.max(1));
    let gateway = Arc::new(BiliClient::new(&config.user_agent, http_timeout)?);
    let renderer: Arc<dyn ScreenshotRenderer> = match &config.screenshot.endpoint {
        Some(endpoint) if !endpoint.is_empty() => {
            info!(endpoint = %endpoint, "screenshot rendering enabled");
            Arc::new(HttpRenderer::new(endpoint, http_timeout)?)
        },
        _ => Arc::new(NoopRenderer),
    };

    let pool = Arc::new(ClientPool::new());
    let sink = Arc::new(PooledSink::new(Arc::clone(&pool)));

    let settings = EngineSettings {
        poll_interval_secs: config.poll_interval_secs,
        recurring_minutes: config.live_recurring_minutes,
        catch_up_limit: config.catch_up_limit,
    };
    let store = Arc::new(ConfigWatchStore::new(config));

    let cancel = CancellationToken::new();
    let _handle = Monitor::spawn(
        MonitorDeps {
            store,
            gateway,
            renderer,
            sink,
            cache,
            settings,
        },
        cancel.clone(),
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    cancel.cancel();
    pool.shutdown().await;
    Ok(())
}

async fn print_status(config: HeraldConfig) -> anyhow::Result<()> {
    let db = SqlitePool::connect(&config.status_db).await?;
    let cache = SqliteStatusCache::init(db).await?;
    let snapshots = cache.all().await?;
    println!("{}", serde_json::to_string_pretty(&snapshots)?);
    Ok(())
}

async fn send_once(
    config: HeraldConfig,
    uid: &str,
    binding_id: i64,
    message: &str,
) -> anyhow::Result<()> {
    let account = config
        .accounts
        .iter()
        .find(|a| a.uid == uid)
        .ok_or_else(|| anyhow::anyhow!("no account with uid {uid}"))?;
    let binding = account
        .bindings
        .iter()
        .find(|b| b.id == Some(binding_id))
        .ok_or_else(|| anyhow::anyhow!("no binding {binding_id} on account {uid}"))?;

    let pick = |own: &str, fallback: &str| {
        if own.is_empty() { fallback } else { own }.to_owned()
    };
    let endpoint = Endpoint::new(
        pick(&binding.ws_url, &config.gateway.ws_url),
        pick(&binding.access_token, &config.gateway.access_token),
    );
    let kind = pick(&binding.target_kind, &config.gateway.target_kind);
    let id = pick(&binding.target_id, &config.gateway.target_id);
    let target = Target::resolve(&kind, &id)
        .ok_or_else(|| anyhow::anyhow!("binding target {kind}:{id} does not resolve"))?;

    let pool = ClientPool::new();
    let client = pool
        .resolve(&endpoint)
        .await
        .ok_or_else(|| anyhow::anyhow!("gateway endpoint not configured"))?;
    let reply = client
        .send_text_with_result(&target, message, Duration::from_secs(15))
        .await
        .map_err(|e| anyhow::anyhow!("send failed: {e}"))?;
    println!("{reply}");
    pool.shutdown().await;
    Ok(())
}

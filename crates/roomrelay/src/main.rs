//! roomrelay server entrypoint

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use roomrelay::config::RelayConfig;
use roomrelay::http::{self, AppState, ROOM_IDLE_SWEEP_MIN_AGE};
use roomrelay::rooms::RoomManager;

#[derive(Parser)]
#[command(name = "roomrelay-server")]
#[command(about = "Multi-tenant WebSocket relay for browser/local/agent rooms", long_about = None)]
struct Cli {
    /// Server bind address
    #[arg(short, long)]
    addr: Option<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit structured JSON logs instead of pretty text
    #[arg(long)]
    json_logs: bool,
}

fn load_config(cli: &Cli) -> RelayConfig {
    let mut config = match &cli.config {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
                eprintln!("failed to parse config {}: {err}", path.display());
                RelayConfig::default()
            }),
            Err(err) => {
                eprintln!("failed to read config {}: {err}", path.display());
                RelayConfig::default()
            }
        },
        None => RelayConfig::default(),
    };

    if let Some(addr) = &cli.addr {
        config.bind_addr = addr.clone();
    }
    if cli.json_logs {
        config.log_format = "json".to_string();
    }
    config.validate();
    config
}

fn init_logging(config: &RelayConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = load_config(&cli);
    init_logging(&config);

    tracing::info!(bind_addr = %config.bind_addr, "starting roomrelay");

    let rooms = Arc::new(RoomManager::new());
    spawn_cleanup_task(Arc::clone(&rooms), &config);

    let app = http::router(AppState::new(rooms, config.rate_limit));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {}: {err}", config.bind_addr));

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .unwrap_or_else(|err| panic!("server error: {err}"));
}

fn spawn_cleanup_task(rooms: Arc<RoomManager>, config: &RelayConfig) {
    let interval = std::time::Duration::from_secs(config.cleanup_interval_secs);
    let min_age = ROOM_IDLE_SWEEP_MIN_AGE.max(std::time::Duration::from_secs(config.room_idle_secs));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = rooms.cleanup_idle(min_age).await;
            if removed > 0 {
                tracing::debug!(removed, "idle rooms reaped");
            }
        }
    });
}

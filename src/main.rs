use std::sync::Arc;

use tracing::info;
use tracing_subscriber::prelude::*;

use chatgate::bot::Registry;
use chatgate::command::CommandDispatcher;
use chatgate::config::Config;
use chatgate::correlate::Correlator;
use chatgate::platform::{MediaFetcher, PlatformClient};
use chatgate::router::Router;
use chatgate::store::{HistoryStore, KvStore, MemoryStore, SqliteStore, UserStore};
use chatgate::webhook;

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // Setup logging: stdout plus a non-blocking file appender.
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("chatgate.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .init();

    info!("🚀 Starting chatgate...");

    let kv: Arc<dyn KvStore> = match &config.store_path {
        Some(path) => match SqliteStore::open(path) {
            Ok(store) => Arc::new(store),
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        },
        None => {
            info!("STORE_PATH not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let media: Option<Arc<dyn MediaFetcher>> = match (&config.app_id, &config.app_secret) {
        (Some(id), Some(secret)) => Some(Arc::new(PlatformClient::new(id.clone(), secret.clone()))),
        _ => {
            info!("APP_ID/APP_SECRET not set, media downloads disabled");
            None
        }
    };

    let store = UserStore::new(kv.clone());
    let history = HistoryStore::new(kv.clone(), config.history_ttl);
    let correlator = Correlator::new(kv, config.merge_window);

    let registry = Arc::new(Registry::from_config(&config, &store, media));
    let configured: Vec<_> = chatgate::bot::BotType::ALL
        .iter()
        .filter(|b| registry.contains(**b))
        .map(|b| b.as_str())
        .collect();
    info!("Backends available: {}, default: {}", configured.join(", "), config.default_bot);

    let commands = CommandDispatcher::new(&config, store.clone(), history.clone(), registry.clone());
    let router = Arc::new(Router::new(
        &config, registry, store, history, correlator, commands,
    ));

    let app = webhook::app(router);
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .expect("Failed to bind listen address");
    info!("Listening on {}", config.listen_addr);

    axum::serve(listener, app).await.expect("Server error");
}

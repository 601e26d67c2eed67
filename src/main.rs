use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::net::SocketAddr;
use std::sync::Arc;

use juicebox_resumable::config::Config;
use juicebox_resumable::state::AppState;
use juicebox_resumable::server::{build_router, print_startup_banner, start_server};

// use mimalloc as the global allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() {
    // load .env file if it exists (fails silently if not found)
    let _ = dotenvy::dotenv();

    // load configuration from environment variables
    let config = Config::from_env();

    // build tokio runtime with configured worker threads
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .enable_all()
        .build()
        .expect("Failed to build Tokio runtime");

    runtime.block_on(async {
        // DEBUG=true turns on the engine's step by step logging unless RUST_LOG says otherwise
        let default_filter = if config.debug { "debug" } else { "info" };
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| default_filter.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();

        // create the roots if they don't exist
        for dir in [&config.staging_dir, &config.upload_dir] {
            if !dir.exists() {
                std::fs::create_dir_all(dir).expect("Failed to create directory");
                tracing::info!("Created directory at: {:?}", dir);
            }
        }

        let addr = SocketAddr::from((
            config.host.parse::<std::net::IpAddr>()
                .expect("Invalid HOST"),
            config.port,
        ));

        print_startup_banner(&config);

        let app = build_router(Arc::new(AppState::new(config)));

        if let Err(e) = start_server(app, addr).await {
            tracing::error!("Server error: {}", e);
        }
    });
}

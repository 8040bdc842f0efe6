use std::sync::Arc;

use callscope_core::{CallscopeConfig, IndexStatus, RagSession};
use clap::Parser;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use callscope_server::server;

#[derive(Parser, Debug)]
#[command(author, version, about = "Callscope RAG server for call-summary analysis", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "callscope.toml")]
    config: String,

    /// Load or build the index, print its status and exit.
    #[arg(long)]
    health: bool,

    /// Discard any persisted index and rebuild at startup.
    #[arg(long)]
    rebuild: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match CallscopeConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over service.log_level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.service.log_level.clone()));
    fmt().with_env_filter(filter).init();

    let session = match RagSession::new(config.clone()) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to start RAG session: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match session.try_initialize(args.rebuild).await {
            Ok(outcome) => println!("✅ Index available: {:?}", outcome),
            Err(e) => {
                println!("❌ Index unavailable: {}", e);
                std::process::exit(1);
            }
        }
        let info = session.info().await;
        println!(
            "{} status={:?} documents={} records={}",
            if info.status == IndexStatus::Ready { "✅" } else { "⚠️" },
            info.status,
            info.document_count,
            info.record_count
        );
        return Ok(());
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Index load/build runs in the background; requests see LOADING or
    // REBUILDING until it finishes.
    let init_session = session.clone();
    let force_rebuild = args.rebuild;
    tokio::spawn(async move {
        if !init_session.initialize(force_rebuild).await {
            tracing::warn!("RAG index unavailable; POST /index/rebuild once summaries exist");
        }
    });

    if config.http.enabled {
        let http_session = session.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = callscope_server::http::start_http_server(http_session, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.socket_path.clone();
    server::run_unix_server(&socket_path, session.clone(), tx.subscribe()).await?;

    session.teardown().await;
    Ok(())
}

//! PDFScope binary — thin CLI shell over the [`pdfscope`] library crate.

use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

use pdfscope::ai::AiClient;
use pdfscope::api::{self, AppContext};
use pdfscope::cache::ResponseCache;
use pdfscope::db;
use pdfscope::index;

/// Response cache sizing.
const RESPONSE_CACHE_CAPACITY: usize = 1024;
const RESPONSE_CACHE_TTL: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// Fast PDF indexer and full-text search server.
#[derive(Parser)]
#[command(name = "pdfscope", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// The server port
    #[arg(long, short = 'p', default_value_t = 8080)]
    port: u16,

    /// Bind address
    #[arg(long, short = 'a', default_value = "0.0.0.0")]
    addr: String,

    /// Postgres connection URI (overrides PGCONN)
    #[arg(long, short = 'c')]
    pgconn: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the PDF index into the database
    Index {
        /// Root directory of PDFs
        #[arg(long, short = 'r')]
        root: PathBuf,

        /// Minimum number of pages for a PDF to be indexed
        #[arg(long = "min_pages", short = 'p', default_value_t = 4)]
        min_pages: u32,

        /// Walk and report without writing to the database
        #[arg(long)]
        dryrun: bool,
    },
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pdfscope=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let conninfo = cli.pgconn.clone().or_else(|| std::env::var("PGCONN").ok()).unwrap_or_else(|| {
        eprintln!("PGCONN environment variable must be set or pass --pgconn to the program");
        std::process::exit(1);
    });

    // One storage handle per server worker, fixed at startup.
    let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4) as u32;

    // ---------------------------------------------------------------------------
    // Index subcommand
    // ---------------------------------------------------------------------------

    if let Some(Commands::Index { root, min_pages, dryrun }) = cli.command {
        let root = root.canonicalize().unwrap_or_else(|e| {
            error!(path = %root.display(), error = %e, "Root directory not found");
            std::process::exit(1);
        });

        // Schema bootstrap uses a short-lived handle; the indexer manages
        // its own connections after this.
        let bootstrap = db::connect_pool(&conninfo, 1).await.unwrap_or_else(|e| {
            error!(error = %e, "Could not connect to Postgres");
            std::process::exit(1);
        });
        if let Err(e) = db::create_schema(&bootstrap).await {
            error!(error = %e, "Schema bootstrap failed");
            std::process::exit(1);
        }
        bootstrap.close().await;

        let opts = index::IndexOptions { conninfo, root, min_pages, dryrun };
        match index::run(opts).await {
            Ok(true) => return,
            Ok(false) => {
                error!("Indexing finished with failures");
                std::process::exit(1);
            }
            Err(e) => {
                error!(error = %e, "Indexing aborted");
                std::process::exit(1);
            }
        }
    }

    // ---------------------------------------------------------------------------
    // Server mode
    // ---------------------------------------------------------------------------

    let pool = db::connect_pool(&conninfo, workers).await.unwrap_or_else(|e| {
        error!(error = %e, "Could not connect to Postgres");
        std::process::exit(1);
    });
    if let Err(e) = db::create_schema(&pool).await {
        error!(error = %e, "Schema bootstrap failed");
        std::process::exit(1);
    }

    let ai = Arc::new(AiClient::from_env());
    if ai.enabled() {
        info!("AI answer synthesis enabled");
    } else {
        info!("GEMINI_API_KEY not set — AI answer synthesis disabled");
    }

    let ctx = AppContext {
        db: pool,
        cache: Arc::new(ResponseCache::new(RESPONSE_CACHE_CAPACITY, RESPONSE_CACHE_TTL)),
        ai,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([axum::http::header::CONTENT_TYPE, axum::http::header::AUTHORIZATION]);

    // Static web UI; API routes take precedence.
    let ui_dir = PathBuf::from("ui/dist");
    let index_html = ui_dir.join("index.html");

    let app = Router::new()
        .route("/api/search", get(api::api_search))
        .route("/api/list-files", get(api::api_list_files))
        .route("/api/list-files/{file_id}", get(api::api_get_file))
        .route("/api/file/{file_id}/page/{page_num}", get(api::api_get_page))
        .route("/api/file/{file_id}/render-page/{page_num}", get(api::api_render_page))
        .fallback_service(ServeDir::new(&ui_dir).not_found_service(ServeFile::new(&index_html)))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(ctx);

    let listener =
        tokio::net::TcpListener::bind(format!("{}:{}", cli.addr, cli.port)).await.unwrap_or_else(
            |e| {
                error!(addr = cli.addr.as_str(), port = cli.port, error = %e, "Could not bind");
                std::process::exit(1);
            },
        );

    info!(port = cli.port, "http://{}:{}", cli.addr, cli.port);

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "Server exited abnormally");
        std::process::exit(1);
    }
}

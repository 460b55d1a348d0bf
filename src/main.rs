use anyhow::Result;
use axum::Router;
use bucket_viewer::{
    config::{AppConfig, RunMode},
    handlers::message_handlers::{Envelope, Message, dispatch},
    routes,
    services::{
        listing_fetcher::ListingFetcher, notifier::BroadcastNotifier, store::BucketStore,
    },
    state::AppState,
};
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting bucket-viewer with config: {:?}", cfg);

    // --- Initialize SQLite (schema applied on connect) ---
    tracing::debug!("Connecting using raw URL => {}", cfg.database_url);
    let store = BucketStore::connect(&cfg.database_url, cfg.init_timeout).await?;

    // --- Handle migration mode ---
    if mode == RunMode::Migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    if cfg.clear_on_start {
        store.clear_all().await?;
    }

    // --- Initialize core services ---
    let fetcher = ListingFetcher::new(cfg.fetch_config())?;
    let state = AppState::new(store, fetcher, BroadcastNotifier::default(), cfg.limits());

    if let RunMode::Parse { url, load_all } = mode {
        return parse_once(&state, url, load_all).await;
    }

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// `--parse`: run the same messages the viewer would send and print each
/// reply envelope as a line of JSON.
async fn parse_once(state: &AppState, url: String, load_all: bool) -> Result<()> {
    let parsed = dispatch(&state.controller, Message::ParseBucket {
        url: url.clone(),
        base_url: None,
    })
    .await;

    let bucket_id = match parsed {
        Ok(data) => {
            let id = data["bucketId"].as_str().and_then(|s| s.parse().ok());
            println!("{}", serde_json::to_string(&Envelope::ok(data))?);
            id
        }
        Err(err) => {
            tracing::error!(code = err.code, error = %err, "parse failed");
            println!("{}", err.envelope());
            None
        }
    };

    if let (true, Some(bucket_id)) = (load_all, bucket_id) {
        let message = Message::LoadAllPages {
            bucket_id,
            bucket_url: url,
            max_keys: None,
        };
        match dispatch(&state.controller, message).await {
            Ok(data) => println!("{}", serde_json::to_string(&Envelope::ok(data))?),
            Err(err) => {
                tracing::error!(code = err.code, error = %err, "load all pages failed");
                println!("{}", err.envelope());
            }
        }
    }

    Ok(())
}

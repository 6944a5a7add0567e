use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod chain;
mod classify;
mod config;
mod error;
mod ingest;
mod metrics;
mod middleware;
mod query;
mod server;
mod slots;
mod store;

use chain::ChainClient;
use classify::Classifiers;
use error::Result;
use ingest::{Aggregator, Tailer};
use store::Store;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = config::Args::parse();

    // ── 1. Construction-time configuration ───────────────────────
    let classifiers = match args.load_classifiers() {
        Ok(classifiers) => classifiers,
        Err(err) => {
            error!(error = %err, "invalid classifier table");
            process::exit(1);
        }
    };

    // ── 2. Open the snapshot store ───────────────────────────────
    let store = match Store::open(&args.database_path) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            error!(
                error = %err,
                path = %args.database_path.display(),
                "cannot open snapshot store"
            );
            process::exit(1);
        }
    };

    // ── 3. Start the ingest side, unless queries-only ────────────
    let stop = Arc::new(AtomicBool::new(false));
    let mut tailer_handle = None;

    if args.sync {
        let client = ChainClient::new(&args.node_endpoint);
        let aggregator =
            match init_aggregator(&client, store.clone(), classifiers, args.starting_block).await {
                Ok(aggregator) => aggregator,
                Err(err) => {
                    error!(error = %err, "cannot initialize aggregator");
                    process::exit(1);
                }
            };
        let tailer = Tailer::new(client, aggregator, stop.clone());
        tailer_handle = Some(tokio::spawn(tailer.run()));
    } else {
        info!("sync disabled, serving queries only");
    }

    if let Some(certificate) = &args.certificate {
        // TLS is terminated in front of this process.
        info!(
            certificate = %certificate.display(),
            "TLS material noted for the fronting terminator; binding plain HTTP"
        );
    }

    // ── 4. Bind & serve the read API ─────────────────────────────
    let state = Arc::new(server::AppState { store });
    let app = server::create_router(state);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, %addr, "cannot bind read api");
            process::exit(1);
        }
    };
    info!(%addr, "query api listening");

    let shutdown_stop = stop.clone();
    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_stop.store(true, Ordering::SeqCst);
    });
    if let Err(err) = serve.await {
        error!(error = %err, "server exited abnormally");
        process::exit(1);
    }

    // ── 5. Teardown ──────────────────────────────────────────────
    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = tailer_handle {
        // Give the tailer one chance to reach its loop head; a long backoff
        // sleep shouldn't hold the process hostage.
        let abort = handle.abort_handle();
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            abort.abort();
        }
    }
    info!("clean shutdown");
}

/// Resume from the last persisted snapshot, or seed a fresh store from the
/// configured starting block (bootstrapping the schedule store from the
/// node's block header state).
async fn init_aggregator(
    client: &ChainClient,
    store: Arc<Store>,
    classifiers: Classifiers,
    starting_block: u64,
) -> Result<Aggregator> {
    if let Some(aggregator) = Aggregator::resume(store.clone(), classifiers.clone())? {
        return Ok(aggregator);
    }
    let block = client.get_block(starting_block).await?;
    let header_state = client.get_block_header_state(starting_block).await?;
    Aggregator::seed(store, classifiers, &block, &header_state)
}

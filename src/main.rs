//! realtime-lob - live bitFlyer Lightning order book in the terminal
//!
//! Wiring only: config, logging, the Lightstream client, the dispatcher and
//! the board store. Logs go to `LOG_OUTPUT_DIRECTORY` when set so they do not
//! fight with the board renderer.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use realtime_lob::{
    board_channel, render, BitflyerApi, BoardStore, Config, Dispatcher, LightstreamClient,
    StoreConfig,
};

const LOG_FILE_NAME: &str = "realtime_lob.log";

#[derive(Parser, Debug)]
#[command(name = "realtime-lob")]
#[command(about = "Realtime limit order book for a bitFlyer Lightning product")]
struct Args {
    /// Product code, overrides BITFLYER_PRODUCT_CODE
    #[arg(long)]
    product_code: Option<String>,

    /// Levels shown per side, overrides BOOK_DEPTH
    #[arg(long)]
    depth: Option<usize>,

    /// Log board changes instead of drawing them
    #[arg(long, env = "REALTIME_LOB_NO_RENDER")]
    no_render: bool,

    /// Notify once after snapshot replay instead of once per buffered update
    #[arg(long)]
    coalesce_replay: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(code) = args.product_code {
        config = config.with_product_code(code);
    }
    if let Some(depth) = args.depth {
        config = config.with_book_depth(depth);
    }
    config.validate()?;

    init_tracing(config.log_output_directory.as_deref())?;

    info!(
        product_code = %config.product_code,
        api = %config.api_base_url,
        rpc = %config.lightstream.url,
        depth = config.book_depth,
        "🚀 realtime-lob starting"
    );

    let store = BoardStore::shared_with_config(StoreConfig {
        coalesce_replay_notifications: args.coalesce_replay,
    });

    let depth = config.book_depth;
    if args.no_render {
        store.lock().on_change(move |view| {
            info!(
                best_bid = ?view.best_bid().map(|l| l.price),
                best_ask = ?view.best_ask().map(|l| l.price),
                mid_price = ?view.mid_price,
                spread = ?view.spread,
                "Board changed"
            );
        });
    } else {
        if let Err(e) = render::print_board(&store.lock().book(depth)) {
            error!(error = %e, "Failed to draw board");
        }
        store.lock().on_change(move |view| {
            if let Err(e) = render::print_board(&view.top(depth)) {
                error!(error = %e, "Failed to draw board");
            }
        });
    }

    let fetcher = Arc::new(BitflyerApi::new(
        &config.api_base_url,
        &config.product_code,
        config.http_timeout,
    )?);

    let (feed_tx, feed_rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher::for_product(&config.product_code, Arc::clone(&store), fetcher, feed_rx);
    let client = LightstreamClient::new(
        config.lightstream.clone(),
        vec![board_channel(&config.product_code)],
        feed_tx,
    );

    tokio::select! {
        res = client.run() => res.context("Lightstream client stopped")?,
        res = dispatcher.run() => {
            res.context("Dispatcher stopped")?;
        }
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down"),
    }

    info!(metrics = ?store.lock().metrics(), "realtime-lob stopped");

    Ok(())
}

fn load_env() {
    // 1) Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // 2) Crate-root .env when launched from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}

fn open_log_file(dir: &Path) -> Result<File> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let path = dir.join(LOG_FILE_NAME);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

fn init_tracing(log_dir: Option<&Path>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "realtime_lob=info".into());

    let (file_layer, stderr_layer) = match log_dir {
        Some(dir) => {
            let file = open_log_file(dir)?;
            (
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                ),
                None,
            )
        }
        None => (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    Ok(())
}

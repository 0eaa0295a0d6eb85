pub mod client;
pub mod config;
pub mod error;
pub mod market;

pub use client::{QuoteStreamClient, QuoteStreamClientBuilder};
pub use config::{StreamArgs, StreamConfig};
pub use error::{NotifyError, Result, StreamError};
pub use market::notify::{Notifier, TerminalNotifier, Tone};
pub use market::transport::{
    NoopObserver, PushConnector, PushEvent, PushEventSink, PushHandle, ReferenceLookup,
    SpotSource, StreamObserver,
};
pub use market::types::{
    ConnectionState, PriceDirection, PriceUpdate, RawNumber, RawQuote, RawTimestamp,
    ReferencePrice, StreamSnapshot, StreamStatusSnapshot, StreamingStats, TransportKind,
};

use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Observer used by the binary: every event goes to the log.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl StreamObserver for LoggingObserver {
    fn on_price_update(&self, update: &PriceUpdate) {
        info!(
            asset = %update.asset,
            currency = %update.currency,
            price = update.price,
            change = update.change,
            change_percent = update.change_percent,
            source = ?update.source,
            "price update"
        );
    }

    fn on_connection_change(&self, connected: bool) {
        info!(connected, "connection changed");
    }

    fn on_terminal_error(&self, error: &StreamError) {
        error!("stream cannot start: {error}");
    }
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Runs the stream from environment configuration until Ctrl-C, then prints the final
/// snapshot as JSON.
pub fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = StreamArgs::from_env()?.normalize()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        info!(
            asset = %config.asset,
            currency = %config.currency,
            push_url = %config.push_url,
            pull_url = %config.pull_url,
            "starting quote stream"
        );

        let client = QuoteStreamClient::builder(config)
            .observer(Arc::new(LoggingObserver))
            .build()?;
        client.connect()?;

        tokio::signal::ctrl_c().await?;
        info!("interrupt received, disconnecting");

        client.disconnect()?;
        let snapshot = client.export_snapshot_json().await?;
        println!("{snapshot}");
        client.shutdown().await;
        Ok::<(), StreamError>(())
    })
}

//! Enrich a handful of messages and deliver them to an in-memory sender.
//!
//! Run with `RUST_LOG=debug cargo run --example pipeline [config.toml]`.

use header_enricher::headers::CONTENT_TYPE;
use header_enricher::transport::{InMemory, SenderService};
use header_enricher::{EnricherConfig, HeaderEnricherLayer, Message};
use tower::{Layer, ServiceExt};
use tracing_error::ErrorLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

const CONFIG: &str = r##"
overwrite = false

[variables]
region = "eu-west-1"

[headers]
username = "payload.user?.name ?: 'anonymous'"
priority = { expression = "payload.total > 100 ? 'high' : 'low'", overwrite = true }
route = "#region + '/' + (headers.tenant ?: 'default')"
"##;

#[tokio::main]
async fn main() {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::from_default_env())
        .with(ErrorLayer::default())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EnricherConfig::load(path),
        None => EnricherConfig::from_toml_str(CONFIG),
    }
    .unwrap_or_else(|e| panic!("invalid configuration: {e}"));
    let enricher = config.build().unwrap_or_else(|e| panic!("invalid configuration: {e}"));

    let sink = InMemory::default();
    let service = HeaderEnricherLayer::new(enricher).layer(SenderService::new(sink.clone()));

    let inbound = [
        Message::new(&br#"{"user":{"name":"Ada"},"total":250}"#[..])
            .with_header(CONTENT_TYPE, "application/json")
            .with_header("tenant", "acme"),
        Message::new(&br#"{"total":12}"#[..])
            .with_header(CONTENT_TYPE, "application/json")
            .with_header("priority", "urgent"),
        Message::new(&b"\x89PNG"[..]).with_header(CONTENT_TYPE, "image/png"),
        Message::new(&br#"{"total":"many"}"#[..]).with_header(CONTENT_TYPE, "application/json"),
    ];

    let handles: Vec<_> = inbound
        .into_iter()
        .map(|message| {
            let service = service.clone();
            tokio::spawn(async move { service.oneshot(message).await })
        })
        .collect();

    for handle in handles {
        if let Err(error) = handle.await.unwrap() {
            tracing::error!(%error, "Message rejected");
        }
    }

    for message in sink.take().await {
        tracing::info!(headers = ?message.headers, payload = ?message.message, "Delivered");
    }
}

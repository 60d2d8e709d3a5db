use anyhow::{Context, Result};
use cache::{MemoryCache, ResponseCache, DEFAULT_MAX_ENTRIES};
use clap::Parser;
use config::{Cli, Config};
use dns_server::{DNSServer, QueryHandler};
use forwarder::Forwarder;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cache;
mod config;
mod dns_hdr;
mod dns_server;
mod error;
mod forwarder;
mod name;
mod query;

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = Config::from_cli(&cli).context("Invalid configuration")?;
    info!(resolver = %config.resolver, cache = config.cache, "Using resolver");

    let cache = config
        .cache
        .then(|| Arc::new(MemoryCache::new(DEFAULT_MAX_ENTRIES)) as Arc<dyn ResponseCache>);
    let handler = QueryHandler::new(Forwarder::new(config.resolver, config.timeout), cache);

    let server = DNSServer::bind(config.listen, handler).await?;
    server.run().await
}

use database::Database;
use gleaner_core::config::credentials_from_env;
use gleaner_core::{report_error, ConfigError, CoreError, EngineConfig, ResultSink};
use scrape_engine::{HttpSink, JsonFileSink, ReplayDriver, ScrapeSession, SessionOptions};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), CoreError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gleaner=info,scrape_engine=info,database=info")),
        )
        .init();

    tracing::info!("Starting Gleaner");

    run().await.map_err(|e| {
        report_error(&e);
        e
    })
}

async fn run() -> Result<(), CoreError> {
    let config = EngineConfig::load()?;
    let target = config.scrape_target()?;
    let credentials = credentials_from_env()?;
    let options = SessionOptions::from_config(&config)?;

    let replay_path = config
        .driver
        .replay_path
        .as_ref()
        .ok_or_else(|| ConfigError::MissingField {
            field: "driver.replay_path".to_string(),
        })?;
    let driver = ReplayDriver::load(replay_path).await?;
    let sinks = build_sinks(&config).await?;

    let stop = CancellationToken::new();
    let interrupt = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing the current item");
            interrupt.cancel();
        }
    });

    let report = ScrapeSession::new(target, options, credentials, driver)?
        .with_sinks(sinks)
        .with_cancellation(stop)
        .run()
        .await;

    for error in report.flush_errors() {
        tracing::error!("Flush failed: {}", error);
    }
    if let Some(reason) = &report.reason {
        tracing::warn!("Session {} ended early: {}", report.session_id, reason);
    }

    println!("{}", serde_json::to_string_pretty(&report.summary)?);
    Ok(())
}

async fn build_sinks(config: &EngineConfig) -> Result<Vec<Arc<dyn ResultSink>>, CoreError> {
    let mut sinks: Vec<Arc<dyn ResultSink>> = Vec::new();

    if let Some(path) = &config.output.json_path {
        sinks.push(Arc::new(JsonFileSink::new(path)));
    }
    if let Some(url) = &config.output.database_url {
        sinks.push(Arc::new(Database::open(url.as_str()).await?));
    }
    if let Some(url) = &config.output.ingest_url {
        sinks.push(Arc::new(HttpSink::new(url.as_str())?));
    }

    if sinks.is_empty() {
        tracing::warn!("No output configured, results will only be summarized");
    }
    Ok(sinks)
}

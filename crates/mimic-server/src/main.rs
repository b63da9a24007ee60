use anyhow::Context;
use clap::{Parser, ValueEnum};
use mimic_server::config::load_environments;
use mimic_server::{Engine, EngineSettings, MemoryStore, TracingAlertSink};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Serve mock API environments from a JSON or YAML file
#[derive(Parser, Debug)]
#[command(name = "mimic")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Environment file (one environment or a list)
    #[arg(short, long, env = "MIMIC_DATA")]
    data: PathBuf,

    /// Address listeners bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Requests kept per environment log
    #[arg(long, default_value = "100")]
    log_capacity: usize,

    /// Upstream proxy timeout in seconds
    #[arg(long, default_value = "30")]
    proxy_timeout: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

fn init_tracing(level: &str, format: LogFormat) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("Invalid log level: {level}"))?,
    };
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(fmt_layer.json())
            .init(),
        LogFormat::Text => Registry::default().with(env_filter).with(fmt_layer).init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_format)?;

    let environments = load_environments(&args.data)?;
    info!(
        "Loaded {} environment(s) from {}",
        environments.len(),
        args.data.display()
    );

    let store = Arc::new(MemoryStore::from_environments(environments));
    let settings = EngineSettings {
        bind_host: args.host,
        log_capacity: args.log_capacity,
        proxy_timeout_secs: args.proxy_timeout,
    };
    let engine = Engine::new(store.clone(), Arc::new(TracingAlertSink), settings)?;

    let mut started = 0;
    for id in store.ids() {
        match engine.start(&id).await {
            Ok(_) => started += 1,
            Err(e) => warn!("Environment {} not started: {}", id, e),
        }
    }
    if started == 0 {
        anyhow::bail!("No environment could be started");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down");
    engine.stop_all().await;
    Ok(())
}

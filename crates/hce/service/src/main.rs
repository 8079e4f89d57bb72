//! hced - card emulation routing tool
//!
//! Loads a handler manifest into the service and:
//! - prints the routing table that would be committed
//! - resolves a single AID
//! - replays a dispatcher event trace and prints the emitted actions

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hce_routing::MockController;
use hce_service::{
    read_trace, HandlerManifest, HceService, InMemoryStore, JsonFileStore, MockCollaborators,
    ServiceConfig, SettingsStore,
};
use hce_service::config::StoreConfig;
use hce_types::Aid;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// hced CLI
#[derive(Parser)]
#[command(name = "hced")]
#[command(about = "Card emulation AID resolution and routing tool", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "HCE_CONFIG")]
    config: Option<String>,

    /// Log level
    #[arg(long, env = "HCE_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long, env = "HCE_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build, pack and print the routing table
    Table {
        /// Handler manifest (JSON)
        #[arg(long)]
        handlers: String,
    },

    /// Print how one AID resolves
    Resolve {
        /// Handler manifest (JSON)
        #[arg(long)]
        handlers: String,

        /// AID to resolve
        aid: String,
    },

    /// Feed an event trace to the dispatcher and print the actions
    Replay {
        /// Handler manifest (JSON)
        #[arg(long)]
        handlers: String,

        /// Event trace (JSON array)
        #[arg(long)]
        trace: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ServiceConfig::load(cli.config.as_deref()).context("loading configuration")?;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cli.log_level.clone().into());

    if cli.json || config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let store: Arc<dyn SettingsStore> = match &config.store {
        StoreConfig::Memory => Arc::new(InMemoryStore::new()),
        StoreConfig::Json { path } => Arc::new(JsonFileStore::new(path)),
    };
    let controller = Arc::new(MockController::new());
    let mocks = MockCollaborators::new();
    let service = HceService::new(&config, controller.clone(), mocks.collaborators(), store);
    service.load_settings().await.context("loading settings")?;

    match cli.command {
        Command::Table { handlers } => {
            load_manifest(&service, &handlers).await?;
            for line in service.engine().dump() {
                println!("{}", line);
            }
            match controller.last_commit() {
                Some(table) => {
                    println!("encoded ({} bytes): {}", table.cost(), hex::encode_upper(table.encode()));
                }
                None => println!("no table committed"),
            }
            for (required, capacity) in mocks.listener.overflows() {
                println!("overflow: {} bytes required, {} available", required, capacity);
            }
        }
        Command::Resolve { handlers, aid } => {
            load_manifest(&service, &handlers).await?;
            let aid = Aid::parse(&aid).with_context(|| format!("invalid AID {}", aid))?;
            println!("{}", service.resolve(&aid));
        }
        Command::Replay { handlers, trace } => {
            load_manifest(&service, &handlers).await?;
            let events = read_trace(&trace)
                .await
                .with_context(|| format!("reading trace {}", trace))?;
            for event in events {
                let name = event.name();
                let actions = service.dispatch_host(event);
                let line = serde_json::json!({
                    "event": name,
                    "state": service.host_state().to_string(),
                    "actions": actions,
                });
                println!("{}", line);
            }
        }
    }

    Ok(())
}

async fn load_manifest(service: &HceService, path: &str) -> anyhow::Result<()> {
    let manifest = HandlerManifest::read(path)
        .await
        .with_context(|| format!("reading handler manifest {}", path))?;
    manifest.apply(service).await?;
    Ok(())
}

mod cluster;
mod config;
mod database;
mod monitoring;
mod notify;
mod pool;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use cluster::AgentRuntime;
use config::Config;
use pool::{LibsqlManager, LibsqlPool};

#[derive(Parser, Debug)]
#[command(name = "vigil-agent", version, about = "Distributed uptime monitoring agent")]
struct Cli {
    /// Path to the config file (defaults to $XDG_CONFIG_HOME/vigil/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the node ID from the config file
    #[arg(long)]
    node_id: Option<String>,

    /// Override the database path from the config file
    #[arg(long)]
    db: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    show_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logger::init();

    let cli = Cli::parse();

    let mut config = Config::from_config(cli.config.as_deref())
        .context("failed to load configuration")?;

    if let Some(node_id) = cli.node_id {
        config.node.id = Some(node_id);
    }
    if let Some(db) = cli.db {
        config.database.path = db;
    }

    if cli.show_config {
        println!("{}", config);
        return Ok(());
    }

    info!("Opening database at {}", config.database.path);
    let database = libsql::Builder::new_local(&config.database.path)
        .build()
        .await
        .context("failed to open database")?;

    let manager = LibsqlManager::new(database);
    let db_pool: LibsqlPool = deadpool::managed::Pool::builder(manager)
        .config(deadpool::managed::PoolConfig::default())
        .build()
        .context("failed to create database pool")?;

    AgentRuntime::start(config, db_pool).await
}

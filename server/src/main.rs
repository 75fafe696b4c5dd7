#![deny(unused_must_use, deprecated)]
#![warn(clippy::pedantic)]

use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use clap::Parser;
use server::{
    config::{Cli, Commands, DatabaseArgs, InitArgs, ServeConfig},
    vault::store::VaultStore,
    Server,
};
use shared::shutdown;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => init_command(&cli.database, args).await,
        Commands::Run(config) => run_command(&cli.database, config).await,
    }
}

async fn init_command(database: &DatabaseArgs, args: InitArgs) -> anyhow::Result<()> {
    let credential = database.credential(true)?;
    let now = Local::now().naive_local();

    VaultStore::create(&database.db_path, credential, args.rounds, args.group, now)
        .await
        .with_context(|| format!("Unable to create the database at {}", database.db_path.display()))?;

    println!("Database created at {}", database.db_path.display());
    Ok(())
}

async fn run_command(database: &DatabaseArgs, config: ServeConfig) -> anyhow::Result<()> {
    let credential = database.credential(false)?;
    let store = VaultStore::open(&database.db_path, credential)
        .await
        .with_context(|| format!("Unable to open the database at {}", database.db_path.display()))?;

    let server = Server::bind(&config, Arc::new(store)).await?;

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        if let Err(err) = shutdown::termination_signal().await {
            tracing::error!(error = %err, "unable to listen for termination signals");
        }
        tracing::info!("shutting down");
        trigger.trigger();
    });

    server.run(shutdown).await;
    Ok(())
}

#![deny(unused_must_use, deprecated)]
#![warn(clippy::pedantic)]

use std::net::{Ipv4Addr, SocketAddr};

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use client::{
    agent::{client::AgentClient, Agent},
    config::{prompt_password, read_credential, Cli, Commands, NewEntryArgs},
    net::Client,
};
use owo_colors::OwoColorize;
use shared::{client_message::NewEntry, shutdown};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let agent_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, cli.agent_port));

    let connect = || -> anyhow::Result<Client> {
        Ok(Client::new(cli.server.credential()?, cli.server.endpoint()?)?)
    };

    match cli.command {
        Commands::Find { ref title } => print!("{}", connect()?.find(title).await?),
        Commands::Get { ref output } => {
            let db = connect()?.get_db().await?;
            write_db(output, &db).await?;
        }
        Commands::ChangeSecret { ref new_keyfile } => {
            let client = connect()?;
            let password = prompt_password("New master password", true)?;
            let new = read_credential(&password, new_keyfile.as_deref())?;

            client
                .change_secret(new.password().map(str::to_owned), new.keyfile().map(<[u8]>::to_vec))
                .await?;
            println!("{}", "Password changed".green());
        }
        Commands::NewGroup { ref title, parent } => {
            connect()?.create_group(title, parent).await?;
            println!("{} {}", "Created group".green(), title);
        }
        Commands::NewEntry(ref args) => new_entry(&connect()?, args.clone()).await?,
        Commands::Agent => run_agent(connect()?, cli.agent_port).await?,
        Commands::AgentFind { ref title } => {
            print!("{}", AgentClient::new(agent_addr).find(title).await?);
        }
        Commands::AgentGet { ref output } => {
            let db = AgentClient::new(agent_addr).get_db().await?;
            write_db(output, &db).await?;
        }
        Commands::AgentCredentials => {
            let session = AgentClient::new(agent_addr).get_credentials().await?;
            println!("{}: {}:{}", "Server".bold(), session.server_address, session.server_port);
            println!("{}: {}", "TLS".bold(), if session.tls { "on" } else { "off" });
            if let Some(dir) = &session.tls_dir {
                println!("{}: {}", "TLS directory".bold(), dir.display());
            }
        }
    }

    Ok(())
}

async fn new_entry(client: &Client, args: NewEntryArgs) -> anyhow::Result<()> {
    let password = prompt_password("Entry password", true)?;
    let expire = match args.expire {
        Some(date) => date,
        None => NaiveDate::from_ymd_opt(2999, 12, 28).context("invalid expiration date")?,
    };

    client
        .create_entry(NewEntry {
            title: args.title.clone(),
            url: args.url,
            username: args.username,
            password: String::clone(&password),
            comment: args.comment,
            expire,
            group: args.group,
        })
        .await?;

    println!("{} {}", "Created entry".green(), args.title);
    Ok(())
}

async fn run_agent(client: Client, port: u16) -> anyhow::Result<()> {
    // make sure the credential works before holding on to it
    client.get_db().await.context("The server rejected the agent's credential")?;

    let agent = Agent::bind(client, port)
        .await
        .with_context(|| format!("Unable to bind the agent to port {port}"))?;
    println!("{}: {}", "Agent is running at".bold().green(), agent.local_addr()?);

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        if let Err(err) = shutdown::termination_signal().await {
            tracing::error!(error = %err, "unable to listen for termination signals");
        }
        tracing::info!("shutting down");
        trigger.trigger();
    });

    agent.run(shutdown).await;
    Ok(())
}

async fn write_db(path: &std::path::Path, db: &[u8]) -> anyhow::Result<()> {
    tokio::fs::write(path, db)
        .await
        .with_context(|| format!("Unable to write the database to {}", path.display()))?;
    println!("{} {}", "Database saved to".green(), path.display());
    Ok(())
}

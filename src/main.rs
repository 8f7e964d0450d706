use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use statement_proxy::comms::local_api::{self, AppState};
use statement_proxy::config::Config;
use statement_proxy::statement::DateRange;
use statement_proxy::utils;

#[derive(Parser)]
#[command(name = "statement-proxy", version, about = "Banco do Brasil statement gateway")]
struct AppCli {
    /// JSON config file; environment variables are used when omitted
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Obtain an access token and print its status
    Token,
    /// Print the statement for a branch/account
    Statement {
        agencia: String,
        conta: String,
        /// Start date (YYYY-MM-DD, DD.MM.YYYY or DDMMYYYY)
        #[arg(long)]
        from: Option<String>,
        /// End date
        #[arg(long)]
        to: Option<String>,
    },
    /// Print the balance derived from the statement
    Balance { agencia: String, conta: String },
}

fn load_config(path: Option<&str>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path).with_context(|| format!("loading config from {path}")),
        None => Config::from_env().context("loading config from environment"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    utils::logging::init();

    let args = AppCli::parse();
    let mut config = load_config(args.config.as_deref())?;

    match args.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            info!("Starting gateway on port {}", config.server.port);
            local_api::serve(config).await?;
        }
        Commands::Token => {
            let state = AppState::new(Arc::new(config))?;
            state.tokens.get_token().await?;
            let status = state.tokens.inspect().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Statement {
            agencia,
            conta,
            from,
            to,
        } => {
            let state = AppState::new(Arc::new(config))?;
            let range = DateRange::new(from.as_deref(), to.as_deref());
            let statement = state
                .statements
                .get_statement_page(&agencia, &conta, &range)
                .await?;
            println!("{}", serde_json::to_string_pretty(&statement)?);
        }
        Commands::Balance { agencia, conta } => {
            let state = AppState::new(Arc::new(config))?;
            let balance = state.statements.get_balance(&agencia, &conta).await?;
            println!("{}", serde_json::to_string_pretty(&balance)?);
        }
    }

    Ok(())
}

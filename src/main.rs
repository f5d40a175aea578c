use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;

use kata::api::create_router;
use kata::clients::ClientBundle;
use kata::config::Config;
use kata::pipeline::{PipelineSettings, SearchPipeline};
use kata::types::SearchRequest;

#[derive(Parser)]
#[command(name = "kata", version, about = "Answer questions about the dojo's content library")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve {
        /// Bind address, overrides BIND_ADDR
        #[arg(long)]
        bind: Option<String>,
    },
    /// Run a single query and print the JSON response
    Ask {
        query: String,
        #[arg(long)]
        bypass_cache: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // The fmt subscriber also captures `log` records from the library.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_target(true)
        .init();

    let clients = ClientBundle::from_config(&config).await?;
    let pipeline = Arc::new(SearchPipeline::new(clients, PipelineSettings::from(&config)));

    match cli.command.unwrap_or(Command::Serve { bind: None }) {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.bind_addr.clone());
            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("Failed to bind {bind}"))?;
            tracing::info!("listening on {}", bind);

            axum::serve(
                listener,
                create_router(pipeline).into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .context("HTTP server failed")?;
        }
        Command::Ask {
            query,
            bypass_cache,
        } => {
            let response = pipeline
                .search_query(SearchRequest {
                    bypass_cache,
                    ..SearchRequest::new(query)
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}

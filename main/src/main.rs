mod args;
mod services;

use api_router::{api_routes_v1, api_state::ApiState};
use axum::Router;
use clap::Parser;
use common::utils::config::get_config;
use retrieval_pipeline::AnswerRequest;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::{Cli, Command};
use services::Services;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();

    // Get config
    let config = get_config()?;
    let services = Services::build(&config).await?;

    match cli.command {
        Command::Serve => serve(services, config).await,
        Command::Ask {
            user,
            query,
            attached_document_ids,
        } => ask(&services, user, query, attached_document_ids).await,
    }
}

async fn serve(
    services: Services,
    config: common::utils::config::AppConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let http_port = config.http_port;
    let api_state = ApiState::new(services.db, services.pipeline, services.cache, config);

    let app = Router::new()
        .nest("/api/v1", api_routes_v1())
        .with_state(api_state);

    info!("Starting server listening on 0.0.0.0:{}", http_port);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{http_port}")).await?;

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}

async fn ask(
    services: &Services,
    user: String,
    query: String,
    attached_document_ids: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = AnswerRequest::new(user, query).with_attachments(attached_document_ids);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let answer = services.pipeline.answer(&request, &cancel).await;
    println!("{}", serde_json::to_string_pretty(&answer)?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}

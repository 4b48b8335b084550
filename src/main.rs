mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, CrdAction, McpAction};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check => commands::check::run().await?,
        Commands::List => commands::list::run().await?,
        Commands::Crd { action } => match action {
            CrdAction::Generate => commands::crd::generate()?,
            CrdAction::Install => commands::crd::install().await?,
        },
        Commands::Reconcile {
            metrics_bind_address,
            health_probe_bind_address,
            leader_elect,
        } => {
            commands::reconcile::run(&metrics_bind_address, &health_probe_bind_address, leader_elect).await?;
        }
        Commands::Mcp { action } => match action {
            McpAction::Serve {
                mcp_port,
                mcp_tls_enabled,
                mcp_tls_port,
                mcp_tls_cert_file,
                mcp_tls_key_file,
                mcp_tls_client_ca_file,
            } => {
                let bind_addr = format!("0.0.0.0:{mcp_port}");
                commands::mcp::serve(
                    &bind_addr,
                    mcp_tls_enabled,
                    mcp_tls_port,
                    &mcp_tls_cert_file,
                    &mcp_tls_key_file,
                    mcp_tls_client_ca_file.as_deref(),
                )
                .await?;
            }
        },
        Commands::Run {
            metrics_bind_address,
            health_probe_bind_address,
            leader_elect,
            mcp_port,
            mcp_tls_enabled,
            mcp_tls_port,
            mcp_tls_cert_file,
            mcp_tls_key_file,
            mcp_tls_client_ca_file,
        } => {
            let mcp_bind_addr = format!("0.0.0.0:{mcp_port}");
            tokio::try_join!(
                commands::reconcile::run(&metrics_bind_address, &health_probe_bind_address, leader_elect),
                commands::mcp::serve(
                    &mcp_bind_addr,
                    mcp_tls_enabled,
                    mcp_tls_port,
                    &mcp_tls_cert_file,
                    &mcp_tls_key_file,
                    mcp_tls_client_ca_file.as_deref(),
                ),
            )?;
        }
    }

    Ok(())
}

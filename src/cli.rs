use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "remediation-engine")]
#[command(about = "Prophet autonomous remediation engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check cluster connectivity and permissions
    Check,

    /// List AutonomousAction specs and their current phase
    List,

    /// Manage the AutonomousAction CRD
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },

    /// Run the Reconciler controller loop only
    Reconcile {
        #[arg(long, default_value = "0.0.0.0:8080")]
        metrics_bind_address: String,
        #[arg(long, default_value = "0.0.0.0:8081")]
        health_probe_bind_address: String,
        #[arg(long, default_value_t = false)]
        leader_elect: bool,
    },

    /// Run the MCP server only
    Mcp {
        #[command(subcommand)]
        action: McpAction,
    },

    /// Run the Reconciler and the MCP server together (the production entry point)
    Run {
        #[arg(long, default_value = "0.0.0.0:8080")]
        metrics_bind_address: String,
        #[arg(long, default_value = "0.0.0.0:8081")]
        health_probe_bind_address: String,
        #[arg(long, default_value_t = false)]
        leader_elect: bool,
        #[arg(long, default_value_t = 8090)]
        mcp_port: u16,
        #[arg(long, default_value_t = false)]
        mcp_tls_enabled: bool,
        #[arg(long, default_value_t = 8443)]
        mcp_tls_port: u16,
        #[arg(long, default_value = "tls.crt")]
        mcp_tls_cert_file: String,
        #[arg(long, default_value = "tls.key")]
        mcp_tls_key_file: String,
        #[arg(long)]
        mcp_tls_client_ca_file: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print the CRD YAML to stdout
    Generate,

    /// Install the CRD into the connected cluster
    Install,
}

#[derive(Subcommand)]
pub enum McpAction {
    /// Start the MCP plain (and optional TLS) listener
    Serve {
        #[arg(long, default_value_t = 8090)]
        mcp_port: u16,
        #[arg(long, default_value_t = false)]
        mcp_tls_enabled: bool,
        #[arg(long, default_value_t = 8443)]
        mcp_tls_port: u16,
        #[arg(long, default_value = "tls.crt")]
        mcp_tls_cert_file: String,
        #[arg(long, default_value = "tls.key")]
        mcp_tls_key_file: String,
        #[arg(long)]
        mcp_tls_client_ca_file: Option<String>,
    },
}

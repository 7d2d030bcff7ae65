use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "agrelay", version, about = "Bridge remote clients to local AI agent sessions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the daemon (default)
    Serve(ServeArgs),
    /// Print the bearer token clients must present
    Token {
        /// Override the daemon data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[derive(Debug, Parser, Clone)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: String,

    /// Port to listen on
    #[arg(long, default_value_t = 8787, env = "AGRELAY_PORT")]
    pub port: u16,

    /// The agent's home directory (defaults to ~/.claude)
    #[arg(long)]
    pub log_root: Option<PathBuf>,

    /// Where the daemon keeps its token and push store (defaults to ~/.agrelay)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Agent binary to spawn for children and companions
    #[arg(long, default_value = "claude", env = "AGRELAY_AGENT_BINARY")]
    pub agent_binary: String,

    /// Skip registering the notification hook in the agent settings
    #[arg(long)]
    pub no_hooks: bool,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
            log_root: None,
            data_dir: None,
            agent_binary: "claude".to_string(),
            no_hooks: false,
        }
    }
}

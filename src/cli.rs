use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mcpmux", about = "Multiplexing proxy for MCP servers")]
pub struct Cli {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
    /// Port to listen on
    #[arg(long, default_value = "8000")]
    pub port: u16,
    /// Path to config.json
    pub config: Option<PathBuf>,
}

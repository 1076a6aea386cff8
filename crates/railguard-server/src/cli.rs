use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "railguard")]
#[command(author, version, about = "Two-phase safety rail for LLM chat")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "railguard.yaml", env = "RAILGUARD_CONFIG")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP/WebSocket server
    Serve(ServeArgs),

    /// Chat with a running server over WebSocket
    Connect(ConnectArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    /// Listen address
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen port
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// Generation backend: ollama or mock
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Backend base URL
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Backend model name
    #[arg(short, long)]
    pub model: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// Server WebSocket endpoint
    #[arg(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    pub url: String,

    /// Session to join (a new one is started when absent)
    #[arg(short, long)]
    pub session: Option<String>,
}

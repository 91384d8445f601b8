use clap::{Args, Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Policy file or directory of policy files
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "human")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered admission plugins
    Plugins,
    /// Show the resolved admission policy
    Policy,
    /// Run one request through the admission chain
    Review(ReviewArgs),
    /// Keep the kernel running, following policy changes and serving metrics
    Serve(ServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ReviewArgs {
    /// JSON file describing the request under review
    #[arg(long, value_name = "FILE")]
    pub request: PathBuf,
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Serve `/metrics` on this address, overriding `observe.prom_bind`
    /// (without it the policy's `prom_enable`/`prom_bind` decide)
    #[arg(long)]
    pub metrics_bind: Option<SocketAddr>,

    /// Re-read policy files every N seconds (0 = never)
    #[arg(long, default_value_t = 0)]
    pub reload_secs: u64,
}

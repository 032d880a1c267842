use std::path::PathBuf;

use clap::Parser;

/// Multi-protocol LLM routing gateway
#[derive(Debug, Parser)]
#[command(name = "crossbar", version, about)]
pub struct Args {
    /// Path to the merged TOML configuration
    #[arg(short, long, env = "CROSSBAR_CONFIG", default_value = "crossbar.toml")]
    pub config: PathBuf,

    /// Exit with code 2 when a config reload fails instead of keeping
    /// the previous configuration
    #[arg(long)]
    pub strict_reload: bool,
}

mod cli;
mod config;
mod logging;

use anyhow::Result;
use clap::Parser; // needed for Cli::parse()
use tokio::runtime::Runtime;

use cli::commands::run_cli;
use cli::opts::Cli;
use config::AppConfig;

fn main() -> Result<()> {
    let args = Cli::parse();
    let cfg = AppConfig::load(args.config.as_deref())?.merged_with(&args);
    logging::init(cfg.log_level.as_deref());

    let rt = Runtime::new()?;
    rt.block_on(run_cli(args, cfg))
}

use clap::Parser;
use colored::*;
use env_logger::Builder;
use log::{info, LevelFilter};

use calico_node::cli::{run_cmd, Args};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let (crate_level, other_level) = match args.verbose {
        0 => (LevelFilter::Info, LevelFilter::Warn),
        1 => (LevelFilter::Debug, LevelFilter::Warn),
        2 => (LevelFilter::Trace, LevelFilter::Warn),
        _ => (LevelFilter::Trace, LevelFilter::Trace),
    };
    Builder::new()
        .filter(Some("calico_node"), crate_level)
        .filter(Some("calicoctl"), crate_level)
        .filter(None, other_level)
        .init();
    info!("Logging at levels {}/{}", crate_level, other_level);

    if let Err(err) = run_cmd(&args).await {
        eprintln!("{}", err.to_string().red());
        std::process::exit(1);
    }
}

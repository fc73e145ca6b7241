//! cncflow CLI: watches a CNC source tree and drives the scan pipeline.
//!
//! A cycle runs the primary scan, the analysis and the tool scan services
//! in order whenever new data files appear.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}

//! wasteroute CLI: plan waste-collection routes from a stops sheet.
//!
//! Filters collection points from a CSV, orders them with the HERE
//! sequencing service, routes the truck through them and exports the
//! resulting track as GPX.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}

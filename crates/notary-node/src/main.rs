use std::process::ExitCode;

use clap::Parser;
use notary_node::{Cli, logging};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_filter.as_deref(), cli.log_json);

    match notary_node::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "notary-node failed");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

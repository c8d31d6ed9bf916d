//! # notary-node
//!
//! Runs a notary cluster member.
//!
//! ```text
//! notary-node keygen --out member.seed     write a signing seed, print the node id
//! notary-node run --config notary.json     serve one member over TCP
//! notary-node demo --members 3             in-process cluster, spend + double spend
//! ```

pub mod cli;
pub mod demo;
pub mod keys;
pub mod logging;
pub mod node;

use notary_types::{NotaryConfig, Result};

pub use cli::{Cli, Command};
pub use node::NotaryNode;

/// Execute a parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run { config } => {
            let config = NotaryConfig::load(&config)?;
            NotaryNode::start(config).await?.run_until_shutdown().await
        }
        Command::Keygen { out } => {
            let id = keys::generate_key(&out)?;
            println!("{id}");
            Ok(())
        }
        Command::Demo { members } => {
            let report = demo::run(members).await?;
            println!("notarised   {} (signed by {})", report.spend, report.signed_by);
            println!("rejected    {}: {}", report.double_spend, report.rejection);
            for status in &report.statuses {
                println!("{}", serde_json::to_string(status)?);
            }
            Ok(())
        }
    }
}

//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Transaction uniqueness notary.
#[derive(Debug, Parser)]
#[command(name = "notary-node", version, about)]
pub struct Cli {
    /// Log filter directives; falls back to `RUST_LOG`, then `info`.
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one cluster member until interrupted.
    Run {
        /// JSON configuration file.
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Generate a signing seed and print the node id it yields.
    Keygen {
        /// Where to write the hex-encoded seed.
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Start an in-process Raft notary cluster, notarise a spend and
    /// attempt to double-spend it.
    Demo {
        /// Cluster size.
        #[arg(short, long, default_value_t = 3)]
        members: u8,
    },
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_global_flags() {
        let cli = Cli::parse_from(["notary-node", "run", "--config", "notary.json", "--log-json"]);
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::Run { config } if config == PathBuf::from("notary.json")));
    }

    #[test]
    fn demo_defaults_to_three_members() {
        let cli = Cli::parse_from(["notary-node", "demo"]);
        assert!(matches!(cli.command, Command::Demo { members: 3 }));
    }
}

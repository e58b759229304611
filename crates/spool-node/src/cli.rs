pub mod params;

use crate::commands::address::Address;
use crate::commands::run::Run;
use clap::Parser;

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Run the spool service.
    Run(Run),

    /// Print the chain address for operator funding.
    Address(Address),
}

/// Anchors an append-only chain of records in Bitcoin's UTXO set.
#[derive(Debug, Parser)]
#[command(name = "spool", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Sets a custom logging filter (syntax: `<target>=<level>`).
    ///
    /// Falls back to the `RUST_LOG` environment variable, then to `info`.
    #[arg(short = 'l', long, value_name = "LOG_PATTERN")]
    pub log: Option<String>,
}

//! kvs-conductor - drive test clusters of the key-value store from a shell.
//!
//! Useful for bringing up a cluster by hand while debugging a fault-injection
//! scenario, and for sweeping containers and networks left behind by a run
//! that crashed before it could tear down.
//!
//! # Usage
//!
//! ```bash
//! # Build the node image from the store's source tree
//! kvs-conductor --image kvstore-test build ../kvstore
//!
//! # Six nodes in three shards, printed as JSON
//! kvs-conductor --group manual --json spawn --nodes 6 --shard-size 2
//!
//! # Remove everything a crashed run left behind
//! kvs-conductor cleanup --all
//! ```

mod cli;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::Cli;

/// Initialize tracing subscriber with environment-based filtering.
///
/// - `quiet`: Suppress all logging output (for scripting)
/// - `verbose`: Enable debug-level logging
fn init_tracing(quiet: bool, verbose: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).compact().init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.global.is_quiet, cli.global.is_verbose);

    cli.run()
}

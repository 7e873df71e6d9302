use clap::{Args, Subcommand};

use super::parsers::{parse_min_one_u32, parse_min_one_usize};

#[derive(Debug, Args)]
pub struct OperationArgs {
    #[command(subcommand)]
    pub command: OperationCommand,
}

#[derive(Debug, Subcommand)]
pub enum OperationCommand {
    List,
    Show {
        operation_id: String,
    },
    /// One resumption sweep over the ledger.
    Resume,
    Retry {
        operation_id: String,
    },
    /// Process one entry, optionally stopping after a number of descendants.
    Process {
        operation_id: String,
        #[arg(long, value_parser = parse_min_one_usize)]
        pages: Option<usize>,
    },
    /// Repeated sweeps until the ledger has nothing left to drive.
    Work {
        #[arg(long, default_value_t = 20, value_parser = parse_min_one_u32)]
        iterations: u32,
        #[arg(long, default_value_t = 500)]
        sleep_ms: u64,
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        stop_when_idle: bool,
    },
    /// Recompute stored descendant counts for the whole tree.
    Recount,
    Logs {
        #[arg(long, default_value_t = 50, value_parser = parse_min_one_usize)]
        limit: usize,
    },
}

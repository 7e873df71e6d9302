use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod args;
mod operation;
mod page;
mod parsers;

#[cfg(test)]
mod tests;

pub use args::{
    BodySource, DeleteArgs, DuplicateArgs, IdentityArgs, RenameArgs, RevertArgs, WebArgs,
};
pub use operation::{OperationArgs, OperationCommand};
pub use page::{PageArgs, PageCommand};

#[derive(Debug, Parser)]
#[command(name = "arbor")]
#[command(about = "Wiki page tree with recursive rename, delete, duplicate and revert", version)]
pub struct Cli {
    #[arg(long, default_value = ".arbor")]
    pub root: PathBuf,

    /// Leave Sub-stages for `operation work` instead of running them in the background.
    #[arg(long, global = true, default_value_t = false)]
    pub defer: bool,

    #[command(flatten)]
    pub identity: IdentityArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Init,
    Page(PageArgs),
    Rename(RenameArgs),
    Delete(DeleteArgs),
    DeleteCompletely(DeleteArgs),
    Duplicate(DuplicateArgs),
    Revert(RevertArgs),
    Operation(OperationArgs),
    Web(WebArgs),
}

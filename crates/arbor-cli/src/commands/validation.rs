use anyhow::Result;

use crate::cli::{Commands, PageCommand};

use super::support::validate_body_source_selection;

/// The web server runs its own startup sweep, which initializes the tree.
pub(super) const fn command_needs_initialize(command: &Commands) -> bool {
    !matches!(command, Commands::Web(_))
}

pub(super) fn validate_command_preflight(command: &Commands) -> Result<()> {
    match command {
        Commands::Page(args) => match &args.command {
            PageCommand::Create { source, .. } => validate_body_source_selection(source, false),
            PageCommand::Update { source, .. } => validate_body_source_selection(source, true),
            _ => Ok(()),
        },
        _ => Ok(()),
    }
}

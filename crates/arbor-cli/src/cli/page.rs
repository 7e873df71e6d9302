use arbor_core::models::Grant;
use clap::{Args, Subcommand};

use super::args::BodySource;
use super::parsers::{parse_grant, parse_min_one_usize};

#[derive(Debug, Args)]
pub struct PageArgs {
    #[command(subcommand)]
    pub command: PageCommand,
}

#[derive(Debug, Subcommand)]
pub enum PageCommand {
    Create {
        path: String,
        #[command(flatten)]
        source: BodySource,
        #[arg(long, value_parser = parse_grant, default_value = "public")]
        grant: Grant,
        #[arg(long)]
        granted_group: Option<String>,
        #[arg(long, default_value_t = false)]
        wip: bool,
    },
    /// Show a page by id, or by path with `--path`.
    Show {
        target: String,
        #[arg(long, default_value_t = false)]
        path: bool,
    },
    Update {
        page_id: String,
        /// Revision the edit was based on; omit to skip the conflict check.
        #[arg(long)]
        revision_id: Option<String>,
        #[command(flatten)]
        source: BodySource,
    },
    Children {
        #[arg(long, conflicts_with = "path", required_unless_present = "path")]
        id: Option<String>,
        #[arg(long)]
        path: Option<String>,
    },
    Info {
        #[arg(long = "page-id", conflicts_with = "path", required_unless_present = "path")]
        page_ids: Vec<String>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long, default_value_t = false)]
        bookmarks: bool,
        #[arg(long, default_value_t = false)]
        short_body: bool,
    },
    Revisions {
        page_id: String,
        #[arg(long, value_parser = parse_min_one_usize)]
        limit: Option<usize>,
    },
}

use std::path::PathBuf;

use clap::Args;

/// Who the command acts as. Without `--user` the command runs as a guest.
#[derive(Debug, Args, Default)]
pub struct IdentityArgs {
    #[arg(long = "user", global = true, value_name = "ID")]
    pub user: Option<String>,
    /// Display name; defaults to the user id.
    #[arg(long, global = true)]
    pub name: Option<String>,
    #[arg(long = "group", global = true, value_name = "GROUP_ID")]
    pub groups: Vec<String>,
    #[arg(long, global = true, default_value_t = false)]
    pub admin: bool,
}

/// Where a page body comes from. At most one source may be given.
#[derive(Debug, Args, Default)]
pub struct BodySource {
    #[arg(long, allow_hyphen_values = true)]
    pub body: Option<String>,
    #[arg(long, value_name = "FILE")]
    pub from: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub stdin: bool,
}

#[derive(Debug, Args)]
pub struct RenameArgs {
    pub page_id: String,
    pub new_path: String,
}

#[derive(Debug, Args)]
pub struct DeleteArgs {
    pub page_id: String,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub recursive: bool,
}

#[derive(Debug, Args)]
pub struct DuplicateArgs {
    pub page_id: String,
    pub new_path: String,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub recursive: bool,
    /// Copy only pages the caller can open.
    #[arg(long, default_value_t = false)]
    pub only_user_related: bool,
}

#[derive(Debug, Args)]
pub struct RevertArgs {
    pub page_id: String,
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub recursive: bool,
}

#[derive(Debug, Args)]
pub struct WebArgs {
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = 8787)]
    pub port: u16,
}

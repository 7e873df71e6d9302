use std::io::{Read, Write};
use std::{fs, io};

use anyhow::Result;
use arbor_core::models::User;

use crate::cli::{BodySource, IdentityArgs};

pub(super) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}

pub(super) fn viewer_from_identity(identity: &IdentityArgs) -> User {
    let Some(id) = identity
        .user
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    else {
        return User::guest();
    };
    let name = identity.name.as_deref().unwrap_or(id);
    let mut user = User::new(id, name).with_groups(identity.groups.iter().map(String::as_str));
    if identity.admin {
        user = user.as_admin();
    }
    user
}

/// A missing source reads as an empty body when `required` is false.
pub(super) fn read_body(source: BodySource, required: bool) -> Result<String> {
    validate_body_source_selection(&source, required)?;

    if let Some(body) = source.body {
        return Ok(body);
    }
    if let Some(path) = source.from {
        return Ok(fs::read_to_string(path)?);
    }
    if !source.stdin {
        return Ok(String::new());
    }

    let mut buffer = String::new();
    io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}

pub(super) fn validate_body_source_selection(source: &BodySource, required: bool) -> Result<()> {
    let selected = bool_to_count(source.body.is_some())
        + bool_to_count(source.from.is_some())
        + bool_to_count(source.stdin);
    if selected > 1 {
        anyhow::bail!("page body accepts exactly one source: choose one of --body, --from, --stdin");
    }
    if required && selected == 0 {
        anyhow::bail!("page body is required: use one of --body, --from <path>, --stdin");
    }
    Ok(())
}

const fn bool_to_count(value: bool) -> u8 {
    if value { 1 } else { 0 }
}

//! Caller identity supplied by the authenticating proxy in front of the API.

use std::convert::Infallible;

use axum::{extract::FromRequestParts, http::HeaderMap, http::request::Parts};

use arbor_core::models::User;

pub const USER_ID_HEADER: &str = "x-arbor-user-id";
pub const USER_NAME_HEADER: &str = "x-arbor-user-name";
pub const USER_GROUPS_HEADER: &str = "x-arbor-user-groups";
pub const USER_ADMIN_HEADER: &str = "x-arbor-user-admin";

/// Requests without a user id are served as a guest.
pub struct Viewer(pub User);

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(user_from_headers(&parts.headers)))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers
        .get(key)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn user_from_headers(headers: &HeaderMap) -> User {
    let Some(id) = header_str(headers, USER_ID_HEADER) else {
        return User::guest();
    };
    let name = header_str(headers, USER_NAME_HEADER).unwrap_or(id);
    let mut user = User::new(id, name);
    if let Some(groups) = header_str(headers, USER_GROUPS_HEADER) {
        user = user.with_groups(
            groups
                .split(',')
                .map(str::trim)
                .filter(|group| !group.is_empty()),
        );
    }
    if header_str(headers, USER_ADMIN_HEADER)
        .is_some_and(|value| value.eq_ignore_ascii_case("true") || value == "1")
    {
        user = user.as_admin();
    }
    user
}

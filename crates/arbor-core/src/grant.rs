use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ArborError;
use crate::models::{Grant, ListPolicy, Page, PageStatus, User};

pub(crate) fn can_view(
    user: &User,
    grant: Grant,
    granted_user: Option<&str>,
    granted_group: Option<&str>,
) -> bool {
    if user.is_admin {
        return true;
    }
    match grant {
        Grant::Public | Grant::Restricted => true,
        Grant::Owner => !user.is_guest() && granted_user == Some(user.id.as_str()),
        Grant::UserGroup => granted_group
            .is_some_and(|group| user.group_ids.iter().any(|candidate| candidate == group)),
    }
}

pub(crate) fn can_view_page(user: &User, page: &Page) -> bool {
    can_view(
        user,
        page.grant,
        page.granted_user.as_deref(),
        page.granted_group.as_deref(),
    )
}

/// Whether `page` appears in `user`'s child listings. Link-only and trashed
/// pages never do; WIP pages only for their creator.
pub(crate) fn is_listable(user: &User, page: &Page, policy: ListPolicy) -> bool {
    if page.status != PageStatus::Published || page.grant == Grant::Restricted {
        return false;
    }
    if page.wip && !user.is_admin && page.creator.as_deref() != Some(user.id.as_str()) {
        return false;
    }
    if can_view_page(user, page) {
        return true;
    }
    match page.grant {
        Grant::Owner => policy.include_owner_restricted,
        Grant::UserGroup => policy.include_group_restricted,
        Grant::Public | Grant::Restricted => false,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionAuthority {
    AdminOnly,
    #[default]
    AdminAndAuthor,
    Anyone,
}

impl DeletionAuthority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AdminOnly => "admin_only",
            Self::AdminAndAuthor => "admin_and_author",
            Self::Anyone => "anyone",
        }
    }

    #[must_use]
    pub fn permits(self, user: &User, creator: Option<&str>) -> bool {
        if user.is_guest() {
            return false;
        }
        match self {
            Self::AdminOnly => user.is_admin,
            Self::AdminAndAuthor => user.is_admin || creator == Some(user.id.as_str()),
            Self::Anyone => true,
        }
    }
}

impl FromStr for DeletionAuthority {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin_only" => Ok(Self::AdminOnly),
            "admin_and_author" => Ok(Self::AdminAndAuthor),
            "anyone" => Ok(Self::Anyone),
            other => Err(ArborError::Validation(format!(
                "invalid deletion authority: {other} (expected admin_only|admin_and_author|anyone)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(grant: Grant) -> Page {
        Page {
            id: "p".to_string(),
            path: "/p".to_string(),
            parent_id: Some("root".to_string()),
            descendant_count: 0,
            grant,
            granted_user: (grant == Grant::Owner).then(|| "alice".to_string()),
            granted_group: (grant == Grant::UserGroup).then(|| "eng".to_string()),
            creator: Some("alice".to_string()),
            revision_id: None,
            is_empty: false,
            wip: false,
            status: PageStatus::Published,
            created_at: String::new(),
            updated_at: String::new(),
            process_data: None,
        }
    }

    #[test]
    fn owner_and_group_grants_limit_viewers() {
        let alice = User::new("alice", "Alice");
        let bob = User::new("bob", "Bob").with_groups(["eng"]);
        let admin = User::new("root", "Root").as_admin();

        assert!(can_view_page(&alice, &page(Grant::Owner)));
        assert!(!can_view_page(&bob, &page(Grant::Owner)));
        assert!(can_view_page(&admin, &page(Grant::Owner)));
        assert!(can_view_page(&bob, &page(Grant::UserGroup)));
        assert!(!can_view_page(&alice, &page(Grant::UserGroup)));
        assert!(can_view_page(&User::guest(), &page(Grant::Public)));
    }

    #[test]
    fn list_policy_flags_apply_independently() {
        let bob = User::new("bob", "Bob");
        let owner_only = ListPolicy {
            include_owner_restricted: true,
            include_group_restricted: false,
        };
        assert!(is_listable(&bob, &page(Grant::Owner), owner_only));
        assert!(!is_listable(&bob, &page(Grant::UserGroup), owner_only));
        assert!(!is_listable(&bob, &page(Grant::Owner), ListPolicy::default()));
        assert!(!is_listable(&bob, &page(Grant::Restricted), owner_only));
    }

    #[test]
    fn wip_pages_are_listed_only_for_creator() {
        let mut draft = page(Grant::Public);
        draft.wip = true;
        assert!(is_listable(&User::new("alice", "Alice"), &draft, ListPolicy::default()));
        assert!(!is_listable(&User::new("bob", "Bob"), &draft, ListPolicy::default()));
    }

    #[test]
    fn deletion_authority_modes() {
        let author = User::new("alice", "Alice");
        let other = User::new("bob", "Bob");
        let admin = User::new("root", "Root").as_admin();
        assert!(DeletionAuthority::AdminAndAuthor.permits(&author, Some("alice")));
        assert!(!DeletionAuthority::AdminAndAuthor.permits(&other, Some("alice")));
        assert!(!DeletionAuthority::AdminOnly.permits(&author, Some("alice")));
        assert!(DeletionAuthority::AdminOnly.permits(&admin, Some("alice")));
        assert!(DeletionAuthority::Anyone.permits(&other, Some("alice")));
        assert!(!DeletionAuthority::Anyone.permits(&User::guest(), None));
        assert!("bogus".parse::<DeletionAuthority>().is_err());
    }
}

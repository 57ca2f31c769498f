//! Feed-scope visibility rules
//!
//! Two flavours of the same rule:
//! - per entity (`check_access`): direct-id reads and mutations get an explicit
//!   denial so the caller learns why it was refused;
//! - per collection (`ListingFilter`): listings only ever select the requester's
//!   own partition, so foreign campus posts are never surfaced at all.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::models::{normalize_domain, FeedScope, Post};

/// Why a requester may not see or act on a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    /// Campus post, requester has no school domain
    NoDomain,
    /// Campus post from a different school
    CrossSchool,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NoDomain => f.write_str("no domain"),
            DenyReason::CrossSchool => f.write_str("cross-school"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Denied(DenyReason),
}

/// Decide whether a requester with `requester_domain` may see `post`
pub fn check_access(post: &Post, requester_domain: Option<&str>) -> Access {
    match post.scope {
        FeedScope::National => Access::Allowed,
        FeedScope::Campus => {
            let Some(requester) = requester_domain.and_then(normalize_domain) else {
                return Access::Denied(DenyReason::NoDomain);
            };
            let post_domain = post.school_domain.as_deref().and_then(normalize_domain);
            if post_domain.as_deref() == Some(requester.as_str()) {
                Access::Allowed
            } else {
                Access::Denied(DenyReason::CrossSchool)
            }
        }
    }
}

/// Collection-level filter for post listings. Hidden posts are always excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingFilter {
    /// Every visible national post
    National,
    /// Visible campus posts of one school
    Campus { school_domain: String },
    /// Nothing matches; no query needs to run
    Empty,
}

impl ListingFilter {
    pub fn for_requester(scope: FeedScope, requester_domain: Option<&str>) -> Self {
        match scope {
            FeedScope::National => ListingFilter::National,
            FeedScope::Campus => match requester_domain.and_then(normalize_domain) {
                Some(school_domain) => ListingFilter::Campus { school_domain },
                None => ListingFilter::Empty,
            },
        }
    }
}

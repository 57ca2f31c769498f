use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

use crate::error::ServiceError;

/// Which wall a post lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedScope {
    /// Restricted to one school domain
    Campus,
    /// Visible to everyone
    National,
}

impl FeedScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedScope::Campus => "campus",
            FeedScope::National => "national",
        }
    }
}

impl fmt::Display for FeedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedScope {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "campus" => Ok(FeedScope::Campus),
            "national" => Ok(FeedScope::National),
            other => Err(ServiceError::Validation(format!(
                "invalid feed scope: {:?}",
                other
            ))),
        }
    }
}

/// Denormalized counters carried on a post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Likes,
    Comments,
}

impl Counter {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::Likes => "like_count",
            Counter::Comments => "comment_count",
        }
    }
}

/// A counter adjustment. Counters only ever move by one per detail row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delta {
    Increment,
    Decrement,
}

/// Post entity - a message on the campus or national wall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub author_id: Uuid,
    pub content: String,
    pub scope: FeedScope,
    /// Present iff `scope` is campus
    pub school_domain: Option<String>,
    pub like_count: i64,
    pub comment_count: i64,
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Compare-and-swap token, bumped on every successful update
    pub version: i64,
}

impl Post {
    pub fn counter(&self, counter: Counter) -> i64 {
        match counter {
            Counter::Likes => self.like_count,
            Counter::Comments => self.comment_count,
        }
    }

    /// Apply a ±1 delta to one counter. Decrements never go below zero.
    pub fn apply_delta(&mut self, counter: Counter, delta: Delta) {
        let slot = match counter {
            Counter::Likes => &mut self.like_count,
            Counter::Comments => &mut self.comment_count,
        };
        *slot = match delta {
            Delta::Increment => *slot + 1,
            Delta::Decrement => (*slot - 1).max(0),
        };
    }

    pub fn is_authored_by(&self, user_id: Uuid) -> bool {
        self.author_id == user_id
    }
}

/// Comment entity - a reply on a post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub author_id: Uuid,
    pub content: String,
    pub hidden: bool,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

/// Like entity - one user liking one post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Like {
    pub id: i64,
    pub post_id: i64,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Minimal user view supplied by the identity collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub school_domain: Option<String>,
}

/// Insert payload for a post; counters start at zero and version at 0
#[derive(Debug, Clone)]
pub struct NewPost {
    pub author_id: Uuid,
    pub content: String,
    pub scope: FeedScope,
    pub school_domain: Option<String>,
}

/// Insert payload for a comment
#[derive(Debug, Clone)]
pub struct NewComment {
    pub post_id: i64,
    pub author_id: Uuid,
    pub content: String,
}

/// User-supplied text for a post or a comment, 1 to 5000 characters
#[derive(Debug, Clone, Validate)]
pub struct ContentDraft {
    #[validate(length(min = 1, max = 5000))]
    pub content: String,
}

impl ContentDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Length-checks the text and rejects whitespace-only input
    pub fn checked(self) -> Result<String, ServiceError> {
        self.validate()?;
        if self.content.trim().is_empty() {
            return Err(ServiceError::Validation(
                "content must not be blank".to_string(),
            ));
        }
        Ok(self.content)
    }
}

/// Lower-cased, trimmed school domain; blank input means "no domain"
pub fn normalize_domain(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_start_matches('@').to_ascii_lowercase();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Domain part of an institutional email address
pub fn school_domain_from_email(email: &str) -> Option<String> {
    let (local, domain) = email.trim().rsplit_once('@')?;
    if local.is_empty() || !domain.contains('.') {
        return None;
    }
    normalize_domain(domain)
}

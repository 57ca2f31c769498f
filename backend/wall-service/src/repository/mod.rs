//! Persistence and identity collaborators
//!
//! The engine only needs point lookups, scoped range queries, inserts, a
//! versioned conditional update and one bulk update keyed by post id. Every
//! mutating use case runs inside a single `WallTx`; dropping a transaction
//! without calling `commit` rolls it back.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Comment, CommentOrder, FeedScope, Like, NewComment, NewPost, Post, PostOrder, UserProfile,
};
use crate::error::StoreError;

pub use memory::{MemoryIdentityProvider, MemoryVerificationCodes, MemoryWallStore, StoreFault};
pub use postgres::{PgIdentityProvider, PgVerificationCodes, PgWallStore};

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of a compare-and-swap update. A stale token is distinct from a
/// missing row.
#[derive(Debug, Clone, PartialEq)]
pub enum CasOutcome<T> {
    /// Row written; carries the stored row with its bumped version
    Applied(T),
    /// Row exists but its version no longer matches the token
    Stale,
    /// No row with that id
    Missing,
}

/// Visible-post partition selected by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostFilter {
    pub scope: FeedScope,
    /// Required for campus listings, ignored for national ones
    pub school_domain: Option<String>,
}

impl PostFilter {
    pub fn matches(&self, post: &Post) -> bool {
        if post.hidden || post.scope != self.scope {
            return false;
        }
        match self.scope {
            FeedScope::National => true,
            FeedScope::Campus => post.school_domain == self.school_domain,
        }
    }
}

/// Limit / offset pair for range queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub limit: i64,
    pub offset: i64,
}

/// Entry point into the wall's persistent state
#[async_trait]
pub trait WallStore: Send + Sync {
    /// Open an atomic unit of work
    async fn begin(&self) -> StoreResult<Box<dyn WallTx>>;

    async fn find_post(&self, post_id: i64) -> StoreResult<Option<Post>>;

    async fn find_comment(&self, comment_id: i64) -> StoreResult<Option<Comment>>;

    /// Visible posts of one partition plus the partition's total size
    async fn list_posts(
        &self,
        filter: &PostFilter,
        order: PostOrder,
        window: Window,
    ) -> StoreResult<(Vec<Post>, i64)>;

    /// Visible comments of one post plus their total
    async fn list_comments(
        &self,
        post_id: i64,
        order: CommentOrder,
        window: Window,
    ) -> StoreResult<(Vec<Comment>, i64)>;

    /// Post ids greater than `after_id`, ascending; used for batch scans
    async fn post_ids_after(&self, after_id: i64, limit: i64) -> StoreResult<Vec<i64>>;
}

/// One open transaction against the wall store
#[async_trait]
pub trait WallTx: Send {
    async fn find_post(&mut self, post_id: i64) -> StoreResult<Option<Post>>;

    async fn insert_post(&mut self, post: &NewPost) -> StoreResult<Post>;

    /// Write counters, hidden flag and `updated_at` of `post` if the stored
    /// version still equals `post.version`; bumps the version on success.
    async fn update_post(&mut self, post: &Post) -> StoreResult<CasOutcome<Post>>;

    async fn find_comment(&mut self, comment_id: i64) -> StoreResult<Option<Comment>>;

    async fn insert_comment(&mut self, comment: &NewComment) -> StoreResult<Comment>;

    /// Versioned write of a comment's hidden flag
    async fn update_comment(&mut self, comment: &Comment) -> StoreResult<CasOutcome<Comment>>;

    /// Bulk-set the hidden flag of every comment under `post_id`
    async fn set_comments_hidden(&mut self, post_id: i64, hidden: bool) -> StoreResult<u64>;

    /// Locks the row until the transaction ends, so concurrent toggles by
    /// the same user queue behind each other
    async fn find_like(&mut self, post_id: i64, user_id: Uuid) -> StoreResult<Option<Like>>;

    async fn insert_like(&mut self, post_id: i64, user_id: Uuid) -> StoreResult<Like>;

    /// `false` when the row was already gone
    async fn delete_like(&mut self, like_id: i64) -> StoreResult<bool>;

    async fn count_likes(&mut self, post_id: i64) -> StoreResult<i64>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

/// Identity collaborator: the core only ever reads a user's school domain
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>>;

    async fn school_domain(&self, user_id: Uuid) -> StoreResult<Option<String>> {
        Ok(self
            .find_user(user_id)
            .await?
            .and_then(|user| user.school_domain)
            .filter(|domain| !domain.trim().is_empty()))
    }
}

/// Purpose a verification code was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodePurpose {
    Register,
    ResetPassword,
}

impl CodePurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodePurpose::Register => "register",
            CodePurpose::ResetPassword => "reset_password",
        }
    }
}

/// Persisted, expiring verification code
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationCode {
    pub email: String,
    pub code: String,
    pub purpose: CodePurpose,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait VerificationCodeRepository: Send + Sync {
    /// Store a code, replacing any earlier code for the same (email, purpose)
    async fn save(&self, code: &VerificationCode) -> StoreResult<()>;

    /// Delete and return true if an unexpired (email, code, purpose) row exists
    async fn consume(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Drop every row that expired before `now`
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}

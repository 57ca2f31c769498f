//! In-process implementations of the store collaborators
//!
//! A transaction holds the store lock for its whole lifetime and works on a
//! private copy of the state, which replaces the shared state on commit.
//! Transactions therefore never interleave; races a database would produce
//! are replayed as faults queued per post.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::{
    CasOutcome, CodePurpose, IdentityProvider, PostFilter, StoreResult, VerificationCode,
    VerificationCodeRepository, WallStore, WallTx, Window,
};
use crate::domain::{
    school_domain_from_email, Comment, CommentOrder, Like, NewComment, NewPost, Post, PostOrder,
    UserProfile,
};
use crate::error::StoreError;

/// Failure injected into an upcoming write on a post
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFault {
    /// Another writer bumps the post's version just before our CAS
    StaleVersion,
    /// The versioned post update times out
    Timeout,
    /// Another writer deletes the like row between lookup and delete
    LikeAlreadyDeleted,
    /// The bulk comment update of a cascade times out
    CascadeTimeout,
}

impl StoreFault {
    fn hits_post_update(self) -> bool {
        matches!(self, StoreFault::StaleVersion | StoreFault::Timeout)
    }
}

#[derive(Debug, Clone, Default)]
struct WallState {
    posts: BTreeMap<i64, Post>,
    comments: BTreeMap<i64, Comment>,
    likes: BTreeMap<i64, Like>,
    next_post_id: i64,
    next_comment_id: i64,
    next_like_id: i64,
}

fn next_id(counter: &mut i64) -> i64 {
    *counter += 1;
    *counter
}

fn window_of<T>(items: Vec<T>, window: Window) -> Vec<T> {
    items
        .into_iter()
        .skip(window.offset.max(0) as usize)
        .take(window.limit.max(0) as usize)
        .collect()
}

type FaultQueue = Arc<Mutex<HashMap<i64, VecDeque<StoreFault>>>>;

#[derive(Clone, Default)]
pub struct MemoryWallStore {
    state: Arc<Mutex<WallState>>,
    faults: FaultQueue,
}

impl MemoryWallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue faults for upcoming writes on `post_id`. Each write only pops a
    /// fault of its own kind from the front of the queue.
    pub async fn inject_faults(&self, post_id: i64, faults: impl IntoIterator<Item = StoreFault>) {
        self.faults
            .lock()
            .await
            .entry(post_id)
            .or_default()
            .extend(faults);
    }

    /// Number of faults still queued for `post_id`
    pub async fn pending_faults(&self, post_id: i64) -> usize {
        self.faults
            .lock()
            .await
            .get(&post_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Every comment of a post, hidden ones included, oldest first
    pub async fn all_comments(&self, post_id: i64) -> Vec<Comment> {
        let state = self.state.lock().await;
        state
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect()
    }

    /// Number of like rows for a post
    pub async fn like_rows(&self, post_id: i64) -> usize {
        let state = self.state.lock().await;
        state.likes.values().filter(|l| l.post_id == post_id).count()
    }

    /// Overwrite a stored post, bypassing the version check
    pub async fn force_post(&self, post: Post) {
        self.state.lock().await.posts.insert(post.id, post);
    }
}

#[async_trait]
impl WallStore for MemoryWallStore {
    async fn begin(&self) -> StoreResult<Box<dyn WallTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working,
            faults: self.faults.clone(),
        }))
    }

    async fn find_post(&self, post_id: i64) -> StoreResult<Option<Post>> {
        Ok(self.state.lock().await.posts.get(&post_id).cloned())
    }

    async fn find_comment(&self, comment_id: i64) -> StoreResult<Option<Comment>> {
        Ok(self.state.lock().await.comments.get(&comment_id).cloned())
    }

    async fn list_posts(
        &self,
        filter: &PostFilter,
        order: PostOrder,
        window: Window,
    ) -> StoreResult<(Vec<Post>, i64)> {
        let state = self.state.lock().await;
        let mut matching: Vec<Post> = state
            .posts
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| order.compare(a, b));
        let total = matching.len() as i64;
        Ok((window_of(matching, window), total))
    }

    async fn list_comments(
        &self,
        post_id: i64,
        order: CommentOrder,
        window: Window,
    ) -> StoreResult<(Vec<Comment>, i64)> {
        let state = self.state.lock().await;
        let mut matching: Vec<Comment> = state
            .comments
            .values()
            .filter(|c| c.post_id == post_id && !c.hidden)
            .cloned()
            .collect();
        matching.sort_by(|a, b| order.compare(a, b));
        let total = matching.len() as i64;
        Ok((window_of(matching, window), total))
    }

    async fn post_ids_after(&self, after_id: i64, limit: i64) -> StoreResult<Vec<i64>> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .range(after_id.saturating_add(1)..)
            .take(limit.max(0) as usize)
            .map(|(id, _)| *id)
            .collect())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<WallState>,
    working: WallState,
    faults: FaultQueue,
}

impl MemoryTx {
    async fn take_fault(
        &self,
        post_id: i64,
        applies: impl Fn(StoreFault) -> bool,
    ) -> Option<StoreFault> {
        let mut faults = self.faults.lock().await;
        let queue = faults.get_mut(&post_id)?;
        match queue.front() {
            Some(&fault) if applies(fault) => queue.pop_front(),
            _ => None,
        }
    }
}

#[async_trait]
impl WallTx for MemoryTx {
    async fn find_post(&mut self, post_id: i64) -> StoreResult<Option<Post>> {
        Ok(self.working.posts.get(&post_id).cloned())
    }

    async fn insert_post(&mut self, post: &NewPost) -> StoreResult<Post> {
        let now = Utc::now();
        let stored = Post {
            id: next_id(&mut self.working.next_post_id),
            author_id: post.author_id,
            content: post.content.clone(),
            scope: post.scope,
            school_domain: post.school_domain.clone(),
            like_count: 0,
            comment_count: 0,
            hidden: false,
            created_at: now,
            updated_at: now,
            version: 0,
        };
        self.working.posts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_post(&mut self, post: &Post) -> StoreResult<CasOutcome<Post>> {
        match self.take_fault(post.id, StoreFault::hits_post_update).await {
            Some(StoreFault::StaleVersion) => {
                if let Some(stored) = self.working.posts.get_mut(&post.id) {
                    stored.version += 1;
                }
                return Ok(CasOutcome::Stale);
            }
            Some(StoreFault::Timeout) => return Err(StoreError::Timeout),
            _ => {}
        }

        let Some(stored) = self.working.posts.get_mut(&post.id) else {
            return Ok(CasOutcome::Missing);
        };
        if stored.version != post.version {
            return Ok(CasOutcome::Stale);
        }
        stored.like_count = post.like_count;
        stored.comment_count = post.comment_count;
        stored.hidden = post.hidden;
        stored.updated_at = Utc::now();
        stored.version += 1;
        Ok(CasOutcome::Applied(stored.clone()))
    }

    async fn find_comment(&mut self, comment_id: i64) -> StoreResult<Option<Comment>> {
        Ok(self.working.comments.get(&comment_id).cloned())
    }

    async fn insert_comment(&mut self, comment: &NewComment) -> StoreResult<Comment> {
        let stored = Comment {
            id: next_id(&mut self.working.next_comment_id),
            post_id: comment.post_id,
            author_id: comment.author_id,
            content: comment.content.clone(),
            hidden: false,
            created_at: Utc::now(),
            version: 0,
        };
        self.working.comments.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_comment(&mut self, comment: &Comment) -> StoreResult<CasOutcome<Comment>> {
        let Some(stored) = self.working.comments.get_mut(&comment.id) else {
            return Ok(CasOutcome::Missing);
        };
        if stored.version != comment.version {
            return Ok(CasOutcome::Stale);
        }
        stored.hidden = comment.hidden;
        stored.version += 1;
        Ok(CasOutcome::Applied(stored.clone()))
    }

    async fn set_comments_hidden(&mut self, post_id: i64, hidden: bool) -> StoreResult<u64> {
        if self
            .take_fault(post_id, |f| f == StoreFault::CascadeTimeout)
            .await
            .is_some()
        {
            return Err(StoreError::Timeout);
        }
        let mut touched = 0;
        for comment in self
            .working
            .comments
            .values_mut()
            .filter(|c| c.post_id == post_id)
        {
            comment.hidden = hidden;
            comment.version += 1;
            touched += 1;
        }
        Ok(touched)
    }

    async fn find_like(&mut self, post_id: i64, user_id: Uuid) -> StoreResult<Option<Like>> {
        Ok(self
            .working
            .likes
            .values()
            .find(|l| l.post_id == post_id && l.user_id == user_id)
            .cloned())
    }

    async fn insert_like(&mut self, post_id: i64, user_id: Uuid) -> StoreResult<Like> {
        if self.find_like(post_id, user_id).await?.is_some() {
            return Err(StoreError::Duplicate(format!(
                "like ({}, {}) already exists",
                post_id, user_id
            )));
        }
        let like = Like {
            id: next_id(&mut self.working.next_like_id),
            post_id,
            user_id,
            created_at: Utc::now(),
        };
        self.working.likes.insert(like.id, like.clone());
        Ok(like)
    }

    async fn delete_like(&mut self, like_id: i64) -> StoreResult<bool> {
        let Some(like) = self.working.likes.remove(&like_id) else {
            return Ok(false);
        };
        let vanished = self
            .take_fault(like.post_id, |f| f == StoreFault::LikeAlreadyDeleted)
            .await;
        Ok(vanished.is_none())
    }

    async fn count_likes(&mut self, post_id: i64) -> StoreResult<i64> {
        Ok(self
            .working
            .likes
            .values()
            .filter(|l| l.post_id == post_id)
            .count() as i64)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }
}

/// Identity lookups backed by a map
#[derive(Clone, Default)]
pub struct MemoryIdentityProvider {
    users: Arc<RwLock<HashMap<Uuid, UserProfile>>>,
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a user whose school domain is derived from `email`
    pub async fn register_user(&self, user_id: Uuid, email: &str) -> UserProfile {
        let profile = UserProfile {
            id: user_id,
            school_domain: school_domain_from_email(email),
        };
        self.users.write().await.insert(user_id, profile.clone());
        profile
    }

    pub async fn insert(&self, profile: UserProfile) {
        self.users.write().await.insert(profile.id, profile);
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }
}

/// Verification codes keyed by (email, purpose)
#[derive(Clone, Default)]
pub struct MemoryVerificationCodes {
    codes: Arc<Mutex<HashMap<(String, CodePurpose), VerificationCode>>>,
}

impl MemoryVerificationCodes {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.codes.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.codes.lock().await.is_empty()
    }
}

#[async_trait]
impl VerificationCodeRepository for MemoryVerificationCodes {
    async fn save(&self, code: &VerificationCode) -> StoreResult<()> {
        self.codes
            .lock()
            .await
            .insert((code.email.clone(), code.purpose), code.clone());
        Ok(())
    }

    async fn consume(
        &self,
        email: &str,
        code: &str,
        purpose: CodePurpose,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut codes = self.codes.lock().await;
        let key = (email.to_string(), purpose);
        let matches = codes
            .get(&key)
            .map(|stored| stored.code == code && stored.expires_at > now)
            .unwrap_or(false);
        if matches {
            codes.remove(&key);
        }
        Ok(matches)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut codes = self.codes.lock().await;
        let before = codes.len();
        codes.retain(|_, stored| stored.expires_at > now);
        Ok((before - codes.len()) as u64)
    }
}

/// Post service - creation, lookup, scoped listings and the post-level soft-delete cascade
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    normalize_domain, ContentDraft, FeedScope, ListingFilter, NewPost, Page, PageRequest, Post,
    PostOrder, SortMode,
};
use crate::error::{ForbiddenReason, ServiceError, ServiceResult};
use crate::repository::{PostFilter, WallStore, Window};
use crate::services::counters::CounterLedger;
use crate::services::visibility::VisibilityGuard;

pub struct PostService {
    store: Arc<dyn WallStore>,
    guard: VisibilityGuard,
    ledger: CounterLedger,
}

impl PostService {
    pub fn new(store: Arc<dyn WallStore>, guard: VisibilityGuard, ledger: CounterLedger) -> Self {
        Self {
            store,
            guard,
            ledger,
        }
    }

    /// Create a post on the campus or national wall.
    ///
    /// Campus posts inherit the author's school domain; an author without one
    /// cannot post to a campus wall.
    pub async fn create_post(
        &self,
        author_id: Uuid,
        content: &str,
        scope: FeedScope,
    ) -> ServiceResult<Post> {
        let content = ContentDraft::new(content).checked()?;

        let school_domain = match scope {
            FeedScope::National => None,
            FeedScope::Campus => {
                let domain = self
                    .guard
                    .requester_domain(author_id)
                    .await?
                    .as_deref()
                    .and_then(normalize_domain)
                    .ok_or(ServiceError::Forbidden(ForbiddenReason::NoSchoolDomain {
                        user_id: author_id,
                    }))?;
                Some(domain)
            }
        };

        let mut tx = self.store.begin().await?;
        let post = tx
            .insert_post(&NewPost {
                author_id,
                content,
                scope,
                school_domain,
            })
            .await?;
        tx.commit().await?;

        info!(post_id = post.id, %author_id, scope = %scope, "post created");
        Ok(post)
    }

    /// Single-post fetch. Hidden posts are only returned to their author.
    pub async fn get_post(&self, post_id: i64, user_id: Uuid) -> ServiceResult<Post> {
        let post = self
            .store
            .find_post(post_id)
            .await?
            .filter(|post| !post.hidden || post.is_authored_by(user_id))
            .ok_or_else(|| ServiceError::post_not_found(post_id))?;
        self.guard.check(&post, user_id).await?;
        Ok(post)
    }

    pub async fn list_posts(
        &self,
        scope: FeedScope,
        request: PageRequest,
        sort: SortMode,
        user_id: Uuid,
    ) -> ServiceResult<Page<Post>> {
        let filter = match self.guard.listing_filter(scope, user_id).await? {
            ListingFilter::National => PostFilter {
                scope: FeedScope::National,
                school_domain: None,
            },
            ListingFilter::Campus { school_domain } => PostFilter {
                scope: FeedScope::Campus,
                school_domain: Some(school_domain),
            },
            ListingFilter::Empty => {
                debug!(%user_id, "campus listing for user without school domain");
                return Ok(Page::empty(request));
            }
        };

        let window = Window {
            limit: request.size(),
            offset: request.offset(),
        };
        let (items, total) = self
            .store
            .list_posts(&filter, PostOrder::from(sort), window)
            .await?;
        Ok(Page::new(items, request, total))
    }

    pub async fn hide_post(&self, post_id: i64, user_id: Uuid) -> ServiceResult<Post> {
        self.set_post_hidden(post_id, user_id, true).await
    }

    pub async fn unhide_post(&self, post_id: i64, user_id: Uuid) -> ServiceResult<Post> {
        self.set_post_hidden(post_id, user_id, false).await
    }

    /// Flip the post flag and bulk-flip every comment under it in one
    /// transaction. `comment_count` is not touched by the bulk path.
    async fn set_post_hidden(
        &self,
        post_id: i64,
        user_id: Uuid,
        hidden: bool,
    ) -> ServiceResult<Post> {
        let mut tx = self.store.begin().await?;
        let post = tx
            .find_post(post_id)
            .await?
            .ok_or_else(|| ServiceError::post_not_found(post_id))?;

        if !post.is_authored_by(user_id) {
            return Err(ServiceError::Forbidden(ForbiddenReason::NotOwner {
                entity: "post",
                id: post_id,
                user_id,
            }));
        }
        if post.hidden == hidden {
            return Ok(post);
        }

        let post = self.ledger.set_hidden(tx.as_mut(), post_id, hidden).await?;
        let comments = tx.set_comments_hidden(post_id, hidden).await?;
        tx.commit().await?;

        info!(post_id, %user_id, hidden, comments, "post visibility changed");
        Ok(post)
    }
}

/// Comment service - replies, comment listings and per-comment hide / unhide
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    Comment, CommentOrder, ContentDraft, Counter, Delta, NewComment, Page, PageRequest, SortMode,
};
use crate::error::{ForbiddenReason, ServiceError, ServiceResult};
use crate::repository::{CasOutcome, WallStore, Window};
use crate::services::counters::CounterLedger;
use crate::services::visibility::VisibilityGuard;

pub struct CommentService {
    store: Arc<dyn WallStore>,
    guard: VisibilityGuard,
    ledger: CounterLedger,
}

impl CommentService {
    pub fn new(store: Arc<dyn WallStore>, guard: VisibilityGuard, ledger: CounterLedger) -> Self {
        Self {
            store,
            guard,
            ledger,
        }
    }

    /// Insert a comment and bump the post's `comment_count` in one transaction
    pub async fn add_comment(
        &self,
        post_id: i64,
        author_id: Uuid,
        content: &str,
    ) -> ServiceResult<Comment> {
        let content = ContentDraft::new(content).checked()?;
        self.guard
            .visible_post(self.store.as_ref(), post_id, author_id)
            .await?;

        let mut tx = self.store.begin().await?;
        let comment = tx
            .insert_comment(&NewComment {
                post_id,
                author_id,
                content,
            })
            .await?;
        let post = self
            .ledger
            .adjust(tx.as_mut(), post_id, Counter::Comments, Delta::Increment)
            .await?;
        // hidden between the guard check and the transaction
        if post.hidden {
            return Err(ServiceError::post_not_found(post_id));
        }
        tx.commit().await?;

        info!(
            post_id,
            comment_id = comment.id,
            %author_id,
            comment_count = post.comment_count,
            "comment added"
        );
        Ok(comment)
    }

    /// Visible comments of a visible post
    pub async fn list_comments(
        &self,
        post_id: i64,
        request: PageRequest,
        sort: SortMode,
        user_id: Uuid,
    ) -> ServiceResult<Page<Comment>> {
        self.guard
            .visible_post(self.store.as_ref(), post_id, user_id)
            .await?;

        let window = Window {
            limit: request.size(),
            offset: request.offset(),
        };
        let (items, total) = self
            .store
            .list_comments(post_id, CommentOrder::from(sort), window)
            .await?;
        Ok(Page::new(items, request, total))
    }

    pub async fn hide_comment(
        &self,
        post_id: i64,
        comment_id: i64,
        user_id: Uuid,
    ) -> ServiceResult<Comment> {
        self.set_comment_hidden(post_id, comment_id, user_id, true)
            .await
    }

    pub async fn unhide_comment(
        &self,
        post_id: i64,
        comment_id: i64,
        user_id: Uuid,
    ) -> ServiceResult<Comment> {
        self.set_comment_hidden(post_id, comment_id, user_id, false)
            .await
    }

    async fn set_comment_hidden(
        &self,
        post_id: i64,
        comment_id: i64,
        user_id: Uuid,
        hidden: bool,
    ) -> ServiceResult<Comment> {
        self.guard
            .visible_post(self.store.as_ref(), post_id, user_id)
            .await?;

        let mut tx = self.store.begin().await?;
        let comment = tx
            .find_comment(comment_id)
            .await?
            .filter(|comment| comment.post_id == post_id)
            .ok_or_else(|| ServiceError::comment_not_found(comment_id))?;

        if comment.author_id != user_id {
            return Err(ServiceError::Forbidden(ForbiddenReason::NotOwner {
                entity: "comment",
                id: comment_id,
                user_id,
            }));
        }
        if comment.hidden == hidden {
            debug!(post_id, comment_id, hidden, "comment already in requested state");
            return Ok(comment);
        }

        let mut updated = comment;
        updated.hidden = hidden;
        let stored = match tx.update_comment(&updated).await? {
            CasOutcome::Applied(stored) => stored,
            CasOutcome::Missing => return Err(ServiceError::comment_not_found(comment_id)),
            // not retried: only the author or a post cascade writes this row
            CasOutcome::Stale => {
                return Err(ServiceError::Conflict {
                    post_id,
                    detail: format!("comment {} changed concurrently", comment_id),
                })
            }
        };

        let delta = if hidden {
            Delta::Decrement
        } else {
            Delta::Increment
        };
        let post = self
            .ledger
            .adjust(tx.as_mut(), post_id, Counter::Comments, delta)
            .await?;
        if post.hidden {
            return Err(ServiceError::post_not_found(post_id));
        }
        tx.commit().await?;

        info!(
            post_id,
            comment_id,
            %user_id,
            hidden,
            comment_count = post.comment_count,
            "comment visibility changed"
        );
        Ok(stored)
    }
}

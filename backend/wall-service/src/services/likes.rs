/// Like toggle - a pure liked / not-liked switch per (post, user)
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::{Counter, Delta};
use crate::error::{ServiceError, ServiceResult, StoreError};
use crate::repository::WallStore;
use crate::services::counters::CounterLedger;
use crate::services::visibility::VisibilityGuard;

pub struct LikeService {
    store: Arc<dyn WallStore>,
    guard: VisibilityGuard,
    ledger: CounterLedger,
}

impl LikeService {
    pub fn new(store: Arc<dyn WallStore>, guard: VisibilityGuard, ledger: CounterLedger) -> Self {
        Self {
            store,
            guard,
            ledger,
        }
    }

    /// Returns `true` when the post is now liked by `user_id`, `false` when
    /// the existing like was removed.
    pub async fn toggle_like(&self, post_id: i64, user_id: Uuid) -> ServiceResult<bool> {
        self.guard
            .visible_post(self.store.as_ref(), post_id, user_id)
            .await?;

        let mut tx = self.store.begin().await?;
        let (liked, delta) = match tx.find_like(post_id, user_id).await? {
            Some(like) => {
                if !tx.delete_like(like.id).await? {
                    // a concurrent toggle removed it first; its decrement stands
                    return Err(ServiceError::Conflict {
                        post_id,
                        detail: format!("like {} already removed", like.id),
                    });
                }
                (false, Delta::Decrement)
            }
            None => {
                tx.insert_like(post_id, user_id)
                    .await
                    .map_err(|err| match err {
                        // a concurrent toggle inserted first
                        StoreError::Duplicate(detail) => ServiceError::Conflict { post_id, detail },
                        other => other.into(),
                    })?;
                (true, Delta::Increment)
            }
        };

        let post = self
            .ledger
            .adjust(tx.as_mut(), post_id, Counter::Likes, delta)
            .await?;
        if post.hidden {
            return Err(ServiceError::post_not_found(post_id));
        }
        tx.commit().await?;

        info!(post_id, %user_id, liked, like_count = post.like_count, "like toggled");
        Ok(liked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FeedScope, NewPost};
    use crate::error::ForbiddenReason;
    use crate::repository::{MemoryIdentityProvider, MemoryWallStore, StoreFault};
    use crate::services::counters::CounterRetryPolicy;

    fn service(store: &MemoryWallStore, identity: &MemoryIdentityProvider) -> LikeService {
        LikeService::new(
            Arc::new(store.clone()),
            VisibilityGuard::new(Arc::new(identity.clone())),
            CounterLedger::new(CounterRetryPolicy::immediate(2)),
        )
    }

    async fn seed_post(store: &MemoryWallStore, scope: FeedScope, domain: Option<&str>) -> i64 {
        let mut tx = store.begin().await.unwrap();
        let post = tx
            .insert_post(&NewPost {
                author_id: Uuid::new_v4(),
                content: "Hello".to_string(),
                scope,
                school_domain: domain.map(str::to_string),
            })
            .await
            .unwrap();
        tx.commit().await.unwrap();
        post.id
    }

    #[tokio::test]
    async fn test_toggle_twice_restores_state() {
        let store = MemoryWallStore::new();
        let identity = MemoryIdentityProvider::new();
        let likes = service(&store, &identity);
        let post_id = seed_post(&store, FeedScope::National, None).await;
        let user = Uuid::new_v4();

        assert!(likes.toggle_like(post_id, user).await.unwrap());
        assert_eq!(store.find_post(post_id).await.unwrap().unwrap().like_count, 1);
        assert_eq!(store.like_rows(post_id).await, 1);

        assert!(!likes.toggle_like(post_id, user).await.unwrap());
        assert_eq!(store.find_post(post_id).await.unwrap().unwrap().like_count, 0);
        assert_eq!(store.like_rows(post_id).await, 0);
    }

    #[tokio::test]
    async fn test_toggle_conflict_discards_like_row() {
        let store = MemoryWallStore::new();
        let identity = MemoryIdentityProvider::new();
        let likes = service(&store, &identity);
        let post_id = seed_post(&store, FeedScope::National, None).await;
        store
            .inject_faults(post_id, [StoreFault::Timeout, StoreFault::Timeout])
            .await;

        let err = likes.toggle_like(post_id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict { .. }));
        assert_eq!(store.like_rows(post_id).await, 0);
        assert_eq!(store.find_post(post_id).await.unwrap().unwrap().like_count, 0);
    }

    #[tokio::test]
    async fn test_unlike_of_vanished_row_leaves_counter() {
        let store = MemoryWallStore::new();
        let identity = MemoryIdentityProvider::new();
        let likes = service(&store, &identity);
        let post_id = seed_post(&store, FeedScope::National, None).await;
        let user = Uuid::new_v4();
        assert!(likes.toggle_like(post_id, user).await.unwrap());
        store
            .inject_faults(post_id, [StoreFault::LikeAlreadyDeleted])
            .await;

        let err = likes.toggle_like(post_id, user).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict { .. }));
        let post = store.find_post(post_id).await.unwrap().unwrap();
        assert_eq!(post.like_count, 1);
        assert_eq!(store.like_rows(post_id).await, 1);
        assert_eq!(store.pending_faults(post_id).await, 0);
    }

    #[tokio::test]
    async fn test_campus_like_requires_domain() {
        let store = MemoryWallStore::new();
        let identity = MemoryIdentityProvider::new();
        let likes = service(&store, &identity);
        let post_id = seed_post(&store, FeedScope::Campus, Some("a.edu")).await;

        let err = likes.toggle_like(post_id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Forbidden(ForbiddenReason::Visibility { .. })
        ));

        let insider = Uuid::new_v4();
        identity.register_user(insider, "cy@a.edu").await;
        assert!(likes.toggle_like(post_id, insider).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_post_not_found() {
        let store = MemoryWallStore::new();
        let identity = MemoryIdentityProvider::new();
        let likes = service(&store, &identity);
        assert!(matches!(
            likes.toggle_like(11, Uuid::new_v4()).await,
            Err(ServiceError::NotFound { entity: "post", id: 11 })
        ));
    }
}

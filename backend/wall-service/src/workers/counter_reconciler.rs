//! Counter Reconciliation Background Job
//!
//! Walks every post in id order and compares `like_count` with the Like rows.
//! `comment_count` is never recounted: post hide / unhide flip comment flags
//! without touching it, so it cannot be derived from the comment rows.
//! Repairs go through the post's version token; a post that changes while it
//! is being checked is skipped until the next pass.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::domain::Counter;
use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use crate::repository::{CasOutcome, WallStore};

/// Configuration for the counter reconciler
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub batch_size: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            batch_size: 500,
        }
    }
}

/// Outcome of one full pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: u64,
    pub repaired: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostReconcile {
    InSync,
    Repaired,
    /// Gone, or changed by a concurrent writer
    Skipped,
}

pub struct CounterReconciler {
    store: Arc<dyn WallStore>,
    batch_size: i64,
}

impl CounterReconciler {
    pub fn new(store: Arc<dyn WallStore>, batch_size: i64) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn reconcile_post(&self, post_id: i64) -> ServiceResult<PostReconcile> {
        let mut tx = self.store.begin().await?;
        let Some(post) = tx.find_post(post_id).await? else {
            return Ok(PostReconcile::Skipped);
        };

        let likes = tx.count_likes(post_id).await?;
        let recorded = post.counter(Counter::Likes);
        if likes == recorded {
            return Ok(PostReconcile::InSync);
        }

        let mut repaired = post;
        repaired.like_count = likes;
        match tx.update_post(&repaired).await? {
            CasOutcome::Applied(_) => {
                tx.commit().await?;
                metrics::record_drift_repaired(Counter::Likes.as_str());
                tracing::warn!(
                    post_id,
                    like_count_was = recorded,
                    like_count = likes,
                    "Repaired like counter drift"
                );
                Ok(PostReconcile::Repaired)
            }
            CasOutcome::Stale | CasOutcome::Missing => {
                tracing::debug!(post_id, "Post changed during reconciliation, skipping");
                Ok(PostReconcile::Skipped)
            }
        }
    }

    /// One pass over every post, `batch_size` ids at a time
    pub async fn run_once(&self) -> ServiceResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut after_id = 0;

        loop {
            let ids = self.store.post_ids_after(after_id, self.batch_size).await?;
            let Some(&last) = ids.last() else {
                break;
            };
            for post_id in ids {
                report.scanned += 1;
                match self.reconcile_post(post_id).await {
                    Ok(PostReconcile::InSync) => {}
                    Ok(PostReconcile::Repaired) => report.repaired += 1,
                    Ok(PostReconcile::Skipped) => report.skipped += 1,
                    Err(ServiceError::Store(e)) if e.is_retryable() => {
                        tracing::warn!(post_id, error = %e, "Reconcile failed, will retry next pass");
                        report.skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
            after_id = last;
        }

        Ok(report)
    }
}

/// Start the counter reconciliation background job
pub async fn start_counter_reconciler(reconciler: Arc<CounterReconciler>, config: ReconcilerConfig) {
    if !config.enabled {
        tracing::info!("Counter reconciler disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        batch_size = config.batch_size,
        "Starting counter reconciler background job"
    );

    loop {
        sleep(config.interval).await;

        let started = Instant::now();
        match reconciler.run_once().await {
            Ok(report) => tracing::info!(
                scanned = report.scanned,
                repaired = report.repaired,
                skipped = report.skipped,
                duration_ms = started.elapsed().as_millis(),
                "Counter reconciliation pass completed"
            ),
            Err(e) => tracing::error!(
                error = %e,
                duration_ms = started.elapsed().as_millis(),
                "Counter reconciliation pass failed"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FeedScope, NewComment, NewPost};
    use crate::repository::MemoryWallStore;
    use uuid::Uuid;

    async fn post_with_rows(store: &MemoryWallStore, likes: usize, comments: usize) -> i64 {
        let mut tx = store.begin().await.unwrap();
        let post = tx
            .insert_post(&NewPost {
                author_id: Uuid::new_v4(),
                content: "Hello".to_string(),
                scope: FeedScope::National,
                school_domain: None,
            })
            .await
            .unwrap();
        for _ in 0..likes {
            tx.insert_like(post.id, Uuid::new_v4()).await.unwrap();
        }
        for _ in 0..comments {
            tx.insert_comment(&NewComment {
                post_id: post.id,
                author_id: Uuid::new_v4(),
                content: "c".to_string(),
            })
            .await
            .unwrap();
        }
        tx.commit().await.unwrap();
        post.id
    }

    #[test]
    fn test_default_config() {
        let config = ReconcilerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval, Duration::from_secs(300));
        assert_eq!(config.batch_size, 500);
    }

    #[tokio::test]
    async fn test_repairs_drift_across_batches() {
        let store = MemoryWallStore::new();
        let drifted = post_with_rows(&store, 2, 3).await;
        let _ = post_with_rows(&store, 0, 0).await;
        let also_drifted = post_with_rows(&store, 1, 0).await;

        let reconciler = CounterReconciler::new(Arc::new(store.clone()), 2);
        let report = reconciler.run_once().await.unwrap();
        assert_eq!(
            report,
            ReconcileReport {
                scanned: 3,
                repaired: 2,
                skipped: 0
            }
        );

        let post = store.find_post(drifted).await.unwrap().unwrap();
        assert_eq!((post.like_count, post.comment_count, post.version), (2, 0, 1));
        let post = store.find_post(also_drifted).await.unwrap().unwrap();
        assert_eq!(post.like_count, 1);

        // a second pass finds nothing to do
        let report = reconciler.run_once().await.unwrap();
        assert_eq!(report.repaired, 0);
    }

    #[tokio::test]
    async fn test_comment_count_left_alone() {
        let store = MemoryWallStore::new();
        let post_id = post_with_rows(&store, 1, 0).await;
        let mut post = store.find_post(post_id).await.unwrap().unwrap();
        post.hidden = true;
        post.comment_count = 3;
        store.force_post(post).await;

        let reconciler = CounterReconciler::new(Arc::new(store.clone()), 10);
        assert_eq!(
            reconciler.reconcile_post(post_id).await.unwrap(),
            PostReconcile::Repaired
        );
        let post = store.find_post(post_id).await.unwrap().unwrap();
        assert_eq!((post.like_count, post.comment_count), (1, 3));
    }

    #[tokio::test]
    async fn test_missing_post_skipped() {
        let store = MemoryWallStore::new();
        let reconciler = CounterReconciler::new(Arc::new(store), 10);
        assert_eq!(
            reconciler.reconcile_post(99).await.unwrap(),
            PostReconcile::Skipped
        );
    }
}

use rand::Rng;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::domain::{Counter, Delta, Post};
use crate::error::{ServiceError, ServiceResult};
use crate::metrics;
use crate::repository::{CasOutcome, WallTx};

/// Bounded retry policy for versioned post updates
#[derive(Debug, Clone)]
pub struct CounterRetryPolicy {
    /// Total CAS attempts, first try included
    pub max_attempts: u32,
    /// Pause before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for the doubling backoff
    pub max_backoff: Duration,
    /// Spread pauses by ±30% so racing writers do not retry in lockstep
    pub jitter: bool,
}

impl Default for CounterRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
            jitter: true,
        }
    }
}

impl CounterRetryPolicy {
    /// No pauses between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            jitter: false,
        }
    }
}

fn jittered(base: Duration, jitter: bool) -> Duration {
    if !jitter || base.is_zero() {
        return base;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-0.3..0.3);
    Duration::from_millis((base.as_millis() as f64 * factor) as u64)
}

/// Counter Ledger
///
/// Keeps `like_count` / `comment_count` on a post in step with the detail
/// rows. Every write goes through the post's version token inside the
/// caller's transaction: on a stale token (or a retryable store failure) the
/// post is reloaded, the change reapplied and the update retried. When the
/// attempts run out the caller gets `Conflict` and must drop the transaction,
/// which also discards its detail-row mutation.
#[derive(Debug, Clone, Default)]
pub struct CounterLedger {
    policy: CounterRetryPolicy,
}

impl CounterLedger {
    pub fn new(policy: CounterRetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CounterRetryPolicy {
        &self.policy
    }

    /// Move one counter by exactly one step
    pub async fn adjust(
        &self,
        tx: &mut dyn WallTx,
        post_id: i64,
        counter: Counter,
        delta: Delta,
    ) -> ServiceResult<Post> {
        self.update_post(tx, post_id, counter.as_str(), move |post| {
            post.apply_delta(counter, delta)
        })
        .await
    }

    /// Flip the post's hidden flag under the same versioning rules
    pub async fn set_hidden(
        &self,
        tx: &mut dyn WallTx,
        post_id: i64,
        hidden: bool,
    ) -> ServiceResult<Post> {
        self.update_post(tx, post_id, "hidden", move |post| post.hidden = hidden)
            .await
    }

    async fn update_post<F>(
        &self,
        tx: &mut dyn WallTx,
        post_id: i64,
        label: &'static str,
        mutate: F,
    ) -> ServiceResult<Post>
    where
        F: Fn(&mut Post) + Send + Sync,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut backoff = self.policy.initial_backoff;

        for attempt in 1..=max_attempts {
            let mut post = tx
                .find_post(post_id)
                .await?
                .ok_or_else(|| ServiceError::post_not_found(post_id))?;
            mutate(&mut post);

            match tx.update_post(&post).await {
                Ok(CasOutcome::Applied(stored)) => {
                    debug!(post_id, field = label, attempt, version = stored.version, "post updated");
                    return Ok(stored);
                }
                Ok(CasOutcome::Missing) => return Err(ServiceError::post_not_found(post_id)),
                Ok(CasOutcome::Stale) => {
                    warn!(post_id, field = label, attempt, "stale post version, reloading");
                }
                Err(err) if err.is_retryable() => {
                    warn!(post_id, field = label, attempt, error = %err, "retryable store failure on post update");
                }
                Err(err) => return Err(err.into()),
            }

            metrics::record_cas_retry(label);
            if attempt < max_attempts {
                let pause = jittered(backoff, self.policy.jitter);
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
                backoff = (backoff * 2).min(self.policy.max_backoff);
            }
        }

        metrics::record_conflict(label);
        error!(post_id, field = label, attempts = max_attempts, "post update retries exhausted");
        Err(ServiceError::Conflict {
            post_id,
            detail: format!("{} update lost {} version races", label, max_attempts),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FeedScope, NewPost};
    use crate::repository::{MemoryWallStore, StoreFault, WallStore};
    use uuid::Uuid;

    async fn seeded_store() -> (MemoryWallStore, i64) {
        let store = MemoryWallStore::new();
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
        tx.commit().await.unwrap();
        (store, post.id)
    }

    #[tokio::test]
    async fn test_adjust_bumps_counter_and_version() {
        let (store, post_id) = seeded_store().await;
        let ledger = CounterLedger::new(CounterRetryPolicy::immediate(3));

        let mut tx = store.begin().await.unwrap();
        let post = ledger
            .adjust(tx.as_mut(), post_id, Counter::Likes, Delta::Increment)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(post.like_count, 1);
        assert_eq!(post.version, 1);
    }

    #[tokio::test]
    async fn test_adjust_retries_stale_versions() {
        let (store, post_id) = seeded_store().await;
        store
            .inject_faults(post_id, [StoreFault::StaleVersion, StoreFault::Timeout])
            .await;
        let ledger = CounterLedger::new(CounterRetryPolicy::immediate(3));

        let mut tx = store.begin().await.unwrap();
        let post = ledger
            .adjust(tx.as_mut(), post_id, Counter::Comments, Delta::Increment)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        // exactly one increment despite two failed attempts
        assert_eq!(post.comment_count, 1);
        assert_eq!(post.version, 2);
    }

    #[tokio::test]
    async fn test_adjust_gives_up_with_conflict() {
        let (store, post_id) = seeded_store().await;
        store
            .inject_faults(post_id, std::iter::repeat(StoreFault::StaleVersion).take(3))
            .await;
        let ledger = CounterLedger::new(CounterRetryPolicy::immediate(3));

        let mut tx = store.begin().await.unwrap();
        let err = ledger
            .adjust(tx.as_mut(), post_id, Counter::Likes, Delta::Increment)
            .await
            .unwrap_err();
        drop(tx);

        assert!(matches!(err, ServiceError::Conflict { post_id: id, .. } if id == post_id));
        let post = store.find_post(post_id).await.unwrap().unwrap();
        assert_eq!(post.like_count, 0);
    }

    #[tokio::test]
    async fn test_decrement_never_goes_negative() {
        let (store, post_id) = seeded_store().await;
        let ledger = CounterLedger::default();

        let mut tx = store.begin().await.unwrap();
        let post = ledger
            .adjust(tx.as_mut(), post_id, Counter::Likes, Delta::Decrement)
            .await
            .unwrap();
        assert_eq!(post.like_count, 0);
    }

    #[tokio::test]
    async fn test_missing_post_is_not_found() {
        let store = MemoryWallStore::new();
        let ledger = CounterLedger::default();
        let mut tx = store.begin().await.unwrap();
        let err = ledger
            .adjust(tx.as_mut(), 42, Counter::Likes, Delta::Increment)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { entity: "post", id: 42 }));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let base = Duration::from_millis(100);
        for _ in 0..50 {
            let pause = jittered(base, true);
            assert!(pause >= Duration::from_millis(70) && pause <= Duration::from_millis(130));
        }
        assert_eq!(jittered(base, false), base);
    }
}

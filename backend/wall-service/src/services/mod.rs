/// Business logic layer for wall-service
///
/// - Counter ledger: versioned counter updates with bounded retry
/// - Visibility guard: feed-scope checks and listing filters
/// - Post / comment / like services: the operations a request layer calls
/// - Verification service: persisted, expiring email codes
pub mod comments;
pub mod counters;
pub mod likes;
pub mod posts;
pub mod verification;
pub mod visibility;

use std::sync::Arc;

pub use comments::CommentService;
pub use counters::{CounterLedger, CounterRetryPolicy};
pub use likes::LikeService;
pub use posts::PostService;
pub use verification::VerificationService;
pub use visibility::VisibilityGuard;

use crate::repository::{IdentityProvider, WallStore};

/// The wall's operations wired over one store and one identity provider
pub struct WallServices {
    pub posts: PostService,
    pub comments: CommentService,
    pub likes: LikeService,
}

impl WallServices {
    pub fn new(
        store: Arc<dyn WallStore>,
        identity: Arc<dyn IdentityProvider>,
        policy: CounterRetryPolicy,
    ) -> Self {
        let guard = VisibilityGuard::new(identity);
        let ledger = CounterLedger::new(policy);
        Self {
            posts: PostService::new(store.clone(), guard.clone(), ledger.clone()),
            comments: CommentService::new(store.clone(), guard.clone(), ledger.clone()),
            likes: LikeService::new(store, guard, ledger),
        }
    }
}

use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::domain::{check_access, Access, FeedScope, ListingFilter, Post};
use crate::error::{ForbiddenReason, ServiceError, ServiceResult};
use crate::repository::{IdentityProvider, WallStore};

/// Visibility Guard
///
/// Resolves the requester's school domain through the identity collaborator
/// and applies the scope rules from `domain::visibility`.
#[derive(Clone)]
pub struct VisibilityGuard {
    identity: Arc<dyn IdentityProvider>,
}

impl VisibilityGuard {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }

    pub async fn requester_domain(&self, user_id: Uuid) -> ServiceResult<Option<String>> {
        Ok(self.identity.school_domain(user_id).await?)
    }

    /// Per-entity check: explicit `Forbidden` on denial
    pub async fn check(&self, post: &Post, user_id: Uuid) -> ServiceResult<()> {
        if post.scope == FeedScope::National {
            return Ok(());
        }
        let domain = self.requester_domain(user_id).await?;
        match check_access(post, domain.as_deref()) {
            Access::Allowed => Ok(()),
            Access::Denied(reason) => {
                warn!(post_id = post.id, %user_id, %reason, "post access denied");
                Err(ServiceError::Forbidden(ForbiddenReason::Visibility {
                    post_id: post.id,
                    user_id,
                    reason,
                }))
            }
        }
    }

    /// Collection-level filter for a listing
    pub async fn listing_filter(
        &self,
        scope: FeedScope,
        user_id: Uuid,
    ) -> ServiceResult<ListingFilter> {
        let domain = match scope {
            FeedScope::National => None,
            FeedScope::Campus => self.requester_domain(user_id).await?,
        };
        Ok(ListingFilter::for_requester(scope, domain.as_deref()))
    }

    /// Load a post the requester may act on. Missing and hidden posts are
    /// both `NotFound`; scope denials are `Forbidden`.
    pub async fn visible_post(
        &self,
        store: &dyn WallStore,
        post_id: i64,
        user_id: Uuid,
    ) -> ServiceResult<Post> {
        let post = store
            .find_post(post_id)
            .await?
            .filter(|post| !post.hidden)
            .ok_or_else(|| ServiceError::post_not_found(post_id))?;
        self.check(&post, user_id).await?;
        Ok(post)
    }
}

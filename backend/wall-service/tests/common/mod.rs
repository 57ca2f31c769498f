//! Shared fixtures for wall-service integration tests

#![allow(dead_code)]

use std::sync::Arc;
use uuid::Uuid;
use wall_service::repository::{MemoryIdentityProvider, MemoryWallStore};
use wall_service::services::CounterRetryPolicy;
use wall_service::WallServices;

pub struct TestWall {
    pub store: MemoryWallStore,
    pub identity: MemoryIdentityProvider,
    pub services: Arc<WallServices>,
}

impl TestWall {
    pub fn new() -> Self {
        Self::with_policy(CounterRetryPolicy::immediate(5))
    }

    pub fn with_policy(policy: CounterRetryPolicy) -> Self {
        let store = MemoryWallStore::new();
        let identity = MemoryIdentityProvider::new();
        let services = Arc::new(WallServices::new(
            Arc::new(store.clone()),
            Arc::new(identity.clone()),
            policy,
        ));
        Self {
            store,
            identity,
            services,
        }
    }

    /// Register a user with an institutional email and return their id
    pub async fn user(&self, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.identity.register_user(id, email).await;
        id
    }

    /// A user the identity provider knows nothing about
    pub fn anonymous(&self) -> Uuid {
        Uuid::new_v4()
    }
}

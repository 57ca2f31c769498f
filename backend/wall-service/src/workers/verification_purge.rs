//! Expired Verification Code Purge Job
//!
//! Expired codes can no longer be consumed; this job only keeps the table small.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::metrics;
use crate::services::VerificationService;

/// Run one purge and record how many rows went away
pub async fn purge_once(service: &VerificationService) -> u64 {
    match service.purge_expired().await {
        Ok(purged) => {
            metrics::record_codes_purged(purged);
            if purged > 0 {
                tracing::info!(purged, "Purged expired verification codes");
            }
            purged
        }
        Err(e) => {
            tracing::warn!(error = %e, "Verification code purge failed");
            0
        }
    }
}

/// Start the verification code purge background job
pub async fn start_verification_purger(service: Arc<VerificationService>, interval: Duration) {
    if interval.is_zero() {
        tracing::info!("Verification code purge disabled by configuration");
        return;
    }

    tracing::info!(
        interval_secs = interval.as_secs(),
        "Starting verification code purge background job"
    );

    loop {
        sleep(interval).await;
        purge_once(&service).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{CodePurpose, MemoryVerificationCodes};

    #[tokio::test]
    async fn test_purge_once_drops_only_expired() {
        let codes = MemoryVerificationCodes::new();
        let expired = VerificationService::new(Arc::new(codes.clone()), chrono::Duration::seconds(-5));
        let live = VerificationService::new(Arc::new(codes.clone()), chrono::Duration::minutes(5));

        expired.issue("old@uni.edu", CodePurpose::Register).await.unwrap();
        live.issue("new@uni.edu", CodePurpose::Register).await.unwrap();

        assert_eq!(purge_once(&live).await, 1);
        assert_eq!(codes.len().await, 1);
        assert_eq!(purge_once(&live).await, 0);
    }
}

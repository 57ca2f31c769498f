/// Prometheus metrics for the counter ledger and background jobs
use once_cell::sync::Lazy;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

static COUNTER_CAS_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "wall_counter_cas_retries_total",
        "Versioned post updates that had to be reloaded and retried",
        &["counter"]
    )
    .expect("Failed to register counter CAS retries metric")
});

static COUNTER_CONFLICTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "wall_counter_conflicts_total",
        "Operations aborted after exhausting versioned update retries",
        &["counter"]
    )
    .expect("Failed to register counter conflicts metric")
});

static COUNTER_DRIFT_REPAIRED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "wall_counter_drift_repaired_total",
        "Posts whose denormalized counter was repaired by the reconciler",
        &["counter"]
    )
    .expect("Failed to register counter drift metric")
});

static VERIFICATION_CODES_PURGED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "wall_verification_codes_purged_total",
        "Expired verification codes deleted by the purge job"
    )
    .expect("Failed to register verification purge metric")
});

pub fn record_cas_retry(counter: &str) {
    COUNTER_CAS_RETRIES.with_label_values(&[counter]).inc();
}

pub fn record_conflict(counter: &str) {
    COUNTER_CONFLICTS.with_label_values(&[counter]).inc();
}

pub fn record_drift_repaired(counter: &str) {
    COUNTER_DRIFT_REPAIRED.with_label_values(&[counter]).inc();
}

pub fn record_codes_purged(count: u64) {
    VERIFICATION_CODES_PURGED.inc_by(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_increment() {
        let before = COUNTER_CAS_RETRIES.with_label_values(&["test"]).get();
        record_cas_retry("test");
        record_cas_retry("test");
        assert_eq!(
            COUNTER_CAS_RETRIES.with_label_values(&["test"]).get(),
            before + 2
        );

        let purged = VERIFICATION_CODES_PURGED.get();
        record_codes_purged(3);
        assert_eq!(VERIFICATION_CODES_PURGED.get(), purged + 3);
    }
}

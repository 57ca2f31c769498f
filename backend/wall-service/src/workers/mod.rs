/// Background jobs for wall-service
///
/// - Counter reconciler: repairs drift between post counters and detail rows
/// - Verification purge: deletes expired verification codes
pub mod counter_reconciler;
pub mod verification_purge;

pub use counter_reconciler::{
    start_counter_reconciler, CounterReconciler, ReconcileReport, ReconcilerConfig,
};
pub use verification_purge::start_verification_purger;

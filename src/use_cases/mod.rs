pub mod reconcile_webhook;

pub use reconcile_webhook::{ReconcileError, ReconcileOutcome, ReconciliationEngine};

pub mod idempotency;

pub use idempotency::{GuardError, GuardPolicy, GuardStatus, IdempotencyGuard, IdempotencyStore};

pub mod memory;
pub mod postgres;
pub mod redis_store;

pub use memory::{InMemoryIdempotencyStore, InMemoryLedgerStore};
pub use postgres::PgLedgerStore;
pub use redis_store::RedisIdempotencyStore;

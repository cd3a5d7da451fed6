//! Typed store adapter over the Redis-backed key layout.

pub mod fake_store;
pub mod keys;
pub mod redis_store;
pub mod store;

pub use fake_store::FakeStore;
pub use redis_store::RedisStore;
pub use store::{Store, StoreError, StreamEntry};

// src/storage/mod.rs
pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use traits::{OutboxStore, PaymentStore, StoreError};

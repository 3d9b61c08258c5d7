pub mod engine;
pub mod memory;
pub mod rest;

pub use engine::ProfileStore;
pub use memory::{MemoryStore, StoreOp};
pub use rest::RestStore;

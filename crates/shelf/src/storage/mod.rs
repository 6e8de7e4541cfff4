pub mod backend;
pub mod memory;
pub mod sqlite;
pub mod types;


pub use backend::*;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use types::*;

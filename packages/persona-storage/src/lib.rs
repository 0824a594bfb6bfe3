pub mod db;
pub mod memory;
pub mod models;
pub mod objects;
pub mod queries;
pub mod schema;
pub mod store;

mod error;

pub use db::Db;
pub use error::Error;
pub use memory::MemoryStore;
pub use objects::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use store::{BoxFuture, ImportStore};

pub type Result<T, E = Error> = std::result::Result<T, E>;

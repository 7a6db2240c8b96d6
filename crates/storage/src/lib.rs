#![forbid(unsafe_code)]

pub mod ids;
pub mod local;
pub mod memory;
mod records;
pub mod remote;
pub mod repository;
pub mod sqlite;
pub mod table;

pub use memory::InMemoryStore;
pub use repository::{Storage, StorageError};
pub use table::{ChangeEvent, ChangeReceiver, ChangeRequest, Filter, ResourceStore, Row};

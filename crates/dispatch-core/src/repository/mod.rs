//! Persistence interface: the core's only window onto durable storage.

pub mod sqlite;
pub mod traits;

pub use sqlite::SqliteRepository;
pub use traits::{ConfigRepositoryTrait, JobRepositoryTrait, WorkerRepositoryTrait};

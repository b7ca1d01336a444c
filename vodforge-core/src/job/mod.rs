pub mod error;
pub mod models;
pub mod store;

pub use error::{JobStoreError, JobStoreResult};
pub use models::{Environment, Job, JobCounts, JobLog, JobStatus, LogLevel};
pub use store::{SqliteJobStore, SqliteJobStoreBuilder};

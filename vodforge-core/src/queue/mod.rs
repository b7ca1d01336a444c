pub mod error;
pub mod models;
pub mod store;
pub mod worker;

pub use error::{QueueError, QueueResult};
pub use models::{
    EnqueueOptions, EntryState, FailureDisposition, QueueCounts, QueueEntry, QueueEvent,
    TranscodeRequest,
};
pub use store::{SqliteQueueStore, SqliteQueueStoreBuilder};
pub use worker::{ActiveEntry, EntryHandler, HandlerError, QueueWorker, QueueWorkerConfig};

pub mod broadcaster;
pub mod queue;
pub mod store;
pub mod worker;

pub use broadcaster::{ProgressBroadcaster, ProgressEvent};
pub use queue::JobQueue;
pub use store::JobStore;
pub use worker::{WorkerContext, WorkerPool, process_job};

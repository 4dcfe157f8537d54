//! Ingestion engine: cursor store, per-account pipeline, scheduler.

pub mod cursor;
pub mod pipeline;
pub mod scheduler;

pub use cursor::CursorStore;
pub use pipeline::{process_account, run_and_record, run_cycle, CycleOutcome};
pub use scheduler::Scheduler;

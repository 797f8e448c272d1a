//! Background scheduling of pipeline jobs.

pub mod scheduler;

pub use scheduler::{ProcessOutcome, Scheduler, SchedulerConfig};

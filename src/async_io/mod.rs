//! Async batch utilities
//! Provides concurrent execution of independent fetch or cache tasks

pub mod parallel_ops;

pub use parallel_ops::{BatchOutcome, run_batch};

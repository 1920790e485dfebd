//! Scheduling and dispatch engine for the document-parsing front-end.
//!
//! Owns the priority queue, the worker pool, the dispatcher loop, the
//! per-job executor and retry policy, the wait registry for synchronous
//! submission, and the persistence interface for history and configuration.
//! The HTTP surface, CLI bootstrap and outbound worker protocol are thin
//! adapters built on top of the types exported here.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod job;
pub mod pool;
pub mod queue;
pub mod repository;
pub mod running;
pub mod wait_registry;
pub mod worker;

pub use client::WorkerClient;
pub use config::{ProcessConfig, SchedulerConfig, SchedulerConfigUpdate};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use job::{Job, JobId, JobStatus, Priority};
pub use pool::WorkerPool;
pub use queue::PriorityQueue;
pub use running::RunningSet;
pub use wait_registry::WaitRegistry;
pub use worker::{Worker, WorkerId, WorkerStatus};

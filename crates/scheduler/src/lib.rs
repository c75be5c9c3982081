//! Job Scheduler (§4.H).
//!
//! Named queues with priorities, dependency edges, metadata cascade, result
//! TTL, and a per-function retry budget. The Python original drove all of
//! this through RQ (`rq` + `redis`); RQ itself is Python tooling with no
//! idiomatic Rust equivalent, so this crate is the native re-architecture
//! §9 asks for — the same Redis primitives (hashes for job records,
//! lists for ready queues, sets for dependency edges), a Rust-shaped API.

pub mod ports;

mod handle;
mod memory;
mod redis_impl;

pub use handle::SchedulerJobHandle;
pub use memory::InMemoryJobScheduler;
pub use ports::{EnqueueRequest, JobHandle, JobScheduler, SchedulerError};
pub use redis_impl::RedisJobScheduler;

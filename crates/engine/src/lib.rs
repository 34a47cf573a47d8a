#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

//! Task scheduling engine: event bus, concurrency gate, per-task state
//! machine, the scheduler pair driving persisted task records, and the
//! WebSub/RSS subscriber core.

pub mod bus;
pub mod gate;
pub mod repo;
pub mod scheduler;
pub mod subscriber;
pub mod worker;

mod machine;

#[cfg(test)]
pub(crate) mod test_util;

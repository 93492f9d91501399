//! Device-resident queue scheduler and command-buffer issue engine for a
//! GPU-offload agent modeled on the HSA AQL packet protocol. See
//! `gpuq_abi` for the wire layouts this crate schedules and issues.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod aql_queue;
pub mod atomics;
pub mod command_buffer;
pub mod config;
pub mod error;
pub mod host_post;
pub mod issue;
pub mod scheduler;
pub mod signal;
pub mod signal_pool;
pub mod trace;
pub mod wake;

pub use aql_queue::AqlQueue;
pub use command_buffer::{BlockBuilder, CommandBlock, CommandBuffer, CommandBufferBuilder, QueryIds, QueryMap};
pub use config::Limits;
pub use error::CoreError;
pub use host_post::HostPostChannel;
pub use issue::{ExecutionState, IssueOutcome, TraceMode};
pub use scheduler::{QueueEntry, QueueEntryKind, Scheduler, SchedulerHandle, WaitTuple};
pub use signal::{Signal, SignalId, SignalKind, WaitCondition, NULL_SIGNAL_ID};
pub use signal_pool::SignalPool;
pub use trace::{QueryRing, TraceRingBuffer};
pub use wake::{WakePool, WakeSet};

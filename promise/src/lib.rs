//! # RedLilium Promise
//!
//! Single-shot promises, combinators and cooperative cancellation for code
//! that runs inside a frame loop.
//!
//! ## Core Types
//!
//! - [`PromiseRuntime`] - Owns promise state, the foreground queue and unhandled-rejection reporting
//! - [`Promise`] - Read side of a single-shot value, with continuations and progress
//! - [`Deferred`] - Write side; the first resolve, reject or cancel wins
//! - [`Outcome`] / [`Reason`] - Settled result and the payload of a rejection or cancellation
//!
//! ## Combinators
//!
//! - [`PromiseRuntime::race`] - First input to settle, whatever the outcome
//! - [`PromiseRuntime::first`] - First input to resolve
//! - [`PromiseRuntime::all`] / [`PromiseRuntime::merge2`] - Every input, in input order
//! - [`PromiseRuntime::sequence`] - Run promise factories one after another
//!
//! ## Cancellation
//!
//! - [`CancelationSource`] - Requests cancellation
//! - [`CancelationToken`] - Observes it and registers callbacks
//! - [`CancelationRegistration`] - Disposes a callback on drop
//!
//! ## Frame Scheduling
//!
//! - [`FrameScheduler`] - Evaluates [`WaitInstruction`]s from the host's update, fixed update and end-of-frame ticks
//! - [`SchedulerHandle`] - Queues instructions from other threads and from continuations
//! - [`ForegroundContext`] - Work posted from any thread, run on the scheduler thread

mod arena;
mod cancel;
mod combinators;
mod confined;
mod config;
mod deferred;
mod error;
mod foreground;
mod outcome;
mod pass_through;
pub mod pool;
mod progress;
mod promise;
mod runtime;
pub mod scheduler;

pub use cancel::{CancelationRegistration, CancelationSource, CancelationToken};
pub use config::{RuntimeConfig, SchedulerConfig};
pub use deferred::Deferred;
pub use error::PromiseError;
pub use foreground::{ForegroundContext, ForegroundWork};
pub use outcome::{Outcome, PromiseState, Reason};
pub use pool::{ObjectPool, PoolStats};
pub use promise::Promise;
pub use runtime::PromiseRuntime;
pub use scheduler::{
    FramePhase, FrameScheduler, SchedulerHandle, TickReport, WaitInstruction, WaitOneTick,
    WaitTicks, WaitUntil,
};

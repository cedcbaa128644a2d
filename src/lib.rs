//! Task-execution core of a container-backed job executor.
//!
//! A submitted [`tasks::types::Task`] is driven through a fixed lifecycle
//! (register, claim, create, limit, start, run, complete) by the
//! [`handler::types::TaskHandler`], which assembles a
//! [`sequence::types::Sequence`] of steps and races it against an external
//! cancellation signal. The [`exchanger::types::Exchanger`] translates the
//! typed executor container to and from the backend's property map.

pub mod backend;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod exchanger;
pub mod handler;
pub mod log_streamer;
pub mod sequence;
pub mod steps;
pub mod tasks;
pub mod worker;

pub use error::{ExecutorError, Result};

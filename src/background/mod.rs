//! Background conversion pipeline
//!
//! Structure:
//! - `queue`: Unbounded FIFO between the HTTP handlers and the worker
//! - `registry`: Per-job status records keyed by job id
//! - `processors`: Scratch directories, executable discovery/invocation, artifact mapping
//! - `flows`: The per-job conversion workflow
//! - `worker`: The single consumer loop

pub mod flows;
pub mod processors;
pub mod queue;
pub mod registry;
pub mod worker;

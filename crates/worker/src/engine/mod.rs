//! Job execution engine.
//!
//! The dispatcher admits queued jobs under the concurrency cap; the
//! supervisor runs each admitted job and records its terminal state.

pub mod dispatcher;
pub mod supervisor;

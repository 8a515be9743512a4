//! Domain logic for the DitchNet raster processing service.
//!
//! Everything here is free of database and HTTP concerns: the job entity and
//! its state machine, per-job path derivation, status reporting, and the
//! [`store::JobStore`] / [`runner::JobRunner`] contracts that the scheduler
//! is written against.

pub mod error;
pub mod job;
pub mod paths;
pub mod runner;
pub mod state;
pub mod status;
pub mod store;
pub mod types;
pub mod upload;

//! Background tasks and scheduled jobs.
//!
//! Each submodule provides a long-running async loop intended to be spawned
//! via `tokio::spawn`. All loops accept a [`CancellationToken`] for graceful
//! shutdown.
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod reclaimer;

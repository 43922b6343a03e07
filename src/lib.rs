//! Core library for the bench_daq application.
//!
//! This library polls SCPI bench instruments (multimeters and power
//! supplies) over a serial line at a fixed cadence. It contains the
//! instrument catalog, the framed SCPI client, the polling task and the
//! reading log. It is used by the `bench_daq` command-line binary.

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod instrument;
pub mod measurement;
pub mod poller;
pub mod scpi;
pub mod session;
pub mod tracing_init;

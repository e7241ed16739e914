//! `warden` keeps a declared fleet of long-running child processes alive and
//! observable on a Unix host: it launches them, applies per-service restart
//! policies, runs health and listener probes, captures stdout/stderr into
//! rotated log files and forwards lifecycle signals to whole process groups.
//!
//! The crate is organized leaves-first: [`kernel`] wraps the Unix primitives,
//! [`exec`] turns launch specs into observed children, [`capture`] owns the
//! output pipeline, [`health`] the probes, [`manager`] the per-service state
//! machine and [`supervisor`] the top-level controller.

pub mod capture;
pub mod cli;
pub mod config;
pub mod event;
pub mod exec;
pub mod health;
pub mod kernel;
pub mod logging;
pub mod manager;
pub mod supervisor;
pub mod util;

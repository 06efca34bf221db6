//! Code-import scheduling and execution.
//!
//! Tracks pending conversions of externally-hosted repositories (CVS,
//! Subversion, Git, Bazaar) into hosted branches, hands exactly one job at
//! a time to each requesting worker machine, and runs the
//! fetch/convert/publish pipeline for assigned jobs. See the `scheduler`,
//! `worker`, `vcs` and `store` modules for the moving parts.

pub mod config;
pub mod error;
pub mod scheduler;
pub mod store;
pub mod vcs;
pub mod worker;

//! Git history mining: change metrics, commit stability and line ownership.
//!
//! The [`orchestrator::Miner`] drives a concurrent, cache-backed pipeline
//! over a [`gateway::Gateway`]. Each part is also usable on its own:
//! [`metrics`] for per-commit counters, [`stability`] for survival of changed
//! lines, [`blame`] and [`rollup`] for ownership of files and directories.

pub mod blame;
pub mod cache;
pub mod developers;
pub mod gateway;
pub mod git;
pub mod metrics;
pub mod orchestrator;
pub mod rollup;
pub mod sketch;
pub mod stability;

#[cfg(test)]
pub(crate) mod testing;

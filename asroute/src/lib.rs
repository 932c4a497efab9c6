//! Runs path-vector routers from the command line and hosts canned
//! simulations of small topologies.
//!
//! The routers themselves live in [`asroute_core`]; this crate adds the
//! outer surfaces: argument parsing, logging setup, launching several UDP
//! routers in one process, and injecting packets into them.

pub mod cli;
mod logging;
pub mod simulations;
pub mod topology;

//! qdb command-line interface.
//!
//! - `run`: execute a YAML workload against simulator backends
//! - `plan`: show the plan and fingerprint chosen for each job
//! - `config`: print the default pipeline configuration

pub mod commands;
pub mod output;
pub mod workload;

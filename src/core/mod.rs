//! Core types: errors, configuration, section topology, path helpers.

pub mod config;
pub mod errors;
pub mod paths;
pub mod topology;

//! CLI command implementations

pub mod cluster;
pub mod cordon;
pub mod nodes;
pub mod pods;

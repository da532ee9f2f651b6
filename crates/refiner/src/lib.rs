//! Node refiner service: process configuration and the HTTP surface

pub mod api;
pub mod config;

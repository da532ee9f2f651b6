//! Utilization scoring
//!
//! CPU pressure is treated as the dominant exhaustion signal, so it carries
//! most of the weight in the combined score.

use crate::models::{Resources, Utilization};

pub const CPU_WEIGHT: f64 = 0.8;
pub const RAM_WEIGHT: f64 = 0.2;

impl Utilization {
    /// Compute utilization of `allocatable` by `requested`
    ///
    /// Returns the zero value when either allocatable dimension is zero.
    pub fn compute(requested: &Resources, allocatable: &Resources) -> Self {
        if allocatable.has_zero_dimension() {
            return Utilization::default();
        }

        let cpu_percent = requested.cpu_millis as f64 / allocatable.cpu_millis as f64 * 100.0;
        let ram_percent = requested.memory_bytes as f64 / allocatable.memory_bytes as f64 * 100.0;

        Utilization {
            cpu_percent,
            ram_percent,
            score: cpu_percent * CPU_WEIGHT + ram_percent * RAM_WEIGHT,
        }
    }
}

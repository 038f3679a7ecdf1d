use serde::{Deserialize, Serialize};

/// Modeling options that change how coordinates are interpreted. Changing
/// them invalidates every realized stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelOptions {
    /// Orientation-carrying mobilizers use three body-fixed x-y-z Euler
    /// angles instead of a four-component quaternion.
    pub use_euler_angles: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelSettings {
    /// Relative singular-value cutoff used when the mobility-space mass matrix
    /// cannot be Cholesky factored.
    pub singular_tolerance: f64,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            singular_tolerance: 1e-12,
        }
    }
}

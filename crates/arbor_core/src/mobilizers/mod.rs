//! Reference mobilizers.
//!
//! Each joint below fills in the hooks of [`Mobilizer`](crate::mobilizer::Mobilizer)
//! and nothing else; the node kernel supplies every recursion step.

mod ball;
mod cylinder;
mod euler;
mod free;
mod pin;
mod slider;

pub use ball::Ball;
pub use cylinder::Cylinder;
pub use euler::{Bushing, EulerJoint, Gimbal};
pub use free::Free;
pub use pin::Pin;
pub use slider::Slider;

use nalgebra::{UnitQuaternion, Vector3};

/// Angle of the rotation about z closest to `r`.
fn angle_about_z(r: &UnitQuaternion<f64>) -> f64 {
    let x = r * Vector3::x();
    x.y.atan2(x.x)
}

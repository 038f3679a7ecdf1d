use nalgebra::{SVector, Translation3, UnitQuaternion, Vector3};

use crate::coordinates::{IdentityCoordinates, JointState};
use crate::mobilizer::Mobilizer;
use crate::options::ModelOptions;
use crate::spatial::{HMatrix, Transform};

/// One translational mobility along the shared x axis of F and M.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slider {
    coords: IdentityCoordinates<1>,
}

impl Default for Slider {
    fn default() -> Self {
        Self::new()
    }
}

impl Slider {
    pub fn new() -> Self {
        Self {
            coords: IdentityCoordinates::lengths(),
        }
    }
}

impl Mobilizer<1> for Slider {
    type Coords = IdentityCoordinates<1>;

    fn coordinates(&self) -> &Self::Coords {
        &self.coords
    }

    fn name(&self) -> &'static str {
        "slider"
    }

    fn cross_joint_transform(&self, js: &JointState<'_>) -> Transform {
        Transform::from_parts(
            Translation3::new(js.q[0], 0.0, 0.0),
            UnitQuaternion::identity(),
        )
    }

    fn velocity_jacobian(&self, _js: &JointState<'_>, _x_f0m0: &Transform) -> HMatrix<1> {
        HMatrix::<1>::new(0.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    fn velocity_jacobian_dot(
        &self,
        _js: &JointState<'_>,
        _x_f0m0: &Transform,
        _u: &SVector<f64, 1>,
    ) -> HMatrix<1> {
        HMatrix::<1>::zeros()
    }

    fn fit_q_to_rotation(
        &self,
        _options: &ModelOptions,
        _r_f0m0: &UnitQuaternion<f64>,
        _q: &mut [f64],
    ) {
    }

    fn fit_q_to_translation(&self, _options: &ModelOptions, p_f0m0: &Vector3<f64>, q: &mut [f64]) {
        q[0] = p_f0m0.x;
    }

    fn fit_u_to_angular_velocity(
        &self,
        _js: &JointState<'_>,
        _w_f0m0: &Vector3<f64>,
        _u: &mut SVector<f64, 1>,
    ) {
    }

    fn fit_u_to_linear_velocity(
        &self,
        _js: &JointState<'_>,
        v_f0m0: &Vector3<f64>,
        u: &mut SVector<f64, 1>,
    ) {
        u[0] = v_f0m0.x;
    }
}

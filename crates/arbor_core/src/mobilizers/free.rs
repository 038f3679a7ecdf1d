use nalgebra::{SVector, Translation3, UnitQuaternion, Vector3};

use crate::coordinates::{JointState, OrientationCoordinates};
use crate::mobilizer::Mobilizer;
use crate::options::ModelOptions;
use crate::spatial::{HMatrix, SpatialMat, Transform};

/// Unrestricted motion. Speeds are the angular velocity of M in F followed by
/// the velocity of the M origin, both expressed in F, so `H` is the identity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Free {
    coords: OrientationCoordinates<6>,
}

impl Default for Free {
    fn default() -> Self {
        Self::new()
    }
}

impl Free {
    pub fn new() -> Self {
        Self {
            coords: OrientationCoordinates::new(),
        }
    }
}

impl Mobilizer<6> for Free {
    type Coords = OrientationCoordinates<6>;

    fn coordinates(&self) -> &Self::Coords {
        &self.coords
    }

    fn name(&self) -> &'static str {
        "free"
    }

    fn cross_joint_transform(&self, js: &JointState<'_>) -> Transform {
        let t = self.coords.translation_start(js.options);
        Transform::from_parts(
            Translation3::new(js.q[t], js.q[t + 1], js.q[t + 2]),
            self.coords.rotation(js),
        )
    }

    fn velocity_jacobian(&self, _js: &JointState<'_>, _x_f0m0: &Transform) -> HMatrix<6> {
        SpatialMat::identity()
    }

    fn velocity_jacobian_dot(
        &self,
        _js: &JointState<'_>,
        _x_f0m0: &Transform,
        _u: &SVector<f64, 6>,
    ) -> HMatrix<6> {
        SpatialMat::zeros()
    }

    fn fit_q_to_rotation(
        &self,
        options: &ModelOptions,
        r_f0m0: &UnitQuaternion<f64>,
        q: &mut [f64],
    ) {
        self.coords.set_rotation(options, r_f0m0, q);
    }

    fn fit_q_to_translation(&self, options: &ModelOptions, p_f0m0: &Vector3<f64>, q: &mut [f64]) {
        let t = self.coords.translation_start(options);
        q[t..t + 3].copy_from_slice(p_f0m0.as_slice());
    }

    fn fit_u_to_angular_velocity(
        &self,
        _js: &JointState<'_>,
        w_f0m0: &Vector3<f64>,
        u: &mut SVector<f64, 6>,
    ) {
        u.fixed_rows_mut::<3>(0).copy_from(w_f0m0);
    }

    fn fit_u_to_linear_velocity(
        &self,
        _js: &JointState<'_>,
        v_f0m0: &Vector3<f64>,
        u: &mut SVector<f64, 6>,
    ) {
        u.fixed_rows_mut::<3>(3).copy_from(v_f0m0);
    }
}

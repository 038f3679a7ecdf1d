use nalgebra::{Matrix3, Rotation3, SVector, Translation3, UnitQuaternion, Vector3};

use super::angle_about_z;
use crate::coordinates::{IdentityCoordinates, JointState};
use crate::mobilizer::Mobilizer;
use crate::options::ModelOptions;
use crate::spatial::{HMatrix, Transform};

/// Rotation about and translation along the shared z axis: `q = [angle, z]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cylinder {
    coords: IdentityCoordinates<2>,
}

impl Default for Cylinder {
    fn default() -> Self {
        Self::new()
    }
}

impl Cylinder {
    pub fn new() -> Self {
        Self {
            coords: IdentityCoordinates::new([true, false]),
        }
    }
}

impl Mobilizer<2> for Cylinder {
    type Coords = IdentityCoordinates<2>;

    fn coordinates(&self) -> &Self::Coords {
        &self.coords
    }

    fn name(&self) -> &'static str {
        "cylinder"
    }

    fn cross_joint_transform(&self, js: &JointState<'_>) -> Transform {
        let (s, c) = (js.sin_q[0], js.cos_q[0]);
        let rz = Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0);
        let r = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rz));
        Transform::from_parts(Translation3::new(0.0, 0.0, js.q[1]), r)
    }

    fn velocity_jacobian(&self, _js: &JointState<'_>, _x_f0m0: &Transform) -> HMatrix<2> {
        let mut h = HMatrix::<2>::zeros();
        h[(2, 0)] = 1.0;
        h[(5, 1)] = 1.0;
        h
    }

    // The M origin stays on the axis, so the columns never change.
    fn velocity_jacobian_dot(
        &self,
        _js: &JointState<'_>,
        _x_f0m0: &Transform,
        _u: &SVector<f64, 2>,
    ) -> HMatrix<2> {
        HMatrix::<2>::zeros()
    }

    fn fit_q_to_rotation(
        &self,
        _options: &ModelOptions,
        r_f0m0: &UnitQuaternion<f64>,
        q: &mut [f64],
    ) {
        q[0] = angle_about_z(r_f0m0);
    }

    fn fit_q_to_translation(&self, _options: &ModelOptions, p_f0m0: &Vector3<f64>, q: &mut [f64]) {
        q[1] = p_f0m0.z;
    }

    fn fit_u_to_angular_velocity(
        &self,
        _js: &JointState<'_>,
        w_f0m0: &Vector3<f64>,
        u: &mut SVector<f64, 2>,
    ) {
        u[0] = w_f0m0.z;
    }

    fn fit_u_to_linear_velocity(
        &self,
        _js: &JointState<'_>,
        v_f0m0: &Vector3<f64>,
        u: &mut SVector<f64, 2>,
    ) {
        u[1] = v_f0m0.z;
    }
}

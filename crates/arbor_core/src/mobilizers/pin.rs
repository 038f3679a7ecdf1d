use nalgebra::{Matrix3, Rotation3, SVector, Translation3, UnitQuaternion, Vector3};

use super::angle_about_z;
use crate::coordinates::{IdentityCoordinates, JointState};
use crate::mobilizer::Mobilizer;
use crate::options::ModelOptions;
use crate::spatial::{HMatrix, Transform};

/// One rotational mobility about the shared z axis of F and M.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pin {
    coords: IdentityCoordinates<1>,
}

impl Default for Pin {
    fn default() -> Self {
        Self::new()
    }
}

impl Pin {
    pub fn new() -> Self {
        Self {
            coords: IdentityCoordinates::new([true]),
        }
    }
}

impl Mobilizer<1> for Pin {
    type Coords = IdentityCoordinates<1>;

    fn coordinates(&self) -> &Self::Coords {
        &self.coords
    }

    fn name(&self) -> &'static str {
        "pin"
    }

    fn cross_joint_transform(&self, js: &JointState<'_>) -> Transform {
        let (s, c) = (js.sin_q[0], js.cos_q[0]);
        let rz = Matrix3::new(c, -s, 0.0, s, c, 0.0, 0.0, 0.0, 1.0);
        let r = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rz));
        Transform::from_parts(Translation3::identity(), r)
    }

    fn velocity_jacobian(&self, _js: &JointState<'_>, _x_f0m0: &Transform) -> HMatrix<1> {
        HMatrix::<1>::new(0.0, 0.0, 1.0, 0.0, 0.0, 0.0)
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
        r_f0m0: &UnitQuaternion<f64>,
        q: &mut [f64],
    ) {
        q[0] = angle_about_z(r_f0m0);
    }

    fn fit_q_to_translation(
        &self,
        _options: &ModelOptions,
        _p_f0m0: &Vector3<f64>,
        _q: &mut [f64],
    ) {
    }

    fn fit_u_to_angular_velocity(
        &self,
        _js: &JointState<'_>,
        w_f0m0: &Vector3<f64>,
        u: &mut SVector<f64, 1>,
    ) {
        u[0] = w_f0m0.z;
    }

    fn fit_u_to_linear_velocity(
        &self,
        _js: &JointState<'_>,
        _v_f0m0: &Vector3<f64>,
        _u: &mut SVector<f64, 1>,
    ) {
    }
}

use nalgebra::{SVector, Translation3, UnitQuaternion, Vector3};

use crate::coordinates::{JointState, OrientationCoordinates};
use crate::mobilizer::Mobilizer;
use crate::options::ModelOptions;
use crate::spatial::{HMatrix, Transform};

/// Three rotational mobilities about coincident F and M origins. The speeds
/// are the angular velocity of M in F, expressed in F.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    coords: OrientationCoordinates<3>,
}

impl Default for Ball {
    fn default() -> Self {
        Self::new()
    }
}

impl Ball {
    pub fn new() -> Self {
        Self {
            coords: OrientationCoordinates::new(),
        }
    }
}

impl Mobilizer<3> for Ball {
    type Coords = OrientationCoordinates<3>;

    fn coordinates(&self) -> &Self::Coords {
        &self.coords
    }

    fn name(&self) -> &'static str {
        "ball"
    }

    fn cross_joint_transform(&self, js: &JointState<'_>) -> Transform {
        Transform::from_parts(Translation3::identity(), self.coords.rotation(js))
    }

    fn velocity_jacobian(&self, _js: &JointState<'_>, _x_f0m0: &Transform) -> HMatrix<3> {
        let mut h = HMatrix::<3>::zeros();
        h.fixed_view_mut::<3, 3>(0, 0).fill_with_identity();
        h
    }

    fn velocity_jacobian_dot(
        &self,
        _js: &JointState<'_>,
        _x_f0m0: &Transform,
        _u: &SVector<f64, 3>,
    ) -> HMatrix<3> {
        HMatrix::<3>::zeros()
    }

    fn fit_q_to_rotation(
        &self,
        options: &ModelOptions,
        r_f0m0: &UnitQuaternion<f64>,
        q: &mut [f64],
    ) {
        self.coords.set_rotation(options, r_f0m0, q);
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
        u: &mut SVector<f64, 3>,
    ) {
        u.copy_from(w_f0m0);
    }

    fn fit_u_to_linear_velocity(
        &self,
        _js: &JointState<'_>,
        _v_f0m0: &Vector3<f64>,
        _u: &mut SVector<f64, 3>,
    ) {
    }
}

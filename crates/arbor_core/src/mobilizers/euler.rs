use nalgebra::{SVector, Translation3, UnitQuaternion, Vector3};

use crate::coordinates::{
    euler_xyz_from_rotation, euler_xyz_rate_matrix, euler_xyz_rate_matrix_dot,
    euler_xyz_rate_matrix_inverse, euler_xyz_rotation, IdentityCoordinates, JointState,
};
use crate::mobilizer::Mobilizer;
use crate::options::ModelOptions;
use crate::spatial::{HMatrix, Transform};

/// Body-fixed x-y-z Euler rotation followed by `N - 3` translations along
/// the x, y and z axes of F. The speeds are the coordinate rates, so unlike
/// [`Ball`](super::Ball) the angular columns of `H` depend on `q`.
///
/// Singular where the middle angle reaches ±90°.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EulerJoint<const N: usize> {
    coords: IdentityCoordinates<N>,
}

/// Three Euler-angle rotations.
pub type Gimbal = EulerJoint<3>;

/// Euler-angle rotation plus free translation.
pub type Bushing = EulerJoint<6>;

impl<const N: usize> Default for EulerJoint<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> EulerJoint<N> {
    pub fn new() -> Self {
        assert!(
            (3..=6).contains(&N),
            "euler joint needs 3 to 6 mobilities, got {N}"
        );
        let mut angles = [false; N];
        angles[..3].fill(true);
        Self {
            coords: IdentityCoordinates::new(angles),
        }
    }
}

impl<const N: usize> Mobilizer<N> for EulerJoint<N> {
    type Coords = IdentityCoordinates<N>;

    fn coordinates(&self) -> &Self::Coords {
        &self.coords
    }

    fn name(&self) -> &'static str {
        match N {
            3 => "gimbal",
            6 => "bushing",
            _ => "euler",
        }
    }

    fn cross_joint_transform(&self, js: &JointState<'_>) -> Transform {
        let (s, c) = js.euler_sin_cos(0);
        let mut p = Vector3::zeros();
        for i in 0..N - 3 {
            p[i] = js.q[3 + i];
        }
        Transform::from_parts(Translation3::from(p), euler_xyz_rotation(&s, &c))
    }

    fn velocity_jacobian(&self, js: &JointState<'_>, _x_f0m0: &Transform) -> HMatrix<N> {
        let (s, c) = js.euler_sin_cos(0);
        let mut h = HMatrix::<N>::zeros();
        h.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&euler_xyz_rate_matrix(&s, &c));
        for i in 0..N - 3 {
            h[(3 + i, 3 + i)] = 1.0;
        }
        h
    }

    fn velocity_jacobian_dot(
        &self,
        js: &JointState<'_>,
        _x_f0m0: &Transform,
        u: &SVector<f64, N>,
    ) -> HMatrix<N> {
        let (s, c) = js.euler_sin_cos(0);
        let qdot = Vector3::new(u[0], u[1], u[2]);
        let mut hdot = HMatrix::<N>::zeros();
        hdot.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&euler_xyz_rate_matrix_dot(&s, &c, &qdot));
        hdot
    }

    fn fit_q_to_rotation(
        &self,
        _options: &ModelOptions,
        r_f0m0: &UnitQuaternion<f64>,
        q: &mut [f64],
    ) {
        q[..3].copy_from_slice(euler_xyz_from_rotation(r_f0m0).as_slice());
    }

    fn fit_q_to_translation(&self, _options: &ModelOptions, p_f0m0: &Vector3<f64>, q: &mut [f64]) {
        for i in 0..N - 3 {
            q[3 + i] = p_f0m0[i];
        }
    }

    fn fit_u_to_angular_velocity(
        &self,
        js: &JointState<'_>,
        w_f0m0: &Vector3<f64>,
        u: &mut SVector<f64, N>,
    ) {
        let (s, c) = js.euler_sin_cos(0);
        let rates = euler_xyz_rate_matrix_inverse(&s, &c) * w_f0m0;
        u.fixed_rows_mut::<3>(0).copy_from(&rates);
    }

    fn fit_u_to_linear_velocity(
        &self,
        _js: &JointState<'_>,
        v_f0m0: &Vector3<f64>,
        u: &mut SVector<f64, N>,
    ) {
        for i in 0..N - 3 {
            u[3 + i] = v_f0m0[i];
        }
    }
}

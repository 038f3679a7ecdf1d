//! The contract a concrete joint type fulfils.
//!
//! A mobilizer connects an inboard frame F (fixed on the parent body) to an
//! outboard frame M (fixed on the child body). Its hooks are written in the
//! joint's own frame order F0/M0. For an ordinary joint F0 = F and M0 = M. A
//! joint mounted in reverse has F0 on the child and M0 on the parent; the node
//! then inverts the transform and runs the reversed adapters below.

use std::fmt;

use nalgebra::{SVector, UnitQuaternion, Vector3};

use crate::coordinates::{Coordinates, JointState};
use crate::options::ModelOptions;
use crate::spatial::{
    angular, linear, reverse_relative_velocity, spatial_vec, HMatrix, SpatialVec, Transform,
};

pub trait Mobilizer<const N: usize>: fmt::Debug {
    type Coords: Coordinates<N>;

    fn coordinates(&self) -> &Self::Coords;

    fn name(&self) -> &'static str;

    /// X_F0M0 from the current coordinates.
    fn cross_joint_transform(&self, js: &JointState<'_>) -> Transform;

    /// H_F0M0: maps `u` to the spatial velocity of M0 in F0, expressed in F0
    /// and taken about the M0 origin.
    fn velocity_jacobian(&self, js: &JointState<'_>, x_f0m0: &Transform) -> HMatrix<N>;

    /// Time derivative of [`velocity_jacobian`](Self::velocity_jacobian), taken in F0.
    fn velocity_jacobian_dot(
        &self,
        js: &JointState<'_>,
        x_f0m0: &Transform,
        u: &SVector<f64, N>,
    ) -> HMatrix<N>;

    fn fit_q_to_rotation(
        &self,
        options: &ModelOptions,
        r_f0m0: &UnitQuaternion<f64>,
        q: &mut [f64],
    );

    fn fit_q_to_translation(&self, options: &ModelOptions, p_f0m0: &Vector3<f64>, q: &mut [f64]);

    fn fit_u_to_angular_velocity(
        &self,
        js: &JointState<'_>,
        w_f0m0: &Vector3<f64>,
        u: &mut SVector<f64, N>,
    );

    fn fit_u_to_linear_velocity(
        &self,
        js: &JointState<'_>,
        v_f0m0: &Vector3<f64>,
        u: &mut SVector<f64, N>,
    );

    /// Rotation first, then translation. Joints that couple the two must
    /// override this.
    fn fit_q_to_transform(&self, options: &ModelOptions, x_f0m0: &Transform, q: &mut [f64]) {
        self.fit_q_to_rotation(options, &x_f0m0.rotation, q);
        self.fit_q_to_translation(options, &x_f0m0.translation.vector, q);
    }

    /// Angular velocity first, then linear velocity.
    fn fit_u_to_velocity(&self, js: &JointState<'_>, v_f0m0: &SpatialVec, u: &mut SVector<f64, N>) {
        self.fit_u_to_angular_velocity(js, &angular(v_f0m0), u);
        self.fit_u_to_linear_velocity(js, &linear(v_f0m0), u);
    }

    /// H_FM for a joint whose hooks describe M in F0 = M, i.e. yield H_MF.
    ///
    /// Column by column, with X_FM = (R, p):
    ///
    /// ```text
    /// Hw_FM = -R·Hw_MF
    /// Hv_FM = Hw_FM × p - R·Hv_MF
    /// ```
    fn reverse_velocity_jacobian(&self, js: &JointState<'_>, x_fm: &Transform) -> HMatrix<N> {
        let x_mf = x_fm.inverse();
        let h_mf = self.velocity_jacobian(js, &x_mf);
        let mut h_fm = HMatrix::<N>::zeros();
        for j in 0..N {
            let col = h_mf.fixed_view::<6, 1>(0, j).into_owned();
            h_fm.set_column(j, &reverse_relative_velocity(x_fm, &col));
        }
        h_fm
    }

    /// Time derivative in F of [`reverse_velocity_jacobian`](Self::reverse_velocity_jacobian):
    ///
    /// ```text
    /// Ḣw_FM = w_FM × Hw_FM - R·Ḣw_MF
    /// Ḣv_FM = Ḣw_FM × p + Hw_FM × v_FM - w_FM × (R·Hv_MF) - R·Ḣv_MF
    /// ```
    ///
    /// where `(w_FM, v_FM) = H_FM·u`.
    fn reverse_velocity_jacobian_dot(
        &self,
        js: &JointState<'_>,
        x_fm: &Transform,
        u: &SVector<f64, N>,
    ) -> HMatrix<N> {
        let x_mf = x_fm.inverse();
        let r = &x_fm.rotation;
        let p = x_fm.translation.vector;
        let h_mf = self.velocity_jacobian(js, &x_mf);
        let hdot_mf = self.velocity_jacobian_dot(js, &x_mf, u);
        let h_fm = self.reverse_velocity_jacobian(js, x_fm);
        let v = h_fm * u;
        let (w_fm, v_fm) = (angular(&v), linear(&v));

        let mut hdot_fm = HMatrix::<N>::zeros();
        for j in 0..N {
            let h_col = h_fm.fixed_view::<6, 1>(0, j).into_owned();
            let hw_fm = angular(&h_col);
            let hv_mf = r * linear(&h_mf.fixed_view::<6, 1>(0, j).into_owned());
            let hd_mf = hdot_mf.fixed_view::<6, 1>(0, j).into_owned();

            let hdw = w_fm.cross(&hw_fm) - r * angular(&hd_mf);
            let hdv = hdw.cross(&p) + hw_fm.cross(&v_fm) - w_fm.cross(&hv_mf) - r * linear(&hd_mf);
            hdot_fm.set_column(j, &spatial_vec(&hdw, &hdv));
        }
        hdot_fm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinates::JointScratch;
    use crate::mobilizers::{Bushing, Cylinder};
    use approx::assert_relative_eq;

    fn numeric_h_fm<M, const N: usize>(
        joint: &M,
        options: &ModelOptions,
        q: &[f64],
        reversed: bool,
    ) -> HMatrix<N>
    where
        M: Mobilizer<N>,
    {
        // Column j is the velocity of M in F produced by a unit rate of q[j].
        let h = 1e-6;
        let x_fm_at = |qq: &[f64]| {
            let scratch = JointScratch::compute::<_, N>(joint.coordinates(), options, qq);
            let x = joint.cross_joint_transform(&scratch.view(options, qq));
            if reversed {
                x.inverse()
            } else {
                x
            }
        };
        let x0 = x_fm_at(q);
        let mut out = HMatrix::<N>::zeros();
        for j in 0..N {
            let mut plus = q.to_vec();
            let mut minus = q.to_vec();
            plus[j] += h;
            minus[j] -= h;
            let (xp, xm) = (x_fm_at(&plus), x_fm_at(&minus));
            let dr = (xp.rotation.to_rotation_matrix().into_inner()
                - xm.rotation.to_rotation_matrix().into_inner())
                / (2.0 * h);
            let w_skew = dr * x0.rotation.to_rotation_matrix().into_inner().transpose();
            let w = Vector3::new(w_skew[(2, 1)], w_skew[(0, 2)], w_skew[(1, 0)]);
            let v = (xp.translation.vector - xm.translation.vector) / (2.0 * h);
            out.set_column(j, &spatial_vec(&w, &v));
        }
        out
    }

    #[test]
    fn reversed_jacobian_matches_finite_difference() {
        let joint = Bushing::new();
        let options = ModelOptions::default();
        let q = [0.3, -0.2, 0.7, 0.4, -0.5, 0.9];
        let scratch = JointScratch::compute::<_, 6>(joint.coordinates(), &options, &q);
        let js = scratch.view(&options, &q);
        let x_fm = joint.cross_joint_transform(&js).inverse();

        let analytic = joint.reverse_velocity_jacobian(&js, &x_fm);
        let numeric = numeric_h_fm(&joint, &options, &q, true);
        assert_relative_eq!(analytic, numeric, epsilon = 1e-7);
    }

    #[test]
    fn reversed_jacobian_dot_matches_finite_difference() {
        let joint = Bushing::new();
        let options = ModelOptions::default();
        let q = [0.3, -0.2, 0.7, 0.4, -0.5, 0.9];
        let u = SVector::<f64, 6>::new(0.5, -0.3, 0.8, 0.2, 0.1, -0.6);
        let h = 1e-6;

        let h_fm_at = |qq: &[f64]| {
            let scratch = JointScratch::compute::<_, 6>(joint.coordinates(), &options, qq);
            let js = scratch.view(&options, qq);
            let x_fm = joint.cross_joint_transform(&js).inverse();
            joint.reverse_velocity_jacobian(&js, &x_fm)
        };
        // Bushing coordinates have qdot == u.
        let plus: Vec<f64> = (0..6).map(|i| q[i] + h * u[i]).collect();
        let minus: Vec<f64> = (0..6).map(|i| q[i] - h * u[i]).collect();
        let numeric = (h_fm_at(&plus) - h_fm_at(&minus)) / (2.0 * h);

        let scratch = JointScratch::compute::<_, 6>(joint.coordinates(), &options, &q);
        let js = scratch.view(&options, &q);
        let x_fm = joint.cross_joint_transform(&js).inverse();
        let analytic = joint.reverse_velocity_jacobian_dot(&js, &x_fm, &u);
        assert_relative_eq!(analytic, numeric, epsilon = 1e-6);
    }

    #[test]
    fn forward_jacobian_matches_finite_difference() {
        let joint = Bushing::new();
        let options = ModelOptions::default();
        let q = [-0.4, 0.6, 0.1, 1.0, 2.0, -1.0];
        let scratch = JointScratch::compute::<_, 6>(joint.coordinates(), &options, &q);
        let js = scratch.view(&options, &q);
        let x_fm = joint.cross_joint_transform(&js);
        let numeric = numeric_h_fm(&joint, &options, &q, false);
        assert_relative_eq!(joint.velocity_jacobian(&js, &x_fm), numeric, epsilon = 1e-7);
    }

    #[test]
    fn default_transform_fit_recovers_coordinates() {
        let joint = Cylinder::new();
        let options = ModelOptions::default();
        let q = [0.8, -1.5];
        let scratch = JointScratch::compute::<_, 2>(joint.coordinates(), &options, &q);
        let x = joint.cross_joint_transform(&scratch.view(&options, &q));

        let mut fitted = [0.0; 2];
        joint.fit_q_to_transform(&options, &x, &mut fitted);
        assert_relative_eq!(fitted[0], q[0], epsilon = 1e-12);
        assert_relative_eq!(fitted[1], q[1], epsilon = 1e-12);
    }
}

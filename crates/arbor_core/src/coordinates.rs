//! Generalized-coordinate bookkeeping.
//!
//! A mobilizer declares how its coordinates `q` relate to its generalized
//! speeds `u` by picking a [`Coordinates`] implementation. The choice is the
//! capability flag: [`IdentityCoordinates`] is only available to joints whose
//! `qdot == u`, and only [`OrientationCoordinates`] ever puts a quaternion in
//! the leading coordinate slots. There is no runtime check that a quaternion
//! routine is being applied to a joint without one; the type makes it
//! unrepresentable.
//!
//! All slices handed to these routines are node-local (already narrowed to the
//! node's own q-slot).

use nalgebra::{Matrix3, Quaternion, Rotation3, SMatrix, SVector, UnitQuaternion, Vector3};
use tracing::warn;

use crate::options::ModelOptions;

/// Largest coordinate count any mobilizer may claim (free joint with quaternion).
pub const MAX_NQ: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QDotHandling {
    /// `qdot == u` identically, so `nq == nu`.
    SameAsU,
    /// `qdot = N(q)·u` for some non-identity N.
    Differs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuaternionUse {
    Never,
    /// A quaternion occupies the leading four slots unless Euler angles are
    /// selected in [`ModelOptions`].
    WhenNotEuler,
}

/// Read-only view of one node's coordinates together with the position-stage
/// trig and quaternion caches computed from them.
#[derive(Debug, Clone, Copy)]
pub struct JointState<'a> {
    pub options: &'a ModelOptions,
    pub q: &'a [f64],
    pub sin_q: &'a [f64],
    pub cos_q: &'a [f64],
    pub q_norm: &'a [f64],
}

impl<'a> JointState<'a> {
    /// Normalized quaternion stored at local offset `start`.
    pub fn quaternion(&self, start: usize) -> UnitQuaternion<f64> {
        let q = &self.q_norm[start..start + 4];
        UnitQuaternion::new_unchecked(Quaternion::new(q[0], q[1], q[2], q[3]))
    }

    /// Sines and cosines of the three Euler angles starting at `start`.
    pub fn euler_sin_cos(&self, start: usize) -> ([f64; 3], [f64; 3]) {
        let mut s = [0.0; 3];
        let mut c = [0.0; 3];
        s.copy_from_slice(&self.sin_q[start..start + 3]);
        c.copy_from_slice(&self.cos_q[start..start + 3]);
        (s, c)
    }
}

/// Stack copy of the trig/quaternion caches for callers that work outside the
/// Position stage (fitting, conversions).
#[derive(Debug, Clone, Copy)]
pub struct JointScratch {
    sin_q: [f64; MAX_NQ],
    cos_q: [f64; MAX_NQ],
    q_norm: [f64; MAX_NQ],
}

impl JointScratch {
    pub fn compute<C, const N: usize>(coords: &C, options: &ModelOptions, q: &[f64]) -> Self
    where
        C: Coordinates<N> + ?Sized,
    {
        let mut scratch = Self {
            sin_q: [0.0; MAX_NQ],
            cos_q: [0.0; MAX_NQ],
            q_norm: [0.0; MAX_NQ],
        };
        let nq = q.len();
        coords.calc_sin_cos_q_norm(
            options,
            q,
            &mut scratch.sin_q[..nq],
            &mut scratch.cos_q[..nq],
            &mut scratch.q_norm[..nq],
        );
        scratch
    }

    pub fn view<'a>(&'a self, options: &'a ModelOptions, q: &'a [f64]) -> JointState<'a> {
        let nq = q.len();
        JointState {
            options,
            q,
            sin_q: &self.sin_q[..nq],
            cos_q: &self.cos_q[..nq],
            q_norm: &self.q_norm[..nq],
        }
    }
}

/// Mapping between a node's coordinates and its `N` generalized speeds.
pub trait Coordinates<const N: usize> {
    const QDOT_HANDLING: QDotHandling;
    const QUATERNION_USE: QuaternionUse;

    /// Coordinate slots reserved for this node; may exceed `N`.
    fn max_nq(&self) -> usize;

    /// Coordinates actually in use under the current modeling options.
    fn nq_in_use(&self, options: &ModelOptions) -> usize;

    /// Mobilities in use. Always `N` until joints can be locked.
    fn nu_in_use(&self, _options: &ModelOptions) -> usize {
        N
    }

    /// Local offset of the active quaternion, if any.
    fn quaternion_start(&self, options: &ModelOptions) -> Option<usize>;

    fn calc_sin_cos_q_norm(
        &self,
        options: &ModelOptions,
        q: &[f64],
        sin_q: &mut [f64],
        cos_q: &mut [f64],
        q_norm: &mut [f64],
    );

    fn calc_qdot(&self, js: &JointState<'_>, u: &SVector<f64, N>, qdot: &mut [f64]);

    fn calc_qdotdot(
        &self,
        js: &JointState<'_>,
        u: &SVector<f64, N>,
        udot: &SVector<f64, N>,
        qdotdot: &mut [f64],
    );

    /// `out = N·in` (nq from nu), or `out = in·N` (nu from nq) when
    /// `matrix_on_right`.
    fn multiply_by_n(
        &self,
        js: &JointState<'_>,
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    );

    /// `out = N⁻¹·in` (nu from nq), or `out = in·N⁻¹` (nq from nu) when
    /// `matrix_on_right`.
    fn multiply_by_n_inv(
        &self,
        js: &JointState<'_>,
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    );

    /// Restore unit norm of an active quaternion and remove the norm-changing
    /// component of its error estimate. Returns whether `q` was touched.
    fn enforce_quaternion_constraints(
        &self,
        options: &ModelOptions,
        q: &mut [f64],
        q_err: &mut [f64],
    ) -> bool;

    /// Rewrite quaternion-form coordinates as Euler-form coordinates.
    fn convert_to_euler_angles(&self, q_in: &[f64], q_out: &mut [f64]);

    /// Rewrite Euler-form coordinates as quaternion-form coordinates.
    fn convert_to_quaternions(&self, q_in: &[f64], q_out: &mut [f64]);

    fn default_q(&self, options: &ModelOptions, q: &mut [f64]);

    /// Copy this node's in-use coordinates.
    fn copy_q(&self, options: &ModelOptions, q_in: &[f64], q: &mut [f64]) {
        let nq = self.nq_in_use(options);
        q[..nq].copy_from_slice(&q_in[..nq]);
    }
}

/// Coordinates for joints whose `qdot == u`. `angles` marks which
/// coordinates are angles and get their sine/cosine cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityCoordinates<const N: usize> {
    pub angles: [bool; N],
}

impl<const N: usize> IdentityCoordinates<N> {
    pub fn new(angles: [bool; N]) -> Self {
        Self { angles }
    }

    pub fn lengths() -> Self {
        Self { angles: [false; N] }
    }
}

impl<const N: usize> Coordinates<N> for IdentityCoordinates<N> {
    const QDOT_HANDLING: QDotHandling = QDotHandling::SameAsU;
    const QUATERNION_USE: QuaternionUse = QuaternionUse::Never;

    fn max_nq(&self) -> usize {
        N
    }

    fn nq_in_use(&self, _options: &ModelOptions) -> usize {
        N
    }

    fn quaternion_start(&self, _options: &ModelOptions) -> Option<usize> {
        None
    }

    fn calc_sin_cos_q_norm(
        &self,
        _options: &ModelOptions,
        q: &[f64],
        sin_q: &mut [f64],
        cos_q: &mut [f64],
        _q_norm: &mut [f64],
    ) {
        for (i, is_angle) in self.angles.iter().enumerate() {
            if *is_angle {
                let (s, c) = q[i].sin_cos();
                sin_q[i] = s;
                cos_q[i] = c;
            }
        }
    }

    fn calc_qdot(&self, _js: &JointState<'_>, u: &SVector<f64, N>, qdot: &mut [f64]) {
        qdot[..N].copy_from_slice(u.as_slice());
    }

    fn calc_qdotdot(
        &self,
        _js: &JointState<'_>,
        _u: &SVector<f64, N>,
        udot: &SVector<f64, N>,
        qdotdot: &mut [f64],
    ) {
        qdotdot[..N].copy_from_slice(udot.as_slice());
    }

    fn multiply_by_n(
        &self,
        _js: &JointState<'_>,
        _matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) {
        out[..N].copy_from_slice(&input[..N]);
    }

    fn multiply_by_n_inv(
        &self,
        _js: &JointState<'_>,
        _matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) {
        out[..N].copy_from_slice(&input[..N]);
    }

    fn enforce_quaternion_constraints(
        &self,
        _options: &ModelOptions,
        _q: &mut [f64],
        _q_err: &mut [f64],
    ) -> bool {
        false
    }

    fn convert_to_euler_angles(&self, q_in: &[f64], q_out: &mut [f64]) {
        q_out[..N].copy_from_slice(&q_in[..N]);
    }

    fn convert_to_quaternions(&self, q_in: &[f64], q_out: &mut [f64]) {
        q_out[..N].copy_from_slice(&q_in[..N]);
    }

    fn default_q(&self, _options: &ModelOptions, q: &mut [f64]) {
        q[..N].fill(0.0);
    }
}

/// Coordinates for joints whose first three speeds are the angular velocity
/// of M in F (expressed in F) and whose remaining `N - 3` speeds are the
/// rates of translation coordinates.
///
/// Orientation is a quaternion `[w, x, y, z]` (nq = N + 1), or body-fixed
/// x-y-z Euler angles (nq = N) when [`ModelOptions::use_euler_angles`] is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrientationCoordinates<const N: usize>;

impl<const N: usize> OrientationCoordinates<N> {
    pub fn new() -> Self {
        assert!(
            (3..=6).contains(&N),
            "orientation coordinates need 3 to 6 mobilities, got {N}"
        );
        Self
    }

    fn translations(&self) -> usize {
        N - 3
    }

    /// Local offset of the first translation coordinate.
    pub fn translation_start(&self, options: &ModelOptions) -> usize {
        if options.use_euler_angles {
            3
        } else {
            4
        }
    }

    /// Orientation of M in F described by the cached coordinates.
    pub fn rotation(&self, js: &JointState<'_>) -> UnitQuaternion<f64> {
        if js.options.use_euler_angles {
            let (s, c) = js.euler_sin_cos(0);
            euler_xyz_rotation(&s, &c)
        } else {
            js.quaternion(0)
        }
    }

    /// Write `r` into the orientation coordinates.
    pub fn set_rotation(&self, options: &ModelOptions, r: &UnitQuaternion<f64>, q: &mut [f64]) {
        if options.use_euler_angles {
            q[..3].copy_from_slice(euler_xyz_from_rotation(r).as_slice());
        } else {
            q[..4].copy_from_slice(&[r.w, r.i, r.j, r.k]);
        }
    }
}

impl<const N: usize> Coordinates<N> for OrientationCoordinates<N> {
    const QDOT_HANDLING: QDotHandling = QDotHandling::Differs;
    const QUATERNION_USE: QuaternionUse = QuaternionUse::WhenNotEuler;

    fn max_nq(&self) -> usize {
        N + 1
    }

    fn nq_in_use(&self, options: &ModelOptions) -> usize {
        if options.use_euler_angles {
            N
        } else {
            N + 1
        }
    }

    fn quaternion_start(&self, options: &ModelOptions) -> Option<usize> {
        (!options.use_euler_angles).then_some(0)
    }

    fn calc_sin_cos_q_norm(
        &self,
        options: &ModelOptions,
        q: &[f64],
        sin_q: &mut [f64],
        cos_q: &mut [f64],
        q_norm: &mut [f64],
    ) {
        if options.use_euler_angles {
            for i in 0..3 {
                let (s, c) = q[i].sin_cos();
                sin_q[i] = s;
                cos_q[i] = c;
            }
        } else {
            q_norm[..4].copy_from_slice(&q[..4]);
            normalize_quaternion(&mut q_norm[..4]);
        }
    }

    fn calc_qdot(&self, js: &JointState<'_>, u: &SVector<f64, N>, qdot: &mut [f64]) {
        let w = Vector3::new(u[0], u[1], u[2]);
        let nt = self.translations();
        if js.options.use_euler_angles {
            let (s, c) = js.euler_sin_cos(0);
            let rates = euler_xyz_rate_matrix_inverse(&s, &c) * w;
            qdot[..3].copy_from_slice(rates.as_slice());
            qdot[3..3 + nt].copy_from_slice(&u.as_slice()[3..]);
        } else {
            let rates = quaternion_rate_matrix(&js.q_norm[..4]) * w * 0.5;
            qdot[..4].copy_from_slice(rates.as_slice());
            qdot[4..4 + nt].copy_from_slice(&u.as_slice()[3..]);
        }
    }

    fn calc_qdotdot(
        &self,
        js: &JointState<'_>,
        u: &SVector<f64, N>,
        udot: &SVector<f64, N>,
        qdotdot: &mut [f64],
    ) {
        let w = Vector3::new(u[0], u[1], u[2]);
        let wdot = Vector3::new(udot[0], udot[1], udot[2]);
        let nt = self.translations();
        if js.options.use_euler_angles {
            // w = E·qdot  =>  qdotdot = E⁻¹·(wdot − Ė·qdot)
            let (s, c) = js.euler_sin_cos(0);
            let e_inv = euler_xyz_rate_matrix_inverse(&s, &c);
            let qdot = e_inv * w;
            let e_dot = euler_xyz_rate_matrix_dot(&s, &c, &qdot);
            let accel = e_inv * (wdot - e_dot * qdot);
            qdotdot[..3].copy_from_slice(accel.as_slice());
            qdotdot[3..3 + nt].copy_from_slice(&udot.as_slice()[3..]);
        } else {
            // qdot = ½E(q)·w  =>  qdotdot = ½E(q)·wdot + ½E(qdot)·w
            let e = quaternion_rate_matrix(&js.q_norm[..4]);
            let qdot = e * w * 0.5;
            let e_dot = quaternion_rate_matrix(qdot.as_slice());
            let accel = (e * wdot + e_dot * w) * 0.5;
            qdotdot[..4].copy_from_slice(accel.as_slice());
            qdotdot[4..4 + nt].copy_from_slice(&udot.as_slice()[3..]);
        }
    }

    fn multiply_by_n(
        &self,
        js: &JointState<'_>,
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) {
        let nt = self.translations();
        if js.options.use_euler_angles {
            let (s, c) = js.euler_sin_cos(0);
            let n = euler_xyz_rate_matrix_inverse(&s, &c);
            let x = Vector3::from_column_slice(&input[..3]);
            let y = if matrix_on_right {
                n.transpose() * x
            } else {
                n * x
            };
            out[..3].copy_from_slice(y.as_slice());
            out[3..3 + nt].copy_from_slice(&input[3..3 + nt]);
        } else {
            let e = quaternion_rate_matrix(&js.q_norm[..4]);
            if matrix_on_right {
                let x = SVector::<f64, 4>::from_column_slice(&input[..4]);
                out[..3].copy_from_slice((e.transpose() * x * 0.5).as_slice());
                out[3..3 + nt].copy_from_slice(&input[4..4 + nt]);
            } else {
                let x = Vector3::from_column_slice(&input[..3]);
                out[..4].copy_from_slice((e * x * 0.5).as_slice());
                out[4..4 + nt].copy_from_slice(&input[3..3 + nt]);
            }
        }
    }

    fn multiply_by_n_inv(
        &self,
        js: &JointState<'_>,
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) {
        let nt = self.translations();
        if js.options.use_euler_angles {
            let (s, c) = js.euler_sin_cos(0);
            let n_inv = euler_xyz_rate_matrix(&s, &c);
            let x = Vector3::from_column_slice(&input[..3]);
            let y = if matrix_on_right {
                n_inv.transpose() * x
            } else {
                n_inv * x
            };
            out[..3].copy_from_slice(y.as_slice());
            out[3..3 + nt].copy_from_slice(&input[3..3 + nt]);
        } else {
            // For a unit quaternion Eᵀ·E = 1, so N⁻¹ = 2Eᵀ.
            let e = quaternion_rate_matrix(&js.q_norm[..4]);
            if matrix_on_right {
                let x = Vector3::from_column_slice(&input[..3]);
                out[..4].copy_from_slice((e * x * 2.0).as_slice());
                out[4..4 + nt].copy_from_slice(&input[3..3 + nt]);
            } else {
                let x = SVector::<f64, 4>::from_column_slice(&input[..4]);
                out[..3].copy_from_slice((e.transpose() * x * 2.0).as_slice());
                out[3..3 + nt].copy_from_slice(&input[4..4 + nt]);
            }
        }
    }

    fn enforce_quaternion_constraints(
        &self,
        options: &ModelOptions,
        q: &mut [f64],
        q_err: &mut [f64],
    ) -> bool {
        if options.use_euler_angles {
            return false;
        }
        normalize_quaternion(&mut q[..4]);
        if q_err.len() >= 4 {
            let along: f64 = (0..4).map(|i| q_err[i] * q[i]).sum();
            for i in 0..4 {
                q_err[i] -= along * q[i];
            }
        }
        true
    }

    fn convert_to_euler_angles(&self, q_in: &[f64], q_out: &mut [f64]) {
        let nt = self.translations();
        let quat = UnitQuaternion::from_quaternion(Quaternion::new(
            q_in[0], q_in[1], q_in[2], q_in[3],
        ));
        let angles = euler_xyz_from_rotation(&quat);
        q_out[..3].copy_from_slice(angles.as_slice());
        q_out[3..3 + nt].copy_from_slice(&q_in[4..4 + nt]);
        q_out[N] = 0.0;
    }

    fn convert_to_quaternions(&self, q_in: &[f64], q_out: &mut [f64]) {
        let nt = self.translations();
        let s = [q_in[0].sin(), q_in[1].sin(), q_in[2].sin()];
        let c = [q_in[0].cos(), q_in[1].cos(), q_in[2].cos()];
        let quat = euler_xyz_rotation(&s, &c);
        q_out[4..4 + nt].copy_from_slice(&q_in[3..3 + nt]);
        q_out[..4].copy_from_slice(&[quat.w, quat.i, quat.j, quat.k]);
    }

    fn default_q(&self, options: &ModelOptions, q: &mut [f64]) {
        q.fill(0.0);
        if !options.use_euler_angles {
            q[0] = 1.0;
        }
    }
}

/// Normalize a `[w, x, y, z]` quaternion in place; a degenerate one is reset
/// to identity.
pub fn normalize_quaternion(q: &mut [f64]) {
    let norm = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if norm > 1e-10 {
        for v in q.iter_mut().take(4) {
            *v /= norm;
        }
    } else {
        warn!(norm, "degenerate quaternion reset to identity");
        q[..4].copy_from_slice(&[1.0, 0.0, 0.0, 0.0]);
    }
}

/// `E(q)` with `q̇ = ½·E(q)·ω` for ω expressed in the parent frame.
pub fn quaternion_rate_matrix(q: &[f64]) -> SMatrix<f64, 4, 3> {
    let (w, x, y, z) = (q[0], q[1], q[2], q[3]);
    SMatrix::<f64, 4, 3>::new(-x, -y, -z, w, z, -y, -z, w, x, y, -x, w)
}

/// Rotation `Rx(a)·Ry(b)·Rz(c)` from cached sines and cosines.
pub fn euler_xyz_rotation(s: &[f64; 3], c: &[f64; 3]) -> UnitQuaternion<f64> {
    let m = Matrix3::new(
        c[1] * c[2],
        -c[1] * s[2],
        s[1],
        c[0] * s[2] + s[0] * s[1] * c[2],
        c[0] * c[2] - s[0] * s[1] * s[2],
        -s[0] * c[1],
        s[0] * s[2] - c[0] * s[1] * c[2],
        s[0] * c[2] + c[0] * s[1] * s[2],
        c[0] * c[1],
    );
    UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m))
}

/// Body-fixed x-y-z angles `(a, b, c)` with `R = Rx(a)·Ry(b)·Rz(c)`.
pub fn euler_xyz_from_rotation(r: &UnitQuaternion<f64>) -> Vector3<f64> {
    let m = r.to_rotation_matrix().into_inner();
    let b = m[(0, 2)].clamp(-1.0, 1.0).asin();
    let a = (-m[(1, 2)]).atan2(m[(2, 2)]);
    let c = (-m[(0, 1)]).atan2(m[(0, 0)]);
    Vector3::new(a, b, c)
}

/// `E` with `ω_F = E·[ȧ, ḃ, ċ]`; columns are x, Rx·y and Rx·Ry·z.
pub fn euler_xyz_rate_matrix(s: &[f64; 3], c: &[f64; 3]) -> Matrix3<f64> {
    Matrix3::new(
        1.0,
        0.0,
        s[1],
        0.0,
        c[0],
        -s[0] * c[1],
        0.0,
        s[0],
        c[0] * c[1],
    )
}

/// `E⁻¹`; singular when `cos b == 0`.
pub fn euler_xyz_rate_matrix_inverse(s: &[f64; 3], c: &[f64; 3]) -> Matrix3<f64> {
    let ooc1 = 1.0 / c[1];
    Matrix3::new(
        1.0,
        s[0] * s[1] * ooc1,
        -c[0] * s[1] * ooc1,
        0.0,
        c[0],
        s[0],
        0.0,
        -s[0] * ooc1,
        c[0] * ooc1,
    )
}

/// Time derivative of [`euler_xyz_rate_matrix`] for angle rates `qdot`.
pub fn euler_xyz_rate_matrix_dot(s: &[f64; 3], c: &[f64; 3], qdot: &Vector3<f64>) -> Matrix3<f64> {
    let e = euler_xyz_rate_matrix(s, c);
    let w0 = Vector3::x() * qdot[0];
    let w01 = w0 + e.column(1) * qdot[1];
    let mut e_dot = Matrix3::zeros();
    e_dot.set_column(1, &w0.cross(&e.column(1)));
    e_dot.set_column(2, &w01.cross(&e.column(2)));
    e_dot
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sin_cos(angles: &[f64; 3]) -> ([f64; 3], [f64; 3]) {
        (
            [angles[0].sin(), angles[1].sin(), angles[2].sin()],
            [angles[0].cos(), angles[1].cos(), angles[2].cos()],
        )
    }

    #[test]
    fn euler_rotation_round_trips_through_angles() {
        let angles = [0.3, -0.7, 1.9];
        let (s, c) = sin_cos(&angles);
        let r = euler_xyz_rotation(&s, &c);
        let expected = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), angles[0])
            * UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angles[1])
            * UnitQuaternion::from_axis_angle(&Vector3::z_axis(), angles[2]);
        assert_relative_eq!(r.angle_to(&expected), 0.0, epsilon = 1e-10);
        let back = euler_xyz_from_rotation(&r);
        assert_relative_eq!(back, Vector3::from(angles), epsilon = 1e-10);
    }

    #[test]
    fn euler_rate_matrix_inverse_is_an_inverse() {
        let (s, c) = sin_cos(&[0.4, 0.9, -0.2]);
        let product = euler_xyz_rate_matrix(&s, &c) * euler_xyz_rate_matrix_inverse(&s, &c);
        assert_relative_eq!(product, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn euler_rate_matrix_dot_matches_finite_difference() {
        let angles = [0.4, 0.9, -0.2];
        let qdot = Vector3::new(0.7, -1.3, 0.5);
        let h = 1e-6;
        let plus: Vec<f64> = (0..3).map(|i| angles[i] + h * qdot[i]).collect();
        let minus: Vec<f64> = (0..3).map(|i| angles[i] - h * qdot[i]).collect();
        let (sp, cp) = sin_cos(&[plus[0], plus[1], plus[2]]);
        let (sm, cm) = sin_cos(&[minus[0], minus[1], minus[2]]);
        let numeric =
            (euler_xyz_rate_matrix(&sp, &cp) - euler_xyz_rate_matrix(&sm, &cm)) / (2.0 * h);
        let (s, c) = sin_cos(&angles);
        let analytic = euler_xyz_rate_matrix_dot(&s, &c, &qdot);
        assert_relative_eq!(analytic, numeric, epsilon = 1e-8);
    }

    #[test]
    fn quaternion_rate_matches_quaternion_product() {
        let q = UnitQuaternion::from_euler_angles(0.2, -0.5, 1.1);
        let w = Vector3::new(0.3, -0.8, 1.5);
        let expected = Quaternion::from_imag(w) * q.into_inner() * 0.5;
        let coords = [q.w, q.i, q.j, q.k];
        let qdot = quaternion_rate_matrix(&coords) * w * 0.5;
        assert_relative_eq!(qdot[0], expected.w, epsilon = 1e-12);
        assert_relative_eq!(qdot[1], expected.i, epsilon = 1e-12);
        assert_relative_eq!(qdot[2], expected.j, epsilon = 1e-12);
        assert_relative_eq!(qdot[3], expected.k, epsilon = 1e-12);
    }

    #[test]
    fn quaternion_renormalization_is_idempotent() {
        let coords = OrientationCoordinates::<3>::new();
        let options = ModelOptions::default();
        let q0 = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let mut q = vec![q0.w, q0.i, q0.j, q0.k];
        let mut q_err = vec![0.0; 4];

        let touched = coords.enforce_quaternion_constraints(&options, &mut q, &mut q_err);
        assert!(touched);
        let once = q.clone();
        coords.enforce_quaternion_constraints(&options, &mut q, &mut q_err);
        for i in 0..4 {
            assert_relative_eq!(q[i], once[i], epsilon = 1e-15);
        }
        assert_relative_eq!(once[0], q0.w, epsilon = 1e-15);
    }

    #[test]
    fn drifted_quaternion_is_restored_to_unit_norm() {
        let coords = OrientationCoordinates::<6>::new();
        let options = ModelOptions::default();
        let mut q = vec![1.3, 0.2, -0.4, 0.1, 5.0, 6.0, 7.0];
        let mut q_err = vec![0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        coords.enforce_quaternion_constraints(&options, &mut q, &mut q_err);
        let norm: f64 = q[..4].iter().map(|v| v * v).sum::<f64>().sqrt();
        assert_relative_eq!(norm, 1.0, epsilon = 1e-14);
        assert_eq!(&q[4..], &[5.0, 6.0, 7.0]);
        let along: f64 = (0..4).map(|i| q_err[i] * q[i]).sum();
        assert_relative_eq!(along, 0.0, epsilon = 1e-14);
    }

    #[test]
    fn euler_mode_skips_quaternion_enforcement() {
        let coords = OrientationCoordinates::<3>::new();
        let options = ModelOptions {
            use_euler_angles: true,
        };
        let mut q = vec![2.0, 0.0, 0.0, 0.0];
        let touched = coords.enforce_quaternion_constraints(&options, &mut q, &mut []);
        assert!(!touched);
        assert_eq!(q[0], 2.0);
        assert_eq!(coords.quaternion_start(&options), None);
        assert_eq!(coords.nq_in_use(&options), 3);
    }

    #[test]
    fn n_and_n_inverse_compose_to_identity_on_speeds() {
        let coords = OrientationCoordinates::<6>::new();
        for use_euler_angles in [false, true] {
            let options = ModelOptions { use_euler_angles };
            let mut q = vec![0.0; 7];
            if use_euler_angles {
                q[..6].copy_from_slice(&[0.3, -0.4, 0.8, 1.0, 2.0, 3.0]);
            } else {
                let r = UnitQuaternion::from_euler_angles(0.3, -0.4, 0.8);
                q.copy_from_slice(&[r.w, r.i, r.j, r.k, 1.0, 2.0, 3.0]);
            }
            let scratch = JointScratch::compute::<_, 6>(&coords, &options, &q);
            let js = scratch.view(&options, &q);

            let u = [0.5, -1.0, 2.0, 0.1, 0.2, 0.3];
            let mut qdot = [0.0; 7];
            coords.multiply_by_n(&js, false, &u, &mut qdot);
            let mut back = [0.0; 6];
            coords.multiply_by_n_inv(&js, false, &qdot, &mut back);
            for i in 0..6 {
                assert_relative_eq!(back[i], u[i], epsilon = 1e-12);
            }

            let mut via_calc = [0.0; 7];
            coords.calc_qdot(&js, &SVector::<f64, 6>::from_row_slice(&u), &mut via_calc);
            assert_eq!(qdot, via_calc);
        }
    }

    #[test]
    fn right_multiplication_is_the_transpose() {
        let coords = OrientationCoordinates::<3>::new();
        let options = ModelOptions::default();
        let r = UnitQuaternion::from_euler_angles(-0.3, 0.6, 0.2);
        let q = [r.w, r.i, r.j, r.k];
        let scratch = JointScratch::compute::<_, 3>(&coords, &options, &q);
        let js = scratch.view(&options, &q);

        // yᵀ(N x) == (yᵀ N) x
        let x = [0.4, -0.2, 0.9];
        let y = [0.1, 0.7, -0.3, 0.5];
        let mut nx = [0.0; 4];
        coords.multiply_by_n(&js, false, &x, &mut nx);
        let mut yn = [0.0; 3];
        coords.multiply_by_n(&js, true, &y, &mut yn);
        let lhs: f64 = (0..4).map(|i| y[i] * nx[i]).sum();
        let rhs: f64 = (0..3).map(|i| yn[i] * x[i]).sum();
        assert_relative_eq!(lhs, rhs, epsilon = 1e-14);
    }

    #[test]
    fn quaternion_and_euler_forms_convert_both_ways() {
        let coords = OrientationCoordinates::<6>::new();
        let euler = [0.2, -0.3, 1.1, 4.0, 5.0, 6.0, 0.0];
        let mut quat = [0.0; 7];
        coords.convert_to_quaternions(&euler, &mut quat);
        assert_eq!(&quat[4..], &[4.0, 5.0, 6.0]);
        let mut back = [9.0; 7];
        coords.convert_to_euler_angles(&quat, &mut back);
        for i in 0..6 {
            assert_relative_eq!(back[i], euler[i], epsilon = 1e-12);
        }
        assert_eq!(back[6], 0.0);
    }

    #[test]
    fn quaternion_qdotdot_matches_differentiated_qdot() {
        let coords = OrientationCoordinates::<3>::new();
        let options = ModelOptions::default();
        let r = UnitQuaternion::from_euler_angles(0.5, 0.1, -0.4);
        let q = [r.w, r.i, r.j, r.k];
        let scratch = JointScratch::compute::<_, 3>(&coords, &options, &q);
        let js = scratch.view(&options, &q);
        let u = SVector::<f64, 3>::new(0.3, -0.6, 0.9);
        let udot = SVector::<f64, 3>::new(-0.2, 0.4, 0.1);
        let mut qdotdot = [0.0; 4];
        coords.calc_qdotdot(&js, &u, &udot, &mut qdotdot);

        // Follow q along qdot with u advancing by udot.
        let h = 1e-6;
        let qdot_at = |t: f64| {
            let mut qt = [0.0; 4];
            let mut qd = [0.0; 4];
            coords.calc_qdot(&js, &u, &mut qd);
            for i in 0..4 {
                qt[i] = q[i] + t * qd[i];
            }
            let s = JointScratch::compute::<_, 3>(&coords, &options, &qt);
            let v = s.view(&options, &qt);
            let mut out = [0.0; 4];
            coords.calc_qdot(&v, &(u + udot * t), &mut out);
            out
        };
        let plus = qdot_at(h);
        let minus = qdot_at(-h);
        for i in 0..4 {
            assert_relative_eq!(qdotdot[i], (plus[i] - minus[i]) / (2.0 * h), epsilon = 1e-6);
        }
    }

    #[test]
    fn euler_qdotdot_matches_differentiated_qdot() {
        let coords = OrientationCoordinates::<6>::new();
        let options = ModelOptions {
            use_euler_angles: true,
        };
        let q = [0.3, -0.5, 0.8, 1.0, 2.0, 3.0];
        let scratch = JointScratch::compute::<_, 6>(&coords, &options, &q);
        let js = scratch.view(&options, &q);
        let u = SVector::<f64, 6>::new(0.4, -0.7, 0.2, 0.5, -0.1, 0.3);
        let udot = SVector::<f64, 6>::new(0.1, 0.3, -0.6, -0.2, 0.4, 0.9);
        let mut qdotdot = [0.0; 6];
        coords.calc_qdotdot(&js, &u, &udot, &mut qdotdot);

        let h = 1e-6;
        let qdot_at = |t: f64| {
            let mut qd = [0.0; 6];
            coords.calc_qdot(&js, &u, &mut qd);
            let mut qt = [0.0; 6];
            for i in 0..6 {
                qt[i] = q[i] + t * qd[i];
            }
            let s = JointScratch::compute::<_, 6>(&coords, &options, &qt);
            let v = s.view(&options, &qt);
            let mut out = [0.0; 6];
            coords.calc_qdot(&v, &(u + udot * t), &mut out);
            out
        };
        let plus = qdot_at(h);
        let minus = qdot_at(-h);
        for i in 0..6 {
            assert_relative_eq!(qdotdot[i], (plus[i] - minus[i]) / (2.0 * h), epsilon = 1e-6);
        }
        assert_relative_eq!(qdotdot[3], udot[3]);
    }
}

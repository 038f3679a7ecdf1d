//! Spatial algebra for the recursive tree passes.
//!
//! Spatial vectors are `[angular; linear]` 6-vectors. Velocities and
//! accelerations are taken about a body origin, forces are a moment about that
//! origin plus a force. Everything the tree passes produce is expressed in
//! Ground.

use nalgebra::{Isometry3, Matrix3, Matrix6, SMatrix, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// 6D spatial vector: `[angular (3), linear (3)]`.
pub type SpatialVec = Vector6<f64>;

/// 6×6 spatial inertia or shift operator.
pub type SpatialMat = Matrix6<f64>;

/// Rigid transform between two frames (rotation plus origin offset).
pub type Transform = Isometry3<f64>;

/// Joint velocity Jacobian: 6 rows (angular over linear), one column per
/// generalized speed. Columns map speeds to spatial velocity.
pub type HMatrix<const N: usize> = SMatrix<f64, 6, N>;

pub fn angular(v: &SpatialVec) -> Vector3<f64> {
    Vector3::new(v[0], v[1], v[2])
}

pub fn linear(v: &SpatialVec) -> Vector3<f64> {
    Vector3::new(v[3], v[4], v[5])
}

pub fn spatial_vec(ang: &Vector3<f64>, lin: &Vector3<f64>) -> SpatialVec {
    SpatialVec::new(ang.x, ang.y, ang.z, lin.x, lin.y, lin.z)
}

/// Skew-symmetric cross-product matrix: `skew(a) * b == a × b`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Shift operator φ(p) for a body whose origin sits at `p` from its parent's
/// origin (Ground components).
///
/// ```text
/// φ = [ I  [p]× ]     φ  moves a force from the child origin to the parent origin
///     [ 0   I   ]     φᵀ moves a velocity from the parent origin to the child origin
/// ```
pub fn shift_matrix(p: &Vector3<f64>) -> SpatialMat {
    let mut phi = SpatialMat::identity();
    phi.fixed_view_mut::<3, 3>(0, 3).copy_from(&skew(p));
    phi
}

/// φᵀ·V: rigidly carry a parent velocity (or acceleration) out to the child origin.
#[inline]
pub fn shift_velocity(v_parent: &SpatialVec, p: &Vector3<f64>) -> SpatialVec {
    let w = angular(v_parent);
    spatial_vec(&w, &(linear(v_parent) + w.cross(p)))
}

/// φ·F: move a force acting at the child origin to the parent origin.
#[inline]
pub fn shift_force(f_child: &SpatialVec, p: &Vector3<f64>) -> SpatialVec {
    let f = linear(f_child);
    spatial_vec(&(angular(f_child) + p.cross(&f)), &f)
}

/// φ·P·φᵀ: articulated inertia felt at the parent origin.
pub fn shift_inertia(p_child: &SpatialMat, p: &Vector3<f64>) -> SpatialMat {
    let phi = shift_matrix(p);
    phi * p_child * phi.transpose()
}

/// Force the exact symmetry that round-off erodes in `Aᵀ P A` products.
pub fn symmetrize<const N: usize>(m: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
    (m + m.transpose()) * 0.5
}

/// Fixed mass properties of a body, in its own frame B.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MassProperties {
    pub mass: f64,
    /// Center of mass measured from the body origin.
    pub com: Vector3<f64>,
    /// Rotational inertia about the center of mass.
    pub inertia: Matrix3<f64>,
}

impl Default for MassProperties {
    fn default() -> Self {
        Self {
            mass: 1.0,
            com: Vector3::zeros(),
            inertia: Matrix3::identity(),
        }
    }
}

impl MassProperties {
    pub fn new(mass: f64, com: Vector3<f64>, inertia: Matrix3<f64>) -> Self {
        Self { mass, com, inertia }
    }

    /// Uniform solid sphere centered at `com`.
    pub fn sphere(mass: f64, radius: f64, com: Vector3<f64>) -> Self {
        let i = 0.4 * mass * radius * radius;
        Self::new(mass, com, Matrix3::from_diagonal_element(i))
    }

    /// Solid box with full side lengths `size`, centered at `com`.
    pub fn cuboid(mass: f64, size: Vector3<f64>, com: Vector3<f64>) -> Self {
        let k = mass / 12.0;
        let (x2, y2, z2) = (size.x * size.x, size.y * size.y, size.z * size.z);
        Self::new(
            mass,
            com,
            Matrix3::from_diagonal(&Vector3::new(k * (y2 + z2), k * (x2 + z2), k * (x2 + y2))),
        )
    }

    pub fn is_valid(&self) -> bool {
        self.mass.is_finite()
            && self.mass >= 0.0
            && self.com.iter().all(|v| v.is_finite())
            && self.inertia.iter().all(|v| v.is_finite())
    }

    /// Center of mass offset from the body origin, Ground components.
    pub fn com_in_ground(&self, r_gb: &UnitQuaternion<f64>) -> Vector3<f64> {
        r_gb * self.com
    }

    /// Rotational inertia about the body origin, Ground components
    /// (parallel axis theorem applied to the COM inertia).
    pub fn origin_inertia_in_ground(&self, r_gb: &UnitQuaternion<f64>) -> Matrix3<f64> {
        let r = r_gb.to_rotation_matrix();
        let i_com = r.matrix() * self.inertia * r.matrix().transpose();
        let c = r_gb * self.com;
        i_com + (Matrix3::identity() * c.dot(&c) - c * c.transpose()) * self.mass
    }

    /// Rigid-body spatial inertia about the body origin in Ground:
    ///
    /// ```text
    /// M = [ I_o        m[c]× ]
    ///     [ -m[c]×     m·1   ]
    /// ```
    pub fn spatial_inertia_in_ground(&self, r_gb: &UnitQuaternion<f64>) -> SpatialMat {
        let c = self.com_in_ground(r_gb);
        let mc = skew(&c) * self.mass;
        let mut m = SpatialMat::zeros();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.origin_inertia_in_ground(r_gb));
        m.fixed_view_mut::<3, 3>(0, 3).copy_from(&mc);
        m.fixed_view_mut::<3, 3>(3, 0).copy_from(&(-mc));
        m.fixed_view_mut::<3, 3>(3, 3)
            .copy_from(&(Matrix3::identity() * self.mass));
        m
    }

    /// Velocity-dependent force needed to keep the body on its current
    /// motion: `[ω × I_o ω; m ω × (ω × c)]`.
    pub fn gyroscopic_force(&self, r_gb: &UnitQuaternion<f64>, w: &Vector3<f64>) -> SpatialVec {
        let c = self.com_in_ground(r_gb);
        let i_o = self.origin_inertia_in_ground(r_gb);
        spatial_vec(&w.cross(&(i_o * w)), &(w.cross(&w.cross(&c)) * self.mass))
    }
}

/// Angular velocity and origin velocity of frame M in F, expressed in F, from
/// the same quantities for F in M expressed in M (and the reverse).
///
/// The relation is its own inverse given the matching transform.
pub fn reverse_relative_velocity(x_fm: &Transform, v_mf: &SpatialVec) -> SpatialVec {
    let r_fm = &x_fm.rotation;
    let p_fm = x_fm.translation.vector;
    let w_fm = -(r_fm * angular(v_mf));
    let v_fm = w_fm.cross(&p_fm) - r_fm * linear(v_mf);
    spatial_vec(&w_fm, &v_fm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Translation3;

    /// Spatial cross product for force vectors: `v ×* f`.
    fn cross_force(v: &SpatialVec, f: &SpatialVec) -> SpatialVec {
        let w = angular(v);
        let f_lin = linear(f);
        spatial_vec(
            &(w.cross(&angular(f)) + linear(v).cross(&f_lin)),
            &w.cross(&f_lin),
        )
    }

    #[test]
    fn skew_matches_cross_product() {
        let a = Vector3::new(1.0, -2.0, 0.5);
        let b = Vector3::new(0.3, 0.7, -1.1);
        assert_relative_eq!(skew(&a) * b, a.cross(&b), epsilon = 1e-14);
    }

    #[test]
    fn shift_helpers_agree_with_shift_matrix() {
        let p = Vector3::new(0.4, -0.1, 0.9);
        let v = SpatialVec::new(0.1, 0.2, 0.3, -1.0, 2.0, 0.5);
        let phi = shift_matrix(&p);
        assert_relative_eq!(shift_velocity(&v, &p), phi.transpose() * v, epsilon = 1e-14);
        assert_relative_eq!(shift_force(&v, &p), phi * v, epsilon = 1e-14);
    }

    #[test]
    fn shifted_power_is_invariant() {
        // Power F·V is the same whichever origin the pair is measured about.
        let p = Vector3::new(1.0, 0.5, -0.3);
        let v_parent = SpatialVec::new(0.3, -0.2, 0.7, 1.0, 0.0, -0.4);
        let f_child = SpatialVec::new(-0.5, 0.1, 0.2, 2.0, -1.0, 0.3);
        let power_child = f_child.dot(&shift_velocity(&v_parent, &p));
        let power_parent = shift_force(&f_child, &p).dot(&v_parent);
        assert_relative_eq!(power_child, power_parent, epsilon = 1e-12);
    }

    #[test]
    fn spatial_inertia_is_symmetric_with_positive_mass_block() {
        let props = MassProperties::new(
            2.5,
            Vector3::new(0.1, -0.2, 0.3),
            Matrix3::new(0.3, 0.01, 0.0, 0.01, 0.2, 0.02, 0.0, 0.02, 0.4),
        );
        let r = UnitQuaternion::from_euler_angles(0.3, -0.4, 1.2);
        let m = props.spatial_inertia_in_ground(&r);
        assert_relative_eq!(m, m.transpose(), epsilon = 1e-12);
        assert_relative_eq!(m[(3, 3)], 2.5, epsilon = 1e-14);
        assert!(m.cholesky().is_some());
    }

    #[test]
    fn gyroscopic_force_matches_momentum_cross_product() {
        // b = V ×* (M V) when the origin velocity is zero.
        let props = MassProperties::new(
            1.5,
            Vector3::new(0.2, 0.0, -0.1),
            Matrix3::from_diagonal(&Vector3::new(0.1, 0.2, 0.3)),
        );
        let r = UnitQuaternion::from_euler_angles(0.1, 0.2, 0.3);
        let w = Vector3::new(0.4, -1.0, 2.0);
        let v = spatial_vec(&w, &Vector3::zeros());
        let expected = cross_force(&v, &(props.spatial_inertia_in_ground(&r) * v));
        assert_relative_eq!(props.gyroscopic_force(&r, &w), expected, epsilon = 1e-12);
    }

    #[test]
    fn reverse_relative_velocity_is_an_involution() {
        let x_fm = Transform::from_parts(
            Translation3::new(0.2, -0.3, 0.5),
            UnitQuaternion::from_euler_angles(0.4, 0.1, -0.7),
        );
        let v_mf = SpatialVec::new(0.3, 0.1, -0.2, 1.0, 0.5, -0.25);
        let v_fm = reverse_relative_velocity(&x_fm, &v_mf);
        let back = reverse_relative_velocity(&x_fm.inverse(), &v_fm);
        assert_relative_eq!(back, v_mf, epsilon = 1e-12);
    }

    #[test]
    fn cuboid_inertia_matches_closed_form() {
        let props = MassProperties::cuboid(12.0, Vector3::new(1.0, 2.0, 3.0), Vector3::zeros());
        assert_relative_eq!(props.inertia[(0, 0)], 13.0, epsilon = 1e-12);
        assert_relative_eq!(props.inertia[(1, 1)], 10.0, epsilon = 1e-12);
        assert_relative_eq!(props.inertia[(2, 2)], 5.0, epsilon = 1e-12);
    }
}

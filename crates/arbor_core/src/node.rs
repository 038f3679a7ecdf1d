//! Per-node recursion kernel.
//!
//! [`RigidBodyNodeSpec`] is generic over the joint type and its mobility
//! count `N`, so every per-node quantity is a fixed-size nalgebra value and
//! the hot loops never allocate. The driver holds nodes behind the
//! object-safe [`RigidBodyNode`] trait and calls one method per node per pass.
//!
//! Each method reads the node's own cache entries plus entries its parent or
//! children already wrote in the same pass, and writes only into its own
//! slots.

use nalgebra::{Cholesky, DMatrix, SMatrix, SVector, Vector3};
use tracing::warn;

use crate::cache::{DynamicsCache, PositionCache, VelocityCache};
use crate::coordinates::{Coordinates, JointScratch, JointState, QDotHandling, QuaternionUse};
use crate::mobilizer::Mobilizer;
use crate::options::{KernelSettings, ModelOptions};
use crate::slots::{BodyIndex, NodeSlots};
use crate::spatial::{
    angular, linear, reverse_relative_velocity, shift_force, shift_inertia, shift_matrix,
    shift_velocity, spatial_vec, symmetrize, HMatrix, MassProperties, SpatialMat, SpatialVec,
    Transform,
};

/// Driver-facing operations of one tree node.
///
/// Whole-tree buffers are passed in; each node narrows them to its own slots.
pub trait RigidBodyNode: std::fmt::Debug {
    fn body(&self) -> BodyIndex;
    fn parent(&self) -> BodyIndex;
    fn children(&self) -> &[BodyIndex];
    fn add_child(&mut self, child: BodyIndex);

    fn mobilizer_name(&self) -> &'static str;
    fn is_reversed(&self) -> bool;
    fn mass_properties(&self) -> &MassProperties;

    fn dof(&self) -> usize;
    fn max_nq(&self) -> usize;
    fn nq_in_use(&self, options: &ModelOptions) -> usize;
    fn nu_in_use(&self, options: &ModelOptions) -> usize;
    fn q_start(&self) -> usize;
    fn u_start(&self) -> usize;
    /// Local offset of the quaternion in use, if any.
    fn quaternion_start(&self, options: &ModelOptions) -> Option<usize>;
    fn qdot_handling(&self) -> QDotHandling;
    fn quaternion_use(&self) -> QuaternionUse;

    fn set_default_position_values(&self, options: &ModelOptions, q: &mut [f64]);
    fn set_default_velocity_values(&self, u: &mut [f64]);
    fn copy_q(&self, options: &ModelOptions, q_in: &[f64], q: &mut [f64]);
    fn copy_u(&self, u_in: &[f64], u: &mut [f64]);

    /// Base to tip.
    fn realize_position(&self, options: &ModelOptions, q: &[f64], pc: &mut PositionCache);
    /// Base to tip.
    fn realize_velocity(
        &self,
        options: &ModelOptions,
        q: &[f64],
        u: &[f64],
        pc: &PositionCache,
        vc: &mut VelocityCache,
    );
    /// Base to tip: Jacobian derivatives and velocity-dependent terms.
    fn realize_dynamics(
        &self,
        options: &ModelOptions,
        q: &[f64],
        u: &[f64],
        pc: &PositionCache,
        vc: &VelocityCache,
        dc: &mut DynamicsCache,
    );
    /// Acceleration results come from the force/acceleration passes.
    fn realize_acceleration(&self) {}

    /// Tip to base.
    fn calc_articulated_body_inertias_inward(&self, pc: &PositionCache, dc: &mut DynamicsCache);
    /// Base to tip, after the inertias are complete.
    fn calc_y_outward(&self, pc: &PositionCache, dc: &mut DynamicsCache);

    /// Tip to base.
    #[allow(clippy::too_many_arguments)]
    fn calc_u_dot_pass1_inward(
        &self,
        pc: &PositionCache,
        dc: &DynamicsCache,
        joint_forces: &[f64],
        body_forces: &[SpatialVec],
        z: &mut [SpatialVec],
        g_epsilon: &mut [SpatialVec],
        epsilon: &mut [f64],
    );
    /// Base to tip.
    fn calc_u_dot_pass2_outward(
        &self,
        pc: &PositionCache,
        dc: &DynamicsCache,
        epsilon: &[f64],
        a_gb: &mut [SpatialVec],
        udot: &mut [f64],
    );

    /// Tip to base.
    fn calc_m_inverse_f_pass1_inward(
        &self,
        pc: &PositionCache,
        dc: &DynamicsCache,
        f: &[f64],
        z: &mut [SpatialVec],
        g_epsilon: &mut [SpatialVec],
        epsilon: &mut [f64],
    );
    /// Base to tip.
    fn calc_m_inverse_f_pass2_outward(
        &self,
        pc: &PositionCache,
        dc: &DynamicsCache,
        epsilon: &[f64],
        a_gb: &mut [SpatialVec],
        udot: &mut [f64],
    );

    /// Base to tip.
    fn calc_ma_pass1_outward(&self, pc: &PositionCache, udot: &[f64], a_gb: &mut [SpatialVec]);
    /// Tip to base.
    fn calc_ma_pass2_inward(
        &self,
        pc: &PositionCache,
        a_gb: &[SpatialVec],
        f_gb: &mut [SpatialVec],
        tau: &mut [f64],
    );

    /// Tip to base: `τ = Jᵀ·F` for applied body forces.
    fn calc_equivalent_joint_forces(
        &self,
        pc: &PositionCache,
        body_forces: &[SpatialVec],
        z: &mut [SpatialVec],
        joint_forces: &mut [f64],
    );
    /// Base to tip: `J·v` for an arbitrary speed-like vector.
    fn calc_spatial_kinematics_from_internal(
        &self,
        pc: &PositionCache,
        v: &[f64],
        jv: &mut [SpatialVec],
    );
    /// Tip to base: `Jᵀ·X` for arbitrary body spatial forces.
    fn calc_internal_gradient_from_spatial(
        &self,
        pc: &PositionCache,
        x: &[SpatialVec],
        z: &mut [SpatialVec],
        jx: &mut [f64],
    );
    /// Least-squares speeds giving this body the spatial velocity `s_vel`
    /// in Ground, with the parent moving as recorded in `vc`.
    fn set_vel_from_svel(
        &self,
        pc: &PositionCache,
        vc: &VelocityCache,
        s_vel: &SpatialVec,
        u: &mut [f64],
    );

    fn calc_qdot(
        &self,
        options: &ModelOptions,
        q: &[f64],
        pc: &PositionCache,
        u: &[f64],
        qdot: &mut [f64],
    );
    fn calc_qdotdot(
        &self,
        options: &ModelOptions,
        q: &[f64],
        pc: &PositionCache,
        u: &[f64],
        udot: &[f64],
        qdotdot: &mut [f64],
    );
    /// `out = N·in` with `in` u-sized, or `out = in·N` with `in` q-sized.
    fn multiply_by_n(
        &self,
        options: &ModelOptions,
        q: &[f64],
        pc: &PositionCache,
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    );
    /// `out = N⁻¹·in` with `in` q-sized, or `out = in·N⁻¹` with `in` u-sized.
    fn multiply_by_n_inv(
        &self,
        options: &ModelOptions,
        q: &[f64],
        pc: &PositionCache,
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    );

    fn enforce_quaternion_constraints(
        &self,
        options: &ModelOptions,
        q: &mut [f64],
        q_err: &mut [f64],
    ) -> bool;
    fn convert_to_euler_angles(&self, q_in: &[f64], q_out: &mut [f64]);
    fn convert_to_quaternions(&self, q_in: &[f64], q_out: &mut [f64]);

    /// Set this node's coordinates so that X_FM matches `x_fm` as closely as
    /// the joint allows.
    fn set_q_to_fit_transform(&self, options: &ModelOptions, x_fm: &Transform, q: &mut [f64]);
    /// Set this node's speeds so that V_FM (in F) matches `v_fm` as closely
    /// as the joint allows at the current coordinates.
    fn set_u_to_fit_velocity(
        &self,
        options: &ModelOptions,
        q: &[f64],
        v_fm: &SpatialVec,
        u: &mut [f64],
    );

    /// Ground-frame Jacobian H_PB_G as a 6×N matrix.
    fn velocity_jacobian_in_ground(&self, pc: &PositionCache) -> DMatrix<f64>;
    /// Mobility-space mass matrix D and its inverse DI.
    fn mobility_mass_matrix(&self, dc: &DynamicsCache) -> (DMatrix<f64>, DMatrix<f64>);
}

/// Generic node: mass properties, fixed frames and slots of one body plus
/// the joint connecting it to its parent.
#[derive(Debug, Clone)]
pub struct RigidBodyNodeSpec<J, const N: usize>
where
    J: Mobilizer<N>,
{
    joint: J,
    mass_props: MassProperties,
    /// Inboard frame F on the parent.
    x_pf: Transform,
    /// Outboard frame M on this body.
    x_bm: Transform,
    x_mb: Transform,
    reversed: bool,
    parent: BodyIndex,
    children: Vec<BodyIndex>,
    slots: NodeSlots<N>,
    settings: KernelSettings,
}

impl<J, const N: usize> RigidBodyNodeSpec<J, N>
where
    J: Mobilizer<N>,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        joint: J,
        mass_props: MassProperties,
        x_pf: Transform,
        x_bm: Transform,
        reversed: bool,
        parent: BodyIndex,
        slots: NodeSlots<N>,
        settings: KernelSettings,
    ) -> Self {
        debug_assert_eq!(slots.q.len(), joint.coordinates().max_nq());
        Self {
            joint,
            mass_props,
            x_pf,
            x_mb: x_bm.inverse(),
            x_bm,
            reversed,
            parent,
            children: Vec::new(),
            slots,
            settings,
        }
    }

    pub fn joint(&self) -> &J {
        &self.joint
    }

    fn nq(&self, options: &ModelOptions) -> usize {
        self.joint.coordinates().nq_in_use(options)
    }

    /// In-use coordinates and their cached trig/quaternion values.
    fn joint_state<'a>(
        &self,
        options: &'a ModelOptions,
        q: &'a [f64],
        pc: &'a PositionCache,
    ) -> JointState<'a> {
        let start = self.slots.q.start();
        let range = start..start + self.nq(options);
        JointState {
            options,
            q: &q[range.clone()],
            sin_q: &pc.sin_q[range.clone()],
            cos_q: &pc.cos_q[range.clone()],
            q_norm: &pc.q_norm[range],
        }
    }

    fn local_q<'a>(&self, options: &ModelOptions, q: &'a [f64]) -> &'a [f64] {
        &self.slots.q.of(q)[..self.nq(options)]
    }

    /// The first `nq` entries of this node's slot in a q-sized buffer. The
    /// slots past `nq` (the spare one of an Euler-angle orientation) are
    /// zeroed.
    fn q_in_use_mut<'a>(&self, nq: usize, buf: &'a mut [f64]) -> &'a mut [f64] {
        let local = self.slots.q.of_mut(buf);
        local[nq..].fill(0.0);
        &mut local[..nq]
    }

    /// X_FM, inverting the joint's own transform when it is mounted in reverse.
    fn cross_joint_transform(&self, js: &JointState<'_>) -> Transform {
        let x = self.joint.cross_joint_transform(js);
        if self.reversed {
            x.inverse()
        } else {
            x
        }
    }

    fn velocity_jacobian_fm(&self, js: &JointState<'_>, x_fm: &Transform) -> HMatrix<N> {
        if self.reversed {
            self.joint.reverse_velocity_jacobian(js, x_fm)
        } else {
            self.joint.velocity_jacobian(js, x_fm)
        }
    }

    fn velocity_jacobian_dot_fm(
        &self,
        js: &JointState<'_>,
        x_fm: &Transform,
        u: &SVector<f64, N>,
    ) -> HMatrix<N> {
        if self.reversed {
            self.joint.reverse_velocity_jacobian_dot(js, x_fm, u)
        } else {
            self.joint.velocity_jacobian_dot(js, x_fm, u)
        }
    }

    /// Body origin relative to the M origin, Ground components.
    fn p_mb_g(&self, pc: &PositionCache) -> Vector3<f64> {
        -(pc.x_gb[self.slots.body.0].rotation * self.x_bm.translation.vector)
    }

    fn h(&self, pc: &PositionCache) -> HMatrix<N> {
        self.slots.u.get_h(&pc.h)
    }

    fn p_pb_g(&self, pc: &PositionCache) -> Vector3<f64> {
        pc.p_pb_g[self.slots.body.0]
    }

    fn invert_symmetric(&self, m: &SMatrix<f64, N, N>) -> SMatrix<f64, N, N> {
        if let Some(chol) = Cholesky::new(*m) {
            return chol.inverse();
        }
        warn!(
            body = self.slots.body.0,
            mobilizer = self.joint.name(),
            "mobility-space mass matrix is not positive definite; using pseudo-inverse"
        );
        let eps = self.settings.singular_tolerance * m.amax().max(f64::MIN_POSITIVE);
        match DMatrix::from_column_slice(N, N, m.as_slice()).pseudo_inverse(eps) {
            Ok(pinv) => SMatrix::from_column_slice(pinv.as_slice()),
            Err(_) => SMatrix::zeros(),
        }
    }

    /// Shared outward step of forward dynamics and the M⁻¹ action.
    fn outward_acceleration(
        &self,
        pc: &PositionCache,
        dc: &DynamicsCache,
        epsilon: &[f64],
        bias: &SpatialVec,
        a_gb: &mut [SpatialVec],
        udot: &mut [f64],
    ) {
        let body = self.slots.body.0;
        let alpha = shift_velocity(&a_gb[self.parent.0], &self.p_pb_g(pc));
        let di = self.slots.usq.get(&dc.di);
        let g = self.slots.u.get_h(&dc.g);
        let eps = self.slots.u.get(epsilon);

        let ud = di * eps - g.transpose() * alpha;
        self.slots.u.set(udot, &ud);
        a_gb[body] = alpha + self.h(pc) * ud + bias;
    }

    /// Shared inward step: accumulate children's reflected forces on top of
    /// `own`, then split off the residual hinge force.
    #[allow(clippy::too_many_arguments)]
    fn inward_bias_force(
        &self,
        pc: &PositionCache,
        dc: &DynamicsCache,
        own: SpatialVec,
        joint_forces: &[f64],
        z: &mut [SpatialVec],
        g_epsilon: &mut [SpatialVec],
        epsilon: &mut [f64],
    ) {
        let body = self.slots.body.0;
        let mut zb = own;
        for child in &self.children {
            let c = child.0;
            zb += shift_force(&(z[c] + g_epsilon[c]), &pc.p_pb_g[c]);
        }
        let eps = self.slots.u.get(joint_forces) - self.h(pc).transpose() * zb;
        z[body] = zb;
        g_epsilon[body] = self.slots.u.get_h(&dc.g) * eps;
        self.slots.u.set(epsilon, &eps);
    }

    /// `z = X + Σ φ·z_child`; returns `Hᵀ·z`.
    fn inward_transmitted_force(
        &self,
        pc: &PositionCache,
        own: SpatialVec,
        z: &mut [SpatialVec],
    ) -> SVector<f64, N> {
        let mut zb = own;
        for child in &self.children {
            zb += shift_force(&z[child.0], &pc.p_pb_g[child.0]);
        }
        z[self.slots.body.0] = zb;
        self.h(pc).transpose() * zb
    }
}

impl<J, const N: usize> RigidBodyNode for RigidBodyNodeSpec<J, N>
where
    J: Mobilizer<N>,
{
    fn body(&self) -> BodyIndex {
        self.slots.body
    }

    fn parent(&self) -> BodyIndex {
        self.parent
    }

    fn children(&self) -> &[BodyIndex] {
        &self.children
    }

    fn add_child(&mut self, child: BodyIndex) {
        self.children.push(child);
    }

    fn mobilizer_name(&self) -> &'static str {
        self.joint.name()
    }

    fn is_reversed(&self) -> bool {
        self.reversed
    }

    fn mass_properties(&self) -> &MassProperties {
        &self.mass_props
    }

    fn dof(&self) -> usize {
        N
    }

    fn max_nq(&self) -> usize {
        self.joint.coordinates().max_nq()
    }

    fn nq_in_use(&self, options: &ModelOptions) -> usize {
        self.nq(options)
    }

    fn nu_in_use(&self, options: &ModelOptions) -> usize {
        self.joint.coordinates().nu_in_use(options)
    }

    fn q_start(&self) -> usize {
        self.slots.q.start()
    }

    fn u_start(&self) -> usize {
        self.slots.u.start()
    }

    fn quaternion_start(&self, options: &ModelOptions) -> Option<usize> {
        self.joint.coordinates().quaternion_start(options)
    }

    fn qdot_handling(&self) -> QDotHandling {
        <J::Coords as Coordinates<N>>::QDOT_HANDLING
    }

    fn quaternion_use(&self) -> QuaternionUse {
        <J::Coords as Coordinates<N>>::QUATERNION_USE
    }

    fn set_default_position_values(&self, options: &ModelOptions, q: &mut [f64]) {
        self.joint
            .coordinates()
            .default_q(options, self.slots.q.of_mut(q));
    }

    fn set_default_velocity_values(&self, u: &mut [f64]) {
        self.slots.u.of_mut(u).fill(0.0);
    }

    fn copy_q(&self, options: &ModelOptions, q_in: &[f64], q: &mut [f64]) {
        self.joint
            .coordinates()
            .copy_q(options, self.slots.q.of(q_in), self.slots.q.of_mut(q));
    }

    fn copy_u(&self, u_in: &[f64], u: &mut [f64]) {
        let local = self.slots.u.of_mut(u);
        local.copy_from_slice(self.slots.u.of(u_in));
    }

    fn realize_position(&self, options: &ModelOptions, q: &[f64], pc: &mut PositionCache) {
        let body = self.slots.body.0;
        let nq = self.nq(options);
        let range = self.slots.q.start()..self.slots.q.start() + nq;
        self.joint.coordinates().calc_sin_cos_q_norm(
            options,
            &q[range.clone()],
            &mut pc.sin_q[range.clone()],
            &mut pc.cos_q[range.clone()],
            &mut pc.q_norm[range],
        );

        let (x_fm, h_fm) = {
            let js = self.joint_state(options, q, pc);
            let x_fm = self.cross_joint_transform(&js);
            let h_fm = self.velocity_jacobian_fm(&js, &x_fm);
            (x_fm, h_fm)
        };

        let x_gp = pc.x_gb[self.parent.0];
        let x_pb = self.x_pf * x_fm * self.x_mb;
        let x_gb = x_gp * x_pb;
        pc.x_fm[body] = x_fm;
        pc.x_pb[body] = x_pb;
        pc.x_gb[body] = x_gb;
        pc.p_pb_g[body] = x_gb.translation.vector - x_gp.translation.vector;
        pc.mk[body] = self.mass_props.spatial_inertia_in_ground(&x_gb.rotation);

        // Conjugate each column into Ground: rotate by R_GF, then carry the
        // linear part from the M origin to the B origin.
        let r_gf = x_gp.rotation * self.x_pf.rotation;
        let p_mb_g = self.p_mb_g(pc);
        let mut h = HMatrix::<N>::zeros();
        for j in 0..N {
            let col = h_fm.fixed_view::<6, 1>(0, j).into_owned();
            let w = r_gf * angular(&col);
            let v = r_gf * linear(&col) + w.cross(&p_mb_g);
            h.set_column(j, &spatial_vec(&w, &v));
        }
        self.slots.u.set_h(&mut pc.h_fm, &h_fm);
        self.slots.u.set_h(&mut pc.h, &h);
    }

    fn realize_velocity(
        &self,
        options: &ModelOptions,
        q: &[f64],
        u: &[f64],
        pc: &PositionCache,
        vc: &mut VelocityCache,
    ) {
        let body = self.slots.body.0;
        let uv = self.slots.u.get(u);
        let js = self.joint_state(options, q, pc);
        let nq = self.nq(options);
        self.joint
            .coordinates()
            .calc_qdot(&js, &uv, self.q_in_use_mut(nq, &mut vc.qdot));

        vc.v_fm[body] = self.slots.u.get_h(&pc.h_fm) * uv;
        vc.v_pb_g[body] = self.h(pc) * uv;
        vc.v_gb[body] = shift_velocity(&vc.v_gb[self.parent.0], &self.p_pb_g(pc)) + vc.v_pb_g[body];
    }

    fn realize_dynamics(
        &self,
        options: &ModelOptions,
        q: &[f64],
        u: &[f64],
        pc: &PositionCache,
        vc: &VelocityCache,
        dc: &mut DynamicsCache,
    ) {
        let body = self.slots.body.0;
        let uv = self.slots.u.get(u);
        let js = self.joint_state(options, q, pc);
        let x_fm = pc.x_fm[body];
        let hdot_fm = self.velocity_jacobian_dot_fm(&js, &x_fm, &uv);

        let x_gp = pc.x_gb[self.parent.0];
        let r_gf = x_gp.rotation * self.x_pf.rotation;
        let w_gp = angular(&vc.v_gb[self.parent.0]);
        let w_gb = angular(&vc.v_gb[body]);
        let p_mb_g = self.p_mb_g(pc);
        let v_mb_g = w_gb.cross(&p_mb_g);
        let h_fm = self.slots.u.get_h(&pc.h_fm);
        let h = self.h(pc);

        // Differentiate the Ground conjugation column by column: F turns with
        // the parent, the M-to-B arm turns with this body.
        let mut hdot = HMatrix::<N>::zeros();
        for j in 0..N {
            let hfm = h_fm.fixed_view::<6, 1>(0, j).into_owned();
            let hdfm = hdot_fm.fixed_view::<6, 1>(0, j).into_owned();
            let w = angular(&h.fixed_view::<6, 1>(0, j).into_owned());
            let wdot = w_gp.cross(&w) + r_gf * angular(&hdfm);
            let vdot = w_gp.cross(&(r_gf * linear(&hfm)))
                + r_gf * linear(&hdfm)
                + wdot.cross(&p_mb_g)
                + w.cross(&v_mb_g);
            hdot.set_column(j, &spatial_vec(&wdot, &vdot));
        }
        self.slots.u.set_h(&mut dc.hdot_fm, &hdot_fm);
        self.slots.u.set_h(&mut dc.hdot, &hdot);

        let vd = hdot * uv;
        let p = self.p_pb_g(pc);
        let v_rel = linear(&vc.v_pb_g[body]);
        dc.vd_pb_g[body] = vd;
        dc.coriolis_acceleration[body] =
            vd + spatial_vec(&Vector3::zeros(), &w_gp.cross(&(w_gp.cross(&p) + v_rel)));
        dc.gyroscopic_force[body] = self
            .mass_props
            .gyroscopic_force(&pc.x_gb[body].rotation, &w_gb);
    }

    fn calc_articulated_body_inertias_inward(&self, pc: &PositionCache, dc: &mut DynamicsCache) {
        let body = self.slots.body.0;
        let mut p = pc.mk[body];
        for child in &self.children {
            p += shift_inertia(&dc.reduced_inertia[child.0], &pc.p_pb_g[child.0]);
        }
        let h = self.h(pc);
        let ph = p * h;
        let d = symmetrize(&(h.transpose() * ph));
        let di = self.invert_symmetric(&d);
        let g = ph * di;

        dc.articulated_inertia[body] = p;
        dc.reduced_inertia[body] = symmetrize(&(p - g * ph.transpose()));
        dc.centrifugal_force[body] = p * dc.coriolis_acceleration[body] + dc.gyroscopic_force[body];
        self.slots.usq.set(&mut dc.d, &d);
        self.slots.usq.set(&mut dc.di, &di);
        self.slots.u.set_h(&mut dc.g, &g);
    }

    fn calc_y_outward(&self, pc: &PositionCache, dc: &mut DynamicsCache) {
        let body = self.slots.body.0;
        let h = self.h(pc);
        let di = self.slots.usq.get(&dc.di);
        let g = self.slots.u.get_h(&dc.g);
        let tau_bar = SpatialMat::identity() - g * h.transpose();
        let psi = shift_matrix(&self.p_pb_g(pc)) * tau_bar;
        let y = h * di * h.transpose() + psi.transpose() * dc.y[self.parent.0] * psi;
        dc.y[body] = symmetrize(&y);
    }

    fn calc_u_dot_pass1_inward(
        &self,
        pc: &PositionCache,
        dc: &DynamicsCache,
        joint_forces: &[f64],
        body_forces: &[SpatialVec],
        z: &mut [SpatialVec],
        g_epsilon: &mut [SpatialVec],
        epsilon: &mut [f64],
    ) {
        let body = self.slots.body.0;
        let own = dc.centrifugal_force[body] - body_forces[body];
        self.inward_bias_force(pc, dc, own, joint_forces, z, g_epsilon, epsilon);
    }

    fn calc_u_dot_pass2_outward(
        &self,
        pc: &PositionCache,
        dc: &DynamicsCache,
        epsilon: &[f64],
        a_gb: &mut [SpatialVec],
        udot: &mut [f64],
    ) {
        let bias = dc.coriolis_acceleration[self.slots.body.0];
        self.outward_acceleration(pc, dc, epsilon, &bias, a_gb, udot);
    }

    fn calc_m_inverse_f_pass1_inward(
        &self,
        pc: &PositionCache,
        dc: &DynamicsCache,
        f: &[f64],
        z: &mut [SpatialVec],
        g_epsilon: &mut [SpatialVec],
        epsilon: &mut [f64],
    ) {
        self.inward_bias_force(pc, dc, SpatialVec::zeros(), f, z, g_epsilon, epsilon);
    }

    fn calc_m_inverse_f_pass2_outward(
        &self,
        pc: &PositionCache,
        dc: &DynamicsCache,
        epsilon: &[f64],
        a_gb: &mut [SpatialVec],
        udot: &mut [f64],
    ) {
        self.outward_acceleration(pc, dc, epsilon, &SpatialVec::zeros(), a_gb, udot);
    }

    fn calc_ma_pass1_outward(&self, pc: &PositionCache, udot: &[f64], a_gb: &mut [SpatialVec]) {
        let alpha = shift_velocity(&a_gb[self.parent.0], &self.p_pb_g(pc));
        a_gb[self.slots.body.0] = alpha + self.h(pc) * self.slots.u.get(udot);
    }

    fn calc_ma_pass2_inward(
        &self,
        pc: &PositionCache,
        a_gb: &[SpatialVec],
        f_gb: &mut [SpatialVec],
        tau: &mut [f64],
    ) {
        let body = self.slots.body.0;
        let own = pc.mk[body] * a_gb[body];
        let t = self.inward_transmitted_force(pc, own, f_gb);
        self.slots.u.set(tau, &t);
    }

    fn calc_equivalent_joint_forces(
        &self,
        pc: &PositionCache,
        body_forces: &[SpatialVec],
        z: &mut [SpatialVec],
        joint_forces: &mut [f64],
    ) {
        let t = self.inward_transmitted_force(pc, body_forces[self.slots.body.0], z);
        self.slots.u.set(joint_forces, &t);
    }

    fn calc_spatial_kinematics_from_internal(
        &self,
        pc: &PositionCache,
        v: &[f64],
        jv: &mut [SpatialVec],
    ) {
        let carried = shift_velocity(&jv[self.parent.0], &self.p_pb_g(pc));
        jv[self.slots.body.0] = carried + self.h(pc) * self.slots.u.get(v);
    }

    fn calc_internal_gradient_from_spatial(
        &self,
        pc: &PositionCache,
        x: &[SpatialVec],
        z: &mut [SpatialVec],
        jx: &mut [f64],
    ) {
        let t = self.inward_transmitted_force(pc, x[self.slots.body.0], z);
        self.slots.u.set(jx, &t);
    }

    fn set_vel_from_svel(
        &self,
        pc: &PositionCache,
        vc: &VelocityCache,
        s_vel: &SpatialVec,
        u: &mut [f64],
    ) {
        let carried = shift_velocity(&vc.v_gb[self.parent.0], &self.p_pb_g(pc));
        let h = self.h(pc);
        let hth = symmetrize(&(h.transpose() * h));
        let uv = self.invert_symmetric(&hth) * (h.transpose() * (s_vel - carried));
        self.slots.u.set(u, &uv);
    }

    fn calc_qdot(
        &self,
        options: &ModelOptions,
        q: &[f64],
        pc: &PositionCache,
        u: &[f64],
        qdot: &mut [f64],
    ) {
        let js = self.joint_state(options, q, pc);
        let nq = self.nq(options);
        self.joint.coordinates().calc_qdot(
            &js,
            &self.slots.u.get(u),
            self.q_in_use_mut(nq, qdot),
        );
    }

    fn calc_qdotdot(
        &self,
        options: &ModelOptions,
        q: &[f64],
        pc: &PositionCache,
        u: &[f64],
        udot: &[f64],
        qdotdot: &mut [f64],
    ) {
        let js = self.joint_state(options, q, pc);
        let nq = self.nq(options);
        self.joint.coordinates().calc_qdotdot(
            &js,
            &self.slots.u.get(u),
            &self.slots.u.get(udot),
            self.q_in_use_mut(nq, qdotdot),
        );
    }

    fn multiply_by_n(
        &self,
        options: &ModelOptions,
        q: &[f64],
        pc: &PositionCache,
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) {
        let js = self.joint_state(options, q, pc);
        let nq = self.nq(options);
        let coords = self.joint.coordinates();
        if matrix_on_right {
            coords.multiply_by_n(
                &js,
                true,
                &self.slots.q.of(input)[..nq],
                self.slots.u.of_mut(out),
            );
        } else {
            coords.multiply_by_n(
                &js,
                false,
                self.slots.u.of(input),
                &mut self.slots.q.of_mut(out)[..nq],
            );
        }
    }

    fn multiply_by_n_inv(
        &self,
        options: &ModelOptions,
        q: &[f64],
        pc: &PositionCache,
        matrix_on_right: bool,
        input: &[f64],
        out: &mut [f64],
    ) {
        let js = self.joint_state(options, q, pc);
        let nq = self.nq(options);
        let coords = self.joint.coordinates();
        if matrix_on_right {
            coords.multiply_by_n_inv(
                &js,
                true,
                self.slots.u.of(input),
                &mut self.slots.q.of_mut(out)[..nq],
            );
        } else {
            coords.multiply_by_n_inv(
                &js,
                false,
                &self.slots.q.of(input)[..nq],
                self.slots.u.of_mut(out),
            );
        }
    }

    fn enforce_quaternion_constraints(
        &self,
        options: &ModelOptions,
        q: &mut [f64],
        q_err: &mut [f64],
    ) -> bool {
        let q_local = self.slots.q.of_mut(q);
        if q_err.is_empty() {
            self.joint
                .coordinates()
                .enforce_quaternion_constraints(options, q_local, &mut [])
        } else {
            self.joint
                .coordinates()
                .enforce_quaternion_constraints(options, q_local, self.slots.q.of_mut(q_err))
        }
    }

    fn convert_to_euler_angles(&self, q_in: &[f64], q_out: &mut [f64]) {
        self.joint
            .coordinates()
            .convert_to_euler_angles(self.slots.q.of(q_in), self.slots.q.of_mut(q_out));
    }

    fn convert_to_quaternions(&self, q_in: &[f64], q_out: &mut [f64]) {
        self.joint
            .coordinates()
            .convert_to_quaternions(self.slots.q.of(q_in), self.slots.q.of_mut(q_out));
    }

    fn set_q_to_fit_transform(&self, options: &ModelOptions, x_fm: &Transform, q: &mut [f64]) {
        let mut target = *x_fm;
        if self.reversed {
            target = target.inverse();
        }
        let nq = self.nq(options);
        self.joint
            .fit_q_to_transform(options, &target, &mut self.slots.q.of_mut(q)[..nq]);
    }

    fn set_u_to_fit_velocity(
        &self,
        options: &ModelOptions,
        q: &[f64],
        v_fm: &SpatialVec,
        u: &mut [f64],
    ) {
        let q_local = self.local_q(options, q);
        let scratch = JointScratch::compute::<_, N>(self.joint.coordinates(), options, q_local);
        let js = scratch.view(options, q_local);
        let target = if self.reversed {
            let x_mf = self.joint.cross_joint_transform(&js);
            reverse_relative_velocity(&x_mf, v_fm)
        } else {
            *v_fm
        };
        let mut uv = self.slots.u.get(u);
        self.joint.fit_u_to_velocity(&js, &target, &mut uv);
        self.slots.u.set(u, &uv);
    }

    fn velocity_jacobian_in_ground(&self, pc: &PositionCache) -> DMatrix<f64> {
        DMatrix::from_column_slice(6, N, self.h(pc).as_slice())
    }

    fn mobility_mass_matrix(&self, dc: &DynamicsCache) -> (DMatrix<f64>, DMatrix<f64>) {
        (
            DMatrix::from_column_slice(N, N, self.slots.usq.get(&dc.d).as_slice()),
            DMatrix::from_column_slice(N, N, self.slots.usq.get(&dc.di).as_slice()),
        )
    }
}

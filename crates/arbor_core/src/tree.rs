//! Reference traversal driver.
//!
//! [`MultibodyTree`] owns the nodes in creation order. A parent always exists
//! before its children, so that order is base-to-tip and its reverse is
//! tip-to-base. [`State`] carries the coordinates, speeds and per-stage
//! caches for one configuration of a frozen tree.

use anyhow::{bail, Result};
use nalgebra::Vector3;
use tracing::{debug, trace};

use crate::cache::{AccelerationCache, DynamicsCache, PassScratch, PositionCache, VelocityCache};
use crate::coordinates::{Coordinates, QDotHandling, QuaternionUse};
use crate::error::TopologyError;
use crate::mobilizer::Mobilizer;
use crate::node::{RigidBodyNode, RigidBodyNodeSpec};
use crate::options::{KernelSettings, ModelOptions};
use crate::slots::{BodyIndex, SlotAllocator, SlotCounts};
use crate::spatial::{spatial_vec, MassProperties, SpatialVec, Transform};

/// Computation stages, in the order they must be realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Topology,
    Position,
    Velocity,
    Dynamics,
    Acceleration,
}

/// Coordinates, speeds and stage caches for one configuration.
#[derive(Debug, Clone)]
pub struct State {
    options: ModelOptions,
    counts: SlotCounts,
    q: Vec<f64>,
    u: Vec<f64>,
    stage: Stage,
    position: PositionCache,
    velocity: VelocityCache,
    dynamics: DynamicsCache,
    acceleration: AccelerationCache,
}

impl State {
    fn new(counts: SlotCounts, options: ModelOptions) -> Self {
        Self {
            options,
            counts,
            q: vec![0.0; counts.nq],
            u: vec![0.0; counts.nu],
            stage: Stage::Topology,
            position: PositionCache::new(&counts),
            velocity: VelocityCache::new(&counts),
            dynamics: DynamicsCache::new(&counts),
            acceleration: AccelerationCache::new(&counts),
        }
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn q(&self) -> &[f64] {
        &self.q
    }

    pub fn u(&self) -> &[f64] {
        &self.u
    }

    /// Mutable coordinates; every realized stage is discarded.
    pub fn q_mut(&mut self) -> &mut [f64] {
        self.invalidate(Stage::Topology);
        &mut self.q
    }

    /// Mutable speeds; stages past Position are discarded.
    pub fn u_mut(&mut self) -> &mut [f64] {
        self.invalidate(Stage::Position);
        &mut self.u
    }

    pub fn set_q(&mut self, q: &[f64]) -> Result<()> {
        if q.len() != self.q.len() {
            bail!(
                "Coordinate vector has length {} but the tree has {}",
                q.len(),
                self.q.len()
            );
        }
        self.q_mut().copy_from_slice(q);
        Ok(())
    }

    pub fn set_u(&mut self, u: &[f64]) -> Result<()> {
        if u.len() != self.u.len() {
            bail!(
                "Speed vector has length {} but the tree has {}",
                u.len(),
                self.u.len()
            );
        }
        self.u_mut().copy_from_slice(u);
        Ok(())
    }

    pub fn position_cache(&self) -> Result<&PositionCache> {
        self.require(Stage::Position)?;
        Ok(&self.position)
    }

    pub fn velocity_cache(&self) -> Result<&VelocityCache> {
        self.require(Stage::Velocity)?;
        Ok(&self.velocity)
    }

    pub fn dynamics_cache(&self) -> Result<&DynamicsCache> {
        self.require(Stage::Dynamics)?;
        Ok(&self.dynamics)
    }

    pub fn acceleration_cache(&self) -> Result<&AccelerationCache> {
        self.require(Stage::Acceleration)?;
        Ok(&self.acceleration)
    }

    pub fn qdot(&self) -> Result<&[f64]> {
        Ok(&self.velocity_cache()?.qdot)
    }

    pub fn udot(&self) -> Result<&[f64]> {
        Ok(&self.acceleration_cache()?.udot)
    }

    fn invalidate(&mut self, keep: Stage) {
        self.stage = self.stage.min(keep);
    }

    fn require(&self, stage: Stage) -> Result<()> {
        if self.stage < stage {
            bail!(
                "Stage {:?} has not been realized (state is at {:?})",
                stage,
                self.stage
            );
        }
        Ok(())
    }
}

/// A tree of rigid bodies hanging off Ground (body 0).
#[derive(Debug, Default)]
pub struct MultibodyTree {
    nodes: Vec<Box<dyn RigidBodyNode>>,
    allocator: SlotAllocator,
    settings: KernelSettings,
    counts: Option<SlotCounts>,
}

impl MultibodyTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: KernelSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Attach a body to `parent` through `joint`. `x_pf` places the joint's
    /// inboard frame on the parent, `x_bm` its outboard frame on the new body.
    pub fn add_body<J, const N: usize>(
        &mut self,
        parent: BodyIndex,
        joint: J,
        mass_props: MassProperties,
        x_pf: Transform,
        x_bm: Transform,
    ) -> Result<BodyIndex>
    where
        J: Mobilizer<N> + 'static,
    {
        Ok(self.insert(parent, joint, mass_props, x_pf, x_bm, false)?)
    }

    /// Like [`add_body`](Self::add_body), but the joint's hooks describe the
    /// parent-side frame moving relative to the body-side frame.
    pub fn add_reversed_body<J, const N: usize>(
        &mut self,
        parent: BodyIndex,
        joint: J,
        mass_props: MassProperties,
        x_pf: Transform,
        x_bm: Transform,
    ) -> Result<BodyIndex>
    where
        J: Mobilizer<N> + 'static,
    {
        Ok(self.insert(parent, joint, mass_props, x_pf, x_bm, true)?)
    }

    fn insert<J, const N: usize>(
        &mut self,
        parent: BodyIndex,
        joint: J,
        mass_props: MassProperties,
        x_pf: Transform,
        x_bm: Transform,
        reversed: bool,
    ) -> std::result::Result<BodyIndex, TopologyError>
    where
        J: Mobilizer<N> + 'static,
    {
        if self.counts.is_some() {
            return Err(TopologyError::Frozen);
        }
        let bodies = self.nodes.len() + 1;
        if parent.0 >= bodies {
            return Err(TopologyError::UnknownParent {
                parent: parent.0,
                bodies,
            });
        }
        if !mass_props.is_valid() {
            return Err(if mass_props.mass < 0.0 {
                TopologyError::NegativeMass {
                    body: bodies,
                    mass: mass_props.mass,
                }
            } else {
                TopologyError::NonFiniteMass { body: bodies }
            });
        }

        let slots = self
            .allocator
            .allocate::<N>(joint.coordinates().max_nq());
        let body = slots.body;
        let node = RigidBodyNodeSpec::new(
            joint, mass_props, x_pf, x_bm, reversed, parent, slots, self.settings,
        );
        if !parent.is_ground() {
            self.nodes[parent.0 - 1].add_child(body);
        }
        trace!(
            body = body.0,
            parent = parent.0,
            mobilizer = node.mobilizer_name(),
            reversed,
            "added body"
        );
        self.nodes.push(Box::new(node));
        Ok(body)
    }

    /// Fix the topology. Slot totals are final from here on.
    pub fn freeze(&mut self) -> Result<SlotCounts> {
        if self.counts.is_some() {
            return Err(TopologyError::Frozen.into());
        }
        let counts = self.allocator.counts();
        debug!(
            bodies = counts.nbody,
            nq = counts.nq,
            nu = counts.nu,
            nusq = counts.nusq,
            "froze multibody tree"
        );
        self.counts = Some(counts);
        Ok(counts)
    }

    pub fn is_frozen(&self) -> bool {
        self.counts.is_some()
    }

    pub fn counts(&self) -> Result<SlotCounts> {
        Ok(self.counts.ok_or(TopologyError::NotFrozen)?)
    }

    /// Number of bodies including Ground.
    pub fn num_bodies(&self) -> usize {
        self.nodes.len() + 1
    }

    pub fn node(&self, body: BodyIndex) -> Result<&dyn RigidBodyNode> {
        if body.is_ground() || body.0 > self.nodes.len() {
            bail!("Body {} has no mobilizer", body.0);
        }
        Ok(self.nodes[body.0 - 1].as_ref())
    }

    pub fn nodes(&self) -> impl DoubleEndedIterator<Item = &dyn RigidBodyNode> {
        self.nodes.iter().map(|n| n.as_ref())
    }

    /// Nodes whose orientation can be a quaternion. Only these take part in
    /// renormalization and Euler/quaternion switching.
    pub fn nodes_with_quaternions(&self) -> impl Iterator<Item = &dyn RigidBodyNode> {
        self.nodes().filter(|node| node.quaternion_use() != QuaternionUse::Never)
    }

    /// Whether every mobilizer has `qdot == u`, making N the identity.
    pub fn qdot_equals_u(&self) -> bool {
        self.nodes().all(|node| node.qdot_handling() == QDotHandling::SameAsU)
    }

    /// A state holding default coordinates (zero angles, identity
    /// quaternions) and zero speeds.
    pub fn default_state(&self, options: ModelOptions) -> Result<State> {
        let mut state = State::new(self.counts()?, options);
        for node in &self.nodes {
            node.set_default_position_values(&state.options, &mut state.q);
            node.set_default_velocity_values(&mut state.u);
        }
        Ok(state)
    }

    fn check_state(&self, state: &State) -> Result<()> {
        let counts = self.counts()?;
        if state.counts != counts {
            bail!("State was created for a different tree");
        }
        Ok(())
    }

    fn check_len(what: &str, got: usize, want: usize) -> Result<()> {
        if got != want {
            bail!("{what} has length {got}, expected {want}");
        }
        Ok(())
    }

    pub fn realize_position(&self, state: &mut State) -> Result<()> {
        self.check_state(state)?;
        for node in &self.nodes {
            node.realize_position(&state.options, &state.q, &mut state.position);
        }
        state.stage = Stage::Position;
        trace!("realized position stage");
        Ok(())
    }

    pub fn realize_velocity(&self, state: &mut State) -> Result<()> {
        self.check_state(state)?;
        state.require(Stage::Position)?;
        for node in &self.nodes {
            node.realize_velocity(
                &state.options,
                &state.q,
                &state.u,
                &state.position,
                &mut state.velocity,
            );
        }
        state.stage = Stage::Velocity;
        trace!("realized velocity stage");
        Ok(())
    }

    /// Jacobian derivatives and bias terms outward, articulated inertias
    /// inward, then the outward projection `Y`.
    pub fn realize_dynamics(&self, state: &mut State) -> Result<()> {
        self.check_state(state)?;
        state.require(Stage::Velocity)?;
        for node in &self.nodes {
            node.realize_dynamics(
                &state.options,
                &state.q,
                &state.u,
                &state.position,
                &state.velocity,
                &mut state.dynamics,
            );
        }
        for node in self.nodes.iter().rev() {
            node.calc_articulated_body_inertias_inward(&state.position, &mut state.dynamics);
        }
        for node in &self.nodes {
            node.calc_y_outward(&state.position, &mut state.dynamics);
        }
        state.stage = Stage::Dynamics;
        trace!("realized dynamics stage");
        Ok(())
    }

    /// Forward dynamics: generalized accelerations for applied mobility
    /// forces and body forces (moment about the body origin plus force, in
    /// Ground). Ground does not accelerate; supply gravity as body forces.
    pub fn realize_acceleration(
        &self,
        state: &mut State,
        joint_forces: &[f64],
        body_forces: &[SpatialVec],
    ) -> Result<()> {
        self.check_state(state)?;
        state.require(Stage::Dynamics)?;
        Self::check_len("Joint force vector", joint_forces.len(), state.counts.nu)?;
        Self::check_len("Body force vector", body_forces.len(), state.counts.nbody)?;

        let ac = &mut state.acceleration;
        for node in self.nodes.iter().rev() {
            node.calc_u_dot_pass1_inward(
                &state.position,
                &state.dynamics,
                joint_forces,
                body_forces,
                &mut ac.z,
                &mut ac.g_epsilon,
                &mut ac.epsilon,
            );
        }
        for node in &self.nodes {
            node.calc_u_dot_pass2_outward(
                &state.position,
                &state.dynamics,
                &ac.epsilon,
                &mut ac.a_gb,
                &mut ac.udot,
            );
            node.calc_qdotdot(
                &state.options,
                &state.q,
                &state.position,
                &state.u,
                &ac.udot,
                &mut ac.qdotdot,
            );
            node.realize_acceleration();
        }
        state.stage = Stage::Acceleration;
        trace!("realized acceleration stage");
        Ok(())
    }

    /// `M⁻¹·f` without forming M.
    pub fn calc_m_inverse_f(&self, state: &State, f: &[f64]) -> Result<Vec<f64>> {
        self.check_state(state)?;
        state.require(Stage::Dynamics)?;
        Self::check_len("Force vector", f.len(), state.counts.nu)?;

        let mut scratch = PassScratch::new(&state.counts);
        let mut udot = vec![0.0; state.counts.nu];
        for node in self.nodes.iter().rev() {
            node.calc_m_inverse_f_pass1_inward(
                &state.position,
                &state.dynamics,
                f,
                &mut scratch.z,
                &mut scratch.g_epsilon,
                &mut scratch.epsilon,
            );
        }
        for node in &self.nodes {
            node.calc_m_inverse_f_pass2_outward(
                &state.position,
                &state.dynamics,
                &scratch.epsilon,
                &mut scratch.a_gb,
                &mut udot,
            );
        }
        Ok(udot)
    }

    /// `M·udot` without forming M.
    pub fn calc_ma(&self, state: &State, udot: &[f64]) -> Result<Vec<f64>> {
        self.check_state(state)?;
        state.require(Stage::Position)?;
        Self::check_len("Acceleration vector", udot.len(), state.counts.nu)?;

        let mut a_gb = vec![SpatialVec::zeros(); state.counts.nbody];
        let mut f_gb = vec![SpatialVec::zeros(); state.counts.nbody];
        let mut tau = vec![0.0; state.counts.nu];
        for node in &self.nodes {
            node.calc_ma_pass1_outward(&state.position, udot, &mut a_gb);
        }
        for node in self.nodes.iter().rev() {
            node.calc_ma_pass2_inward(&state.position, &a_gb, &mut f_gb, &mut tau);
        }
        Ok(tau)
    }

    /// Generalized forces equivalent to the applied body forces.
    pub fn calc_equivalent_joint_forces(
        &self,
        state: &State,
        body_forces: &[SpatialVec],
    ) -> Result<Vec<f64>> {
        self.check_state(state)?;
        state.require(Stage::Position)?;
        Self::check_len("Body force vector", body_forces.len(), state.counts.nbody)?;

        let mut z = vec![SpatialVec::zeros(); state.counts.nbody];
        let mut tau = vec![0.0; state.counts.nu];
        for node in self.nodes.iter().rev() {
            node.calc_equivalent_joint_forces(&state.position, body_forces, &mut z, &mut tau);
        }
        Ok(tau)
    }

    /// `J·v`: body spatial velocities produced by speed-like vector `v`.
    pub fn calc_spatial_kinematics_from_internal(
        &self,
        state: &State,
        v: &[f64],
    ) -> Result<Vec<SpatialVec>> {
        self.check_state(state)?;
        state.require(Stage::Position)?;
        Self::check_len("Speed vector", v.len(), state.counts.nu)?;

        let mut jv = vec![SpatialVec::zeros(); state.counts.nbody];
        for node in &self.nodes {
            node.calc_spatial_kinematics_from_internal(&state.position, v, &mut jv);
        }
        Ok(jv)
    }

    /// `Jᵀ·X` for body spatial forces `x`.
    pub fn calc_internal_gradient_from_spatial(
        &self,
        state: &State,
        x: &[SpatialVec],
    ) -> Result<Vec<f64>> {
        self.check_state(state)?;
        state.require(Stage::Position)?;
        Self::check_len("Spatial force vector", x.len(), state.counts.nbody)?;

        let mut z = vec![SpatialVec::zeros(); state.counts.nbody];
        let mut jx = vec![0.0; state.counts.nu];
        for node in self.nodes.iter().rev() {
            node.calc_internal_gradient_from_spatial(&state.position, x, &mut z, &mut jx);
        }
        Ok(jx)
    }

    /// Set the speeds of `body`'s mobilizer so that its Ground spatial
    /// velocity comes as close to `s_vel` as the joint allows.
    pub fn set_vel_from_svel(
        &self,
        state: &mut State,
        body: BodyIndex,
        s_vel: &SpatialVec,
    ) -> Result<()> {
        self.check_state(state)?;
        state.require(Stage::Velocity)?;
        let node = self.node(body)?;
        node.set_vel_from_svel(&state.position, &state.velocity, s_vel, &mut state.u);
        state.invalidate(Stage::Position);
        Ok(())
    }

    /// Gravity as body forces about each body origin.
    pub fn gravity_forces(&self, state: &State, gravity: &Vector3<f64>) -> Result<Vec<SpatialVec>> {
        self.check_state(state)?;
        state.require(Stage::Position)?;
        let mut forces = vec![SpatialVec::zeros(); state.counts.nbody];
        for node in &self.nodes {
            let body = node.body().0;
            let props = node.mass_properties();
            let f = gravity * props.mass;
            let c = props.com_in_ground(&state.position.x_gb[body].rotation);
            forces[body] = spatial_vec(&c.cross(&f), &f);
        }
        Ok(forces)
    }

    pub fn kinetic_energy(&self, state: &State) -> Result<f64> {
        self.check_state(state)?;
        state.require(Stage::Velocity)?;
        Ok(self
            .nodes
            .iter()
            .map(|node| {
                let b = node.body().0;
                let v = state.velocity.v_gb[b];
                0.5 * v.dot(&(state.position.mk[b] * v))
            })
            .sum())
    }

    /// `N·input` (u-sized to q-sized), or `input·N` (q-sized to u-sized)
    /// when `matrix_on_right`.
    pub fn multiply_by_n(
        &self,
        state: &State,
        matrix_on_right: bool,
        input: &[f64],
    ) -> Result<Vec<f64>> {
        self.check_state(state)?;
        state.require(Stage::Position)?;
        let (n_in, n_out) = if matrix_on_right {
            (state.counts.nq, state.counts.nu)
        } else {
            (state.counts.nu, state.counts.nq)
        };
        Self::check_len("Input vector", input.len(), n_in)?;
        if self.qdot_equals_u() {
            return Ok(input.to_vec());
        }
        let mut out = vec![0.0; n_out];
        for node in &self.nodes {
            node.multiply_by_n(
                &state.options,
                &state.q,
                &state.position,
                matrix_on_right,
                input,
                &mut out,
            );
        }
        Ok(out)
    }

    /// `N⁻¹·input` (q-sized to u-sized), or `input·N⁻¹` (u-sized to
    /// q-sized) when `matrix_on_right`.
    pub fn multiply_by_n_inv(
        &self,
        state: &State,
        matrix_on_right: bool,
        input: &[f64],
    ) -> Result<Vec<f64>> {
        self.check_state(state)?;
        state.require(Stage::Position)?;
        let (n_in, n_out) = if matrix_on_right {
            (state.counts.nu, state.counts.nq)
        } else {
            (state.counts.nq, state.counts.nu)
        };
        Self::check_len("Input vector", input.len(), n_in)?;
        if self.qdot_equals_u() {
            return Ok(input.to_vec());
        }
        let mut out = vec![0.0; n_out];
        for node in &self.nodes {
            node.multiply_by_n_inv(
                &state.options,
                &state.q,
                &state.position,
                matrix_on_right,
                input,
                &mut out,
            );
        }
        Ok(out)
    }

    /// Renormalize every quaternion in use, projecting `q_err` (q-sized, or
    /// empty) the same way. Returns whether any coordinate was touched.
    pub fn normalize_quaternions(&self, state: &mut State, q_err: &mut [f64]) -> Result<bool> {
        self.check_state(state)?;
        if !q_err.is_empty() {
            Self::check_len("Coordinate error vector", q_err.len(), state.counts.nq)?;
        }
        let mut touched = false;
        for node in self.nodes_with_quaternions() {
            touched |= node.enforce_quaternion_constraints(&state.options, &mut state.q, q_err);
        }
        if touched {
            state.invalidate(Stage::Topology);
        }
        Ok(touched)
    }

    /// Switch orientation coordinates between quaternions and Euler angles,
    /// rewriting `q` so every pose is preserved.
    pub fn set_use_euler_angles(&self, state: &mut State, use_euler_angles: bool) -> Result<()> {
        self.check_state(state)?;
        if state.options.use_euler_angles == use_euler_angles {
            return Ok(());
        }
        let q_in = state.q.clone();
        for node in self.nodes_with_quaternions() {
            if use_euler_angles {
                node.convert_to_euler_angles(&q_in, &mut state.q);
            } else {
                node.convert_to_quaternions(&q_in, &mut state.q);
            }
        }
        state.options.use_euler_angles = use_euler_angles;
        state.invalidate(Stage::Topology);
        debug!(use_euler_angles, "switched orientation coordinates");
        Ok(())
    }

    pub fn set_q_to_fit_transform(
        &self,
        state: &mut State,
        body: BodyIndex,
        x_fm: &Transform,
    ) -> Result<()> {
        self.check_state(state)?;
        let node = self.node(body)?;
        node.set_q_to_fit_transform(&state.options, x_fm, &mut state.q);
        state.invalidate(Stage::Topology);
        Ok(())
    }

    pub fn set_u_to_fit_velocity(
        &self,
        state: &mut State,
        body: BodyIndex,
        v_fm: &SpatialVec,
    ) -> Result<()> {
        self.check_state(state)?;
        let node = self.node(body)?;
        node.set_u_to_fit_velocity(&state.options, &state.q, v_fm, &mut state.u);
        state.invalidate(Stage::Position);
        Ok(())
    }

    /// Copy one body's coordinates and speeds between states of this tree.
    pub fn copy_body_state(&self, body: BodyIndex, from: &State, to: &mut State) -> Result<()> {
        self.check_state(from)?;
        self.check_state(to)?;
        if from.options != to.options {
            bail!("States use different modeling options");
        }
        let node = self.node(body)?;
        node.copy_q(&from.options, &from.q, &mut to.q);
        node.copy_u(&from.u, &mut to.u);
        to.invalidate(Stage::Topology);
        Ok(())
    }
}

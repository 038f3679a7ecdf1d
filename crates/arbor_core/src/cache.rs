//! Per-stage cache buffers.
//!
//! Each stage owns flat, pre-sized buffers for the whole tree. Body-indexed
//! entries are `Vec`s with one element per body (Ground included at index 0);
//! mobility-indexed entries are flat scalars addressed through
//! [`USlot`](crate::slots::USlot) / [`USqSlot`](crate::slots::USqSlot).

use nalgebra::Vector3;

use crate::slots::SlotCounts;
use crate::spatial::{SpatialMat, SpatialVec, Transform};

/// Position-stage results.
#[derive(Debug, Clone)]
pub struct PositionCache {
    /// Sine of angular coordinates; other slots are left at zero.
    pub sin_q: Vec<f64>,
    /// Cosine of angular coordinates; other slots are left at zero.
    pub cos_q: Vec<f64>,
    /// Normalized copy of any quaternion in use; other slots are left at zero.
    pub q_norm: Vec<f64>,

    pub x_fm: Vec<Transform>,
    pub x_pb: Vec<Transform>,
    pub x_gb: Vec<Transform>,
    /// Parent origin to body origin, Ground components.
    pub p_pb_g: Vec<Vector3<f64>>,
    /// Rigid-body spatial inertia about the body origin, Ground components.
    pub mk: Vec<SpatialMat>,

    /// H_FM columns, 6 scalars per mobility.
    pub h_fm: Vec<f64>,
    /// H_PB_G columns, 6 scalars per mobility.
    pub h: Vec<f64>,
}

impl PositionCache {
    pub fn new(counts: &SlotCounts) -> Self {
        Self {
            sin_q: vec![0.0; counts.nq],
            cos_q: vec![0.0; counts.nq],
            q_norm: vec![0.0; counts.nq],
            x_fm: vec![Transform::identity(); counts.nbody],
            x_pb: vec![Transform::identity(); counts.nbody],
            x_gb: vec![Transform::identity(); counts.nbody],
            p_pb_g: vec![Vector3::zeros(); counts.nbody],
            mk: vec![SpatialMat::zeros(); counts.nbody],
            h_fm: vec![0.0; 6 * counts.nu],
            h: vec![0.0; 6 * counts.nu],
        }
    }
}

/// Velocity-stage results.
#[derive(Debug, Clone)]
pub struct VelocityCache {
    pub qdot: Vec<f64>,
    pub v_fm: Vec<SpatialVec>,
    pub v_pb_g: Vec<SpatialVec>,
    pub v_gb: Vec<SpatialVec>,
}

impl VelocityCache {
    pub fn new(counts: &SlotCounts) -> Self {
        Self {
            qdot: vec![0.0; counts.nq],
            v_fm: vec![SpatialVec::zeros(); counts.nbody],
            v_pb_g: vec![SpatialVec::zeros(); counts.nbody],
            v_gb: vec![SpatialVec::zeros(); counts.nbody],
        }
    }
}

/// Dynamics-stage results: Jacobian derivatives, articulated inertias and
/// the operators derived from them.
#[derive(Debug, Clone)]
pub struct DynamicsCache {
    pub hdot_fm: Vec<f64>,
    pub hdot: Vec<f64>,
    /// Gain operator G = P·H·DI, 6 scalars per mobility.
    pub g: Vec<f64>,
    /// Mobility-space mass matrix D = Hᵀ·P·H.
    pub d: Vec<f64>,
    pub di: Vec<f64>,

    /// Ḣ·u: acceleration this joint contributes at zero udot.
    pub vd_pb_g: Vec<SpatialVec>,
    /// Full velocity-dependent part of the body acceleration.
    pub coriolis_acceleration: Vec<SpatialVec>,
    pub gyroscopic_force: Vec<SpatialVec>,
    /// P·a + b, the force needed to sustain the velocity-dependent accelerations.
    pub centrifugal_force: Vec<SpatialVec>,

    /// Articulated-body inertia P about the body origin.
    pub articulated_inertia: Vec<SpatialMat>,
    /// P − G·Hᵀ·P, what the subtree presents to its parent (before shifting).
    pub reduced_inertia: Vec<SpatialMat>,
    /// Outward projection: body acceleration response to a unit body force.
    pub y: Vec<SpatialMat>,
}

impl DynamicsCache {
    pub fn new(counts: &SlotCounts) -> Self {
        Self {
            hdot_fm: vec![0.0; 6 * counts.nu],
            hdot: vec![0.0; 6 * counts.nu],
            g: vec![0.0; 6 * counts.nu],
            d: vec![0.0; counts.nusq],
            di: vec![0.0; counts.nusq],
            vd_pb_g: vec![SpatialVec::zeros(); counts.nbody],
            coriolis_acceleration: vec![SpatialVec::zeros(); counts.nbody],
            gyroscopic_force: vec![SpatialVec::zeros(); counts.nbody],
            centrifugal_force: vec![SpatialVec::zeros(); counts.nbody],
            articulated_inertia: vec![SpatialMat::zeros(); counts.nbody],
            reduced_inertia: vec![SpatialMat::zeros(); counts.nbody],
            y: vec![SpatialMat::zeros(); counts.nbody],
        }
    }
}

/// Acceleration-stage results of forward dynamics.
#[derive(Debug, Clone)]
pub struct AccelerationCache {
    /// Articulated bias force z per body.
    pub z: Vec<SpatialVec>,
    /// G·ε per body.
    pub g_epsilon: Vec<SpatialVec>,
    /// Residual (net hinge) generalized force ε = τ − Hᵀ·z.
    pub epsilon: Vec<f64>,
    pub udot: Vec<f64>,
    pub qdotdot: Vec<f64>,
    pub a_gb: Vec<SpatialVec>,
}

impl AccelerationCache {
    pub fn new(counts: &SlotCounts) -> Self {
        Self {
            z: vec![SpatialVec::zeros(); counts.nbody],
            g_epsilon: vec![SpatialVec::zeros(); counts.nbody],
            epsilon: vec![0.0; counts.nu],
            udot: vec![0.0; counts.nu],
            qdotdot: vec![0.0; counts.nq],
            a_gb: vec![SpatialVec::zeros(); counts.nbody],
        }
    }
}

/// Scratch arrays for the paired inward/outward passes that must not disturb
/// the acceleration cache.
#[derive(Debug, Clone)]
pub struct PassScratch {
    pub z: Vec<SpatialVec>,
    pub g_epsilon: Vec<SpatialVec>,
    pub epsilon: Vec<f64>,
    pub a_gb: Vec<SpatialVec>,
}

impl PassScratch {
    pub fn new(counts: &SlotCounts) -> Self {
        Self {
            z: vec![SpatialVec::zeros(); counts.nbody],
            g_epsilon: vec![SpatialVec::zeros(); counts.nbody],
            epsilon: vec![0.0; counts.nu],
            a_gb: vec![SpatialVec::zeros(); counts.nbody],
        }
    }
}

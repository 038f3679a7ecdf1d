//! The `arbor_core` crate is the per-joint kernel of an O(n) recursive
//! multibody dynamics engine. One generic node type, parametrized by its
//! mobility count, serves every joint from 1 to 6 degrees of freedom.
//!
//! Key components:
//! - **Spatial**: 6D spatial vectors, shift operators and rigid-body inertias.
//! - **Slots / Cache**: disjoint per-node ranges into flat per-stage buffers.
//! - **Coordinates**: q ↔ u maps, including quaternion and Euler-angle orientation.
//! - **Mobilizer**: the hook contract a concrete joint type implements, with
//!   reversed-joint adapters.
//! - **Node**: position, velocity and dynamics realization, articulated-body
//!   inertias, and the paired inward/outward force-acceleration passes.
//! - **Tree**: a reference driver that sequences the node passes.
pub mod cache;
pub mod coordinates;
pub mod error;
pub mod mobilizer;
pub mod mobilizers;
pub mod node;
pub mod options;
pub mod slots;
pub mod spatial;
pub mod tree;

pub use error::TopologyError;
pub use mobilizer::Mobilizer;
pub use node::{RigidBodyNode, RigidBodyNodeSpec};
pub use options::{KernelSettings, ModelOptions};
pub use slots::BodyIndex;
pub use spatial::{MassProperties, SpatialVec, Transform};
pub use tree::{MultibodyTree, Stage, State};

//! Slot addressing into the whole-tree state and cache buffers.
//!
//! Every node owns three contiguous ranges, handed out once while the tree is
//! being built: `max_nq` generalized coordinates, `N` generalized speeds and
//! `N*N` mobility-squared entries. The typed slots below are the only place
//! that turns an offset into a slice, so a node can only ever touch its own
//! range.

use std::ops::Range;

use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

use crate::spatial::HMatrix;

/// Index of a body (and of the mobilizer connecting it to its parent).
/// Ground is always body 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BodyIndex(pub usize);

impl BodyIndex {
    pub const GROUND: BodyIndex = BodyIndex(0);

    pub fn is_ground(self) -> bool {
        self.0 == 0
    }
}

/// Generalized-coordinate range of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QSlot {
    start: usize,
    len: usize,
}

impl QSlot {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len
    }

    pub fn of<'a>(&self, q: &'a [f64]) -> &'a [f64] {
        &q[self.range()]
    }

    pub fn of_mut<'a>(&self, q: &'a mut [f64]) -> &'a mut [f64] {
        &mut q[self.range()]
    }
}

/// Generalized-speed range of one node with `N` mobilities.
///
/// Speed-like buffers hold one scalar per mobility; Jacobian-like buffers hold
/// one spatial column (6 scalars) per mobility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct USlot<const N: usize> {
    start: usize,
}

impl<const N: usize> USlot<N> {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.start + N
    }

    pub fn of<'a>(&self, u: &'a [f64]) -> &'a [f64] {
        &u[self.range()]
    }

    pub fn of_mut<'a>(&self, u: &'a mut [f64]) -> &'a mut [f64] {
        &mut u[self.range()]
    }

    pub fn get(&self, u: &[f64]) -> SVector<f64, N> {
        SVector::from_column_slice(self.of(u))
    }

    pub fn set(&self, u: &mut [f64], value: &SVector<f64, N>) {
        self.of_mut(u).copy_from_slice(value.as_slice());
    }

    fn column_range(&self) -> Range<usize> {
        6 * self.start..6 * (self.start + N)
    }

    pub fn get_h(&self, columns: &[f64]) -> HMatrix<N> {
        HMatrix::<N>::from_column_slice(&columns[self.column_range()])
    }

    pub fn set_h(&self, columns: &mut [f64], value: &HMatrix<N>) {
        columns[self.column_range()].copy_from_slice(value.as_slice());
    }
}

/// Mobility-squared range of one node with `N` mobilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct USqSlot<const N: usize> {
    start: usize,
}

impl<const N: usize> USqSlot<N> {
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.start + N * N
    }

    pub fn get(&self, usq: &[f64]) -> SMatrix<f64, N, N> {
        SMatrix::from_column_slice(&usq[self.range()])
    }

    pub fn set(&self, usq: &mut [f64], value: &SMatrix<f64, N, N>) {
        usq[self.range()].copy_from_slice(value.as_slice());
    }
}

/// The full set of slots owned by one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeSlots<const N: usize> {
    pub body: BodyIndex,
    pub q: QSlot,
    pub u: USlot<N>,
    pub usq: USqSlot<N>,
}

/// Totals of every slot kind once the topology is frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SlotCounts {
    pub nbody: usize,
    pub nq: usize,
    pub nu: usize,
    pub nusq: usize,
}

/// Monotonic slot dispenser. Slots are handed out in node creation order and
/// never reused, so ranges are contiguous and disjoint by construction.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    next_body: usize,
    next_q: usize,
    next_u: usize,
    next_usq: usize,
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotAllocator {
    /// Body 0 is reserved for Ground, which owns no coordinates.
    pub fn new() -> Self {
        Self {
            next_body: 1,
            next_q: 0,
            next_u: 0,
            next_usq: 0,
        }
    }

    pub fn allocate<const N: usize>(&mut self, max_nq: usize) -> NodeSlots<N> {
        let slots = NodeSlots {
            body: BodyIndex(self.next_body),
            q: QSlot {
                start: self.next_q,
                len: max_nq,
            },
            u: USlot { start: self.next_u },
            usq: USqSlot {
                start: self.next_usq,
            },
        };
        self.next_body += 1;
        self.next_q += max_nq;
        self.next_u += N;
        self.next_usq += N * N;
        slots
    }

    pub fn counts(&self) -> SlotCounts {
        SlotCounts {
            nbody: self.next_body,
            nq: self.next_q,
            nu: self.next_u,
            nusq: self.next_usq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_hands_out_contiguous_disjoint_ranges() {
        let mut alloc = SlotAllocator::new();
        let a: NodeSlots<1> = alloc.allocate(1);
        let b: NodeSlots<3> = alloc.allocate(4);
        let c: NodeSlots<6> = alloc.allocate(7);

        assert_eq!(a.body, BodyIndex(1));
        assert_eq!(c.body, BodyIndex(3));
        assert_eq!(a.q.range(), 0..1);
        assert_eq!(b.q.range(), 1..5);
        assert_eq!(c.q.range(), 5..12);
        assert_eq!(b.u.range(), 1..4);
        assert_eq!(c.u.range(), 4..10);
        assert_eq!(b.usq.range(), 1..10);
        assert_eq!(c.usq.range(), 10..46);

        let counts = alloc.counts();
        assert_eq!(counts.nbody, 4);
        assert_eq!(counts.nq, 12);
        assert_eq!(counts.nu, 10);
        assert_eq!(counts.nusq, 46);
    }

    #[test]
    fn typed_accessors_round_trip_through_flat_buffers() {
        let mut alloc = SlotAllocator::new();
        let _first: NodeSlots<1> = alloc.allocate(1);
        let node: NodeSlots<2> = alloc.allocate(2);
        let counts = alloc.counts();

        let mut u = vec![0.0; counts.nu];
        node.u.set(&mut u, &SVector::<f64, 2>::new(3.0, -4.0));
        assert_eq!(u, vec![0.0, 3.0, -4.0]);

        let mut columns = vec![0.0; 6 * counts.nu];
        let mut h = HMatrix::<2>::zeros();
        h[(2, 0)] = 1.0;
        h[(3, 1)] = 1.0;
        node.u.set_h(&mut columns, &h);
        assert!(columns[..6].iter().all(|v| *v == 0.0));
        assert_eq!(node.u.get_h(&columns), h);
        assert_eq!(node.u.get_h(&columns).column(1)[3], 1.0);

        let mut usq = vec![0.0; counts.nusq];
        let d = SMatrix::<f64, 2, 2>::new(2.0, 0.5, 0.5, 3.0);
        node.usq.set(&mut usq, &d);
        assert_eq!(usq[0], 0.0);
        assert_eq!(node.usq.get(&usq), d);
    }
}

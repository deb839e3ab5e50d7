//! The actor arena and its intrusive doubly-linked lists.
//!
//! Every actor (propagator or branching) occupies a cell in the per-space
//! actor arena. Cells embed their own `prev`/`next` links, so membership in
//! the space's actor list and in the cost queues is O(1) insert and unlink
//! with no lookup. Sentinel cells anchor the rings: cell 0 anchors the
//! actor list, cells 1 through 8 anchor the eight cost queues.
//!
//! A cell is a member of exactly one ring at any time: idle propagators and
//! all branchings sit in the actor list; a scheduled propagator sits in the
//! queue of its cost class.

use crate::advisor::AdvisorId;
use crate::branch::Branch;
use crate::prop::Propagate;
use crate::var::ModEventDelta;

/// Handle to an actor (propagator or branching) inside a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActorId(pub(crate) u32);

/// Number of cost queues (one per cost value 0 through 7).
pub(crate) const N_QUEUES: usize = 8;

/// Sentinel cell anchoring the actor list.
pub(crate) const SENT_ACTORS: u32 = 0;

/// Sentinel cell anchoring cost queue `k`.
pub(crate) fn queue_sentinel(k: usize) -> u32 {
    debug_assert!(k < N_QUEUES);
    1 + u32::try_from(k).expect("queue index")
}

/// The three-way slot of a propagator cell.
///
/// During propagation it holds the pending modification event delta; a
/// subsumed propagator reports its size through it; during cloning it
/// remembers the head of the propagator's advisor list so the final sweep
/// can clear advisor forwarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PropSlot {
    /// Pending modification event delta. Zero exactly when the propagator
    /// is in no cost queue.
    Med(ModEventDelta),
    /// Size reported on subsumption, reclaimed by the execution loop.
    Size(usize),
    /// Head of the advisor list, remembered during cloning.
    Advisors(Option<AdvisorId>),
}

pub(crate) struct PropCell {
    pub(crate) slot: PropSlot,
    /// Taken out of the cell while the propagator executes or is copied.
    pub(crate) hook: Option<Box<dyn Propagate>>,
}

pub(crate) struct BranchCell {
    /// Identity matched against descriptions during commit.
    pub(crate) id: u32,
    pub(crate) hook: Option<Box<dyn Branch>>,
}

pub(crate) enum ActorKind {
    Sentinel,
    Propagator(PropCell),
    Branching(BranchCell),
}

pub(crate) struct ActorCell {
    prev: u32,
    next: u32,
    /// Forwarding to the twin cell, set during cloning, cleared by the
    /// final sweep.
    pub(crate) fwd: Option<ActorId>,
    pub(crate) kind: ActorKind,
}

/// The actor arena: a slot store whose cells carry intrusive links.
pub(crate) struct ActorArena {
    cells: Vec<Option<ActorCell>>,
    free: Vec<u32>,
}

impl ActorArena {
    /// Create an arena with the actor-list sentinel and the eight queue
    /// sentinels, each self-linked.
    pub(crate) fn new() -> Self {
        let mut arena = Self {
            cells: Vec::with_capacity(1 + N_QUEUES),
            free: Vec::new(),
        };
        for i in 0..=N_QUEUES {
            let i = u32::try_from(i).expect("sentinel index");
            arena.cells.push(Some(ActorCell {
                prev: i,
                next: i,
                fwd: None,
                kind: ActorKind::Sentinel,
            }));
        }
        arena
    }

    pub(crate) fn insert(&mut self, kind: ActorKind) -> u32 {
        let cell = |i| ActorCell {
            prev: i,
            next: i,
            fwd: None,
            kind,
        };
        if let Some(i) = self.free.pop() {
            debug_assert!(self.cells[i as usize].is_none());
            self.cells[i as usize] = Some(cell(i));
            i
        } else {
            let i = u32::try_from(self.cells.len()).expect("actor index overflow");
            self.cells.push(Some(cell(i)));
            i
        }
    }

    /// Remove a cell from the arena. The caller must have unlinked it.
    pub(crate) fn remove(&mut self, i: u32) -> ActorCell {
        let c = self.cells[i as usize].take().expect("actor slot is empty");
        debug_assert!(c.prev == i && c.next == i, "removing a linked actor");
        self.free.push(i);
        c
    }

    pub(crate) fn cell(&self, i: u32) -> &ActorCell {
        self.cells[i as usize].as_ref().expect("actor slot is empty")
    }

    pub(crate) fn cell_mut(&mut self, i: u32) -> &mut ActorCell {
        self.cells[i as usize].as_mut().expect("actor slot is empty")
    }

    /// Iterate over occupied cells as `(index, &mut ActorCell)`.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut ActorCell)> {
        self.cells
            .iter_mut()
            .enumerate()
            .filter_map(|(i, c)| c.as_mut().map(|v| (i as u32, v)))
    }

    pub(crate) fn next(&self, i: u32) -> u32 {
        self.cell(i).next
    }

    /// Detach `i` from its ring and leave it self-linked.
    pub(crate) fn unlink(&mut self, i: u32) {
        let (p, n) = {
            let c = self.cell(i);
            (c.prev, c.next)
        };
        self.cell_mut(p).next = n;
        self.cell_mut(n).prev = p;
        let c = self.cell_mut(i);
        c.prev = i;
        c.next = i;
    }

    /// Insert `i` directly after `anchor`.
    pub(crate) fn head(&mut self, anchor: u32, i: u32) {
        debug_assert!(i != anchor);
        let n = self.cell(anchor).next;
        self.cell_mut(anchor).next = i;
        {
            let c = self.cell_mut(i);
            c.prev = anchor;
            c.next = n;
        }
        self.cell_mut(n).prev = i;
    }

    /// Insert `i` directly before `anchor`.
    pub(crate) fn tail(&mut self, anchor: u32, i: u32) {
        debug_assert!(i != anchor);
        let p = self.cell(anchor).prev;
        self.cell_mut(anchor).prev = i;
        {
            let c = self.cell_mut(i);
            c.next = anchor;
            c.prev = p;
        }
        self.cell_mut(p).next = i;
    }

    /// Whether the ring anchored at `anchor` has no members.
    pub(crate) fn ring_empty(&self, anchor: u32) -> bool {
        self.cell(anchor).next == anchor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_ring(arena: &ActorArena, anchor: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cur = arena.next(anchor);
        while cur != anchor {
            out.push(cur);
            cur = arena.next(cur);
        }
        out
    }

    #[test]
    fn test_sentinels_self_linked() {
        let arena = ActorArena::new();
        assert!(arena.ring_empty(SENT_ACTORS));
        for k in 0..N_QUEUES {
            assert!(arena.ring_empty(queue_sentinel(k)));
        }
    }

    #[test]
    fn test_head_and_tail_ordering() {
        let mut arena = ActorArena::new();
        let a = arena.insert(ActorKind::Sentinel);
        let b = arena.insert(ActorKind::Sentinel);
        let c = arena.insert(ActorKind::Sentinel);

        arena.tail(SENT_ACTORS, a);
        arena.tail(SENT_ACTORS, b);
        arena.head(SENT_ACTORS, c);

        assert_eq!(collect_ring(&arena, SENT_ACTORS), vec![c, a, b]);
    }

    #[test]
    fn test_unlink_preserves_ring() {
        let mut arena = ActorArena::new();
        let a = arena.insert(ActorKind::Sentinel);
        let b = arena.insert(ActorKind::Sentinel);
        let c = arena.insert(ActorKind::Sentinel);
        arena.tail(SENT_ACTORS, a);
        arena.tail(SENT_ACTORS, b);
        arena.tail(SENT_ACTORS, c);

        arena.unlink(b);
        assert_eq!(collect_ring(&arena, SENT_ACTORS), vec![a, c]);

        // An unlinked cell can move to another ring.
        arena.tail(queue_sentinel(3), b);
        assert_eq!(collect_ring(&arena, queue_sentinel(3)), vec![b]);
    }

    #[test]
    fn test_remove_reuses_slot() {
        let mut arena = ActorArena::new();
        let a = arena.insert(ActorKind::Sentinel);
        arena.tail(SENT_ACTORS, a);
        arena.unlink(a);
        arena.remove(a);
        let b = arena.insert(ActorKind::Sentinel);
        assert_eq!(a, b);
    }
}

//! Computation spaces.
//!
//! A space is the unit of copy: it owns its memory, its actors, its
//! variables, and the scheduling state of the propagation engine. A space
//! is in exactly one of two lifecycle phases: *propagating*, with the cost
//! queues live, or *copying*, with the per-class update chains live. The
//! two never overlap; `clone` swaps the phases and restores them.
//!
//! A space is a single-threaded structure: exactly one owner mutates it at
//! a time, and `status` runs to completion without suspension points. An
//! unshared clone holds no reference into its source and may be handed to
//! another thread.

pub mod clone;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::actor::{
    queue_sentinel, ActorArena, ActorCell, ActorId, ActorKind, BranchCell, PropCell, PropSlot,
    N_QUEUES, SENT_ACTORS,
};
use crate::advisor::{Advise, AdvisorArena, AdvisorId};
use crate::branch::{Branch, BranchDesc};
use crate::error::{SpaceError, SpaceResult};
use crate::handle::CopiedCell;
use crate::mem::{Slab, SpaceAlloc};
use crate::prop::{ExecStatus, Propagate};
use crate::var::{registry, ModEventDelta, VarStore, MAX_VAR_CLASSES};

use self::clone::Model;

/// Status of a space reported by [`Space::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpaceStatus {
    /// The space is failed.
    Failed,
    /// The space is solved: stable with no branching left.
    Solved,
    /// The space is stable and must be branched.
    Branch,
}

/// Statistics gathered by one [`Space::status_with`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusStatistics {
    /// Number of propagator executions.
    pub propagations: u64,
    /// Whether a weakly-monotonic propagator is present, or was present
    /// since the last report.
    pub wmp: bool,
}

/// Properties an actor can announce to its space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorProperty {
    /// The actor holds resources outside the space arena and must always
    /// be disposed, even when the space is destroyed wholesale.
    ForcedDispose,
    /// The actor is a weakly-monotonic propagator.
    WeaklyMonotonic,
}

/// The weakly-monotonic propagator bookkeeping.
///
/// `current` counts propagators present right now; `observed` remembers
/// that propagation ran while one was present, so a propagator subsumed
/// before the fixpoint is still reported once. Reporting clears the
/// memory.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct WeaklyMonotonic {
    pub(crate) current: u32,
    pub(crate) observed: bool,
}

impl WeaklyMonotonic {
    fn report(&mut self) -> bool {
        let r = self.current > 0 || self.observed;
        self.observed = false;
        r
    }
}

/// Cursor into the cost queues.
///
/// `Failed` means the space is failed; `Stable` sits below the first
/// queue; `Queue(k)` means queues below `k` are empty and some queue at or
/// above `k` may hold a propagator. The scheduler always runs the lowest
/// non-empty queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Active {
    Failed,
    Stable,
    Queue(u8),
}

/// State bundle live while the space propagates.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PropState {
    pub(crate) active: Active,
    /// Id handed to the next branching created in this space.
    pub(crate) branch_id: u32,
    /// Number of subscriptions, sizing the subscription area on clone.
    pub(crate) n_sub: u32,
}

/// State bundle live while the space is being copied.
#[derive(Debug, Default)]
pub(crate) struct CopyState {
    /// Per-class chains of originals awaiting the second cloning pass.
    pub(crate) vars_u: [Option<u32>; MAX_VAR_CLASSES],
    /// Copied variables that need no index structure.
    pub(crate) vars_noidx: Vec<(usize, u32)>,
    /// Copied objects whose forwarding must be cleared by the final sweep.
    pub(crate) copied: Vec<u32>,
}

pub(crate) enum Phase {
    Propagating(PropState),
    Copying(CopyState),
}

/// A computation space.
pub struct Space {
    pub(crate) mem: SpaceAlloc,
    pub(crate) actors: ActorArena,
    pub(crate) advisors: AdvisorArena,
    pub(crate) vars: [VarStore; MAX_VAR_CLASSES],
    pub(crate) copied_objs: Slab<CopiedCell>,
    /// First branching consulted by `status`; the sentinel when none.
    b_status: u32,
    /// First branching consulted by `commit`. May trail `b_status` while
    /// descriptions of an exhausted branching are still outstanding.
    b_commit: u32,
    phase: Phase,
    /// Actors noticed for forced disposal.
    d_notice: Vec<ActorId>,
    wmp: WeaklyMonotonic,
    in_status: bool,
    model: Option<Box<dyn Model>>,
}

impl Space {
    /// Create a space around the given model.
    pub fn new(model: impl Model) -> Self {
        let mut s = Self::blank(0, 0);
        s.model = Some(Box::new(model));
        s
    }

    pub(crate) fn blank(branch_id: u32, n_sub: u32) -> Self {
        Self {
            mem: SpaceAlloc::new(),
            actors: ActorArena::new(),
            advisors: AdvisorArena::new(),
            vars: std::array::from_fn(|_| VarStore::new()),
            copied_objs: Slab::new(),
            b_status: SENT_ACTORS,
            b_commit: SENT_ACTORS,
            phase: Phase::Propagating(PropState {
                active: Active::Stable,
                branch_id,
                n_sub,
            }),
            d_notice: Vec::new(),
            wmp: WeaklyMonotonic::default(),
            in_status: false,
            model: None,
        }
    }

    pub(crate) fn prop_state(&self) -> &PropState {
        match &self.phase {
            Phase::Propagating(p) => p,
            Phase::Copying(_) => unreachable!("space is in copy phase"),
        }
    }

    pub(crate) fn prop_state_mut(&mut self) -> &mut PropState {
        match &mut self.phase {
            Phase::Propagating(p) => p,
            Phase::Copying(_) => unreachable!("space is in copy phase"),
        }
    }

    pub(crate) fn copy_state_mut(&mut self) -> &mut CopyState {
        match &mut self.phase {
            Phase::Copying(c) => c,
            Phase::Propagating(_) => unreachable!("space is not in copy phase"),
        }
    }

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    pub(crate) fn take_prop_phase(&mut self) -> PropState {
        match std::mem::replace(&mut self.phase, Phase::Copying(CopyState::default())) {
            Phase::Propagating(p) => p,
            Phase::Copying(_) => unreachable!("space is in copy phase"),
        }
    }

    pub(crate) fn n_sub_add(&mut self, n: u32) {
        self.prop_state_mut().n_sub += n;
    }

    pub(crate) fn n_sub_sub(&mut self, n: u32) {
        let st = self.prop_state_mut();
        debug_assert!(st.n_sub >= n);
        st.n_sub -= n;
    }

    pub(crate) fn vars_and_mem(&mut self, cid: usize) -> (&mut VarStore, &mut SpaceAlloc) {
        let Self { vars, mem, .. } = self;
        (&mut vars[cid], mem)
    }

    pub(crate) fn branch_cursors(&self) -> (u32, u32) {
        (self.b_status, self.b_commit)
    }

    pub(crate) fn set_branch_cursors(&mut self, b_status: u32, b_commit: u32) {
        self.b_status = b_status;
        self.b_commit = b_commit;
    }

    pub(crate) fn noticed(&self) -> &[ActorId] {
        &self.d_notice
    }

    pub(crate) fn set_noticed(&mut self, noticed: Vec<ActorId>) {
        self.d_notice = noticed;
    }

    pub(crate) fn wmp_state(&self) -> WeaklyMonotonic {
        self.wmp
    }

    pub(crate) fn set_wmp_state(&mut self, wmp: WeaklyMonotonic) {
        self.wmp = wmp;
    }

    pub(crate) fn model_take(&mut self) -> Box<dyn Model> {
        self.model.take().expect("space model is present")
    }

    pub(crate) fn model_put(&mut self, model: Box<dyn Model>) {
        debug_assert!(self.model.is_none());
        self.model = Some(model);
    }

    /// Access the model, downcast to its concrete type.
    #[must_use]
    pub fn model<M: Model>(&self) -> Option<&M> {
        let m = self.model.as_deref()?;
        let any: &dyn std::any::Any = m;
        any.downcast_ref::<M>()
    }

    /// Access the model mutably, downcast to its concrete type.
    pub fn model_mut<M: Model>(&mut self) -> Option<&mut M> {
        let m = self.model.as_deref_mut()?;
        let any: &mut dyn std::any::Any = m;
        any.downcast_mut::<M>()
    }

    /// Constrain this space to be better than `best` (best-solution
    /// search). Forwards to the model's `constrain`.
    pub fn constrain(&mut self, best: &Space) -> SpaceResult<()> {
        let mut m = self.model_take();
        let r = m.constrain(self, best);
        self.model_put(m);
        r
    }

    // --- space-attributed memory -----------------------------------------

    /// Allocate a block of `n` default-initialized values attributed to
    /// this space.
    pub fn alloc<T: Default>(&mut self, n: usize) -> Box<[T]> {
        self.mem.ralloc(n * std::mem::size_of::<T>());
        (0..n).map(|_| T::default()).collect()
    }

    /// Release a block previously allocated with [`Space::alloc`].
    pub fn free<T>(&mut self, b: Box<[T]>) {
        self.mem.rfree(std::mem::size_of_val(&*b));
    }

    /// Reallocate a block to `m` values: growing keeps the prefix and
    /// default-initializes the rest, shrinking truncates.
    pub fn realloc<T: Default>(&mut self, b: Box<[T]>, m: usize) -> Box<[T]> {
        let n = b.len();
        let mut v = b.into_vec();
        if m > n {
            self.mem.ralloc((m - n) * std::mem::size_of::<T>());
            v.resize_with(m, T::default);
        } else {
            self.mem.rfree((n - m) * std::mem::size_of::<T>());
            v.truncate(m);
        }
        v.into_boxed_slice()
    }

    // --- actor management -------------------------------------------------

    /// Create a propagator from its propagation part. The new propagator
    /// heads the actor list and is in no queue.
    pub fn add_propagator(&mut self, hook: Box<dyn Propagate>) -> ActorId {
        self.mem.ralloc(std::mem::size_of_val(&*hook));
        let i = self.actors.insert(ActorKind::Propagator(PropCell {
            slot: PropSlot::Med(0),
            hook: Some(hook),
        }));
        self.actors.head(SENT_ACTORS, i);
        ActorId(i)
    }

    /// Create a propagator whose construction needs its own handle, e.g.
    /// to build a council of advisors or to subscribe itself.
    ///
    /// The cell is reserved first; `build` receives the space and the new
    /// handle and returns the propagation part.
    pub fn add_propagator_with<F>(&mut self, build: F) -> ActorId
    where
        F: FnOnce(&mut Space, ActorId) -> Box<dyn Propagate>,
    {
        let i = self.actors.insert(ActorKind::Propagator(PropCell {
            slot: PropSlot::Med(0),
            hook: None,
        }));
        self.actors.head(SENT_ACTORS, i);
        let hook = build(self, ActorId(i));
        self.mem.ralloc(std::mem::size_of_val(&*hook));
        self.prop_hook_put(ActorId(i), hook);
        // Scheduling requests made during construction were deferred
        // until the propagation part was in place.
        if self.prop_med(ActorId(i)) != 0 {
            self.enqueue(ActorId(i));
        }
        ActorId(i)
    }

    /// Create a branching. It is appended at the tail of the actor list
    /// and assigned the next branching id; if the branching chain was
    /// empty, both branching cursors move to it.
    pub fn add_branching(&mut self, hook: Box<dyn Branch>) -> ActorId {
        self.mem.ralloc(std::mem::size_of_val(&*hook));
        let id = {
            let st = self.prop_state_mut();
            let id = st.branch_id;
            st.branch_id += 1;
            id
        };
        let i = self.actors.insert(ActorKind::Branching(BranchCell {
            id,
            hook: Some(hook),
        }));
        if self.b_status == SENT_ACTORS {
            self.b_status = i;
            if self.b_commit == SENT_ACTORS {
                self.b_commit = i;
            }
        }
        self.actors.tail(SENT_ACTORS, i);
        ActorId(i)
    }

    fn prop_cell(&self, p: ActorId) -> &PropCell {
        match &self.actors.cell(p.0).kind {
            ActorKind::Propagator(c) => c,
            _ => unreachable!("actor is not a propagator"),
        }
    }

    fn prop_cell_mut(&mut self, p: ActorId) -> &mut PropCell {
        match &mut self.actors.cell_mut(p.0).kind {
            ActorKind::Propagator(c) => c,
            _ => unreachable!("actor is not a propagator"),
        }
    }

    fn branch_cell(&self, b: u32) -> &BranchCell {
        match &self.actors.cell(b).kind {
            ActorKind::Branching(c) => c,
            _ => unreachable!("actor is not a branching"),
        }
    }

    fn branch_cell_mut(&mut self, b: u32) -> &mut BranchCell {
        match &mut self.actors.cell_mut(b).kind {
            ActorKind::Branching(c) => c,
            _ => unreachable!("actor is not a branching"),
        }
    }

    pub(crate) fn branch_id_of(&self, b: u32) -> u32 {
        self.branch_cell(b).id
    }

    pub(crate) fn prop_med(&self, p: ActorId) -> ModEventDelta {
        match self.prop_cell(p).slot {
            PropSlot::Med(m) => m,
            _ => unreachable!("propagator slot holds no delta"),
        }
    }

    pub(crate) fn set_prop_med(&mut self, p: ActorId, med: ModEventDelta) {
        self.prop_cell_mut(p).slot = PropSlot::Med(med);
    }

    pub(crate) fn prop_hook_take(&mut self, p: ActorId) -> Box<dyn Propagate> {
        self.prop_cell_mut(p)
            .hook
            .take()
            .expect("propagator is not executing")
    }

    pub(crate) fn prop_hook_put(&mut self, p: ActorId, hook: Box<dyn Propagate>) {
        let cell = self.prop_cell_mut(p);
        debug_assert!(cell.hook.is_none());
        cell.hook = Some(hook);
    }

    fn prop_hook_present(&self, p: ActorId) -> bool {
        self.prop_cell(p).hook.is_some()
    }

    pub(crate) fn branch_hook_take(&mut self, b: u32) -> Box<dyn Branch> {
        self.branch_cell_mut(b)
            .hook
            .take()
            .expect("branching is not executing")
    }

    pub(crate) fn branch_hook_put(&mut self, b: u32, hook: Box<dyn Branch>) {
        let cell = self.branch_cell_mut(b);
        debug_assert!(cell.hook.is_none());
        cell.hook = Some(hook);
    }

    pub(crate) fn advisor_hook_take(&mut self, a: AdvisorId) -> Box<dyn Advise> {
        self.advisors
            .get_mut(a.0)
            .hook
            .take()
            .expect("advisor is not executing")
    }

    pub(crate) fn advisor_hook_put(&mut self, a: AdvisorId, hook: Box<dyn Advise>) {
        let cell = self.advisors.get_mut(a.0);
        debug_assert!(cell.hook.is_none());
        cell.hook = Some(hook);
    }

    /// Remember the pre-clone advisor list head in the propagator's slot.
    pub(crate) fn remember_advisors(&mut self, p: ActorId, head: AdvisorId) {
        self.prop_cell_mut(p).slot = PropSlot::Advisors(Some(head));
    }

    /// Put propagator `p` into the queue of its current cost.
    ///
    /// A propagator that schedules itself while executing is left where it
    /// is: its pending delta already records the events, and the execution
    /// loop re-enqueues it according to the returned status.
    pub(crate) fn enqueue(&mut self, p: ActorId) {
        if !self.prop_hook_present(p) {
            return;
        }
        let med = self.prop_med(p);
        let hook = self.prop_hook_take(p);
        let cost = hook.cost(self, med);
        self.prop_hook_put(p, hook);
        let q = cost.queue();
        self.actors.unlink(p.0);
        self.actors.tail(queue_sentinel(q), p.0);
        let q = u8::try_from(q).expect("queue index");
        let st = self.prop_state_mut();
        st.active = match st.active {
            Active::Failed => Active::Failed,
            Active::Stable => Active::Queue(q),
            Active::Queue(k) => Active::Queue(k.min(q)),
        };
    }

    // --- lifecycle --------------------------------------------------------

    /// Fail the space. For use outside of actors; propagators report
    /// failure through their return status instead.
    pub fn fail(&mut self) {
        self.prop_state_mut().active = Active::Failed;
    }

    /// Whether the space is failed. Performs no propagation.
    #[must_use]
    pub fn failed(&self) -> bool {
        matches!(self.prop_state().active, Active::Failed)
    }

    /// Whether the space is stable: at a fixpoint, or failed.
    #[must_use]
    pub fn stable(&self) -> bool {
        matches!(self.prop_state().active, Active::Stable | Active::Failed)
    }

    /// Make the space notice that actor `a` has property `p`.
    ///
    /// A property must be noticed at most once per actor.
    pub fn notice(&mut self, a: ActorId, p: ActorProperty) {
        match p {
            ActorProperty::ForcedDispose => self.d_notice.push(a),
            ActorProperty::WeaklyMonotonic => self.wmp.current += 1,
        }
    }

    /// Make the space ignore property `p` of actor `a`.
    ///
    /// A noticed property must be ignored before the actor is disposed.
    pub fn ignore(&mut self, a: ActorId, p: ActorProperty) {
        match p {
            ActorProperty::ForcedDispose => {
                if let Some(i) = self.d_notice.iter().position(|x| *x == a) {
                    self.d_notice.swap_remove(i);
                }
            }
            ActorProperty::WeaklyMonotonic => {
                debug_assert!(self.wmp.current > 0);
                self.wmp.current -= 1;
            }
        }
    }

    /// Query the space status, discarding statistics.
    ///
    /// Propagates until fixpoint or failure.
    pub fn status(&mut self) -> SpaceStatus {
        let mut stats = StatusStatistics::default();
        self.status_with(&mut stats)
    }

    /// Query the space status.
    ///
    /// Propagates until fixpoint or failure, adds the number of propagator
    /// executions to `stats.propagations`, and records the
    /// weakly-monotonic flag. Returns [`SpaceStatus::Failed`] on failure,
    /// [`SpaceStatus::Solved`] when stable with no branching left, and
    /// [`SpaceStatus::Branch`] otherwise.
    pub fn status_with(&mut self, stats: &mut StatusStatistics) -> SpaceStatus {
        assert!(
            !self.in_status,
            "status must not be re-entered from within propagation"
        );
        self.in_status = true;

        loop {
            let from = match self.prop_state().active {
                Active::Failed | Active::Stable => break,
                Active::Queue(k) => usize::from(k),
            };
            // Find the lowest non-empty queue at or above the cursor.
            let mut q = from;
            let head = loop {
                if q >= N_QUEUES {
                    break None;
                }
                let s = queue_sentinel(q);
                let head = self.actors.next(s);
                if head != s {
                    break Some(head);
                }
                q += 1;
            };
            let Some(p) = head else {
                self.prop_state_mut().active = Active::Stable;
                break;
            };
            let p = ActorId(p);
            self.prop_state_mut().active =
                Active::Queue(u8::try_from(q).expect("queue index"));

            if self.wmp.current > 0 {
                self.wmp.observed = true;
            }
            stats.propagations += 1;

            let med = self.prop_med(p);
            self.set_prop_med(p, 0);
            let mut hook = self.prop_hook_take(p);
            let status = hook.propagate(self, p, med);
            trace!(propagator = p.0, ?status, "propagated");
            match status {
                ExecStatus::Failed => {
                    self.prop_hook_put(p, hook);
                    self.fail();
                }
                ExecStatus::Fix => {
                    self.prop_hook_put(p, hook);
                    self.set_prop_med(p, 0);
                    self.actors.unlink(p.0);
                    self.actors.head(SENT_ACTORS, p.0);
                }
                ExecStatus::NoFix => {
                    self.prop_hook_put(p, hook);
                    let pending = self.prop_med(p);
                    let mut merged = registry::med_combine(pending, med);
                    if merged == 0 {
                        merged = med;
                    }
                    self.set_prop_med(p, merged);
                    self.enqueue(p);
                }
                ExecStatus::Subsumed(size) => {
                    // The propagator has disposed itself; reclaim it.
                    drop(hook);
                    self.prop_cell_mut(p).slot = PropSlot::Size(size);
                    self.actors.unlink(p.0);
                    drop(self.actors.remove(p.0));
                    self.mem.rfree(size);
                }
                ExecStatus::FixPartial(m) => {
                    self.prop_hook_put(p, hook);
                    debug_assert!(m != 0, "partial fixpoint with empty delta");
                    self.set_prop_med(p, m);
                    self.enqueue(p);
                }
                ExecStatus::NoFixPartial(m) => {
                    self.prop_hook_put(p, hook);
                    let pending = self.prop_med(p);
                    let mut combined = registry::med_combine(pending, m);
                    if combined == 0 {
                        combined = m;
                    }
                    debug_assert!(combined != 0, "partial fixpoint with empty delta");
                    self.set_prop_med(p, combined);
                    self.enqueue(p);
                }
            }
        }

        self.in_status = false;
        stats.wmp = self.wmp.report();

        let result = if self.failed() {
            SpaceStatus::Failed
        } else {
            // Pass over branchings with no alternatives left.
            while self.b_status != SENT_ACTORS {
                let hook = self.branch_hook_take(self.b_status);
                let alive = hook.status(self);
                self.branch_hook_put(self.b_status, hook);
                if alive {
                    break;
                }
                self.b_status = self.actors.next(self.b_status);
            }
            if self.b_status == SENT_ACTORS {
                SpaceStatus::Solved
            } else {
                SpaceStatus::Branch
            }
        };
        debug!(
            ?result,
            propagations = stats.propagations,
            wmp = stats.wmp,
            "status computed"
        );
        result
    }

    /// Create a branching description for the current branching.
    ///
    /// Must be called directly after `status` reported
    /// [`SpaceStatus::Branch`], at most once per stable point. The caller
    /// owns the description.
    pub fn description(&mut self) -> SpaceResult<BranchDesc> {
        if !self.stable() {
            return Err(SpaceError::NotStable);
        }
        if self.failed() || self.b_status == SENT_ACTORS {
            return Err(SpaceError::NoBranching);
        }
        let b = self.b_status;
        let id = self.branch_cell(b).id;
        let mut hook = self.branch_hook_take(b);
        let (alternatives, payload) = hook.description(self);
        self.branch_hook_put(b, hook);
        Ok(BranchDesc::new(id, alternatives, payload))
    }

    /// Commit alternative `alt` of description `desc`.
    ///
    /// Locates the branching that produced `desc`, disposing earlier
    /// branchings whose descriptions are all replayed. Performs no
    /// propagation; call `status` afterwards.
    pub fn commit(&mut self, desc: &BranchDesc, alt: u32) -> SpaceResult<()> {
        if self.b_commit == SENT_ACTORS {
            return Err(SpaceError::NoBranching);
        }
        if alt >= desc.alternatives() {
            return Err(SpaceError::IllegalAlternative {
                alternative: alt,
                alternatives: desc.alternatives(),
            });
        }
        loop {
            if self.b_commit == SENT_ACTORS {
                return Err(SpaceError::NoBranching);
            }
            let cur = self.b_commit;
            if self.branch_cell(cur).id == desc.id {
                break;
            }
            let next = self.actors.next(cur);
            if self.b_status == cur {
                self.b_status = next;
            }
            self.b_commit = next;
            let mut hook = self.branch_hook_take(cur);
            let size = hook.dispose(self, ActorId(cur));
            drop(hook);
            self.actors.unlink(cur);
            drop(self.actors.remove(cur));
            self.mem.rfree(size);
        }
        let cur = self.b_commit;
        let mut hook = self.branch_hook_take(cur);
        let status = hook.commit(self, desc, alt);
        self.branch_hook_put(cur, hook);
        if status == ExecStatus::Failed {
            self.fail();
        }
        trace!(branching = desc.id, alt, "committed");
        Ok(())
    }

    // --- introspection ----------------------------------------------------

    /// Number of propagators. Linear in the number of actors.
    #[must_use]
    pub fn propagators(&self) -> u32 {
        let mut n = 0;
        let mut cur = self.actors.next(SENT_ACTORS);
        while cur != SENT_ACTORS {
            if matches!(self.actors.cell(cur).kind, ActorKind::Propagator(_)) {
                n += 1;
            }
            cur = self.actors.next(cur);
        }
        // Scheduled propagators sit in their cost queues.
        for q in 0..N_QUEUES {
            let s = queue_sentinel(q);
            let mut cur = self.actors.next(s);
            while cur != s {
                n += 1;
                cur = self.actors.next(cur);
            }
        }
        n
    }

    /// Number of branchings. Linear in the number of actors.
    #[must_use]
    pub fn branchings(&self) -> u32 {
        let mut n = 0;
        let mut cur = self.actors.next(SENT_ACTORS);
        while cur != SENT_ACTORS {
            if matches!(self.actors.cell(cur).kind, ActorKind::Branching(_)) {
                n += 1;
            }
            cur = self.actors.next(cur);
        }
        n
    }

    /// Bytes attributed to this space, including actor-reported extra
    /// memory.
    #[must_use]
    pub fn allocated(&self) -> usize {
        let mut total = self.mem.allocated();
        let mut count = |cell: &ActorCell| {
            if let ActorKind::Propagator(pc) = &cell.kind {
                if let Some(h) = &pc.hook {
                    total += h.allocated();
                }
            }
        };
        let mut cur = self.actors.next(SENT_ACTORS);
        while cur != SENT_ACTORS {
            count(self.actors.cell(cur));
            cur = self.actors.next(cur);
        }
        for q in 0..N_QUEUES {
            let s = queue_sentinel(q);
            let mut cur = self.actors.next(s);
            while cur != s {
                count(self.actors.cell(cur));
                cur = self.actors.next(cur);
            }
        }
        total
    }
}

impl std::fmt::Debug for Space {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match &self.phase {
            Phase::Propagating(p) => format!("propagating({:?})", p.active),
            Phase::Copying(_) => "copying".to_string(),
        };
        f.debug_struct("Space")
            .field("phase", &phase)
            .field("propagators", &self.propagators())
            .field("branchings", &self.branchings())
            .field("advisors", &self.advisors.len())
            .finish_non_exhaustive()
    }
}

impl Drop for Space {
    fn drop(&mut self) {
        // Actors noticed for forced disposal get their explicit teardown;
        // everything else is released with the space.
        let noticed = std::mem::take(&mut self.d_notice);
        for a in noticed {
            if matches!(self.actors.cell(a.0).kind, ActorKind::Propagator(_)) {
                let hook = self.prop_cell_mut(a).hook.take();
                if let Some(mut hook) = hook {
                    let _ = hook.dispose(self, a);
                }
            } else {
                let hook = self.branch_cell_mut(a.0).hook.take();
                if let Some(mut hook) = hook {
                    let _ = hook.dispose(self, a);
                }
            }
        }
        // Registered variable disposers run over their class chains.
        for store in &self.vars {
            if let Some(dispose) = registry::disposer(store.idx_d) {
                let mut cur = store.d_head;
                while let Some(i) = cur {
                    let cell = &store.cells[i as usize];
                    cur = cell.next_d;
                    dispose(cell.payload);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_space_is_solved() {
        let mut s = Space::new(());
        assert!(s.stable());
        assert!(!s.failed());
        let mut stats = StatusStatistics::default();
        assert_eq!(s.status_with(&mut stats), SpaceStatus::Solved);
        assert_eq!(stats.propagations, 0);
    }

    #[test]
    fn test_fail_is_sticky_and_stable() {
        let mut s = Space::new(());
        s.fail();
        assert!(s.failed());
        assert!(s.stable());
        assert_eq!(s.status(), SpaceStatus::Failed);
        assert_eq!(s.description().unwrap_err(), SpaceError::NoBranching);
    }

    #[test]
    fn test_weakly_monotonic_notice_ignore_restores() {
        let mut s = Space::new(());
        let wmp_before = s.wmp.current;
        let a = ActorId(SENT_ACTORS);
        s.notice(a, ActorProperty::WeaklyMonotonic);
        assert_eq!(s.wmp.current, wmp_before + 1);
        s.ignore(a, ActorProperty::WeaklyMonotonic);
        assert_eq!(s.wmp.current, wmp_before);
        assert!(!s.wmp.observed);
    }

    #[test]
    fn test_wmp_reported_while_present() {
        let mut s = Space::new(());
        s.notice(ActorId(SENT_ACTORS), ActorProperty::WeaklyMonotonic);
        let mut stats = StatusStatistics::default();
        s.status_with(&mut stats);
        assert!(stats.wmp);
    }

    #[test]
    fn test_typed_allocation_is_accounted() {
        let mut s = Space::new(());
        let before = s.allocated();
        let b: Box<[u64]> = s.alloc(16);
        assert_eq!(b.len(), 16);
        assert_eq!(s.allocated(), before + 16 * 8);
        let b = s.realloc(b, 4);
        assert_eq!(b.len(), 4);
        assert_eq!(s.allocated(), before + 4 * 8);
        s.free(b);
        assert_eq!(s.allocated(), before);
    }

    #[test]
    fn test_forced_dispose_runs_at_space_destruction() {
        use crate::prop::{PropCost, Propagate};
        use crate::space::clone::Cloner;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct Holder {
            releases: Arc<AtomicUsize>,
        }

        impl Propagate for Holder {
            fn propagate(
                &mut self,
                _space: &mut Space,
                _me: ActorId,
                _med: ModEventDelta,
            ) -> ExecStatus {
                ExecStatus::Fix
            }
            fn cost(&self, _space: &Space, _med: ModEventDelta) -> PropCost {
                PropCost::UNARY_LO
            }
            fn copy(&self, _cl: &mut Cloner<'_>) -> Box<dyn Propagate> {
                Box::new(Holder {
                    releases: Arc::clone(&self.releases),
                })
            }
            fn dispose(&mut self, _space: &mut Space, _me: ActorId) -> usize {
                self.releases.fetch_add(1, Ordering::Relaxed);
                std::mem::size_of::<Self>()
            }
        }

        let releases = Arc::new(AtomicUsize::new(0));
        {
            let mut s = Space::new(());
            let p = s.add_propagator(Box::new(Holder {
                releases: Arc::clone(&releases),
            }));
            s.notice(p, ActorProperty::ForcedDispose);
        }
        assert_eq!(releases.load(Ordering::Relaxed), 1);

        // A noticed-then-ignored actor is not torn down explicitly.
        let releases2 = Arc::new(AtomicUsize::new(0));
        {
            let mut s = Space::new(());
            let p = s.add_propagator(Box::new(Holder {
                releases: Arc::clone(&releases2),
            }));
            s.notice(p, ActorProperty::ForcedDispose);
            s.ignore(p, ActorProperty::ForcedDispose);
        }
        assert_eq!(releases2.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_variable_disposer_runs_over_the_class_chain() {
        use crate::var::registry::VarDisposer;
        use crate::var::{ModEvent, PropCond, VarClass, VarRef};
        use std::sync::atomic::{AtomicUsize, Ordering};

        static DISPOSED: AtomicUsize = AtomicUsize::new(0);

        enum External {}
        impl VarClass for External {
            const PC_MAX: PropCond = 0;
            const IDX_C: usize = 1;
            const IDX_D: isize = 0;
            const FREE_BITS: u32 = 0;
            const MED_FST: u32 = 4;
            const MED_LST: u32 = 5;
            const MED_MASK: u32 = 0x1 << 4;
            const NAME: &'static str = "external";
            fn me_combine(me1: ModEvent, me2: ModEvent) -> ModEvent {
                me1.max(me2)
            }
            fn med_update(med: &mut u32, me: ModEvent) -> bool {
                if me <= 0 {
                    return false;
                }
                let had = *med & Self::MED_MASK != 0;
                *med |= Self::MED_MASK;
                !had
            }
            fn dispose(payload: u64) {
                let _ = payload;
                DISPOSED.fetch_add(1, Ordering::Relaxed);
            }
        }

        let _disposer = VarDisposer::<External>::new();
        {
            let mut s = Space::new(());
            let _a = VarRef::<External>::create(&mut s, 1);
            let _b = VarRef::<External>::create(&mut s, 2);
            let _c = VarRef::<External>::create(&mut s, 3);
        }
        assert_eq!(DISPOSED.load(Ordering::Relaxed), 3);
    }
}

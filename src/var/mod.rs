//! Variable implementation core.
//!
//! A variable implementation owns a *subscription array* partitioned into
//! contiguous segments by propagation condition, with a trailing segment
//! for advisors. Segment boundaries are kept in `idx`; `idx[pc_max]` is the
//! number of propagator entries and `entries` the total including
//! advisors. The free-slot count is packed into the upper bits of
//! `free_and_bits`, above the class's freely usable low bits.
//!
//! A *variable class* (the `VIC` configuration) supplies the per-class
//! constants and event combinators through the [`VarClass`] trait; the
//! kernel stores all variables of a class in one per-space arena and hands
//! out typed [`VarRef`] handles.
//!
//! Key invariants:
//! - `0 <= idx[0] <= idx[1] <= ... <= idx[pc_max] <= entries`.
//! - `entries + (free_and_bits >> FREE_BITS)` equals the array capacity.
//! - During cloning, a forwarded variable keeps its subscriptions inside
//!   its copy until the second pass rebuilds them and restores the
//!   original.

pub mod registry;

use crate::actor::ActorId;
use crate::advisor::AdvisorId;
use crate::mem::{SpaceAlloc, INITIAL_SUB_CAPACITY, SUB_AREA_GROWTH};
use crate::prop::ExecStatus;
use crate::space::clone::Cloner;
use crate::space::Space;
use std::marker::PhantomData;

/// Type for modification events.
pub type ModEvent = i32;

/// Generic modification event: failed variable.
pub const ME_GEN_FAILED: ModEvent = -1;
/// Generic modification event: no modification.
pub const ME_GEN_NONE: ModEvent = 0;
/// Generic modification event: variable is assigned a value.
pub const ME_GEN_ASSIGNED: ModEvent = 1;

/// Type for propagation conditions.
pub type PropCond = i32;

/// Propagation condition to be ignored (convenience).
pub const PC_GEN_NONE: PropCond = -1;
/// Propagation condition for an assigned variable.
pub const PC_GEN_ASSIGNED: PropCond = 0;

/// Type for modification event deltas: one packed word with a bit range
/// per variable class.
pub type ModEventDelta = u32;

/// Highest propagation condition any variable class may use.
pub(crate) const MAX_PC: usize = 4;

/// Number of variable class slots a space carries.
pub const MAX_VAR_CLASSES: usize = 8;

/// Generic domain change information supplied to advisors.
#[derive(Debug, Clone, Copy)]
pub struct Delta {
    me: ModEvent,
    info: u64,
}

impl Delta {
    /// Create a delta for modification event `me` with class-interpreted
    /// payload `info`.
    #[must_use]
    pub fn new(me: ModEvent, info: u64) -> Self {
        Self { me, info }
    }

    /// The modification event.
    #[must_use]
    pub fn modevent(&self) -> ModEvent {
        self.me
    }

    /// The class-interpreted payload.
    #[must_use]
    pub fn info(&self) -> u64 {
        self.info
    }
}

/// Configuration block of a variable class.
///
/// Implementors are zero-sized tag types; the kernel never instantiates
/// them. The constants describe the class's propagation conditions, its
/// slot in the per-space class table, its share of the modification event
/// delta word, and the number of low bits of `free_and_bits` the class may
/// use for its own state.
pub trait VarClass: 'static {
    /// Maximal propagation condition.
    const PC_MAX: PropCond;
    /// Class slot used during cloning (update index).
    const IDX_C: usize;
    /// Disposal slot, or -1 if variables of this class need no disposal.
    const IDX_D: isize;
    /// Number of low `free_and_bits` bits available to the class.
    const FREE_BITS: u32;
    /// First bit of the class's modification event delta range.
    const MED_FST: u32;
    /// One past the last bit of the class's delta range.
    const MED_LST: u32;
    /// Bitmask of the class's delta range.
    const MED_MASK: ModEventDelta;
    /// Symbolic class identifier.
    const NAME: &'static str;

    /// Combine two modification events of this class.
    fn me_combine(me1: ModEvent, me2: ModEvent) -> ModEvent;

    /// Merge `me` into `med`; report whether `med` changed.
    fn med_update(med: &mut ModEventDelta, me: ModEvent) -> bool;

    /// Release external resources of one variable. Only invoked for
    /// classes with `IDX_D >= 0`, at space destruction.
    fn dispose(payload: u64) {
        let _ = payload;
    }
}

/// One subscription array entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubEntry {
    /// Unused slot (free capacity).
    Hole,
    Prop(ActorId),
    Advisor(AdvisorId),
}

impl SubEntry {
    pub(crate) fn hole() -> Self {
        Self::Hole
    }

    pub(crate) fn propagator(p: ActorId) -> Self {
        Self::Prop(p)
    }
}

/// Storage of a subscription array.
///
/// Arrays built by clone live in the space's subscription area; arrays
/// created or grown afterwards are standalone. The variant is the "is my
/// base inside the subscription area?" predicate that picks the growth
/// policy.
#[derive(Debug)]
pub(crate) enum SubArray {
    /// No array: a fresh variable, or one fully cancelled on assignment.
    None,
    /// Standalone array (exact length = capacity).
    Heap(Vec<SubEntry>),
    /// Region of the space's subscription area starting at `off`.
    Area { off: u32 },
}

/// The per-variable kernel cell.
pub(crate) struct VarCell {
    pub(crate) sub: SubArray,
    pub(crate) entries: u32,
    pub(crate) free_and_bits: u32,
    pub(crate) idx: [u32; MAX_PC + 1],
    /// Forwarding to the twin, set during cloning. Also the *copied?*
    /// predicate.
    pub(crate) fwd: Option<u32>,
    /// Chain of originals awaiting the second cloning pass.
    pub(crate) next_u: Option<u32>,
    /// Chain of variables awaiting disposal at space destruction.
    pub(crate) next_d: Option<u32>,
    /// Class-owned state word.
    pub(crate) payload: u64,
}

/// Per-class variable arena.
pub(crate) struct VarStore {
    pub(crate) cells: Vec<VarCell>,
    /// Head of the disposal chain (classes with `IDX_D >= 0`).
    pub(crate) d_head: Option<u32>,
    /// The class's disposal slot, recorded at first variable creation.
    pub(crate) idx_d: isize,
}

impl VarStore {
    pub(crate) fn new() -> Self {
        Self {
            cells: Vec::new(),
            d_head: None,
            idx_d: -1,
        }
    }
}

impl Default for VarStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Typed handle to a variable implementation.
pub struct VarRef<C: VarClass> {
    pub(crate) idx: u32,
    _class: PhantomData<fn() -> C>,
}

impl<C: VarClass> Clone for VarRef<C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C: VarClass> Copy for VarRef<C> {}

impl<C: VarClass> PartialEq for VarRef<C> {
    fn eq(&self, other: &Self) -> bool {
        self.idx == other.idx
    }
}

impl<C: VarClass> Eq for VarRef<C> {}

impl<C: VarClass> std::fmt::Debug for VarRef<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VarRef<{}>({})", C::NAME, self.idx)
    }
}

/// Start of segment `pc` (0 through `pc_max + 1`).
fn seg_start(cell: &VarCell, pc: usize) -> u32 {
    if pc == 0 {
        0
    } else {
        cell.idx[pc - 1]
    }
}

fn slot(cell: &VarCell, mm: &SpaceAlloc, i: u32) -> SubEntry {
    match &cell.sub {
        SubArray::None => unreachable!("subscription array released"),
        SubArray::Heap(v) => v[i as usize],
        SubArray::Area { off } => mm.sub_area[(*off + i) as usize],
    }
}

fn set_slot(cell: &mut VarCell, mm: &mut SpaceAlloc, i: u32, e: SubEntry) {
    match &mut cell.sub {
        SubArray::None => unreachable!("subscription array released"),
        SubArray::Heap(v) => v[i as usize] = e,
        SubArray::Area { off } => mm.sub_area[(*off + i) as usize] = e,
    }
}

fn free_slots<C: VarClass>(cell: &VarCell) -> u32 {
    cell.free_and_bits >> C::FREE_BITS
}

/// Grow the subscription array: fresh variables get the initial capacity;
/// area-resident arrays grow by a small step (the area over-allocates);
/// standalone arrays grow by 3/2.
fn resize<C: VarClass>(cell: &mut VarCell, mm: &mut SpaceAlloc) {
    if matches!(cell.sub, SubArray::None) {
        debug_assert_eq!(free_slots::<C>(cell), 0);
        cell.sub = SubArray::Heap(mm.fl_alloc(INITIAL_SUB_CAPACITY));
        cell.free_and_bits += (INITIAL_SUB_CAPACITY as u32) << C::FREE_BITS;
        return;
    }
    let n = cell.entries as usize;
    let in_area = matches!(cell.sub, SubArray::Area { .. });
    let m = if in_area { n + SUB_AREA_GROWTH } else { ((n + 1) * 3) / 2 };
    match std::mem::replace(&mut cell.sub, SubArray::None) {
        SubArray::Heap(old) => {
            cell.sub = SubArray::Heap(mm.fl_realloc(old, m));
        }
        SubArray::Area { off } => {
            // The old region is abandoned in place; the area is rebuilt
            // wholesale by the next clone.
            let mut fresh = mm.fl_alloc(m);
            for i in 0..n {
                fresh[i] = mm.sub_area[(off + u32::try_from(i).expect("index")) as usize];
            }
            cell.sub = SubArray::Heap(fresh);
        }
        SubArray::None => unreachable!("handled above"),
    }
    cell.free_and_bits += ((m - n) as u32) << C::FREE_BITS;
}

/// Insert propagator `p` into segment `pc`, shifting the higher segments
/// (including the advisor segment) by one.
fn enter_prop<C: VarClass>(cell: &mut VarCell, mm: &mut SpaceAlloc, p: ActorId, pc: PropCond) {
    let pc = usize::try_from(pc).expect("propagation condition");
    let pc_max = usize::try_from(C::PC_MAX).expect("PC_MAX");
    debug_assert!(pc <= pc_max);
    if free_slots::<C>(cell) == 0 {
        resize::<C>(cell, mm);
    }
    cell.free_and_bits -= 1 << C::FREE_BITS;

    // Move the first advisor (if any) past the end.
    let adv = slot(cell, mm, cell.idx[pc_max]);
    set_slot(cell, mm, cell.entries, adv);
    cell.entries += 1;
    // Rotate the first entry of each higher segment into the hole left
    // behind, opening a slot at the front of segment `pc`.
    for j in ((pc + 1)..=pc_max).rev() {
        let e = slot(cell, mm, cell.idx[j - 1]);
        set_slot(cell, mm, cell.idx[j], e);
        cell.idx[j] += 1;
    }
    let e = slot(cell, mm, seg_start(cell, pc));
    set_slot(cell, mm, cell.idx[pc], e);
    cell.idx[pc] += 1;
    let at = seg_start(cell, pc);
    set_slot(cell, mm, at, SubEntry::Prop(p));
}

/// Insert advisor `a` at the front of the advisor segment.
fn enter_advisor<C: VarClass>(cell: &mut VarCell, mm: &mut SpaceAlloc, a: AdvisorId) {
    let pc_max = usize::try_from(C::PC_MAX).expect("PC_MAX");
    if free_slots::<C>(cell) == 0 {
        resize::<C>(cell, mm);
    }
    cell.free_and_bits -= 1 << C::FREE_BITS;

    let first = slot(cell, mm, cell.idx[pc_max]);
    set_slot(cell, mm, cell.entries, first);
    cell.entries += 1;
    set_slot(cell, mm, cell.idx[pc_max], SubEntry::Advisor(a));
}

/// Remove propagator `p` from segment `pc` by back-filling from the
/// higher segments.
fn remove_prop<C: VarClass>(cell: &mut VarCell, mm: &mut SpaceAlloc, p: ActorId, pc: PropCond) {
    let pc = usize::try_from(pc).expect("propagation condition");
    let pc_max = usize::try_from(C::PC_MAX).expect("PC_MAX");
    debug_assert!(pc <= pc_max);

    let start = seg_start(cell, pc);
    let end = cell.idx[pc];
    let pos = (start..end)
        .find(|&i| slot(cell, mm, i) == SubEntry::Prop(p))
        .expect("propagator is subscribed with this condition");

    let e = slot(cell, mm, cell.idx[pc] - 1);
    set_slot(cell, mm, pos, e);
    for j in (pc + 1)..=pc_max {
        let e = slot(cell, mm, cell.idx[j] - 1);
        set_slot(cell, mm, cell.idx[j - 1] - 1, e);
        cell.idx[j - 1] -= 1;
    }
    let last = slot(cell, mm, cell.entries - 1);
    set_slot(cell, mm, cell.idx[pc_max] - 1, last);
    cell.idx[pc_max] -= 1;
    cell.entries -= 1;
    cell.free_and_bits += 1 << C::FREE_BITS;
}

/// Remove advisor `a` from the advisor segment.
fn remove_advisor<C: VarClass>(cell: &mut VarCell, mm: &mut SpaceAlloc, a: AdvisorId) {
    let pc_max = usize::try_from(C::PC_MAX).expect("PC_MAX");
    let start = cell.idx[pc_max];
    let end = cell.entries;
    let pos = (start..end)
        .find(|&i| slot(cell, mm, i) == SubEntry::Advisor(a))
        .expect("advisor is subscribed");

    let last = slot(cell, mm, cell.entries - 1);
    set_slot(cell, mm, pos, last);
    cell.entries -= 1;
    cell.free_and_bits += 1 << C::FREE_BITS;
}

impl<C: VarClass> VarRef<C> {
    pub(crate) fn from_raw(idx: u32) -> Self {
        Self {
            idx,
            _class: PhantomData,
        }
    }

    /// Create a variable of class `C` with the given class state word.
    pub fn create(space: &mut Space, payload: u64) -> Self {
        registry::ensure::<C>();
        let store = &mut space.vars[C::IDX_C];
        if store.cells.is_empty() {
            store.idx_d = C::IDX_D;
        }
        let idx = u32::try_from(store.cells.len()).expect("variable index overflow");
        let next_d = if C::IDX_D >= 0 {
            let h = store.d_head;
            store.d_head = Some(idx);
            h
        } else {
            None
        };
        store.cells.push(VarCell {
            sub: SubArray::None,
            entries: 0,
            free_and_bits: 0,
            idx: [0; MAX_PC + 1],
            fwd: None,
            next_u: None,
            next_d,
            payload,
        });
        Self::from_raw(idx)
    }

    fn cell<'s>(self, space: &'s Space) -> &'s VarCell {
        &space.vars[C::IDX_C].cells[self.idx as usize]
    }

    /// Degree: the number of subscribed propagators and advisors.
    ///
    /// Not available while the variable is forwarded during cloning.
    #[must_use]
    pub fn degree(self, space: &Space) -> u32 {
        let cell = self.cell(space);
        debug_assert!(cell.fwd.is_none(), "degree is unavailable during copying");
        cell.entries
    }

    /// The class's freely usable bits.
    #[must_use]
    pub fn bits(self, space: &Space) -> u32 {
        self.cell(space).free_and_bits & ((1 << C::FREE_BITS) - 1)
    }

    /// Overwrite the class's freely usable bits.
    pub fn set_bits(self, space: &mut Space, bits: u32) {
        debug_assert_eq!(bits >> C::FREE_BITS, 0, "bits exceed FREE_BITS");
        let cell = &mut space.vars[C::IDX_C].cells[self.idx as usize];
        cell.free_and_bits = (cell.free_and_bits & !((1 << C::FREE_BITS) - 1)) | bits;
    }

    /// The class state word.
    #[must_use]
    pub fn payload(self, space: &Space) -> u64 {
        self.cell(space).payload
    }

    /// Overwrite the class state word.
    pub fn set_payload(self, space: &mut Space, payload: u64) {
        space.vars[C::IDX_C].cells[self.idx as usize].payload = payload;
    }

    /// Whether the variable has been copied in the current cloning pass.
    #[must_use]
    pub fn copied(self, space: &Space) -> bool {
        self.cell(space).fwd.is_some()
    }

    /// Subscribe propagator `p` with propagation condition `pc`.
    ///
    /// If the variable is assigned, no subscription is recorded; with
    /// `schedule`, the propagator is scheduled with [`ME_GEN_ASSIGNED`].
    /// Otherwise the propagator enters segment `pc` and, with `schedule`
    /// and `pc != PC_GEN_ASSIGNED`, is scheduled with `me`.
    pub fn subscribe(
        self,
        space: &mut Space,
        p: ActorId,
        pc: PropCond,
        assigned: bool,
        me: ModEvent,
        schedule: bool,
    ) {
        if assigned {
            if schedule {
                Self::schedule_propagator(space, p, ME_GEN_ASSIGNED);
            }
        } else {
            space.n_sub_add(1);
            let (store, mm) = space.vars_and_mem(C::IDX_C);
            enter_prop::<C>(&mut store.cells[self.idx as usize], mm, p, pc);
            if schedule && pc != PC_GEN_ASSIGNED {
                Self::schedule_propagator(space, p, me);
            }
        }
    }

    /// Cancel the subscription of propagator `p` with condition `pc`.
    ///
    /// If the variable is assigned, `assigned` must be true.
    pub fn cancel(self, space: &mut Space, p: ActorId, pc: PropCond, assigned: bool) {
        if !assigned {
            let (store, mm) = space.vars_and_mem(C::IDX_C);
            remove_prop::<C>(&mut store.cells[self.idx as usize], mm, p, pc);
            space.n_sub_sub(1);
        }
    }

    /// Subscribe advisor `a` unless the variable is assigned.
    pub fn subscribe_advisor(self, space: &mut Space, a: AdvisorId, assigned: bool) {
        if !assigned {
            space.n_sub_add(1);
            let (store, mm) = space.vars_and_mem(C::IDX_C);
            enter_advisor::<C>(&mut store.cells[self.idx as usize], mm, a);
        }
    }

    /// Cancel the subscription of advisor `a`.
    ///
    /// If the variable is assigned, `assigned` must be true.
    pub fn cancel_advisor(self, space: &mut Space, a: AdvisorId, assigned: bool) {
        if !assigned {
            let (store, mm) = space.vars_and_mem(C::IDX_C);
            remove_advisor::<C>(&mut store.cells[self.idx as usize], mm, a);
            space.n_sub_sub(1);
        }
    }

    /// Release the entire subscription array. Invoked by the variable
    /// class when the variable becomes assigned.
    ///
    /// The array is returned to the freelist; degree becomes zero and the
    /// variable copies as an index-free one from here on.
    pub fn cancel_all(self, space: &mut Space) {
        let degree = {
            let cell = self.cell(space);
            cell.entries
        };
        space.n_sub_sub(degree);
        let (store, mm) = space.vars_and_mem(C::IDX_C);
        let cell = &mut store.cells[self.idx as usize];
        if let SubArray::Heap(v) = std::mem::replace(&mut cell.sub, SubArray::None) {
            mm.fl_dispose(v);
        }
        cell.entries = 0;
        cell.idx = [0; MAX_PC + 1];
        cell.free_and_bits &= (1 << C::FREE_BITS) - 1;
    }

    /// Schedule propagator `p` with modification event `me`: merge `me`
    /// into the propagator's pending delta and enqueue it on change.
    pub fn schedule_propagator(space: &mut Space, p: ActorId, me: ModEvent) {
        let mut med = space.prop_med(p);
        if C::med_update(&mut med, me) {
            space.set_prop_med(p, med);
            space.enqueue(p);
        }
    }

    /// Schedule every propagator subscribed in segments `pc_lo` through
    /// `pc_hi` with modification event `me`.
    pub fn schedule(self, space: &mut Space, pc_lo: PropCond, pc_hi: PropCond, me: ModEvent) {
        let pc_lo = usize::try_from(pc_lo).expect("propagation condition");
        let pc_hi = usize::try_from(pc_hi).expect("propagation condition");
        debug_assert!(pc_hi <= usize::try_from(C::PC_MAX).expect("PC_MAX"));
        let targets: Vec<ActorId> = {
            let cell = self.cell(space);
            let mm = &space.mem;
            let start = seg_start(cell, pc_lo);
            let end = seg_start(cell, pc_hi + 1);
            (start..end)
                .map(|i| match slot(cell, mm, i) {
                    SubEntry::Prop(p) => p,
                    SubEntry::Advisor(_) | SubEntry::Hole => {
                        unreachable!("propagator segment holds propagators")
                    }
                })
                .collect()
        };
        for p in targets {
            Self::schedule_propagator(space, p, me);
        }
    }

    /// Run the advisors of this variable for modification event `me` with
    /// class-interpreted change information `info`.
    ///
    /// Returns false if an advisor failed. The iteration tolerates
    /// disposal and cancellation of the advisor currently being run and
    /// removal of advisors not yet reached; advisors that already ran must
    /// not be removed.
    pub fn advise(self, space: &mut Space, me: ModEvent, info: u64) -> bool {
        let pc_max = usize::try_from(C::PC_MAX).expect("PC_MAX");
        let d = Delta::new(me, info);
        let mut pos = self.cell(space).idx[pc_max];
        loop {
            let entry = {
                let cell = self.cell(space);
                debug_assert!(pos >= cell.idx[pc_max]);
                if pos >= cell.entries {
                    break;
                }
                slot(cell, &space.mem, pos)
            };
            let SubEntry::Advisor(a) = entry else {
                unreachable!("advisor segment holds advisors")
            };
            let p = crate::advisor::propagator(space, a);
            let mut hook = space.advisor_hook_take(a);
            let status = hook.advise(space, a, &d);
            space.advisor_hook_put(a, hook);
            match status {
                ExecStatus::Fix => {}
                ExecStatus::Failed => return false,
                ExecStatus::NoFix => Self::schedule_propagator(space, p, me),
                _ => unreachable!("advise returned a propagation-only status"),
            }
            // If the entry at `pos` changed, the advisor cancelled itself
            // and the back-fill moved an unvisited advisor here.
            let unchanged = {
                let cell = self.cell(space);
                pos < cell.entries && slot(cell, &space.mem, pos) == entry
            };
            if unchanged {
                pos += 1;
            }
        }
        true
    }

    /// Project this class's modification event out of a delta word.
    #[must_use]
    pub fn me(med: ModEventDelta) -> ModEvent {
        ModEvent::try_from((med & C::MED_MASK) >> C::MED_FST).expect("modification event")
    }

    /// Translate a modification event into a delta word.
    #[must_use]
    pub fn med(me: ModEvent) -> ModEventDelta {
        debug_assert!(me >= 0, "failure is not a schedulable event");
        let raw = u32::try_from(me).expect("modification event") << C::MED_FST;
        debug_assert_eq!(raw & !C::MED_MASK, 0);
        raw
    }

    /// Combine two modification events of this class.
    #[must_use]
    pub fn me_combine(me1: ModEvent, me2: ModEvent) -> ModEvent {
        C::me_combine(me1, me2)
    }

    /// First cloning pass: create this variable's twin in the destination
    /// space, move the subscription array into the twin for safekeeping,
    /// and leave a forwarding entry behind. Returns the twin's handle; a
    /// variable that is already forwarded just resolves.
    pub fn update(self, cl: &mut Cloner<'_>) -> VarRef<C> {
        let Cloner { src, dst, .. } = cl;
        let src_store = &mut src.vars[C::IDX_C];
        let src_cell = &mut src_store.cells[self.idx as usize];
        if let Some(f) = src_cell.fwd {
            return VarRef::from_raw(f);
        }

        let sub = std::mem::replace(&mut src_cell.sub, SubArray::None);
        let no_index = matches!(sub, SubArray::None);
        let entries = src_cell.entries;
        let idx = src_cell.idx;
        let bits = src_cell.free_and_bits & ((1 << C::FREE_BITS) - 1);
        let payload = src_cell.payload;

        let dst_store = &mut dst.vars[C::IDX_C];
        if dst_store.cells.is_empty() {
            dst_store.idx_d = C::IDX_D;
        }
        let new_idx = u32::try_from(dst_store.cells.len()).expect("variable index overflow");
        let next_d = if C::IDX_D >= 0 {
            let h = dst_store.d_head;
            dst_store.d_head = Some(new_idx);
            h
        } else {
            None
        };
        dst_store.cells.push(VarCell {
            sub,
            entries,
            free_and_bits: bits,
            idx,
            fwd: None,
            next_u: None,
            next_d,
            payload,
        });

        let src_store = &mut src.vars[C::IDX_C];
        let src_cell = &mut src_store.cells[self.idx as usize];
        src_cell.fwd = Some(new_idx);
        if no_index {
            debug_assert_eq!(entries, 0);
            src.copy_state_mut().vars_noidx.push((C::IDX_C, self.idx));
        } else {
            let state = src.copy_state_mut();
            let head = state.vars_u[C::IDX_C];
            state.vars_u[C::IDX_C] = Some(self.idx);
            src.vars[C::IDX_C].cells[self.idx as usize].next_u = head;
        }
        VarRef::from_raw(new_idx)
    }
}

#[cfg(test)]
pub(crate) fn check_sub_invariants<C: VarClass>(space: &Space, v: VarRef<C>) {
    let cell = &space.vars[C::IDX_C].cells[v.idx as usize];
    let pc_max = usize::try_from(C::PC_MAX).unwrap();
    let mut prev = 0;
    for j in 0..=pc_max {
        assert!(cell.idx[j] >= prev, "segment bounds must be monotonic");
        prev = cell.idx[j];
    }
    assert!(cell.idx[pc_max] <= cell.entries);
    let cap = match &cell.sub {
        SubArray::None => 0,
        SubArray::Heap(h) => u32::try_from(h.len()).unwrap(),
        SubArray::Area { .. } => cell.entries + (cell.free_and_bits >> C::FREE_BITS),
    };
    assert_eq!(
        cell.entries + (cell.free_and_bits >> C::FREE_BITS),
        cap,
        "entries plus free slots must equal capacity"
    );
}

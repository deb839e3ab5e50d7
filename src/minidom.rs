//! Bounds-only integer variables.
//!
//! This module provides a minimal variable class over integer bounds
//! domains. It is intended for embedded usage, tests, and as a reference
//! implementation for variable class authors: it exercises every kernel
//! seam — propagation conditions, modification events, the delta word,
//! scheduling, advisors, and assignment — without the machinery of a full
//! variable library.
//!
//! The domain is a closed interval packed into the variable's class state
//! word. Tells narrow the interval, notify subscribers, run advisors, and
//! release all subscriptions once the variable is assigned.

use crate::space::Space;
use crate::var::{
    ModEvent, ModEventDelta, PropCond, VarClass, VarRef, ME_GEN_ASSIGNED, ME_GEN_FAILED,
    ME_GEN_NONE,
};

/// The bounds-only integer variable class.
pub enum MiniDom {}

/// Modification event: variable was assigned.
pub const ME_MINI_VAL: ModEvent = ME_GEN_ASSIGNED;
/// Modification event: a bound changed.
pub const ME_MINI_BND: ModEvent = 2;

/// Propagation condition: wake on assignment only.
pub const PC_MINI_VAL: PropCond = 0;
/// Propagation condition: wake on bound changes.
pub const PC_MINI_BND: PropCond = 1;
/// Propagation condition: wake on any domain change.
pub const PC_MINI_DOM: PropCond = 2;

impl VarClass for MiniDom {
    const PC_MAX: PropCond = PC_MINI_DOM;
    const IDX_C: usize = 0;
    const IDX_D: isize = -1;
    const FREE_BITS: u32 = 0;
    const MED_FST: u32 = 0;
    const MED_LST: u32 = 2;
    const MED_MASK: ModEventDelta = 0x3;
    const NAME: &'static str = "minidom";

    fn me_combine(me1: ModEvent, me2: ModEvent) -> ModEvent {
        if me1 == ME_MINI_VAL || me2 == ME_MINI_VAL {
            ME_MINI_VAL
        } else if me1 == ME_MINI_BND || me2 == ME_MINI_BND {
            ME_MINI_BND
        } else {
            ME_GEN_NONE
        }
    }

    fn med_update(med: &mut ModEventDelta, me: ModEvent) -> bool {
        if me <= 0 {
            return false;
        }
        let old = VarRef::<MiniDom>::me(*med);
        let new = Self::me_combine(old, me);
        if new == old {
            return false;
        }
        *med = (*med & !Self::MED_MASK) | VarRef::<MiniDom>::med(new);
        true
    }
}

/// A bounds-only integer variable.
pub type MiniVar = VarRef<MiniDom>;

#[allow(clippy::cast_sign_loss)]
fn pack(min: i32, max: i32) -> u64 {
    ((min as u32 as u64) << 32) | (max as u32 as u64)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn unpack(w: u64) -> (i32, i32) {
    (((w >> 32) as u32) as i32, (w as u32) as i32)
}

/// Create a variable with domain `[min, max]`.
pub fn new_var(space: &mut Space, min: i32, max: i32) -> MiniVar {
    assert!(min <= max, "empty initial domain");
    VarRef::create(space, pack(min, max))
}

/// Lower bound.
#[must_use]
pub fn min(space: &Space, x: MiniVar) -> i32 {
    unpack(x.payload(space)).0
}

/// Upper bound.
#[must_use]
pub fn max(space: &Space, x: MiniVar) -> i32 {
    unpack(x.payload(space)).1
}

/// Whether the variable is assigned.
#[must_use]
pub fn assigned(space: &Space, x: MiniVar) -> bool {
    let (lo, hi) = unpack(x.payload(space));
    lo == hi
}

/// The assigned value.
#[must_use]
pub fn val(space: &Space, x: MiniVar) -> i32 {
    let (lo, hi) = unpack(x.payload(space));
    debug_assert_eq!(lo, hi, "variable is not assigned");
    lo
}

/// Notify subscribers of a modification: schedule the segments the event
/// reaches, run the advisors, and release the subscriptions once the
/// variable is assigned.
fn notify(space: &mut Space, x: MiniVar, me: ModEvent, old: u64) -> ModEvent {
    let pc_lo = if me == ME_MINI_VAL {
        PC_MINI_VAL
    } else {
        PC_MINI_BND
    };
    x.schedule(space, pc_lo, PC_MINI_DOM, me);
    let ok = x.advise(space, me, old);
    if !ok {
        space.fail();
        return ME_GEN_FAILED;
    }
    if me == ME_MINI_VAL {
        x.cancel_all(space);
    }
    me
}

/// Tell `x <= n`.
pub fn lq(space: &mut Space, x: MiniVar, n: i32) -> ModEvent {
    let old = x.payload(space);
    let (lo, hi) = unpack(old);
    if n >= hi {
        return ME_GEN_NONE;
    }
    if n < lo {
        space.fail();
        return ME_GEN_FAILED;
    }
    x.set_payload(space, pack(lo, n));
    let me = if lo == n { ME_MINI_VAL } else { ME_MINI_BND };
    notify(space, x, me, old)
}

/// Tell `x >= n`.
pub fn gq(space: &mut Space, x: MiniVar, n: i32) -> ModEvent {
    let old = x.payload(space);
    let (lo, hi) = unpack(old);
    if n <= lo {
        return ME_GEN_NONE;
    }
    if n > hi {
        space.fail();
        return ME_GEN_FAILED;
    }
    x.set_payload(space, pack(n, hi));
    let me = if n == hi { ME_MINI_VAL } else { ME_MINI_BND };
    notify(space, x, me, old)
}

/// Tell `x == n`.
pub fn eq(space: &mut Space, x: MiniVar, n: i32) -> ModEvent {
    let old = x.payload(space);
    let (lo, hi) = unpack(old);
    if n < lo || n > hi {
        space.fail();
        return ME_GEN_FAILED;
    }
    if lo == hi {
        return ME_GEN_NONE;
    }
    x.set_payload(space, pack(n, n));
    notify(space, x, ME_MINI_VAL, old)
}

/// Subscribe propagator `p` with condition `pc`, scheduling it if
/// requested.
pub fn subscribe(
    space: &mut Space,
    x: MiniVar,
    p: crate::actor::ActorId,
    pc: PropCond,
    schedule: bool,
) {
    let a = assigned(space, x);
    x.subscribe(space, p, pc, a, ME_MINI_BND, schedule);
}

/// Cancel the subscription of propagator `p` with condition `pc`.
pub fn cancel(space: &mut Space, x: MiniVar, p: crate::actor::ActorId, pc: PropCond) {
    let a = assigned(space, x);
    x.cancel(space, p, pc, a);
}

/// Subscribe advisor `a`.
pub fn subscribe_advisor(space: &mut Space, x: MiniVar, a: crate::advisor::AdvisorId) {
    let done = assigned(space, x);
    x.subscribe_advisor(space, a, done);
}

/// Cancel the subscription of advisor `a`.
pub fn cancel_advisor(space: &mut Space, x: MiniVar, a: crate::advisor::AdvisorId) {
    let done = assigned(space, x);
    x.cancel_advisor(space, a, done);
}

/// Bounds before a modification, for advisors: unpack a delta's change
/// information.
#[must_use]
pub fn delta_bounds(info: u64) -> (i32, i32) {
    unpack(info)
}

//! Process-wide variable class registry.
//!
//! Two fixed-size, write-once tables: the class table, indexed by
//! `VarClass::IDX_C`, supplies the per-class piece of cross-class delta
//! combination; the disposer table, indexed by `VarClass::IDX_D`, holds
//! the teardown hooks run at space destruction for classes whose variables
//! carry external resources.
//!
//! Slots are populated once (first variable creation registers the class;
//! constructing a [`VarDisposer`] registers the disposer) and read without
//! locking afterwards.

use std::marker::PhantomData;
use std::sync::OnceLock;

use super::{ModEvent, ModEventDelta, VarClass, MAX_VAR_CLASSES};

/// Per-class operations reachable without the class type.
#[derive(Clone, Copy)]
pub(crate) struct ClassOps {
    pub(crate) name: &'static str,
    /// Combine the class's ranges of two delta words, returning the
    /// class's contribution to the combined word.
    pub(crate) med_combine: fn(ModEventDelta, ModEventDelta) -> ModEventDelta,
}

#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_CLASS: OnceLock<ClassOps> = OnceLock::new();
#[allow(clippy::declare_interior_mutable_const)]
const EMPTY_DISPOSER: OnceLock<fn(u64)> = OnceLock::new();

static CLASSES: [OnceLock<ClassOps>; MAX_VAR_CLASSES] = [EMPTY_CLASS; MAX_VAR_CLASSES];

static DISPOSERS: [OnceLock<fn(u64)>; MAX_VAR_CLASSES] = [EMPTY_DISPOSER; MAX_VAR_CLASSES];

fn combine_piece<C: VarClass>(a: ModEventDelta, b: ModEventDelta) -> ModEventDelta {
    let me1 = ModEvent::try_from((a & C::MED_MASK) >> C::MED_FST).expect("modification event");
    let me2 = ModEvent::try_from((b & C::MED_MASK) >> C::MED_FST).expect("modification event");
    let me = if me1 == 0 {
        me2
    } else if me2 == 0 {
        me1
    } else {
        C::me_combine(me1, me2)
    };
    (u32::try_from(me).expect("modification event") << C::MED_FST) & C::MED_MASK
}

/// Register class `C` in its `IDX_C` slot. Idempotent.
pub(crate) fn ensure<C: VarClass>() {
    assert!(C::IDX_C < MAX_VAR_CLASSES, "class slot out of range");
    assert!(
        usize::try_from(C::PC_MAX).is_ok_and(|pc| pc <= super::MAX_PC),
        "class exceeds the supported propagation conditions"
    );
    let ops = CLASSES[C::IDX_C].get_or_init(|| ClassOps {
        name: C::NAME,
        med_combine: combine_piece::<C>,
    });
    assert_eq!(
        ops.name,
        C::NAME,
        "two variable classes claim slot {}",
        C::IDX_C
    );
}

/// Combine two modification event deltas across all registered classes.
pub(crate) fn med_combine(a: ModEventDelta, b: ModEventDelta) -> ModEventDelta {
    let mut out = 0;
    for slot in &CLASSES {
        if let Some(ops) = slot.get() {
            out |= (ops.med_combine)(a, b);
        }
    }
    out
}

/// The disposer registered for disposal slot `idx_d`, if any.
pub(crate) fn disposer(idx_d: isize) -> Option<fn(u64)> {
    let idx = usize::try_from(idx_d).ok()?;
    DISPOSERS.get(idx)?.get().copied()
}

/// Registers the teardown hook for variable class `C`.
///
/// Construct one per class whose variables hold resources outside the
/// space arena; the hook runs for each such variable when its space is
/// destroyed.
pub struct VarDisposer<C: VarClass> {
    _class: PhantomData<fn() -> C>,
}

impl<C: VarClass> VarDisposer<C> {
    /// Register the disposer for `C` in its `IDX_D` slot. Idempotent.
    pub fn new() -> Self {
        let idx = usize::try_from(C::IDX_D).expect("class has no disposal slot");
        assert!(idx < MAX_VAR_CLASSES, "disposal slot out of range");
        let _ = DISPOSERS[idx].get_or_init(|| C::dispose as fn(u64));
        Self {
            _class: PhantomData,
        }
    }
}

impl<C: VarClass> Default for VarDisposer<C> {
    fn default() -> Self {
        Self::new()
    }
}

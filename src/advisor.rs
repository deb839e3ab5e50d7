//! Advisors and councils.
//!
//! An advisor is a fine-grained listener attached to a propagator. It
//! subscribes to a variable's advisor segment and is invoked, with a
//! [`Delta`](crate::var::Delta), whenever the variable is modified. A
//! propagator that uses advisors maintains them through a [`Council`].
//!
//! Disposal is lazy: a disposed advisor is marked (its owner link cleared)
//! and skipped by council traversal; the cell itself lives until the space
//! is destroyed. Disposing an advisor does not cancel its variable
//! subscription — the advisor implementation must cancel before (or while)
//! disposing, exactly as it subscribed.

use crate::actor::ActorId;
use crate::mem::Slab;
use crate::prop::ExecStatus;
use crate::space::clone::Cloner;
use crate::space::Space;
use crate::var::Delta;

/// Handle to an advisor inside a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdvisorId(pub(crate) u32);

/// The notification part of an advisor.
///
/// The kernel owns the boxed implementation inside the advisor cell and
/// takes it out for the duration of each call.
pub trait Advise: Send + 'static {
    /// React to a modification of the subscribed variable.
    ///
    /// Return [`ExecStatus::Fix`] for no action, [`ExecStatus::NoFix`] to
    /// schedule the owning propagator, or [`ExecStatus::Failed`] to fail
    /// the space. To subsume, dispose through [`subsumed_fix`] or
    /// [`subsumed_nofix`].
    fn advise(&mut self, space: &mut Space, me: AdvisorId, d: &Delta) -> ExecStatus;

    /// Create this advisor's state in the destination space of a clone.
    fn copy(&self, cl: &mut Cloner<'_>) -> Box<dyn Advise>;
}

pub(crate) struct AdvisorCell {
    /// The owning propagator; `None` marks the advisor as disposed.
    pub(crate) owner: Option<ActorId>,
    /// Next advisor in the council chain.
    pub(crate) next: Option<AdvisorId>,
    /// Forwarding to the twin cell, set during cloning.
    pub(crate) fwd: Option<AdvisorId>,
    /// Taken out of the cell while the advisor executes or is copied.
    pub(crate) hook: Option<Box<dyn Advise>>,
}

pub(crate) type AdvisorArena = Slab<AdvisorCell>;

pub(crate) fn disposed(advisors: &AdvisorArena, a: AdvisorId) -> bool {
    advisors.get(a.0).owner.is_none()
}

/// A propagator-local list of advisors.
///
/// The council holds the chain head; advisor cells live in the space. A
/// council is created empty and populated with [`Council::add`].
#[derive(Debug, Default)]
pub struct Council {
    head: Option<AdvisorId>,
}

impl Council {
    /// Create an empty council.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an advisor owned by propagator `p` and link it into the
    /// council.
    ///
    /// The caller subscribes the advisor to its variables separately.
    pub fn add(&mut self, space: &mut Space, p: ActorId, hook: Box<dyn Advise>) -> AdvisorId {
        let id = AdvisorId(space.advisors.insert(AdvisorCell {
            owner: Some(p),
            next: self.head,
            fwd: None,
            hook: Some(hook),
        }));
        self.head = Some(id);
        id
    }

    /// Test whether the council has a live advisor left, compacting
    /// disposed entries off the head.
    pub fn empty(&mut self, space: &Space) -> bool {
        while let Some(a) = self.head {
            if disposed(&space.advisors, a) {
                self.head = space.advisors.get(a.0).next;
            } else {
                return false;
            }
        }
        true
    }

    /// Cursor over the live advisors of this council.
    #[must_use]
    pub fn advisors(&self) -> Advisors {
        Advisors { cur: self.head }
    }

    /// Dispose every live advisor in the council.
    pub fn dispose(&self, space: &mut Space) {
        let mut cur = self.head;
        while let Some(a) = cur {
            cur = space.advisors.get(a.0).next;
            if !disposed(&space.advisors, a) {
                dispose(space, a);
            }
        }
    }

    /// Clone all live advisors into the destination space and return the
    /// destination council.
    ///
    /// Each original advisor forwards to its copy; the head of the live
    /// chain is remembered in the owning propagator's slot so the final
    /// sweep can clear the forwarding.
    pub fn update(&self, cl: &mut Cloner<'_>) -> Council {
        // Skip disposed advisors off the head.
        let mut first = self.head;
        while let Some(a) = first {
            if disposed(&cl.src.advisors, a) {
                first = cl.src.advisors.get(a.0).next;
            } else {
                break;
            }
        }
        let Some(first) = first else {
            return Council::new();
        };

        let mut new_head: Option<AdvisorId> = None;
        let mut new_tail: Option<AdvisorId> = None;
        let mut cur = Some(first);
        while let Some(a) = cur {
            cur = cl.src.advisors.get(a.0).next;
            if disposed(&cl.src.advisors, a) {
                continue;
            }
            let owner = cl.src.advisors.get(a.0).owner.expect("live advisor has an owner");
            let new_owner = cl.src.actors.cell(owner.0).fwd.expect("owner copied before council");

            let hook = cl.src.advisors.get_mut(a.0).hook.take().expect("advisor hook present");
            let copy = hook.copy(cl);
            cl.src.advisors.get_mut(a.0).hook = Some(hook);

            let id = AdvisorId(cl.dst.advisors.insert(AdvisorCell {
                owner: Some(new_owner),
                next: None,
                fwd: None,
                hook: Some(copy),
            }));
            cl.src.advisors.get_mut(a.0).fwd = Some(id);
            match new_tail {
                None => new_head = Some(id),
                Some(t) => cl.dst.advisors.get_mut(t.0).next = Some(id),
            }
            new_tail = Some(id);
        }

        // Remember the live head for the forwarding sweep.
        cl.src.remember_advisors(cl.cur_src_actor, first);

        Council { head: new_head }
    }
}

/// Cursor over the live advisors of a council.
///
/// The cursor is advanced explicitly with a space reference so callers can
/// mutate the space between steps.
#[derive(Debug, Clone, Copy)]
pub struct Advisors {
    cur: Option<AdvisorId>,
}

impl Advisors {
    /// Return the next live advisor, or `None` when the council is
    /// exhausted.
    pub fn next(&mut self, space: &Space) -> Option<AdvisorId> {
        while let Some(a) = self.cur {
            self.cur = space.advisors.get(a.0).next;
            if !disposed(&space.advisors, a) {
                return Some(a);
            }
        }
        None
    }
}

/// Mark advisor `a` as disposed and shorten a chain of disposed advisors
/// by one, if possible.
pub(crate) fn dispose(space: &mut Space, a: AdvisorId) {
    debug_assert!(!disposed(&space.advisors, a));
    space.advisors.get_mut(a.0).owner = None;
    if let Some(n) = space.advisors.get(a.0).next {
        if disposed(&space.advisors, n) {
            let nn = space.advisors.get(n.0).next;
            space.advisors.get_mut(a.0).next = nn;
        }
    }
}

/// The owning propagator of a live advisor.
#[must_use]
pub fn propagator(space: &Space, a: AdvisorId) -> ActorId {
    space.advisors.get(a.0).owner.expect("advisor is disposed")
}

/// Advisor `a` is subsumed: dispose it and report that its propagator
/// need not run.
///
/// The caller must have cancelled the advisor's variable subscription.
pub fn subsumed_fix(space: &mut Space, a: AdvisorId) -> ExecStatus {
    dispose(space, a);
    ExecStatus::Fix
}

/// Advisor `a` is subsumed: dispose it and report that its propagator
/// must run.
///
/// The caller must have cancelled the advisor's variable subscription.
pub fn subsumed_nofix(space: &mut Space, a: AdvisorId) -> ExecStatus {
    dispose(space, a);
    ExecStatus::NoFix
}

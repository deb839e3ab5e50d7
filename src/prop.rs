//! Propagator interface: execution status, cost classes, and the
//! [`Propagate`] trait.

use serde::{Deserialize, Serialize};

use crate::actor::ActorId;
use crate::space::clone::Cloner;
use crate::space::Space;
use crate::var::ModEventDelta;

/// Outcome of a propagator or advisor invocation.
///
/// `Subsumed`, `FixPartial` and `NoFixPartial` carry the state the
/// execution loop applies to the propagator on return: the reclaimed size,
/// the replacement delta, and the delta to combine in, respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    /// Execution has resulted in failure.
    Failed,
    /// Propagation has computed a fixpoint.
    Fix,
    /// Propagation has not computed a fixpoint.
    NoFix,
    /// The propagator is subsumed and has disposed itself; the loop
    /// reclaims the reported size.
    Subsumed(usize),
    /// Partial fixpoint: the pending delta is replaced by the carried one
    /// and the propagator stays scheduled.
    FixPartial(ModEventDelta),
    /// No partial fixpoint: the carried delta is combined into the pending
    /// one and the propagator stays scheduled.
    NoFixPartial(ModEventDelta),
}

/// Classification of propagation cost.
///
/// The numeric value is the queue index: the scheduler runs the lowest
/// value first. `LO`/`HI` pairs alias the same queue where the original
/// classification does not distinguish them.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PropCost(u8);

impl PropCost {
    /// Exponential complexity, cheap.
    pub const CRAZY_LO: PropCost = PropCost(0);
    /// Exponential complexity, expensive.
    pub const CRAZY_HI: PropCost = PropCost(0);
    /// Cubic complexity, cheap.
    pub const CUBIC_LO: PropCost = PropCost(1);
    /// Cubic complexity, expensive.
    pub const CUBIC_HI: PropCost = PropCost(1);
    /// Quadratic complexity, cheap.
    pub const QUADRATIC_LO: PropCost = PropCost(2);
    /// Quadratic complexity, expensive.
    pub const QUADRATIC_HI: PropCost = PropCost(2);
    /// Linear complexity, expensive.
    pub const LINEAR_HI: PropCost = PropCost(3);
    /// Linear complexity, cheap.
    pub const LINEAR_LO: PropCost = PropCost(4);
    /// Three variables, expensive.
    pub const TERNARY_HI: PropCost = PropCost(5);
    /// Two variables, expensive.
    pub const BINARY_HI: PropCost = PropCost(6);
    /// Three variables, cheap.
    pub const TERNARY_LO: PropCost = PropCost(6);
    /// Two variables, cheap.
    pub const BINARY_LO: PropCost = PropCost(7);
    /// Single variable, cheap.
    pub const UNARY_LO: PropCost = PropCost(7);
    /// Single variable, expensive.
    pub const UNARY_HI: PropCost = PropCost(7);
    /// Maximal cost value.
    pub const MAX: PropCost = PropCost(7);

    /// The queue index for this cost class.
    #[must_use]
    pub fn queue(self) -> usize {
        usize::from(self.0)
    }
}

/// The propagation part of a propagator.
///
/// Implementations hold the propagator's views of its variables and its
/// council, if any. The kernel owns the boxed implementation inside the
/// actor cell and takes it out for the duration of each call, so every
/// method may freely mutate the space.
pub trait Propagate: Send + 'static {
    /// Propagation function.
    ///
    /// `me` is the propagator's own handle (used to cancel subscriptions
    /// on subsumption) and `med` the modification event delta accumulated
    /// since the last run.
    fn propagate(&mut self, space: &mut Space, me: ActorId, med: ModEventDelta) -> ExecStatus;

    /// Cost function, evaluated whenever the propagator is enqueued.
    fn cost(&self, space: &Space, med: ModEventDelta) -> PropCost;

    /// Create this propagator in the destination space of a clone.
    fn copy(&self, cl: &mut Cloner<'_>) -> Box<dyn Propagate>;

    /// Cancel subscriptions, release resources, and report the size to
    /// reclaim.
    fn dispose(&mut self, space: &mut Space, me: ActorId) -> usize {
        let _ = (space, me);
        std::mem::size_of_val(&*self)
    }

    /// Bytes held by the propagator outside the space arena.
    fn allocated(&self) -> usize {
        0
    }
}

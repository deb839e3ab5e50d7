//! Branchings and branching descriptions.
//!
//! A branching is the actor that generates choice points. When `status`
//! reports that branching is required, `description` produces a
//! [`BranchDesc`]: a compact, replayable record of the next choice, owned
//! by the caller and valid beyond the life of the space that produced it.
//! `commit` replays one alternative of a description, possibly on a clone.

use std::any::Any;

use crate::actor::ActorId;
use crate::prop::ExecStatus;
use crate::space::clone::Cloner;
use crate::space::Space;

/// The choice-point part of a branching.
///
/// The kernel owns the boxed implementation inside the actor cell and
/// takes it out for the duration of each call.
pub trait Branch: Send + 'static {
    /// Whether this branching still has alternatives left.
    ///
    /// Called from `status` once the space is stable; a branching that
    /// reports false is passed over for good.
    fn status(&self, space: &Space) -> bool;

    /// Produce the payload and alternative count of the next choice.
    ///
    /// Relies on being called directly after a `status` that selected this
    /// branching, at most once per stable point. The kernel wraps the
    /// result into a [`BranchDesc`] carrying this branching's identity.
    fn description(&mut self, space: &mut Space) -> (u32, Box<dyn Any + Send>);

    /// Commit alternative `alt` of description `desc`.
    fn commit(&mut self, space: &mut Space, desc: &BranchDesc, alt: u32) -> ExecStatus;

    /// Create this branching in the destination space of a clone.
    fn copy(&self, cl: &mut Cloner<'_>) -> Box<dyn Branch>;

    /// Release resources and report the size to reclaim.
    fn dispose(&mut self, space: &mut Space, me: ActorId) -> usize {
        let _ = (space, me);
        std::mem::size_of_val(&*self)
    }
}

/// A branching description: the replayable record of one choice point.
///
/// Carries the identity of the branching that produced it, the number of
/// alternatives, and an opaque payload interpreted by that branching's
/// `commit`. Descriptions live on the process heap outside any space.
pub struct BranchDesc {
    pub(crate) id: u32,
    alternatives: u32,
    payload: Box<dyn Any + Send>,
}

impl std::fmt::Debug for BranchDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchDesc")
            .field("id", &self.id)
            .field("alternatives", &self.alternatives)
            .finish_non_exhaustive()
    }
}

impl BranchDesc {
    pub(crate) fn new(id: u32, alternatives: u32, payload: Box<dyn Any + Send>) -> Self {
        Self {
            id,
            alternatives,
            payload,
        }
    }

    /// Number of alternatives of this choice point.
    #[must_use]
    pub fn alternatives(&self) -> u32 {
        self.alternatives
    }

    /// The branching-specific payload, downcast to its concrete type.
    #[must_use]
    pub fn payload<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

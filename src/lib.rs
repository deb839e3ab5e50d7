//! # propspace - a finite-domain constraint propagation kernel
//!
//! propspace is the core of a constraint programming system: computation
//! spaces with a cost-indexed propagation engine, variable implementations
//! with subscription bookkeeping, advisors for fine-grained notification,
//! branchings with replayable descriptions, and the two-pass cloning
//! machinery that makes recomputation and parallel search possible.
//!
//! ## Core Concepts
//!
//! - **Space**: a self-contained problem state; cloneable and commitable
//! - **Propagator**: a constraint enforcer scheduled by cost until
//!   fixpoint or failure
//! - **Branching**: a choice-point generator producing descriptions that
//!   replay on clones
//! - **Advisor**: a listener inside a propagator, woken per modification
//! - **Variable class**: a plug-in configuration describing events,
//!   conditions, and combinators for one kind of variable
//!
//! Search engines, full variable libraries, and concrete constraints are
//! deliberately outside this crate: the kernel exposes `status`, `clone`,
//! and `commit`, and the traits those collaborators implement.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use propspace::{minidom, Space, SpaceStatus};
//!
//! let mut space = Space::new(MyModel::post()?);
//! match space.status() {
//!     SpaceStatus::Failed => {}
//!     SpaceStatus::Solved => report(&space),
//!     SpaceStatus::Branch => {
//!         let desc = space.description()?;
//!         let mut child = space.clone(true)?;
//!         child.commit(&desc, 0)?;
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_panics_doc)]

pub mod actor;
pub mod advisor;
pub mod branch;
pub mod error;
pub mod handle;
pub mod minidom;
pub mod prop;
pub mod space;
pub mod var;

pub(crate) mod mem;

// Re-export primary types at the crate root for convenience
pub use actor::ActorId;
pub use advisor::{subsumed_fix, subsumed_nofix, Advise, AdvisorId, Advisors, Council};
pub use branch::{Branch, BranchDesc};
pub use error::{SpaceError, SpaceResult};
pub use handle::{CopiedHandle, CopyObject, SharedHandle};
pub use prop::{ExecStatus, PropCost, Propagate};
pub use space::clone::{Cloner, Model};
pub use space::{ActorProperty, Space, SpaceStatus, StatusStatistics};
pub use var::registry::VarDisposer;
pub use var::{
    Delta, ModEvent, ModEventDelta, PropCond, VarClass, VarRef, MAX_VAR_CLASSES, ME_GEN_ASSIGNED,
    ME_GEN_FAILED, ME_GEN_NONE, PC_GEN_ASSIGNED, PC_GEN_NONE,
};

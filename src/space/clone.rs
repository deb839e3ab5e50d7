//! Space cloning.
//!
//! Cloning produces an independent successor of a stable space in two
//! passes. The first pass copies the model's variables (moving each
//! original's subscription array into its twin for safekeeping) and then
//! every actor, leaving forwarding entries behind. The second pass builds
//! one contiguous subscription area in the destination, rewrites every
//! subscription through the actor and advisor forwarding, and restores the
//! originals. A final sweep clears all forwarding, returning the source to
//! the propagation phase untouched.
//!
//! Cost is linear in actors plus subscriptions plus copied objects; no
//! lookup tables are involved.

use std::any::Any;
use std::sync::Arc;

use tracing::debug;

use crate::actor::{ActorId, ActorKind, BranchCell, PropCell, PropSlot, SENT_ACTORS};
use crate::error::{SpaceError, SpaceResult};
use crate::space::Space;
use crate::var::{SubArray, SubEntry, MAX_VAR_CLASSES};

/// The problem-specific part of a space.
///
/// The model owns the root variables and whatever problem state the
/// search client needs to read out of solved spaces. Its `copy` is the
/// first step of cloning: it must update every variable and handle the
/// client will look at afterwards.
pub trait Model: Any + Send {
    /// Create this model in the destination space of a clone, updating
    /// all variables and handles it holds.
    fn copy(&self, cl: &mut Cloner<'_>) -> Box<dyn Model>;

    /// Constrain `space` to be better than `best` (best-solution search).
    fn constrain(&mut self, space: &mut Space, best: &Space) -> SpaceResult<()> {
        let _ = (space, best);
        Err(SpaceError::ConstrainUndefined)
    }
}

/// The trivial model for spaces whose state lives entirely in actors.
impl Model for () {
    fn copy(&self, _cl: &mut Cloner<'_>) -> Box<dyn Model> {
        Box::new(())
    }
}

/// Cloning context handed to `copy` implementations.
///
/// Holds the source space (in copy phase), the destination space, and the
/// per-clone forwarding of shared objects.
pub struct Cloner<'a> {
    pub(crate) src: &'a mut Space,
    pub(crate) dst: &'a mut Space,
    pub(crate) share: bool,
    pub(crate) shared_fwd: &'a mut Vec<(usize, Arc<dyn Any + Send + Sync>)>,
    /// The actor currently being copied; advisors forward through it.
    pub(crate) cur_src_actor: ActorId,
}

impl Cloner<'_> {
    /// Whether shareable data structures are shared with the source.
    #[must_use]
    pub fn share(&self) -> bool {
        self.share
    }

    /// The destination space.
    pub fn dst_space(&mut self) -> &mut Space {
        self.dst
    }

    /// The twin of actor `a`, which must already be copied.
    #[must_use]
    pub fn forwarded(&self, a: ActorId) -> ActorId {
        self.src
            .actors
            .cell(a.0)
            .fwd
            .expect("actor copied before it is referenced")
    }
}

fn read_sub(space: &Space, sub: &SubArray, i: u32) -> SubEntry {
    match sub {
        SubArray::None => unreachable!("subscription array released"),
        SubArray::Heap(v) => v[i as usize],
        SubArray::Area { off } => space.mem.sub_area[(*off + i) as usize],
    }
}

impl Space {
    /// Clone the space.
    ///
    /// The space must be stable and not failed; otherwise
    /// [`SpaceError::Failed`] or [`SpaceError::NotStable`] is raised. With
    /// `share`, shareable data structures are shared between the clone and
    /// the source; without, the clone holds no reference into the source
    /// and can be used by a different thread.
    #[allow(clippy::should_implement_trait)]
    pub fn clone(&mut self, share: bool) -> SpaceResult<Space> {
        if self.failed() {
            return Err(SpaceError::Failed);
        }
        if !self.stable() {
            return Err(SpaceError::NotStable);
        }

        // Step 1: switch to copy phase; the propagation state survives on
        // the side and sizes the destination.
        let saved = self.take_prop_phase();
        let mut dst = Space::blank(saved.branch_id, saved.n_sub);
        let mut shared_fwd: Vec<(usize, Arc<dyn Any + Send + Sync>)> = Vec::new();

        // Step 2: the model copies its variables and handles.
        let model = self.model_take();
        let new_model = {
            let mut cl = Cloner {
                src: self,
                dst: &mut dst,
                share,
                shared_fwd: &mut shared_fwd,
                cur_src_actor: ActorId(SENT_ACTORS),
            };
            model.copy(&mut cl)
        };
        self.model_put(model);
        dst.model = Some(new_model);

        // Step 3: copy actors in list order (propagators first, then
        // branchings), leaving forwarding behind.
        let mut n_actors = 0u32;
        let mut cur = self.actors.next(SENT_ACTORS);
        while cur != SENT_ACTORS {
            let next = self.actors.next(cur);
            n_actors += 1;
            if matches!(self.actors.cell(cur).kind, ActorKind::Propagator(_)) {
                let hook = self.prop_hook_take(ActorId(cur));
                let new = dst.actors.insert(ActorKind::Propagator(PropCell {
                    slot: PropSlot::Med(0),
                    hook: None,
                }));
                dst.actors.tail(SENT_ACTORS, new);
                self.actors.cell_mut(cur).fwd = Some(ActorId(new));
                let copy = {
                    let mut cl = Cloner {
                        src: self,
                        dst: &mut dst,
                        share,
                        shared_fwd: &mut shared_fwd,
                        cur_src_actor: ActorId(cur),
                    };
                    hook.copy(&mut cl)
                };
                dst.mem.ralloc(std::mem::size_of_val(&*copy));
                dst.prop_hook_put(ActorId(new), copy);
                self.prop_hook_put(ActorId(cur), hook);
            } else {
                let id = self.branch_id_of(cur);
                let hook = self.branch_hook_take(cur);
                let new = dst
                    .actors
                    .insert(ActorKind::Branching(BranchCell { id, hook: None }));
                dst.actors.tail(SENT_ACTORS, new);
                self.actors.cell_mut(cur).fwd = Some(ActorId(new));
                let copy = {
                    let mut cl = Cloner {
                        src: self,
                        dst: &mut dst,
                        share,
                        shared_fwd: &mut shared_fwd,
                        cur_src_actor: ActorId(cur),
                    };
                    hook.copy(&mut cl)
                };
                dst.mem.ralloc(std::mem::size_of_val(&*copy));
                dst.branch_hook_put(new, copy);
                self.branch_hook_put(cur, hook);
            }
            cur = next;
        }

        // Branching cursors and actor-level bookkeeping follow the
        // forwarding.
        let (b_status, b_commit) = self.branch_cursors();
        dst.set_branch_cursors(self.forward_actor(b_status), self.forward_actor(b_commit));
        let noticed = self
            .noticed()
            .iter()
            .map(|a| self.actors.cell(a.0).fwd.expect("noticed actor copied"))
            .collect();
        dst.set_noticed(noticed);
        dst.set_wmp_state(self.wmp_state());

        // Step 4: per-class second pass. Build the destination's
        // subscription area and restore the originals.
        dst.mem.reset_sub_area(saved.n_sub as usize);
        let (vars_u, vars_noidx, copied) = {
            let c = self.copy_state_mut();
            (
                c.vars_u,
                std::mem::take(&mut c.vars_noidx),
                std::mem::take(&mut c.copied),
            )
        };
        for (cid, head) in vars_u.iter().enumerate().take(MAX_VAR_CLASSES) {
            let mut x = *head;
            while let Some(i) = x {
                let (copy_idx, next) = {
                    let c = &self.vars[cid].cells[i as usize];
                    (c.fwd.expect("variable forwarded"), c.next_u)
                };
                let (old_sub, n) = {
                    let d = &mut dst.vars[cid].cells[copy_idx as usize];
                    (std::mem::replace(&mut d.sub, SubArray::None), d.entries)
                };
                let off = u32::try_from(dst.mem.sub_area.len()).expect("subscription area");
                for k in 0..n {
                    let mapped = match read_sub(self, &old_sub, k) {
                        SubEntry::Prop(p) => SubEntry::Prop(
                            self.actors.cell(p.0).fwd.expect("subscriber copied"),
                        ),
                        SubEntry::Advisor(a) => SubEntry::Advisor(
                            self.advisors.get(a.0).fwd.expect("advisor copied"),
                        ),
                        SubEntry::Hole => unreachable!("hole among live subscriptions"),
                    };
                    dst.mem.sub_area.push(mapped);
                }
                dst.vars[cid].cells[copy_idx as usize].sub = SubArray::Area { off };
                // Restore the original and clear its forwarding.
                let c = &mut self.vars[cid].cells[i as usize];
                c.sub = old_sub;
                c.fwd = None;
                c.next_u = None;
                x = next;
            }
        }
        for (cid, i) in vars_noidx {
            let c = &mut self.vars[cid].cells[i as usize];
            debug_assert!(matches!(c.sub, SubArray::None));
            c.fwd = None;
        }

        // Step 5: clear advisor forwarding through the remembered council
        // heads, and actor forwarding everywhere.
        {
            let Space {
                actors, advisors, ..
            } = self;
            for (_, cell) in actors.iter_mut() {
                if let ActorKind::Propagator(pc) = &mut cell.kind {
                    if let PropSlot::Advisors(head) = pc.slot {
                        let mut a = head;
                        while let Some(ad) = a {
                            let c = advisors.get_mut(ad.0);
                            a = c.next;
                            c.fwd = None;
                        }
                        pc.slot = PropSlot::Med(0);
                    }
                }
                cell.fwd = None;
            }
        }

        // Step 6: sweep the copied-object list.
        for i in copied {
            self.copied_objs.get_mut(i).fwd = None;
        }

        // Step 7: back to propagation phase; the source is observably
        // untouched.
        self.set_phase(super::Phase::Propagating(saved));

        debug!(
            share,
            actors = n_actors,
            subscriptions = saved.n_sub,
            "space cloned"
        );
        Ok(dst)
    }

    fn forward_actor(&self, i: u32) -> u32 {
        if i == SENT_ACTORS {
            SENT_ACTORS
        } else {
            self.actors.cell(i).fwd.expect("actor forwarded").0
        }
    }
}

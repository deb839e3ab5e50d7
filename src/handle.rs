//! Copied and shared handles.
//!
//! Copied handles give entities inside one space access to an object that
//! is duplicated exactly once per clone, no matter how many handles
//! reference it. Shared handles extend this with reference counting: a
//! sharing update aliases the object across spaces, a non-sharing update
//! falls back to the one-copy-per-clone path.
//!
//! Shared objects may be aliased by clones owned by different threads, so
//! the count is atomic and access is read-only (the handle hands out
//! shared references only).

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::space::clone::Cloner;
use crate::space::Space;

/// An object accessed through a [`CopiedHandle`].
///
/// The object lives in the space's copied-object arena; `copy` produces
/// the per-clone duplicate.
pub trait CopyObject: Any + Send {
    /// Return a fresh copy for updating.
    fn copy(&self) -> Box<dyn CopyObject>;
}

pub(crate) struct CopiedCell {
    pub(crate) obj: Box<dyn CopyObject>,
    /// Forwarding to the twin, set on first encounter during cloning and
    /// cleared by the final sweep.
    pub(crate) fwd: Option<u32>,
}

/// Handle to an object that is copied once per clone.
///
/// Multiple handles inside one space may reference the same object; after
/// a clone they all reference the same single copy.
pub struct CopiedHandle<T: CopyObject> {
    idx: Option<u32>,
    _object: PhantomData<fn() -> T>,
}

impl<T: CopyObject> Clone for CopiedHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: CopyObject> Copy for CopiedHandle<T> {}

impl<T: CopyObject> Default for CopiedHandle<T> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T: CopyObject> CopiedHandle<T> {
    /// A handle pointing to no object.
    #[must_use]
    pub fn none() -> Self {
        Self {
            idx: None,
            _object: PhantomData,
        }
    }

    /// Create an object in the space and return a handle to it.
    pub fn new(space: &mut Space, obj: T) -> Self {
        let idx = space.copied_objs.insert(CopiedCell {
            obj: Box::new(obj),
            fwd: None,
        });
        Self {
            idx: Some(idx),
            _object: PhantomData,
        }
    }

    /// Access the object.
    #[must_use]
    pub fn get<'s>(&self, space: &'s Space) -> Option<&'s T> {
        let idx = self.idx?;
        let any: &dyn Any = &*space.copied_objs.get(idx).obj;
        any.downcast_ref::<T>()
    }

    /// Access the object mutably.
    pub fn get_mut<'s>(&self, space: &'s mut Space) -> Option<&'s mut T> {
        let idx = self.idx?;
        let any: &mut dyn Any = &mut *space.copied_objs.get_mut(idx).obj;
        any.downcast_mut::<T>()
    }

    /// Updating during cloning: resolve to the single per-clone copy of
    /// the referenced object, creating it on first encounter.
    pub fn update(cl: &mut Cloner<'_>, other: &CopiedHandle<T>) -> Self {
        let Some(idx) = other.idx else {
            return Self::none();
        };
        if let Some(f) = cl.src.copied_objs.get(idx).fwd {
            return Self {
                idx: Some(f),
                _object: PhantomData,
            };
        }
        let copy = cl.src.copied_objs.get(idx).obj.copy();
        let new = cl.dst.copied_objs.insert(CopiedCell {
            obj: copy,
            fwd: None,
        });
        cl.src.copied_objs.get_mut(idx).fwd = Some(new);
        cl.src.copy_state_mut().copied.push(idx);
        Self {
            idx: Some(new),
            _object: PhantomData,
        }
    }

    /// Deallocate the object, leaving this handle (and any aliases)
    /// dangling.
    pub fn dispose(self, space: &mut Space) {
        if let Some(idx) = self.idx {
            drop(space.copied_objs.remove(idx));
        }
    }
}

/// Handle to a reference-counted object that may be shared across spaces.
///
/// An update with `share` aliases the object and increments the count; an
/// update without `share` duplicates the object once per clone. Dropping
/// the handle decrements the count; the object is deleted when the count
/// reaches zero.
#[derive(Debug)]
pub struct SharedHandle<T> {
    obj: Option<Arc<T>>,
}

impl<T> Default for SharedHandle<T> {
    fn default() -> Self {
        Self { obj: None }
    }
}

impl<T> Clone for SharedHandle<T> {
    fn clone(&self) -> Self {
        Self {
            obj: self.obj.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SharedHandle<T> {
    /// A handle pointing to no object.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Create a shared object with reference count one.
    #[must_use]
    pub fn new(obj: T) -> Self {
        Self {
            obj: Some(Arc::new(obj)),
        }
    }

    /// Access the object.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.obj.as_deref()
    }

    /// Current reference count of the object.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.obj.as_ref().map_or(0, Arc::strong_count)
    }

    /// Updating during cloning.
    ///
    /// With `share`, the handle just aliases the object. Without, the
    /// object is duplicated — once per clone, even when several handles
    /// reference it — and the handle points at the duplicate.
    pub fn update(cl: &mut Cloner<'_>, other: &SharedHandle<T>) -> Self {
        let Some(arc) = &other.obj else {
            return Self::default();
        };
        if cl.share() {
            return Self {
                obj: Some(Arc::clone(arc)),
            };
        }
        let key = Arc::as_ptr(arc).cast::<()>() as usize;
        for (k, copy) in cl.shared_fwd.iter() {
            if *k == key {
                let copy = Arc::clone(copy)
                    .downcast::<T>()
                    .expect("shared forwarding preserves the object type");
                return Self { obj: Some(copy) };
            }
        }
        let copy = Arc::new(T::clone(arc));
        cl.shared_fwd
            .push((key, Arc::clone(&copy) as Arc<dyn Any + Send + Sync>));
        Self { obj: Some(copy) }
    }
}

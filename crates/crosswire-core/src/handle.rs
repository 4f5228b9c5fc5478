//! Owner registry and weak handles.
//!
//! Script-visible objects that can be the target of asynchronous
//! notifications register themselves here and are referenced everywhere
//! else through [`WeakHandle`]s. A handle never owns its referent: it is a
//! generation-tagged key into an arena of slots, so destroying an owner is
//! a single slot removal that permanently invalidates every handle to it
//! in O(1), and a stale handle can always be held and queried safely.
//!
//! The critical contract is [`WeakHandle::resolve`]: it either returns a
//! temporary strong reference that pins the owner for the duration of the
//! caller's use, or `None`. It is atomic with respect to concurrent
//! destruction because destruction takes the arena's write lock while
//! `resolve` clones the `Arc` under the read lock.
//!
//! An invalid handle is a normal, frequently expected state, not an error:
//! owners are destroyed by script logic at any time, including while
//! notifications targeting them are still in flight.

use std::sync::Arc;
use std::sync::OnceLock;

use parking_lot::RwLock;
use slotmap::{SlotMap, new_key_type};

use crate::message::MessageTarget;

new_key_type! {
    /// A unique identifier for a registered owner object.
    ///
    /// Keys are generation-tagged: once an owner is destroyed, its id (and
    /// every [`WeakHandle`] carrying it) is invalid forever, even if the
    /// underlying slot is reused.
    pub struct OwnerId;
}

/// The arena of live owner objects.
///
/// Holds the strong references that keep owners alive while registered.
/// Registration and destruction happen on the consumer thread (destruction
/// is a script-level operation), but the table is thread-safe so that
/// liveness queries from other contexts are defensively sound.
pub struct OwnerRegistry {
    slots: RwLock<SlotMap<OwnerId, Arc<dyn MessageTarget>>>,
}

impl OwnerRegistry {
    fn new() -> Self {
        Self {
            slots: RwLock::new(SlotMap::with_key()),
        }
    }

    /// Register an owner and return its id.
    pub fn register(&self, target: Arc<dyn MessageTarget>) -> OwnerId {
        let id = self.slots.write().insert(target);
        tracing::trace!(target: "crosswire_core::handle", ?id, "registered owner");
        id
    }

    /// Destroy an owner, invalidating all handles that point to it.
    ///
    /// Returns `true` if the owner existed. Destruction never blocks on
    /// pending tasks: tasks still holding a handle to the owner will
    /// simply observe it as invalid at dispatch time.
    pub fn destroy(&self, id: OwnerId) -> bool {
        let removed = self.slots.write().remove(id).is_some();
        if removed {
            tracing::trace!(target: "crosswire_core::handle", ?id, "destroyed owner");
        }
        removed
    }

    /// Check whether an owner is still alive.
    pub fn contains(&self, id: OwnerId) -> bool {
        self.slots.read().contains_key(id)
    }

    /// Resolve an owner id to a temporary strong reference.
    ///
    /// The returned `Arc` keeps the owner alive until the caller drops it,
    /// even if the owner is destroyed in the meantime.
    pub fn resolve(&self, id: OwnerId) -> Option<Arc<dyn MessageTarget>> {
        self.slots.read().get(id).cloned()
    }

    /// The number of live owners.
    pub fn owner_count(&self) -> usize {
        self.slots.read().len()
    }
}

/// Global owner registry (lazily initialized).
static OWNER_REGISTRY: OnceLock<OwnerRegistry> = OnceLock::new();

/// Get the global owner registry.
pub fn owner_registry() -> &'static OwnerRegistry {
    OWNER_REGISTRY.get_or_init(OwnerRegistry::new)
}

/// A liveness-checked reference to a registered owner.
///
/// Handles are plain values: cheap to copy, freely passed around
/// (including across threads), and safe to hold after the owner is gone.
/// They must never be dereferenced without checking validity *at the point
/// of use* - the owner may be destroyed between capture and use, which is
/// exactly the race this type exists to make harmless.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use crosswire_core::{owner_registry, Message, MessageTarget, WeakHandle};
///
/// struct Doc;
/// impl MessageTarget for Doc {
///     fn deliver(&self, _message: &Message) {}
/// }
///
/// let id = owner_registry().register(Arc::new(Doc));
/// let handle = WeakHandle::new(id);
/// assert!(handle.is_valid());
///
/// owner_registry().destroy(id);
/// assert!(!handle.is_valid());
/// assert!(handle.resolve().is_none());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WeakHandle {
    id: OwnerId,
}

impl WeakHandle {
    /// Create a handle to the owner with the given id.
    pub fn new(id: OwnerId) -> Self {
        Self { id }
    }

    /// Create a handle that was never valid.
    pub fn dangling() -> Self {
        Self {
            id: OwnerId::default(),
        }
    }

    /// The owner id this handle refers to.
    pub fn id(&self) -> OwnerId {
        self.id
    }

    /// Check whether the referenced owner is still alive.
    ///
    /// Becomes permanently `false` exactly once, when the owner is
    /// destroyed. No side effects.
    pub fn is_valid(&self) -> bool {
        owner_registry().contains(self.id)
    }

    /// Resolve to a temporary strong reference, or `None` if the owner is
    /// gone.
    ///
    /// The returned reference is guaranteed not to be destroyed until the
    /// caller drops it.
    pub fn resolve(&self) -> Option<Arc<dyn MessageTarget>> {
        owner_registry().resolve(self.id)
    }
}

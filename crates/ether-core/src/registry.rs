//! The per-world effect registry.
//!
//! A [`Registry`] tracks every active effect entry of one world. It holds
//!
//! - the identity index: an ordered map from [`EntryKey`] (type, owner,
//!   effect) to an [`EntryId`] into a slot arena of [`Entry`] values,
//! - the [`SpatialIndex`] over entry positions, and
//! - a dirty flag telling the host whether there is anything new to save,
//!
//! all behind a single mutex. Every operation takes that lock for its whole
//! duration. Callers that need several steps to happen atomically (search
//! for a partner entry, then claim it) take the lock once with
//! [`Registry::lock`] and work through the returned [`RegistryGuard`].
//!
//! The lock is not reentrant. Code that runs while it is held (predicates
//! passed to [`RegistryGuard::find`] and the `any_match` family,
//! [`Actor::find_effect`], [`Effect::is_dead`]) must not call back into the
//! same [`Registry`]; a nested [`Registry::lock`] on the same thread
//! deadlocks or panics. Predicates get the entry they are looking at as an
//! [`EntryMut`], which covers what they need; anything else can check
//! [`Registry::try_lock`], which returns `None` instead of waiting.
//!
//! The registry never owns the world. Operations that may resolve an owner or
//! an effect take the world as a [`WorldView`] argument.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use uuid::Uuid;

use crate::entry::{Entry, EntryCtx, EntryMut};
use crate::handle::{EntryId, SlotArena};
use crate::identity::{EffectTypeId, EntryKey};
use crate::math::BlockPos;
use crate::spatial::SpatialIndex;
use crate::traits::{Actor, Effect, WorldView};

// ---------------------------------------------------------------------------
// RegistryConfig
// ---------------------------------------------------------------------------

/// Tuning for a [`Registry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Edge length, in blocks, of a spatial index cell. Must be positive.
    pub cell_size: i32,
    /// Pose changes smaller than this are ignored.
    pub pose_epsilon: f32,
}

impl Default for RegistryConfig {
    /// 16 block cells, 1e-5 pose tolerance.
    fn default() -> Self {
        Self {
            cell_size: 16,
            pose_epsilon: 1.0e-5,
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct RegistryState {
    pub(crate) index: BTreeMap<EntryKey, EntryId>,
    pub(crate) entries: SlotArena<Entry>,
    pub(crate) spatial: SpatialIndex<EntryId>,
    pub(crate) dirty: bool,
}

/// Tracks the active effects of one world.
///
/// All state sits behind one non-reentrant lock; see the module docs for
/// what may run while it is held.
#[derive(Debug)]
pub struct Registry {
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

impl Registry {
    /// Create an empty registry.
    ///
    /// # Panics
    ///
    /// Panics if `config.cell_size` is not positive or `config.pose_epsilon`
    /// is negative or not finite.
    pub fn new(config: RegistryConfig) -> Self {
        assert!(
            config.pose_epsilon >= 0.0 && config.pose_epsilon.is_finite(),
            "pose_epsilon must be non-negative and finite, got {}",
            config.pose_epsilon
        );
        let state = RegistryState {
            index: BTreeMap::new(),
            entries: SlotArena::new(),
            spatial: SpatialIndex::new(config.cell_size),
            dirty: false,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Take the registry lock.
    ///
    /// A poisoned lock is recovered: no registry operation leaves the state
    /// half-updated at a point where it could panic.
    pub fn lock<'a>(&'a self, world: &'a dyn WorldView) -> RegistryGuard<'a> {
        RegistryGuard {
            state: self.state_lock(),
            world,
            config: &self.config,
        }
    }

    /// Take the registry lock only if it is free right now.
    ///
    /// Returns `None` if any thread holds it, the calling one included, so
    /// code that may run under the lock can use this without deadlocking.
    pub fn try_lock<'a>(&'a self, world: &'a dyn WorldView) -> Option<RegistryGuard<'a>> {
        let state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(RegistryGuard {
            state,
            world,
            config: &self.config,
        })
    }

    pub(crate) fn state_lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the entry for `(effect.type, owner, effect.id)`, creating it on
    /// first use. See [`RegistryGuard::get_or_create`].
    pub fn get_or_create(
        &self,
        world: &dyn WorldView,
        effect: &Arc<dyn Effect>,
        owner: &Arc<dyn Actor>,
    ) -> EntryId {
        self.lock(world).get_or_create(effect, owner)
    }

    /// Look up a live entry. Entries that turn out to be dead are absent.
    pub fn get(
        &self,
        world: &dyn WorldView,
        effect_type: &EffectTypeId,
        owner: Uuid,
        effect: Uuid,
    ) -> Option<EntryId> {
        self.lock(world).get(effect_type, owner, effect)
    }

    /// Drop every entry of `effect_type` owned by `owner`.
    pub fn remove_owner(&self, world: &dyn WorldView, effect_type: &EffectTypeId, owner: Uuid) -> usize {
        self.lock(world).remove_owner(effect_type, owner)
    }

    /// Mark one entry dead. It stays in memory until the next prune.
    pub fn remove(&self, world: &dyn WorldView, id: EntryId) -> bool {
        self.lock(world).remove(id)
    }

    /// Mark the entry of a concrete effect instance dead.
    pub fn remove_effect(&self, world: &dyn WorldView, effect: &dyn Effect, owner: Uuid) -> bool {
        let mut guard = self.lock(world);
        match guard.get(&effect.effect_type(), owner, effect.id()) {
            Some(id) => guard.remove(id),
            None => false,
        }
    }

    /// Run `f` on a live entry.
    pub fn with_entry<R>(
        &self,
        world: &dyn WorldView,
        id: EntryId,
        f: impl FnOnce(&mut EntryMut<'_>) -> R,
    ) -> Option<R> {
        let mut guard = self.lock(world);
        let mut entry = guard.entry_mut(id)?;
        if entry.is_dead() {
            return None;
        }
        Some(f(&mut entry))
    }

    /// See [`RegistryGuard::any_match`].
    pub fn any_match(
        &self,
        world: &dyn WorldView,
        effect_type: &EffectTypeId,
        predicate: impl FnMut(&mut EntryMut<'_>) -> bool,
    ) -> bool {
        self.lock(world).any_match(effect_type, predicate)
    }

    /// See [`RegistryGuard::any_match_resolved`].
    pub fn any_match_resolved(
        &self,
        world: &dyn WorldView,
        effect_type: &EffectTypeId,
        predicate: impl FnMut(&dyn Effect, &dyn Actor) -> bool,
    ) -> bool {
        self.lock(world).any_match_resolved(effect_type, predicate)
    }

    /// See [`RegistryGuard::get_at_position`].
    pub fn get_at_position(&self, world: &dyn WorldView, pos: BlockPos) -> HashSet<EntryId> {
        self.lock(world).get_at_position(pos)
    }

    /// Advance every entry by one world tick. Returns the number of entries
    /// visited.
    pub fn tick(&self, world: &dyn WorldView) -> usize {
        self.lock(world).tick()
    }

    /// Physically drop dead entries. Returns how many were dropped.
    pub fn prune(&self, world: &dyn WorldView) -> usize {
        self.lock(world).prune()
    }

    /// True if something persistable changed since the last
    /// [`mark_saved`](Self::mark_saved).
    pub fn is_dirty(&self) -> bool {
        self.state_lock().dirty
    }

    pub fn mark_dirty(&self) {
        self.state_lock().dirty = true;
    }

    pub fn mark_saved(&self) {
        self.state_lock().dirty = false;
    }

    /// Entries held in memory, dead ones included.
    pub fn len(&self) -> usize {
        self.state_lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state_lock().index.is_empty()
    }

    /// See [`RegistryGuard::live_count`].
    pub fn live_count(&self, world: &dyn WorldView) -> usize {
        self.lock(world).live_count()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

// ---------------------------------------------------------------------------
// RegistryGuard
// ---------------------------------------------------------------------------

/// The registry lock, held for a sequence of operations.
pub struct RegistryGuard<'a> {
    state: MutexGuard<'a, RegistryState>,
    world: &'a dyn WorldView,
    config: &'a RegistryConfig,
}

impl<'a> RegistryGuard<'a> {
    pub fn world(&self) -> &'a dyn WorldView {
        self.world
    }

    /// Read access to an entry, dead or alive. Does not probe liveness.
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        self.state.entries.get(id)
    }

    /// Mutable access to an entry, dead or alive.
    ///
    /// `None` only if `id` is stale (the entry has been pruned or dropped
    /// with its owner).
    pub fn entry_mut(&mut self, id: EntryId) -> Option<EntryMut<'_>> {
        let state = &mut *self.state;
        let entry = state.entries.get_mut(id)?;
        let ctx = EntryCtx {
            spatial: &mut state.spatial,
            dirty: &mut state.dirty,
            world: self.world,
            pose_epsilon: self.config.pose_epsilon,
        };
        Some(EntryMut::new(id, entry, ctx))
    }

    /// Return the entry for `(effect.type, owner, effect.id)`, creating it
    /// if there is none.
    ///
    /// A new entry is filed in the spatial index and marks the registry
    /// dirty. An existing dead entry is revived in place, keeping its id,
    /// rather than replaced. Calling this every tick is cheap: after the
    /// first call it is a map lookup plus a handle comparison.
    pub fn get_or_create(&mut self, effect: &Arc<dyn Effect>, owner: &Arc<dyn Actor>) -> EntryId {
        let key = EntryKey::new(effect.effect_type(), owner.uuid(), effect.id());

        let existing = self.state.index.get(&key).copied();
        if let Some(id) = existing {
            if let Some(mut entry) = self.entry_mut(id) {
                entry.adopt(effect, owner);
                return id;
            }
        }

        let entry = Entry::new(key.clone(), effect, owner);
        let state = &mut *self.state;
        let id = state.entries.insert(entry);
        state.index.insert(key.clone(), id);
        state.dirty = true;
        tracing::debug!(entry = %id, key = %key, "created entry");

        if let Some(mut entry) = self.entry_mut(id) {
            entry.update();
        }
        id
    }

    /// Look up a live entry.
    pub fn get(&mut self, effect_type: &EffectTypeId, owner: Uuid, effect: Uuid) -> Option<EntryId> {
        let key = EntryKey::new(effect_type.clone(), owner, effect);
        let id = *self.state.index.get(&key)?;
        let mut entry = self.entry_mut(id)?;
        if entry.is_dead() {
            None
        } else {
            Some(id)
        }
    }

    /// Look up an entry without probing its liveness. The entry may be dead,
    /// or about to die the next time anything probes it.
    pub fn id_of(&self, effect_type: &EffectTypeId, owner: Uuid, effect: Uuid) -> Option<EntryId> {
        let key = EntryKey::new(effect_type.clone(), owner, effect);
        self.state.index.get(&key).copied()
    }

    /// Drop every entry of `effect_type` owned by `owner`, live or dead.
    ///
    /// Returns how many entries were dropped. Outstanding ids of dropped
    /// entries go stale.
    pub fn remove_owner(&mut self, effect_type: &EffectTypeId, owner: Uuid) -> usize {
        let (lo, hi) = EntryKey::owner_bounds(effect_type, owner);
        let state = &mut *self.state;
        let keys: Vec<EntryKey> = state.index.range(lo..=hi).map(|(k, _)| k.clone()).collect();
        for key in &keys {
            if let Some(id) = state.index.remove(key) {
                state.spatial.remove(id);
                state.entries.remove(id);
            }
        }
        if !keys.is_empty() {
            state.dirty = true;
            tracing::debug!(
                effect_type = %effect_type,
                owner = %owner,
                count = keys.len(),
                "dropped owner entries"
            );
        }
        keys.len()
    }

    /// Mark one entry dead. Returns false if it was already dead or stale.
    pub fn remove(&mut self, id: EntryId) -> bool {
        match self.entry_mut(id) {
            Some(mut entry) if !entry.is_removed() => {
                entry.mark_dead();
                true
            }
            _ => false,
        }
    }

    /// Distinct effect types with at least one entry in memory.
    pub fn effect_types(&self) -> Vec<EffectTypeId> {
        let mut types: Vec<EffectTypeId> = Vec::new();
        for key in self.state.index.keys() {
            if types.last() != Some(&key.effect_type) {
                types.push(key.effect_type.clone());
            }
        }
        types
    }

    /// Ids of every entry of `effect_type` held in memory, in key order.
    pub fn entries_of_type(&self, effect_type: &EffectTypeId) -> Vec<EntryId> {
        let (lo, hi) = EntryKey::type_bounds(effect_type);
        self.state.index.range(lo..=hi).map(|(_, id)| *id).collect()
    }

    /// The first live entry of `effect_type`, in key order, for which
    /// `predicate` holds.
    pub fn find(
        &mut self,
        effect_type: &EffectTypeId,
        mut predicate: impl FnMut(&mut EntryMut<'_>) -> bool,
    ) -> Option<EntryId> {
        for id in self.entries_of_type(effect_type) {
            if let Some(mut entry) = self.entry_mut(id) {
                if !entry.is_dead() && predicate(&mut entry) {
                    return Some(id);
                }
            }
        }
        None
    }

    /// True if `predicate` holds for any live entry of `effect_type`.
    /// Stops at the first match.
    ///
    /// `predicate` runs under the registry lock and must not call back into
    /// the registry.
    pub fn any_match(
        &mut self,
        effect_type: &EffectTypeId,
        predicate: impl FnMut(&mut EntryMut<'_>) -> bool,
    ) -> bool {
        self.find(effect_type, predicate).is_some()
    }

    /// Like [`any_match`](Self::any_match), but `predicate` sees the resolved
    /// effect and owner. Entries where either fails to resolve are skipped.
    pub fn any_match_resolved(
        &mut self,
        effect_type: &EffectTypeId,
        mut predicate: impl FnMut(&dyn Effect, &dyn Actor) -> bool,
    ) -> bool {
        self.any_match(effect_type, |entry| {
            let Some(effect) = entry.effect() else {
                return false;
            };
            let Some(owner) = entry.owner_actor() else {
                return false;
            };
            predicate(effect.as_ref(), owner.as_ref())
        })
    }

    /// Entries filed under the spatial cell containing `pos`.
    ///
    /// Always empty on non-authoritative worlds.
    pub fn get_at_position(&self, pos: BlockPos) -> HashSet<EntryId> {
        if !self.world.is_authoritative() {
            return HashSet::new();
        }
        self.state.spatial.get_state(pos)
    }

    /// Run [`EntryMut::update`] on every entry. Dead entries are visited
    /// but do nothing.
    pub fn tick(&mut self) -> usize {
        let ids: Vec<EntryId> = self.state.index.values().copied().collect();
        for &id in &ids {
            if let Some(mut entry) = self.entry_mut(id) {
                entry.update();
            }
        }
        ids.len()
    }

    /// Physically drop every dead entry. Liveness is probed, so entries
    /// whose effect died unobserved are dropped too.
    pub fn prune(&mut self) -> usize {
        let ids: Vec<(EntryKey, EntryId)> = self
            .state
            .index
            .iter()
            .map(|(k, id)| (k.clone(), *id))
            .collect();
        let mut pruned = 0;
        for (key, id) in ids {
            let dead = self.entry_mut(id).map_or(true, |mut e| e.is_dead());
            if dead {
                let state = &mut *self.state;
                state.index.remove(&key);
                state.spatial.remove(id);
                state.entries.remove(id);
                pruned += 1;
            }
        }
        if pruned > 0 {
            tracing::debug!(pruned, "pruned dead entries");
        }
        pruned
    }

    /// Entries held in memory, dead ones included.
    pub fn len(&self) -> usize {
        self.state.index.len()
    }

    /// Entries that are still alive. Probes every entry.
    pub fn live_count(&mut self) -> usize {
        let ids: Vec<EntryId> = self.state.index.values().copied().collect();
        ids.into_iter()
            .filter(|&id| self.entry_mut(id).is_some_and(|mut e| e.is_alive()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.state.index.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.state.dirty
    }
}

//! Tracked effect entries and their lifecycle.
//!
//! An [`Entry`] is owned by the registry's slot arena. Read access is plain
//! `&Entry`; anything that can change the entry, file it in the spatial
//! index, or resolve its owner or effect goes through [`EntryMut`], which is
//! only handed out while the registry lock is held.
//!
//! # Lifecycle
//!
//! ```text
//!   ALIVE (unclaimed) <-- claim/release --> ALIVE (claimed)
//!          \                                   /
//!           `------------ mark_dead ----------'
//!                            |
//!                            v
//!                          DEAD  (left out of the spatial index,
//!                                 claimants cleared, pruned on next save)
//! ```
//!
//! Only [`Registry::get_or_create`](crate::registry::Registry::get_or_create)
//! can bring a dead entry back, and only because the same effect instance
//! was registered again.

use std::collections::BTreeSet;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use uuid::Uuid;

use crate::handle::EntryId;
use crate::identity::EntryKey;
use crate::math::BlockPos;
use crate::reference::EntityReference;
use crate::spatial::{Hotspot, SpatialIndex};
use crate::traits::{Actor, Effect, WorldView};

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// One tracked effect instance.
#[derive(Debug)]
pub struct Entry {
    key: EntryKey,
    pub(crate) owner: EntityReference,
    effect_id: Option<Uuid>,
    effect: Option<Weak<dyn Effect>>,
    removed: bool,
    pitch: f32,
    yaw: f32,
    radius: f32,
    changed: bool,
    claimants: BTreeSet<Uuid>,
    current_pos: BlockPos,
    previous_pos: BlockPos,
}

impl Entry {
    pub(crate) fn new(key: EntryKey, effect: &Arc<dyn Effect>, owner: &Arc<dyn Actor>) -> Self {
        let pos = BlockPos::floored(owner.position());
        Self {
            effect_id: Some(key.effect),
            key,
            owner: EntityReference::from_actor(owner),
            effect: Some(Arc::downgrade(effect)),
            removed: false,
            pitch: 0.0,
            yaw: 0.0,
            radius: 0.0,
            changed: true,
            claimants: BTreeSet::new(),
            current_pos: pos,
            previous_pos: pos,
        }
    }

    /// Rebuild an entry from persisted state. References stay unresolved.
    pub(crate) fn restored(
        key: EntryKey,
        owner: EntityReference,
        effect_id: Option<Uuid>,
        pose: (f32, f32, f32),
        claimants: BTreeSet<Uuid>,
    ) -> Self {
        let pos = owner
            .values()
            .map_or(BlockPos::ORIGIN, |v| BlockPos::floored(v.pos));
        let (pitch, yaw, radius) = pose;
        Self {
            key,
            owner,
            effect_id,
            effect: None,
            removed: false,
            pitch,
            yaw,
            radius,
            changed: true,
            claimants,
            current_pos: pos,
            previous_pos: pos,
        }
    }

    pub fn key(&self) -> &EntryKey {
        &self.key
    }

    pub fn owner(&self) -> &EntityReference {
        &self.owner
    }

    /// The effect this entry tracks, while one is associated.
    pub fn effect_id(&self) -> Option<Uuid> {
        self.effect_id
    }

    /// True once the entry has been marked dead. Unlike
    /// [`EntryMut::is_dead`] this does not probe the effect.
    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn is_claimed_by(&self, claimant: Uuid) -> bool {
        self.claimants.contains(&claimant)
    }

    pub fn has_claimant(&self) -> bool {
        !self.claimants.is_empty()
    }

    pub fn claimants(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.claimants.iter().copied()
    }

    pub fn current_pos(&self) -> BlockPos {
        self.current_pos
    }

    pub fn previous_pos(&self) -> BlockPos {
        self.previous_pos
    }
}

impl Hotspot for Entry {
    fn center(&self) -> BlockPos {
        self.current_pos
    }

    fn radius(&self) -> f32 {
        self.radius
    }
}

fn approximately_equals(a: f32, b: f32, epsilon: f32) -> bool {
    (b - a).abs() < epsilon
}

// ---------------------------------------------------------------------------
// EntryMut
// ---------------------------------------------------------------------------

/// Registry-side state an entry mutation may touch.
pub(crate) struct EntryCtx<'a> {
    pub(crate) spatial: &'a mut SpatialIndex<EntryId>,
    pub(crate) dirty: &'a mut bool,
    pub(crate) world: &'a dyn WorldView,
    pub(crate) pose_epsilon: f32,
}

/// Mutable access to one entry while the registry lock is held.
pub struct EntryMut<'a> {
    id: EntryId,
    entry: &'a mut Entry,
    ctx: EntryCtx<'a>,
}

impl<'a> Deref for EntryMut<'a> {
    type Target = Entry;

    fn deref(&self) -> &Entry {
        self.entry
    }
}

impl<'a> EntryMut<'a> {
    pub(crate) fn new(id: EntryId, entry: &'a mut Entry, ctx: EntryCtx<'a>) -> Self {
        Self { id, entry, ctx }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Read and clear the pose-changed flag.
    pub fn has_changed(&mut self) -> bool {
        std::mem::take(&mut self.entry.changed)
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        if !pitch.is_finite() || approximately_equals(self.entry.pitch, pitch, self.ctx.pose_epsilon) {
            return;
        }
        self.entry.pitch = pitch;
        self.pose_changed();
    }

    pub fn set_yaw(&mut self, yaw: f32) {
        if !yaw.is_finite() || approximately_equals(self.entry.yaw, yaw, self.ctx.pose_epsilon) {
            return;
        }
        self.entry.yaw = yaw;
        self.pose_changed();
    }

    /// Set the radius. Crossing an integer boundary re-files the entry,
    /// since the spatial index is keyed off the truncated radius.
    pub fn set_radius(&mut self, radius: f32) {
        if !radius.is_finite()
            || approximately_equals(self.entry.radius, radius, self.ctx.pose_epsilon)
        {
            return;
        }
        let previous = self.entry.radius;
        self.entry.radius = radius;
        if previous as i32 != radius as i32 && !self.entry.removed {
            self.refile();
        }
        self.pose_changed();
    }

    fn pose_changed(&mut self) {
        self.entry.changed = true;
        *self.ctx.dirty = true;
    }

    /// Add `claimant` to the claim set. Dead entries cannot be claimed.
    ///
    /// Any number of claimants may be recorded; callers pairing endpoints
    /// check [`Entry::has_claimant`] first.
    pub fn claim(&mut self, claimant: Uuid) -> bool {
        if self.entry.removed {
            return false;
        }
        let added = self.entry.claimants.insert(claimant);
        if added {
            *self.ctx.dirty = true;
        }
        added
    }

    pub fn release(&mut self, claimant: Uuid) -> bool {
        let removed = self.entry.claimants.remove(&claimant);
        if removed {
            *self.ctx.dirty = true;
        }
        removed
    }

    /// Whether the owner reference currently points at `uuid`.
    pub fn owner_matches(&mut self, uuid: Uuid) -> bool {
        self.entry.owner.target().is_some_and(|v| v.uuid == uuid)
    }

    /// Kill the entry. Irreversible apart from re-registration.
    pub fn mark_dead(&mut self) {
        tracing::debug!(
            entry = %self.id,
            key = %self.entry.key,
            owner_pos = ?self.entry.owner.values().map(|v| v.pos),
            "marking entry dead"
        );
        self.entry.removed = true;
        self.entry.claimants.clear();
        self.ctx.spatial.remove(self.id);
        *self.ctx.dirty = true;
    }

    /// Liveness check. Probes the effect, so an entry whose effect has died
    /// becomes dead here.
    pub fn is_dead(&mut self) -> bool {
        if !self.entry.removed {
            self.effect();
        }
        self.entry.removed
    }

    pub fn is_alive(&mut self) -> bool {
        !self.is_dead()
    }

    /// Resolve the live effect.
    ///
    /// Uses the cached handle if it still upgrades, otherwise asks the
    /// resolved owner for an active effect with the recorded id. A miss is
    /// not a death verdict: the owner may simply be unloaded. An effect that
    /// resolves but reports itself dead kills the entry.
    pub fn effect(&mut self) -> Option<Arc<dyn Effect>> {
        if self.entry.removed {
            return None;
        }
        let mut effect = self.entry.effect.as_ref().and_then(Weak::upgrade);
        if effect.is_none() {
            if let Some(effect_id) = self.entry.effect_id {
                effect = self
                    .entry
                    .owner
                    .resolve(self.ctx.world)
                    .and_then(|owner| owner.find_effect(&|e: &dyn Effect| e.id() == effect_id));
                if let Some(found) = &effect {
                    self.entry.effect = Some(Arc::downgrade(found));
                }
            }
        }
        if effect.as_ref().is_some_and(|e| e.is_dead()) {
            self.entry.effect_id = None;
            self.entry.effect = None;
            self.mark_dead();
            return None;
        }
        effect
    }

    /// Resolve the effect and run `f` on it as its concrete type.
    pub fn with_effect<T: Effect, R>(&mut self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let effect = self.effect()?;
        let concrete = effect.as_any().downcast_ref::<T>()?;
        Some(f(concrete))
    }

    /// Resolve the owning actor. Dead entries have no owner.
    pub fn owner_actor(&mut self) -> Option<Arc<dyn Actor>> {
        if self.entry.removed {
            return None;
        }
        self.entry.owner.resolve(self.ctx.world)
    }

    /// Point the entry at a freshly registered effect instance and owner,
    /// reviving it if it was dead.
    pub(crate) fn adopt(&mut self, effect: &Arc<dyn Effect>, owner: &Arc<dyn Actor>) {
        let cached = self.entry.effect.as_ref().and_then(Weak::upgrade);
        if !cached.is_some_and(|c| Arc::ptr_eq(&c, effect)) {
            self.entry.effect = Some(Arc::downgrade(effect));
            *self.ctx.dirty = true;
        }
        self.entry.owner.set(Some(owner));
        if self.entry.removed {
            tracing::debug!(entry = %self.id, key = %self.entry.key, "reviving dead entry");
            self.entry.removed = false;
            self.entry.effect_id = Some(self.entry.key.effect);
            self.update();
            *self.ctx.dirty = true;
        }
    }

    /// Track the owner's current block and re-file on movement.
    ///
    /// Falls back to the last known snapshot when the owner cannot be
    /// resolved, and to the grid origin when there is no snapshot at all.
    /// Dead entries are left alone.
    pub fn update(&mut self) {
        if self.entry.removed {
            return;
        }
        self.entry.owner.resolve(self.ctx.world);
        let pos = self
            .entry
            .owner
            .target()
            .map_or(BlockPos::ORIGIN, |v| BlockPos::floored(v.pos));
        self.entry.previous_pos = self.entry.current_pos;
        self.entry.current_pos = pos;
        if pos != self.entry.previous_pos || !self.ctx.spatial.contains(self.id) {
            self.refile();
        }
    }

    fn refile(&mut self) {
        if self.ctx.spatial.update(self.id, &*self.entry) {
            tracing::trace!(
                entry = %self.id,
                center = %self.entry.current_pos,
                radius = self.entry.radius,
                "refiled entry"
            );
        }
    }
}

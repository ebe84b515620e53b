//! Indirect, re-resolvable references to actors.
//!
//! An [`EntityReference`] remembers who owns an effect even while that actor
//! is unloaded. It keeps two things:
//!
//! - a durable [`EntityValues`] snapshot (uuid, last position, local id, a few
//!   attributes) that is persisted and is always enough to find the actor
//!   again, and
//! - a [`Weak`] cache of the live actor, which is only a shortcut. The cache
//!   is trusted only after it upgrades *and* the actor reports it is still in
//!   the world.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::math::Vec3;
use crate::traits::{Actor, WorldView};

// ---------------------------------------------------------------------------
// LevelStore
// ---------------------------------------------------------------------------

/// A copy of one of an actor's numeric gauges taken at snapshot time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LevelStore {
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub max: i32,
}

impl LevelStore {
    pub const ZERO: LevelStore = LevelStore { level: 0, max: 0 };

    pub fn new(level: i32, max: i32) -> Self {
        Self { level, max }
    }
}

// ---------------------------------------------------------------------------
// EntityValues
// ---------------------------------------------------------------------------

/// Durable snapshot of an actor.
///
/// Only `uuid` is required when reading a persisted snapshot; every other
/// field falls back to its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityValues {
    pub uuid: Uuid,
    #[serde(default)]
    pub pos: Vec3,
    #[serde(default)]
    pub client_id: i32,
    #[serde(default)]
    pub is_player: bool,
    #[serde(default)]
    pub is_dead: bool,
    #[serde(default)]
    pub level: LevelStore,
    #[serde(default)]
    pub corruption: LevelStore,
}

impl EntityValues {
    /// Snapshot the current state of `actor`.
    pub fn of(actor: &dyn Actor) -> Self {
        Self {
            uuid: actor.uuid(),
            pos: actor.position(),
            client_id: actor.local_id(),
            is_player: actor.is_player(),
            is_dead: !actor.is_alive(),
            level: actor.level(),
            corruption: actor.corruption(),
        }
    }

    /// Look the actor up in `world`: by uuid on authoritative worlds, by
    /// local id on views.
    pub fn resolve(&self, world: &dyn WorldView) -> Option<Arc<dyn Actor>> {
        let actor = if world.is_authoritative() {
            world.actor_by_uuid(self.uuid)
        } else {
            world.actor_by_local_id(self.client_id)
        };
        actor.filter(|a| !a.is_removed())
    }
}

// ---------------------------------------------------------------------------
// EntityReference
// ---------------------------------------------------------------------------

/// A reference to an actor that survives the actor being unloaded.
#[derive(Debug, Clone, Default)]
pub struct EntityReference {
    values: Option<EntityValues>,
    direct: Option<Weak<dyn Actor>>,
}

impl EntityReference {
    /// An empty reference.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_actor(actor: &Arc<dyn Actor>) -> Self {
        let mut reference = Self::new();
        reference.set(Some(actor));
        reference
    }

    /// Rebuild a reference from a persisted snapshot. Nothing is resolved.
    pub fn from_values(values: EntityValues) -> Self {
        Self {
            values: Some(values),
            direct: None,
        }
    }

    /// Point at `actor`, or clear the reference when `None`.
    ///
    /// Returns true if the reference is now set.
    pub fn set(&mut self, actor: Option<&Arc<dyn Actor>>) -> bool {
        match actor {
            Some(actor) => {
                self.values = Some(EntityValues::of(actor.as_ref()));
                self.direct = Some(Arc::downgrade(actor));
                true
            }
            None => {
                self.discard();
                false
            }
        }
    }

    /// Forget both the snapshot and the cached handle.
    pub fn discard(&mut self) {
        self.values = None;
        self.direct = None;
    }

    /// Take over another reference's snapshot and cache.
    pub fn copy_from(&mut self, other: &EntityReference) {
        self.values = other.values.clone();
        self.direct = other.direct.clone();
    }

    pub fn is_set(&self) -> bool {
        self.values.is_some()
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.values.as_ref().map(|v| v.uuid)
    }

    pub fn reference_equals(&self, uuid: Uuid) -> bool {
        self.uuid() == Some(uuid)
    }

    /// The snapshot as last recorded, without touching the cache.
    pub fn values(&self) -> Option<&EntityValues> {
        self.values.as_ref()
    }

    /// The cached actor, if it is still alive in memory and in the world.
    fn cached(&self) -> Option<Arc<dyn Actor>> {
        self.direct
            .as_ref()
            .and_then(Weak::upgrade)
            .filter(|a| !a.is_removed())
    }

    /// The freshest snapshot available without consulting the world.
    ///
    /// Refreshes the snapshot from the cached actor when that is still live;
    /// otherwise returns the last recorded snapshot, which may be stale.
    pub fn target(&mut self) -> Option<&EntityValues> {
        if let Some(actor) = self.cached() {
            self.values = Some(EntityValues::of(actor.as_ref()));
        }
        self.values.as_ref()
    }

    /// Find the live actor, consulting the world when the cache misses.
    ///
    /// A successful resolution refreshes both the cache and the snapshot.
    /// A miss leaves the snapshot untouched so the actor can be found again
    /// once it reloads.
    pub fn resolve(&mut self, world: &dyn WorldView) -> Option<Arc<dyn Actor>> {
        let actor = self
            .cached()
            .or_else(|| self.values.as_ref().and_then(|v| v.resolve(world)))?;
        self.set(Some(&actor));
        Some(actor)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

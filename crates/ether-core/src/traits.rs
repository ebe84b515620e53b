//! Capabilities the registry needs from the game it is embedded in.
//!
//! The registry never owns actors, effects or the world. It talks to them
//! through these three traits and keeps only ids, snapshots and [`Weak`]
//! caches of what they hand back.
//!
//! [`Weak`]: std::sync::Weak

use std::any::Any;
use std::sync::Arc;

use uuid::Uuid;

use crate::identity::EffectTypeId;
use crate::math::Vec3;
use crate::reference::LevelStore;

/// An active effect attached to an actor (a portal, a ward, ...).
pub trait Effect: Send + Sync + 'static {
    /// Stable unique id of this effect instance.
    fn id(&self) -> Uuid;

    /// The effect's type; the first level of the registry's identity key.
    fn effect_type(&self) -> EffectTypeId;

    /// True once the effect has ended. Dead effects never come back.
    ///
    /// Called with the registry lock held; must not call into the registry.
    fn is_dead(&self) -> bool;

    /// Used by typed predicates to downcast to the concrete effect.
    fn as_any(&self) -> &dyn Any;
}

/// Predicate handed to [`Actor::find_effect`].
pub type EffectFilter<'a> = &'a dyn Fn(&dyn Effect) -> bool;

/// An actor in the world that can own effects.
pub trait Actor: Send + Sync + 'static {
    /// Stable unique id, valid across unload and reload.
    fn uuid(&self) -> Uuid;

    /// Transient id assigned by the current world instance.
    fn local_id(&self) -> i32;

    fn position(&self) -> Vec3;

    fn is_player(&self) -> bool {
        false
    }

    /// False once the actor has died.
    fn is_alive(&self) -> bool;

    /// True once the actor has left the world (unloaded or discarded).
    /// A removed actor must not be used even if a handle to it survives.
    fn is_removed(&self) -> bool {
        false
    }

    fn level(&self) -> LevelStore {
        LevelStore::ZERO
    }

    fn corruption(&self) -> LevelStore {
        LevelStore::ZERO
    }

    /// Search this actor's active effects.
    ///
    /// Called with the registry lock held; must not call into the registry.
    fn find_effect(&self, filter: EffectFilter<'_>) -> Option<Arc<dyn Effect>>;
}

/// The world instance a registry belongs to.
pub trait WorldView: Send + Sync {
    /// Authoritative worlds own durable state. Views (client-side copies)
    /// only mirror it.
    fn is_authoritative(&self) -> bool;

    /// Resolve an actor by unique id. Used on authoritative worlds.
    fn actor_by_uuid(&self, uuid: Uuid) -> Option<Arc<dyn Actor>>;

    /// Resolve an actor by transient local id. Used on views.
    fn actor_by_local_id(&self, local_id: i32) -> Option<Arc<dyn Actor>>;
}

//! Ether core -- per-world registry of active, positioned effects.
//!
//! A [`Registry`](registry::Registry) tracks the long-lived effects cast by
//! actors in one world (portals, wards, ...). Entries are indexed two ways:
//! by identity (effect type, owner uuid, effect uuid) and by position, through
//! a coarse [`SpatialIndex`](spatial::SpatialIndex). Owners and effects are
//! never owned by the registry; entries hold re-resolvable references to
//! them and find them again after they unload and reload.
//!
//! Pairs of entries can be linked through a claim set on each entry. The
//! registry only records claims; callers decide who may claim what, and hold
//! the registry lock ([`Registry::lock`](registry::Registry::lock)) across
//! search-then-claim so that two callers cannot take the same partner.
//!
//! # Quick Start
//!
//! ```
//! use std::any::Any;
//! use std::sync::Arc;
//!
//! use ether_core::prelude::*;
//! use uuid::Uuid;
//!
//! # struct Ward { id: Uuid }
//! # impl Effect for Ward {
//! #     fn id(&self) -> Uuid { self.id }
//! #     fn effect_type(&self) -> EffectTypeId { EffectTypeId::from_static("ether:ward") }
//! #     fn is_dead(&self) -> bool { false }
//! #     fn as_any(&self) -> &dyn Any { self }
//! # }
//! # struct Caster { uuid: Uuid, ward: Arc<Ward> }
//! # impl Actor for Caster {
//! #     fn uuid(&self) -> Uuid { self.uuid }
//! #     fn local_id(&self) -> i32 { 1 }
//! #     fn position(&self) -> Vec3 { Vec3::new(8.5, 64.0, -3.5) }
//! #     fn is_alive(&self) -> bool { true }
//! #     fn find_effect(&self, filter: EffectFilter<'_>) -> Option<Arc<dyn Effect>> {
//! #         let ward: Arc<dyn Effect> = self.ward.clone();
//! #         filter(ward.as_ref()).then_some(ward)
//! #     }
//! # }
//! # struct World { caster: Arc<Caster> }
//! # impl WorldView for World {
//! #     fn is_authoritative(&self) -> bool { true }
//! #     fn actor_by_uuid(&self, uuid: Uuid) -> Option<Arc<dyn Actor>> {
//! #         (uuid == self.caster.uuid).then(|| self.caster.clone() as Arc<dyn Actor>)
//! #     }
//! #     fn actor_by_local_id(&self, _local_id: i32) -> Option<Arc<dyn Actor>> { None }
//! # }
//! let ward = Arc::new(Ward { id: Uuid::new_v4() });
//! let caster = Arc::new(Caster { uuid: Uuid::new_v4(), ward: ward.clone() });
//! let world = World { caster: caster.clone() };
//!
//! let registry = Registry::default();
//! let effect: Arc<dyn Effect> = ward;
//! let owner: Arc<dyn Actor> = caster;
//! let id = registry.get_or_create(&world, &effect, &owner);
//! registry.with_entry(&world, id, |entry| entry.set_radius(4.0));
//! registry.tick(&world);
//! assert!(registry.get_at_position(&world, BlockPos::new(8, 64, -4)).contains(&id));
//!
//! let document = registry.serialize(&world);
//! assert_eq!(document.entry_count(), 1);
//! registry.mark_saved();
//! ```

#![deny(unsafe_code)]

pub mod entry;
pub mod handle;
pub mod identity;
pub mod math;
pub mod persist;
pub mod reference;
pub mod registry;
pub mod spatial;
pub mod traits;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the registry.
///
/// Most registry failures are not errors at all: an owner or effect that
/// cannot be found reads as absent. These variants cover input that is
/// invalid outright.
#[derive(Debug, thiserror::Error)]
pub enum EtherError {
    /// An effect type id that is not of the form `namespace:path`.
    #[error("invalid effect type id '{raw}': expected 'namespace:path'")]
    InvalidTypeId { raw: String },

    /// A persisted document whose top-level shape is wrong.
    #[error("malformed registry document: {details}")]
    MalformedDocument { details: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::entry::{Entry, EntryMut};
    pub use crate::handle::EntryId;
    pub use crate::identity::{EffectTypeId, EntryKey};
    pub use crate::math::{BlockPos, Vec3};
    pub use crate::persist::{EntryDoc, EtherDocument, LoadReport, SkippedEntry};
    pub use crate::reference::{EntityReference, EntityValues, LevelStore};
    pub use crate::registry::{Registry, RegistryConfig, RegistryGuard};
    pub use crate::spatial::{Hotspot, SpatialIndex};
    pub use crate::traits::{Actor, Effect, EffectFilter, WorldView};
    pub use crate::EtherError;
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------

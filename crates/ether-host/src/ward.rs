//! Fluid-repelling wards.
//!
//! A ward publishes its range as the radius of its registry entry every
//! tick. Fluid simulation then asks [`blocks_at`] whether a block is inside
//! any ward, which only has to look at the entries filed under that block's
//! spatial cell.

use std::sync::Arc;

use ether_core::prelude::*;

use crate::world::{EffectKind, SimEffect};

pub const WARD_TYPE: &str = "ether:ward";

pub fn ward_type() -> EffectTypeId {
    EffectTypeId::from_static(WARD_TYPE)
}

/// Create or refresh the ward's entry with its current range.
pub fn maintain(guard: &mut RegistryGuard<'_>, caster: &Arc<dyn Actor>, ward: &Arc<SimEffect>) -> Option<EntryId> {
    let EffectKind::Ward { range } = *ward.kind() else {
        return None;
    };
    let effect: Arc<dyn Effect> = ward.clone();
    let id = guard.get_or_create(&effect, caster);
    guard.entry_mut(id)?.set_radius(range);
    Some(id)
}

/// True if `pos` lies within `radius + 1` of the caster of any live ward.
///
/// Wards whose caster cannot be resolved right now do not block. Always
/// false on views, which have no spatial index to ask.
pub fn blocks_at(registry: &Registry, world: &dyn WorldView, pos: BlockPos) -> bool {
    let ty = ward_type();
    let mut guard = registry.lock(world);
    let candidates = guard.get_at_position(pos);
    candidates.into_iter().any(|id| {
        let Some(mut entry) = guard.entry_mut(id) else {
            return false;
        };
        if entry.key().effect_type != ty || entry.is_dead() {
            return false;
        }
        let reach = f64::from(entry.radius()) + 1.0;
        entry
            .owner_actor()
            .is_some_and(|caster| pos.is_within_distance(caster.position(), reach))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Pairing portals through the registry's claim sets.
//!
//! Two portals are linked when each one's entry is claimed by the other's
//! effect id. Linking happens under one registry guard so that two casters
//! searching at the same time cannot take the same partner:
//!
//! 1. make sure the caster's own portal has an entry,
//! 2. find a live, unclaimed portal entry owned by someone else,
//! 3. claim it with the caster's portal id, and
//! 4. claim the caster's own entry with the partner's portal id.
//!
//! A link is only trusted while the partner entry is still claimed by us.
//! The registry never releases claims on its own, so [`unlink`] is how a
//! portal lets go of its partner.

use std::sync::{Arc, PoisonError};

use ether_core::prelude::*;
use uuid::Uuid;

use crate::world::SimEffect;

pub const PORTAL_TYPE: &str = "ether:portal";

pub fn portal_type() -> EffectTypeId {
    EffectTypeId::from_static(PORTAL_TYPE)
}

/// Where a linked portal leads.
#[derive(Debug, Clone, PartialEq)]
pub struct Destination {
    pub entry: EntryId,
    pub key: EntryKey,
    pub pos: BlockPos,
    pub pitch: f32,
    pub yaw: f32,
}

fn stored_link(portal: &SimEffect) -> Option<EntryKey> {
    let state = portal.portal_state()?;
    let link = state.link.lock().unwrap_or_else(PoisonError::into_inner);
    link.clone()
}

fn store_link(portal: &SimEffect, key: Option<EntryKey>) {
    if let Some(state) = portal.portal_state() {
        *state.link.lock().unwrap_or_else(PoisonError::into_inner) = key;
    }
}

/// Publish the portal's orientation to its entry, creating the entry on
/// first use. Returns the caster's own entry.
pub fn maintain(guard: &mut RegistryGuard<'_>, caster: &Arc<dyn Actor>, portal: &Arc<SimEffect>) -> Option<EntryId> {
    let state = portal.portal_state()?;
    let (pitch, yaw) = *state.orientation.lock().unwrap_or_else(PoisonError::into_inner);
    let effect: Arc<dyn Effect> = portal.clone();
    let id = guard.get_or_create(&effect, caster);
    let mut entry = guard.entry_mut(id)?;
    entry.set_pitch(pitch);
    entry.set_yaw(yaw);
    Some(id)
}

/// Link `portal` to a free portal cast by someone else.
///
/// Returns the existing destination if the portal is already linked, or
/// `None` if no partner is available.
pub fn link(
    registry: &Registry,
    world: &dyn WorldView,
    caster: &Arc<dyn Actor>,
    portal: &Arc<SimEffect>,
) -> Option<Destination> {
    let mut guard = registry.lock(world);
    let own = maintain(&mut guard, caster, portal)?;
    if let Some(existing) = destination_locked(&mut guard, caster.uuid(), portal) {
        return Some(existing);
    }

    let me = portal.id();
    let owner = caster.uuid();
    let target = guard.find(&portal_type(), |e| {
        e.id() != own && !e.has_claimant() && !e.owner_matches(owner)
    })?;

    let target_key = {
        let mut entry = guard.entry_mut(target)?;
        entry.claim(me);
        entry.key().clone()
    };
    if let Some(mut entry) = guard.entry_mut(own) {
        entry.claim(target_key.effect);
    }
    store_link(portal, Some(target_key.clone()));
    tracing::debug!(portal = %me, partner = %target_key, "portals linked");

    destination_locked(&mut guard, owner, portal)
}

/// The portal this one leads to.
///
/// Trusts the stored link only while the partner is alive and still claimed
/// by this portal. A portal that was linked *to* (rather than linking)
/// finds its partner through its own entry's claimants.
pub fn destination(
    registry: &Registry,
    world: &dyn WorldView,
    caster: Uuid,
    portal: &SimEffect,
) -> Option<Destination> {
    let mut guard = registry.lock(world);
    destination_locked(&mut guard, caster, portal)
}

fn destination_locked(guard: &mut RegistryGuard<'_>, caster: Uuid, portal: &SimEffect) -> Option<Destination> {
    let me = portal.id();
    let ty = portal_type();

    let candidate = stored_link(portal)
        .and_then(|key| guard.get(&key.effect_type, key.owner, key.effect))
        .filter(|&id| guard.entry(id).is_some_and(|e| e.is_claimed_by(me)))
        .or_else(|| {
            // Linked to by someone else: look for a claimant of our entry
            // whose own entry we are claiming.
            let own = guard.get(&ty, caster, me)?;
            let claimants: Vec<Uuid> = guard.entry(own)?.claimants().collect();
            guard.find(&ty, |e| claimants.contains(&e.key().effect) && e.is_claimed_by(me))
        })?;

    let mut entry = guard.entry_mut(candidate)?;
    entry.update();
    let destination = Destination {
        entry: candidate,
        key: entry.key().clone(),
        pos: entry.current_pos(),
        pitch: entry.pitch(),
        yaw: entry.yaw(),
    };
    drop(entry);
    store_link(portal, Some(destination.key.clone()));
    Some(destination)
}

/// Let go of every partner portal. Releases both sides of each claim.
///
/// Claims are read without probing liveness, so a portal that has already
/// ended still frees the partners it was linked to before its entry dies.
/// Returns false if there was nothing to release.
pub fn unlink(registry: &Registry, world: &dyn WorldView, caster: Uuid, portal: &SimEffect) -> bool {
    let mut guard = registry.lock(world);
    let me = portal.id();
    let ty = portal_type();
    store_link(portal, None);

    let own = guard.id_of(&ty, caster, me);
    let own_claimants: Vec<Uuid> = own
        .and_then(|id| guard.entry(id))
        .map(|e| e.claimants().collect())
        .unwrap_or_default();
    let partners: Vec<EntryId> = guard
        .entries_of_type(&ty)
        .into_iter()
        .filter(|&id| Some(id) != own)
        .filter(|&id| {
            guard
                .entry(id)
                .is_some_and(|e| e.is_claimed_by(me) || own_claimants.contains(&e.key().effect))
        })
        .collect();

    let mut released = false;
    for &id in &partners {
        if let Some(mut entry) = guard.entry_mut(id) {
            released |= entry.release(me);
        }
    }
    if let Some(id) = own {
        if let Some(mut entry) = guard.entry_mut(id) {
            for &claimant in &own_claimants {
                released |= entry.release(claimant);
            }
        }
    }
    if released {
        tracing::debug!(portal = %me, partners = partners.len(), "portals unlinked");
    }
    released
}

/// Tear down a portal that has ended: release its partners, then kill its
/// entry.
pub fn destroy(registry: &Registry, world: &dyn WorldView, caster: Uuid, portal: &SimEffect) {
    unlink(registry, world, caster, portal);
    registry.remove_effect(world, portal, caster);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! In-memory world the registry runs against.
//!
//! [`SimWorld`] plays the part of one loaded dimension: it hands out local
//! ids, tracks which actors are currently loaded, and lets tests and the
//! harness unload and reload actors the way chunk streaming would. Actors
//! carry their active effects; effects are either portals or wards.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use ether_core::prelude::*;
use uuid::Uuid;

use crate::linking::portal_type;
use crate::ward::ward_type;

// ---------------------------------------------------------------------------
// Effects
// ---------------------------------------------------------------------------

/// State a portal keeps between ticks.
#[derive(Debug, Default)]
pub struct PortalState {
    /// `(pitch, yaw)` the portal faces.
    pub orientation: Mutex<(f32, f32)>,
    /// Key of the entry this portal is linked to, if any.
    pub link: Mutex<Option<EntryKey>>,
}

/// What an effect does.
#[derive(Debug)]
pub enum EffectKind {
    Portal(PortalState),
    /// Repels fluids within `range` blocks of the caster.
    Ward { range: f32 },
}

/// An active effect in the simulated world.
#[derive(Debug)]
pub struct SimEffect {
    id: Uuid,
    kind: EffectKind,
    dead: AtomicBool,
}

impl SimEffect {
    pub fn portal() -> Arc<SimEffect> {
        Self::with_kind(EffectKind::Portal(PortalState::default()))
    }

    pub fn ward(range: f32) -> Arc<SimEffect> {
        Self::with_kind(EffectKind::Ward { range })
    }

    pub fn with_kind(kind: EffectKind) -> Arc<SimEffect> {
        Self::with_id(Uuid::new_v4(), kind)
    }

    pub fn with_id(id: Uuid, kind: EffectKind) -> Arc<SimEffect> {
        Arc::new(SimEffect {
            id,
            kind,
            dead: AtomicBool::new(false),
        })
    }

    pub fn kind(&self) -> &EffectKind {
        &self.kind
    }

    pub fn portal_state(&self) -> Option<&PortalState> {
        match &self.kind {
            EffectKind::Portal(state) => Some(state),
            EffectKind::Ward { .. } => None,
        }
    }

    /// End the effect. Entries tracking it die the next time they are
    /// probed.
    pub fn dispel(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }
}

impl Effect for SimEffect {
    fn id(&self) -> Uuid {
        self.id
    }

    fn effect_type(&self) -> EffectTypeId {
        match self.kind {
            EffectKind::Portal(_) => portal_type(),
            EffectKind::Ward { .. } => ward_type(),
        }
    }

    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Actors
// ---------------------------------------------------------------------------

/// A loaded actor.
///
/// Unloading marks the instance removed; reloading creates a fresh instance
/// with the same uuid and a new local id, like a real chunk reload would.
#[derive(Debug)]
pub struct SimActor {
    uuid: Uuid,
    local_id: i32,
    player: bool,
    pos: Mutex<Vec3>,
    alive: AtomicBool,
    removed: AtomicBool,
    level: LevelStore,
    corruption: LevelStore,
    effects: Mutex<Vec<Arc<SimEffect>>>,
}

impl SimActor {
    pub fn set_position(&self, pos: Vec3) {
        *self.pos.lock().unwrap_or_else(PoisonError::into_inner) = pos;
    }

    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Attach a new active effect.
    pub fn cast(&self, effect: Arc<SimEffect>) -> Arc<SimEffect> {
        self.effects_lock().push(effect.clone());
        effect
    }

    /// Every effect still attached, dead ones included.
    pub fn effects(&self) -> Vec<Arc<SimEffect>> {
        self.effects_lock().clone()
    }

    /// Detach dead effects. Returns the ones detached.
    pub fn clear_dead_effects(&self) -> Vec<Arc<SimEffect>> {
        let mut effects = self.effects_lock();
        let (dead, live): (Vec<_>, Vec<_>) = effects.drain(..).partition(|e| e.is_dead());
        *effects = live;
        dead
    }

    fn effects_lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<SimEffect>>> {
        self.effects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Actor for SimActor {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn local_id(&self) -> i32 {
        self.local_id
    }

    fn position(&self) -> Vec3 {
        *self.pos.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_player(&self) -> bool {
        self.player
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    fn level(&self) -> LevelStore {
        self.level
    }

    fn corruption(&self) -> LevelStore {
        self.corruption
    }

    fn find_effect(&self, filter: EffectFilter<'_>) -> Option<Arc<dyn Effect>> {
        let effects = self.effects_lock();
        let found = effects.iter().find(|e| filter(&***e))?;
        Some(found.clone() as Arc<dyn Effect>)
    }
}

/// Blueprint for spawning an actor.
#[derive(Debug, Clone)]
pub struct ActorSpec {
    pub uuid: Uuid,
    pub pos: Vec3,
    pub player: bool,
    pub level: LevelStore,
    pub corruption: LevelStore,
}

impl ActorSpec {
    pub fn new(pos: Vec3) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            pos,
            player: false,
            level: LevelStore::ZERO,
            corruption: LevelStore::ZERO,
        }
    }

    pub fn player(pos: Vec3) -> Self {
        Self {
            player: true,
            ..Self::new(pos)
        }
    }
}

// ---------------------------------------------------------------------------
// SimWorld
// ---------------------------------------------------------------------------

/// One simulated dimension.
#[derive(Debug)]
pub struct SimWorld {
    authoritative: bool,
    actors: RwLock<HashMap<Uuid, Arc<SimActor>>>,
    next_local_id: AtomicI32,
}

impl SimWorld {
    /// The authoritative world: owns durable state, resolves by uuid.
    pub fn authoritative() -> Self {
        Self::new(true)
    }

    /// A mirror of an authoritative world: resolves by local id only.
    pub fn view() -> Self {
        Self::new(false)
    }

    fn new(authoritative: bool) -> Self {
        Self {
            authoritative,
            actors: RwLock::new(HashMap::new()),
            next_local_id: AtomicI32::new(1),
        }
    }

    pub fn spawn(&self, spec: ActorSpec) -> Arc<SimActor> {
        let actor = Arc::new(SimActor {
            uuid: spec.uuid,
            local_id: self.next_local_id.fetch_add(1, Ordering::SeqCst),
            player: spec.player,
            pos: Mutex::new(spec.pos),
            alive: AtomicBool::new(true),
            removed: AtomicBool::new(false),
            level: spec.level,
            corruption: spec.corruption,
            effects: Mutex::new(Vec::new()),
        });
        let previous = self.write().insert(actor.uuid, actor.clone());
        if let Some(previous) = previous {
            tracing::warn!(uuid = %actor.uuid, "spawned over a loaded actor -- old instance removed");
            previous.removed.store(true, Ordering::SeqCst);
        }
        actor
    }

    /// The loaded actor with `uuid`.
    pub fn actor(&self, uuid: Uuid) -> Option<Arc<SimActor>> {
        self.read().get(&uuid).cloned()
    }

    /// Every loaded actor, in uuid order.
    pub fn actors(&self) -> Vec<Arc<SimActor>> {
        let mut actors: Vec<_> = self.read().values().cloned().collect();
        actors.sort_by_key(|a| a.uuid);
        actors
    }

    pub fn move_actor(&self, uuid: Uuid, pos: Vec3) -> bool {
        match self.actor(uuid) {
            Some(actor) => {
                actor.set_position(pos);
                true
            }
            None => false,
        }
    }

    /// Take an actor out of the world. Outstanding handles to it report
    /// themselves removed.
    pub fn unload(&self, uuid: Uuid) -> Option<Arc<SimActor>> {
        let actor = self.write().remove(&uuid)?;
        actor.removed.store(true, Ordering::SeqCst);
        tracing::debug!(uuid = %uuid, "actor unloaded");
        Some(actor)
    }

    /// Bring an unloaded actor back as a new instance: same uuid, position
    /// and effects, new local id.
    pub fn reload(&self, unloaded: &SimActor) -> Arc<SimActor> {
        let spec = ActorSpec {
            uuid: unloaded.uuid,
            pos: unloaded.position(),
            player: unloaded.player,
            level: unloaded.level,
            corruption: unloaded.corruption,
        };
        let actor = self.spawn(spec);
        for effect in unloaded.effects() {
            actor.cast(effect);
        }
        tracing::debug!(uuid = %actor.uuid, local_id = actor.local_id, "actor reloaded");
        actor
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<Uuid, Arc<SimActor>>> {
        self.actors.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<Uuid, Arc<SimActor>>> {
        self.actors.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorldView for SimWorld {
    fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    fn actor_by_uuid(&self, uuid: Uuid) -> Option<Arc<dyn Actor>> {
        let actor = self.actor(uuid)?;
        Some(actor as Arc<dyn Actor>)
    }

    fn actor_by_local_id(&self, local_id: i32) -> Option<Arc<dyn Actor>> {
        let actor = self.read().values().find(|a| a.local_id == local_id).cloned()?;
        Some(actor as Arc<dyn Actor>)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reload_keeps_uuid_and_effects_but_not_local_id() {
        let world = SimWorld::authoritative();
        let actor = world.spawn(ActorSpec::new(Vec3::new(1.0, 2.0, 3.0)));
        let portal = actor.cast(SimEffect::portal());

        let unloaded = world.unload(actor.uuid()).unwrap();
        assert!(unloaded.is_removed());
        assert!(world.actor_by_uuid(actor.uuid()).is_none());

        let reloaded = world.reload(&unloaded);
        assert_eq!(reloaded.uuid(), actor.uuid());
        assert_ne!(reloaded.local_id(), actor.local_id());
        assert_eq!(reloaded.position(), Vec3::new(1.0, 2.0, 3.0));
        let found = reloaded.find_effect(&|e: &dyn Effect| e.id() == portal.id());
        assert!(found.is_some());
    }

    #[test]
    fn view_resolves_by_local_id() {
        let world = SimWorld::view();
        let actor = world.spawn(ActorSpec::player(Vec3::ZERO));
        assert!(world.actor_by_local_id(actor.local_id()).is_some());
        assert!(actor.is_player());
    }

    #[test]
    fn dead_effects_are_detached() {
        let world = SimWorld::authoritative();
        let actor = world.spawn(ActorSpec::new(Vec3::ZERO));
        let ward = actor.cast(SimEffect::ward(4.0));
        actor.cast(SimEffect::portal());
        ward.dispel();

        let detached = actor.clear_dead_effects();
        assert_eq!(detached.len(), 1);
        assert_eq!(detached[0].id(), ward.id());
        assert_eq!(actor.effects().len(), 1);
    }

    #[test]
    fn effect_types_follow_kind() {
        assert_eq!(SimEffect::portal().effect_type(), portal_type());
        assert_eq!(SimEffect::ward(1.0).effect_type(), ward_type());
    }
}

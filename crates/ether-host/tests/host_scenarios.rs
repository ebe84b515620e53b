//! End-to-end host scenarios: save cycles, actor unload/reload, and portal
//! links surviving a restart.

use std::sync::Arc;

use ether_host::linking;
use ether_host::prelude::*;

fn host_saving_to(dir: &tempfile::TempDir, interval: u64) -> WorldHost {
    let config = HostConfig {
        save_interval_ticks: interval,
        save_path: Some(dir.path().join("ether.json")),
        ..Default::default()
    };
    WorldHost::new(SimWorld::authoritative(), Registry::default(), config)
}

#[test]
fn autosave_writes_only_when_dirty() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = host_saving_to(&dir, 5);
    let actor = host.world().spawn(ActorSpec::new(Vec3::new(10.0, 64.0, 10.0)));
    actor.cast(SimEffect::ward(3.0));

    let saves = (0..5).filter(|_| host.tick().saved).count();
    assert_eq!(saves, 1);
    assert!(dir.path().join("ether.json").exists());
    assert!(!host.registry().is_dirty());

    // Nothing changes for the next interval.
    let saves = (0..5).filter(|_| host.tick().saved).count();
    assert_eq!(saves, 0);
}

#[test]
fn save_and_load_preserve_entries() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = host_saving_to(&dir, 0);
    let a = host.world().spawn(ActorSpec::new(Vec3::new(0.0, 64.0, 0.0)));
    let b = host.world().spawn(ActorSpec::player(Vec3::new(300.0, 70.0, -40.0)));
    let pa = a.cast(SimEffect::portal());
    let pb = b.cast(SimEffect::portal());
    b.cast(SimEffect::ward(6.5));
    host.tick();

    let caster: Arc<dyn Actor> = a.clone();
    linking::link(host.registry(), host.world(), &caster, &pa).unwrap();

    host.save().unwrap();
    let hash = host.state_hash().unwrap();
    let report = host.load_or_default().unwrap().unwrap();
    assert_eq!(report.loaded, 3);
    assert!(report.skipped.is_empty());
    assert_eq!(host.state_hash().unwrap(), hash);

    // Forget the in-memory link; it must be recovered from the claims.
    if let Some(state) = pa.portal_state() {
        *state.link.lock().unwrap() = None;
    }
    let from_a = linking::destination(host.registry(), host.world(), a.uuid(), &pa).unwrap();
    assert_eq!(from_a.key.effect, pb.id());
    let from_b = linking::destination(host.registry(), host.world(), b.uuid(), &pb).unwrap();
    assert_eq!(from_b.key.effect, pa.id());
}

#[test]
fn entries_survive_owner_unload_and_follow_reload() {
    let mut host = WorldHost::new(SimWorld::authoritative(), Registry::default(), HostConfig::default());
    let actor = host.world().spawn(ActorSpec::new(Vec3::new(5.0, 64.0, 5.0)));
    let ward = actor.cast(SimEffect::ward(2.0));
    host.tick();
    assert!(blocks_at(host.registry(), host.world(), BlockPos::new(5, 64, 5)));

    let unloaded = host.world().unload(actor.uuid()).unwrap();
    drop(actor);
    host.run_ticks(3);

    // Unloaded casters do not block, but their ward is not forgotten.
    assert!(!blocks_at(host.registry(), host.world(), BlockPos::new(5, 64, 5)));
    assert_eq!(host.registry().live_count(host.world()), 1);

    unloaded.set_position(Vec3::new(200.0, 64.0, 200.0));
    let reloaded = host.world().reload(&unloaded);
    host.tick();
    assert!(blocks_at(host.registry(), host.world(), BlockPos::new(200, 64, 200)));
    assert!(!blocks_at(host.registry(), host.world(), BlockPos::new(5, 64, 5)));
    assert_eq!(host.registry().len(), 1);
    assert!(reloaded.effects().iter().any(|e| e.id() == ward.id()));
}

#[test]
fn ended_portal_frees_its_partner_for_new_links() {
    let mut host = WorldHost::new(SimWorld::authoritative(), Registry::default(), HostConfig::default());
    let a = host.world().spawn(ActorSpec::new(Vec3::new(0.0, 64.0, 0.0)));
    let b = host.world().spawn(ActorSpec::new(Vec3::new(50.0, 64.0, 0.0)));
    let pa = a.cast(SimEffect::portal());
    let pb = b.cast(SimEffect::portal());
    host.tick();

    let caster_a: Arc<dyn Actor> = a.clone();
    let linked = linking::link(host.registry(), host.world(), &caster_a, &pa).unwrap();
    assert_eq!(linked.key.effect, pb.id());

    // B was the one linked to; ending it must still release A.
    pb.dispel();
    assert_eq!(host.tick().effects_ended, 1);
    assert!(linking::destination(host.registry(), host.world(), a.uuid(), &pa).is_none());
    let free = host
        .registry()
        .any_match(host.world(), &portal_type(), |e| e.key().effect == pa.id() && !e.has_claimant());
    assert!(free);

    let c = host.world().spawn(ActorSpec::new(Vec3::new(-50.0, 64.0, 0.0)));
    let pc = c.cast(SimEffect::portal());
    host.tick();
    let caster_c: Arc<dyn Actor> = c.clone();
    let from_c = linking::link(host.registry(), host.world(), &caster_c, &pc).unwrap();
    assert_eq!(from_c.key.effect, pa.id());
}

#[test]
fn corrupt_save_is_an_error_not_a_panic() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ether.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let mut host = host_saving_to(&dir, 0);
    let err = host.load_from(&path).unwrap_err();
    assert!(format!("{err:#}").contains("not valid JSON"));

    std::fs::write(&path, b"[]").unwrap();
    assert!(host.load_from(&path).is_err());
}

#[test]
fn partially_bad_save_loads_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ether.json");
    let good_owner = uuid::Uuid::from_u128(1);
    let readable = uuid::Uuid::from_u128(2).to_string();
    let no_owner = uuid::Uuid::from_u128(3).to_string();
    let document = serde_json::json!({
        "endpoints": {
            "ether:ward": {
                (good_owner.to_string()): {
                    (readable): { "uuid": good_owner, "radius": 4.0 },
                    (no_owner): { "radius": 4.0 },
                },
                "garbage": {},
            }
        }
    });
    std::fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

    let mut host = host_saving_to(&dir, 0);
    let report = host.load_from(&path).unwrap();
    assert_eq!(report.loaded, 1);
    assert_eq!(report.skipped.len(), 2);
    assert_eq!(host.registry().len(), 1);
}

#[test]
fn views_do_not_answer_ward_queries() {
    let host = WorldHost::new(SimWorld::view(), Registry::default(), HostConfig::default());
    let actor: Arc<dyn Actor> = host.world().spawn(ActorSpec::new(Vec3::ZERO));
    let ward = SimEffect::ward(5.0);
    let effect: Arc<dyn Effect> = ward.clone();
    host.registry().get_or_create(host.world(), &effect, &actor);
    assert!(!blocks_at(host.registry(), host.world(), BlockPos::ORIGIN));
}

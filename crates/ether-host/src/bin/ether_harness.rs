//! Headless soak run: scatter casters, walk them around, link portals, save
//! and reload the registry, and check the reloaded state hashes the same.
//!
//! Run with:
//!   cargo run --bin ether_harness -p ether-host -- [casters] [ticks] [save path]
//!
//! Set `RUST_LOG=debug` to watch entries being created and re-filed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use ether_host::linking;
use ether_host::prelude::*;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

const SEED: u64 = 0xE7_4E_12;

struct Args {
    casters: usize,
    ticks: u64,
    save_path: PathBuf,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let casters = match args.next() {
        Some(raw) => raw.parse().with_context(|| format!("bad caster count {raw:?}"))?,
        None => 64,
    };
    let ticks = match args.next() {
        Some(raw) => raw.parse().with_context(|| format!("bad tick count {raw:?}"))?,
        None => 400,
    };
    let save_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("ether_harness.json"));
    Ok(Args {
        casters,
        ticks,
        save_path,
    })
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let mut rng = Pcg64::seed_from_u64(SEED);

    let config = HostConfig {
        save_path: Some(args.save_path.clone()),
        ..Default::default()
    };
    let mut host = WorldHost::new(SimWorld::authoritative(), Registry::default(), config);

    // Half the casters open portals, the other half raise wards.
    let mut portals = Vec::new();
    for i in 0..args.casters {
        let pos = Vec3::new(rng.gen_range(-500.0..500.0), 64.0, rng.gen_range(-500.0..500.0));
        let actor = host.world().spawn(ActorSpec::new(pos));
        if i % 2 == 0 {
            let portal = actor.cast(SimEffect::portal());
            portals.push((actor, portal));
        } else {
            actor.cast(SimEffect::ward(rng.gen_range(1.0..12.0)));
        }
    }

    for tick in 0..args.ticks {
        for actor in host.world().actors() {
            let step = Vec3::new(rng.gen_range(-1.0..1.0), 0.0, rng.gen_range(-1.0..1.0));
            actor.set_position(actor.position() + step);
        }
        if tick % 50 == 10 {
            for (actor, portal) in &portals {
                let caster: Arc<dyn Actor> = actor.clone();
                linking::link(host.registry(), host.world(), &caster, portal);
            }
        }
        host.tick();
    }

    let linked = portals
        .iter()
        .filter(|(actor, portal)| linking::destination(host.registry(), host.world(), actor.uuid(), portal).is_some())
        .count();
    let warded = (0..256)
        .filter(|_| {
            let probe = BlockPos::new(rng.gen_range(-500..500), 64, rng.gen_range(-500..500));
            blocks_at(host.registry(), host.world(), probe)
        })
        .count();

    let diagnostics = host.last_diagnostics();
    tracing::info!(
        ticks = host.tick_count(),
        sim_time = host.sim_time(),
        entries = host.registry().len(),
        linked_portals = linked,
        warded_probes = warded,
        last_tick_us = diagnostics.total_time.as_micros() as u64,
        "run finished"
    );

    host.save()?;
    let before = host.state_hash()?;
    let report = host.load_from(&args.save_path)?;
    let after = host.state_hash()?;
    if !report.skipped.is_empty() {
        bail!("{} entries could not be reloaded", report.skipped.len());
    }
    if before != after {
        bail!("state hash changed across save/load: {before} != {after}");
    }
    tracing::info!(hash = %after, loaded = report.loaded, "save/load round trip ok");
    Ok(())
}

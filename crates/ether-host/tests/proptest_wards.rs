//! Property-based check that spatial ward queries agree with a brute-force
//! scan over every caster, after casters move, unload, and dispel.

use proptest::prelude::*;

use ether_host::prelude::*;

#[derive(Debug, Clone)]
struct CasterPlan {
    start: Vec3,
    moved: Vec3,
    range: f32,
    dispelled: bool,
    unloaded: bool,
}

fn coord(lo: i32, hi: i32) -> impl Strategy<Value = f64> {
    (lo * 4..hi * 4).prop_map(|q| f64::from(q) * 0.25)
}

fn point() -> impl Strategy<Value = Vec3> {
    (coord(-40, 40), coord(60, 68), coord(-40, 40)).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

fn caster_plan() -> impl Strategy<Value = CasterPlan> {
    (point(), point(), 0u32..120, any::<bool>(), any::<bool>()).prop_map(
        |(start, moved, quarters, dispelled, unloaded)| CasterPlan {
            start,
            moved,
            range: quarters as f32 * 0.25,
            dispelled,
            unloaded,
        },
    )
}

fn probe() -> impl Strategy<Value = BlockPos> {
    (-50i32..50, 58i32..70, -50i32..50).prop_map(|(x, y, z)| BlockPos::new(x, y, z))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn ward_queries_match_brute_force(
        plans in prop::collection::vec(caster_plan(), 1..12),
        probes in prop::collection::vec(probe(), 32),
    ) {
        let mut host = WorldHost::new(SimWorld::authoritative(), Registry::default(), HostConfig::default());
        let mut casters = Vec::new();
        for plan in &plans {
            let actor = host.world().spawn(ActorSpec::new(plan.start));
            let ward = actor.cast(SimEffect::ward(plan.range));
            casters.push((actor, ward));
        }
        host.tick();

        for (plan, (actor, ward)) in plans.iter().zip(&casters) {
            actor.set_position(plan.moved);
            if plan.dispelled {
                ward.dispel();
            }
            if plan.unloaded {
                host.world().unload(actor.uuid());
            }
        }
        host.tick();

        for pos in probes {
            let expected = plans.iter().zip(&casters).any(|(plan, (actor, _))| {
                !plan.dispelled
                    && !plan.unloaded
                    && pos.is_within_distance(actor.position(), f64::from(plan.range) + 1.0)
            });
            prop_assert_eq!(
                blocks_at(host.registry(), host.world(), pos),
                expected,
                "probe {:?}", pos
            );
        }
    }
}

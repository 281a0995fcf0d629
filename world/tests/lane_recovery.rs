use std::time::Duration;

use danmaku_core::{Command, CommentId, EngineConfig, IncomingComment, Viewport};
use danmaku_world::{self as world, query, query::ItemView, World};
use glam::DVec2;
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Step {
    Append { count: usize, lag_ms: i64 },
    Tick { millis: u64 },
    Resize { height: f64 },
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (1usize..8, 0i64..2_000).prop_map(|(count, lag_ms)| Step::Append { count, lag_ms }),
        3 => (1u64..1_500).prop_map(|millis| Step::Tick { millis }),
        1 => (80.0..1080.0f64).prop_map(|height| Step::Resize { height }),
    ]
}

fn overlaps(first: &ItemView, second: &ItemView) -> bool {
    !(first.x + first.width < second.x || second.x + second.width < first.x)
}

fn run(world: &mut World, command: Command) {
    let mut events = Vec::new();
    world::apply(world, command, &mut events);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn released_drag_avoids_occupied_lanes(
        initial_height in 80.0..1080.0f64,
        steps in prop::collection::vec(step_strategy(), 1..40),
        pick in any::<prop::sample::Index>(),
        pointer_x in 0.0..1400.0f64,
        pointer_y in 0.0..1080.0f64,
    ) {
        let config = EngineConfig {
            viewport: Viewport::new(1280.0, initial_height),
            start_paused: false,
            ..EngineConfig::default()
        };
        let mut world = World::new(config).expect("valid configuration");

        let mut next_id = 0usize;
        let mut playback_ms = 0i64;
        for step in steps {
            match step {
                Step::Append { count, lag_ms } => {
                    let comments = (0..count)
                        .map(|_| {
                            next_id += 1;
                            IncomingComment::new(
                                format!("c{next_id}").as_str(),
                                "alice",
                                "0123456789",
                                playback_ms - lag_ms,
                            )
                        })
                        .collect();
                    run(&mut world, Command::Append { comments, playback_position_ms: playback_ms });
                }
                Step::Tick { millis } => {
                    playback_ms += millis as i64;
                    run(&mut world, Command::Tick { dt: Duration::from_millis(millis) });
                }
                Step::Resize { height } => run(
                    &mut world,
                    Command::SetViewportSize { viewport: Viewport::new(1280.0, height) },
                ),
            }
        }

        let items = query::items(&world);
        prop_assume!(!items.is_empty());
        let id: CommentId = items[pick.index(items.len())].id.clone();

        run(&mut world, Command::BeginDrag { comment: id.clone() });
        run(&mut world, Command::MoveDrag { comment: id.clone(), point: DVec2::new(pointer_x, pointer_y) });
        run(&mut world, Command::DropDrag { comment: id.clone(), in_zone: false });

        let items = query::items(&world);
        let dropped = items.iter().find(|item| item.id == id).expect("released item stays live");
        let others: Vec<&ItemView> = items.iter().filter(|item| item.id != id).collect();
        let lanes = query::lane_count(&world);
        prop_assert!(dropped.lane < lanes);

        let free_lane_existed = (0..lanes).any(|lane| {
            others
                .iter()
                .filter(|other| other.lane == lane)
                .all(|other| !overlaps(dropped, other))
        });
        if free_lane_existed {
            for other in others.iter().filter(|other| other.lane == dropped.lane) {
                prop_assert!(
                    !overlaps(dropped, other),
                    "{} overlaps {} in lane {}",
                    dropped.id,
                    other.id,
                    dropped.lane
                );
            }
        }
    }
}

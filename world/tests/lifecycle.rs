use std::time::Duration;

use danmaku_core::{
    AuthorId, Command, CommentId, EngineConfig, Event, IncomingComment, RemovalReason, Viewport,
};
use danmaku_world::{self as world, query, World};

fn new_world(config: EngineConfig) -> World {
    World::new(config).expect("valid configuration")
}

fn comment(id: &str, author: &str, text: &str, arrival_ms: i64) -> IncomingComment {
    IncomingComment::new(id, author, text, arrival_ms)
}

fn run(world: &mut World, command: Command) -> Vec<Event> {
    let mut events = Vec::new();
    world::apply(world, command, &mut events);
    events
}

fn tick(world: &mut World, millis: u64) -> Vec<Event> {
    run(
        world,
        Command::Tick {
            dt: Duration::from_millis(millis),
        },
    )
}

#[test]
fn tick_without_items_publishes_nothing() {
    let mut world = new_world(EngineConfig::default());
    let reader = world.snapshot_reader();

    let events = tick(&mut world, 16);

    assert!(events.is_empty(), "unexpected events: {events:?}");
    assert_eq!(reader.generation(), 0);
    assert_eq!(query::clock_ms(&world), 16.0);
}

#[test]
fn empty_ticks_leave_lane_table_untouched() {
    let config = EngineConfig {
        perf_log_window_ms: Some(10),
        ..EngineConfig::default()
    };
    let mut world = new_world(config);
    let _ = run(
        &mut world,
        Command::Append {
            comments: vec![comment("c1", "alice", "0123456789", 0)],
            playback_position_ms: 0,
        },
    );
    let _ = run(&mut world, Command::ResetForSeek);
    let lanes = query::lane_states(&world).to_vec();
    let picks = query::frame_stats(&world).lanes;
    assert_eq!(picks.picks(), 1);

    for _ in 0..4 {
        assert!(tick(&mut world, 16).is_empty());
    }

    assert_eq!(query::lane_states(&world), lanes.as_slice());
    assert_eq!(query::frame_stats(&world).lanes, picks);
}

#[test]
fn zero_length_tick_is_ignored() {
    let mut world = new_world(EngineConfig::default());
    let events = tick(&mut world, 0);
    assert!(events.is_empty());
    assert_eq!(query::clock_ms(&world), 0.0);
    assert_eq!(query::frame_stats(&world).frames, 0);
}

#[test]
fn first_comment_spawns_at_right_edge_of_lane_zero() {
    let mut world = new_world(EngineConfig::default());
    let reader = world.snapshot_reader();

    let events = run(
        &mut world,
        Command::Append {
            comments: vec![comment("c1", "alice", "0123456789", 0)],
            playback_position_ms: 0,
        },
    );

    assert_eq!(
        events,
        vec![
            Event::CommentSpawned {
                comment: CommentId::new("c1"),
                row: 0,
                lane: 0,
            },
            Event::SnapshotPublished { generation: 1 },
        ]
    );

    let item = query::item(&world, 0).expect("spawned item");
    assert_eq!(item.x, 1292.0);
    assert_eq!(item.y, 10.0);
    assert_eq!(item.width, 220.0);
    assert_eq!(item.alpha, 1.0);
    assert!((120.0..190.0).contains(&item.speed));

    let snapshot = reader.load();
    assert_eq!(snapshot.generation(), 1);
    let rendered = snapshot.find(&CommentId::new("c1")).expect("rendered");
    assert_eq!(rendered.x, 1292.0);
    assert_eq!(&*rendered.text, "0123456789");
}

#[test]
fn short_comments_use_minimum_width() {
    let mut world = new_world(EngineConfig::default());
    let _ = run(
        &mut world,
        Command::Append {
            comments: vec![comment("c1", "alice", "hi", 0)],
            playback_position_ms: 0,
        },
    );
    assert_eq!(query::item(&world, 0).expect("item").width, 80.0);
}

#[test]
fn empty_ids_are_skipped() {
    let mut world = new_world(EngineConfig::default());
    let events = run(
        &mut world,
        Command::Append {
            comments: vec![comment("", "alice", "ignored", 0)],
            playback_position_ms: 0,
        },
    );
    assert!(events.is_empty());
    assert_eq!(query::active_count(&world), 0);
}

#[test]
fn speed_is_stable_for_repeated_ids() {
    let mut first = new_world(EngineConfig::default());
    let mut second = new_world(EngineConfig::default());
    for world in [&mut first, &mut second] {
        let _ = run(
            world,
            Command::Append {
                comments: vec![comment("same-id", "alice", "hello", 0)],
                playback_position_ms: 0,
            },
        );
    }
    assert_eq!(
        query::item(&first, 0).map(|item| item.speed),
        query::item(&second, 0).map(|item| item.speed)
    );
}

#[test]
fn late_arrivals_are_shifted_left() {
    let mut world = new_world(EngineConfig::default());
    let _ = run(
        &mut world,
        Command::Append {
            comments: vec![comment("late", "alice", "0123456789", 1_000)],
            playback_position_ms: 2_000,
        },
    );
    let item = query::item(&world, 0).expect("item");
    assert!((item.x - (1292.0 - item.speed)).abs() < 1e-9);
}

#[test]
fn lag_compensation_is_capped() {
    let mut world = new_world(EngineConfig::default());
    let _ = run(
        &mut world,
        Command::Append {
            comments: vec![comment("late", "alice", "0123456789", 0)],
            playback_position_ms: 60_000,
        },
    );
    let item = query::item(&world, 0).expect("item");
    assert!((item.x - (1292.0 - item.speed * 2.0)).abs() < 1e-9);
}

#[test]
fn extreme_playback_positions_do_not_overflow_lag() {
    let mut world = new_world(EngineConfig::default());
    let _ = run(
        &mut world,
        Command::Append {
            comments: vec![comment("far", "alice", "0123456789", -10)],
            playback_position_ms: i64::MAX,
        },
    );
    let _ = run(
        &mut world,
        Command::Append {
            comments: vec![comment("early", "bob", "0123456789", i64::MAX)],
            playback_position_ms: i64::MIN,
        },
    );

    let far = query::item(&world, 0).expect("far");
    assert!((far.x - (1292.0 - far.speed * 2.0)).abs() < 1e-9);
    let early = query::item(&world, 1).expect("early");
    assert_eq!(early.x, 1292.0);
}

#[test]
fn comments_lagging_past_the_cull_line_are_discarded() {
    let config = EngineConfig {
        max_lag_compensation_ms: 60_000,
        ..EngineConfig::default()
    };
    let mut world = new_world(config);
    let events = run(
        &mut world,
        Command::Append {
            comments: vec![comment("stale", "alice", "0123456789", 0)],
            playback_position_ms: 60_000,
        },
    );
    assert_eq!(
        events,
        vec![Event::CommentDiscarded {
            comment: CommentId::new("stale"),
        }]
    );
    assert_eq!(query::active_count(&world), 0);
    assert_eq!(query::frame_stats(&world).lanes.picks(), 1);
}

#[test]
fn paused_world_does_not_move_items() {
    let mut world = new_world(EngineConfig::default());
    let _ = run(
        &mut world,
        Command::Append {
            comments: vec![comment("c1", "alice", "0123456789", 0)],
            playback_position_ms: 0,
        },
    );
    let events = tick(&mut world, 100);
    assert!(events.is_empty());
    assert_eq!(query::item(&world, 0).expect("item").x, 1292.0);
}

#[test]
fn unpaused_tick_advances_by_speed_and_rate() {
    let mut world = new_world(EngineConfig::default());
    let _ = run(&mut world, Command::SetPlaybackPaused { paused: false });
    let _ = run(&mut world, Command::SetPlaybackRate { rate: 2.0 });
    let _ = run(
        &mut world,
        Command::Append {
            comments: vec![comment("c1", "alice", "0123456789", 0)],
            playback_position_ms: 0,
        },
    );
    let speed = query::item(&world, 0).expect("item").speed;

    let events = tick(&mut world, 100);

    assert_eq!(events, vec![Event::SnapshotPublished { generation: 2 }]);
    let expected = 1292.0 - speed * 0.2;
    assert!((query::item(&world, 0).expect("item").x - expected).abs() < 1e-9);
    let snapshot = query::render_snapshot(&world);
    assert!((snapshot.items()[0].x - expected).abs() < 1e-9);
}

#[test]
fn items_past_the_cull_line_are_removed() {
    let mut world = new_world(EngineConfig::default());
    let _ = run(&mut world, Command::SetPlaybackPaused { paused: false });
    let _ = run(
        &mut world,
        Command::Append {
            comments: vec![comment("c1", "alice", "0123456789", 0)],
            playback_position_ms: 0,
        },
    );

    let mut removed = Vec::new();
    for _ in 0..200 {
        removed.extend(tick(&mut world, 100).into_iter().filter(|event| {
            matches!(event, Event::CommentRemoved { .. })
        }));
        if query::active_count(&world) == 0 {
            break;
        }
    }

    assert_eq!(
        removed,
        vec![Event::CommentRemoved {
            comment: CommentId::new("c1"),
            reason: RemovalReason::OffScreen,
        }]
    );
    assert_eq!(query::free_count(&world), 1);
    assert!(query::render_snapshot(&world).is_empty());
}

#[test]
fn playback_controls_only_report_changes() {
    let mut world = new_world(EngineConfig::default());
    assert!(query::paused(&world));

    assert!(run(&mut world, Command::SetPlaybackPaused { paused: true }).is_empty());
    assert_eq!(
        run(&mut world, Command::SetPlaybackPaused { paused: false }),
        vec![Event::PlaybackPausedChanged { paused: false }]
    );
    assert_eq!(
        run(&mut world, Command::SetPlaybackRate { rate: 10.0 }),
        vec![Event::PlaybackRateChanged { rate: 3.0 }]
    );
    assert!(run(&mut world, Command::SetPlaybackRate { rate: 3.0 }).is_empty());
    assert_eq!(query::playback_rate(&world), 3.0);
}

#[test]
fn lanes_fill_before_any_is_reused() {
    let mut world = new_world(EngineConfig::default());
    assert_eq!(query::lane_count(&world), 17);

    let comments = (0..18)
        .map(|index| comment(&format!("c{index}"), "alice", "0123456789", 0))
        .collect();
    let events = run(
        &mut world,
        Command::Append {
            comments,
            playback_position_ms: 0,
        },
    );

    let lanes: Vec<usize> = events
        .iter()
        .filter_map(|event| match event {
            Event::CommentSpawned { lane, .. } => Some(*lane),
            _ => None,
        })
        .collect();
    assert_eq!(lanes[..17], (0..17).collect::<Vec<_>>()[..]);
    let stats = query::frame_stats(&world).lanes;
    assert_eq!(stats.ready, 17);
    assert_eq!(stats.forced, 1);
    assert!(query::lane_states(&world)
        .iter()
        .all(|lane| lane.next_available_at_ms > 0));
}

#[test]
fn fade_removes_only_the_authors_comments_and_compacts() {
    let config = EngineConfig {
        viewport: Viewport::new(1280.0, 680.0),
        ..EngineConfig::default()
    };
    let mut world = new_world(config);
    assert_eq!(query::lane_count(&world), 16);

    let comments = (0..600)
        .map(|index| {
            let author = if index < 520 { "fade" } else { "keep" };
            comment(&format!("c{index}"), author, "0123456789", 0)
        })
        .collect();
    let _ = run(
        &mut world,
        Command::Append {
            comments,
            playback_position_ms: 0,
        },
    );
    assert_eq!(query::active_count(&world), 600);

    assert!(run(
        &mut world,
        Command::ApplyFade {
            author: AuthorId::new("fade"),
        },
    )
    .is_empty());
    assert!(query::items(&world)
        .iter()
        .filter(|item| item.author.as_str() == "fade")
        .all(|item| item.fade_remaining_ms == 300.0));

    let events = tick(&mut world, 400);

    let faded = events
        .iter()
        .filter(|event| {
            matches!(
                event,
                Event::CommentRemoved {
                    reason: RemovalReason::FadedOut,
                    ..
                }
            )
        })
        .count();
    assert_eq!(faded, 520);
    assert!(events.contains(&Event::TableCompacted {
        before: 600,
        after: 80,
    }));
    assert_eq!(query::slot_count(&world), 80);
    assert_eq!(query::free_count(&world), 0);
    assert!(query::frame_stats(&world).compacted);

    for index in 520..600 {
        let id = CommentId::new(format!("c{index}"));
        let row = query::row_of(&world, &id).expect("kept comment");
        assert_eq!(query::item(&world, row).expect("item").id, id);
    }
    let snapshot = query::render_snapshot(&world);
    assert_eq!(snapshot.len(), 80);
    assert!(snapshot.find(&CommentId::new("c0")).is_none());
    assert!(snapshot.find(&CommentId::new("c599")).is_some());
}

#[test]
fn partial_fade_lowers_opacity() {
    let mut world = new_world(EngineConfig::default());
    let _ = run(
        &mut world,
        Command::Append {
            comments: vec![comment("c1", "alice", "0123456789", 0)],
            playback_position_ms: 0,
        },
    );
    let _ = run(
        &mut world,
        Command::ApplyFade {
            author: AuthorId::new("alice"),
        },
    );
    let _ = tick(&mut world, 150);

    let item = query::item(&world, 0).expect("item");
    assert!((item.alpha - 0.5).abs() < 1e-12);
    assert_eq!(query::render_snapshot(&world).items()[0].opacity, item.alpha);
}

#[test]
fn seek_clears_everything() {
    let mut world = new_world(EngineConfig::default());
    let comments = (0..3)
        .map(|index| comment(&format!("c{index}"), "alice", "0123456789", 0))
        .collect();
    let _ = run(
        &mut world,
        Command::Append {
            comments,
            playback_position_ms: 0,
        },
    );

    let events = run(&mut world, Command::ResetForSeek);

    let seeks = events
        .iter()
        .filter(|event| {
            matches!(
                event,
                Event::CommentRemoved {
                    reason: RemovalReason::Seek,
                    ..
                }
            )
        })
        .count();
    assert_eq!(seeks, 3);
    assert!(events.contains(&Event::TableCompacted {
        before: 3,
        after: 0,
    }));
    assert!(events.contains(&Event::LanesReconfigured { lane_count: 17 }));
    assert_eq!(query::slot_count(&world), 0);
    assert!(query::lane_states(&world)
        .iter()
        .all(|lane| lane.next_available_at_ms == 0 && lane.last_assigned_row.is_none()));
    assert!(query::render_snapshot(&world).is_empty());
}

#[test]
fn lane_metrics_reconfigure_lanes() {
    let mut world = new_world(EngineConfig::default());
    let events = run(
        &mut world,
        Command::SetLaneMetrics {
            font_px: 4,
            lane_gap: 0,
        },
    );
    assert_eq!(query::lane_metrics(&world), (12, 0));
    assert_eq!(events, vec![Event::LanesReconfigured { lane_count: 60 }]);

    assert!(run(
        &mut world,
        Command::SetLaneMetrics {
            font_px: 12,
            lane_gap: 0,
        },
    )
    .is_empty());
}

#[test]
fn viewport_height_change_resizes_lanes() {
    let mut world = new_world(EngineConfig::default());
    let events = run(
        &mut world,
        Command::SetViewportSize {
            viewport: Viewport::new(1920.0, 1080.0),
        },
    );
    assert_eq!(events, vec![Event::LanesReconfigured { lane_count: 25 }]);
    assert_eq!(query::lane_count(&world), 25);

    assert!(run(
        &mut world,
        Command::SetViewportSize {
            viewport: Viewport::new(800.0, 1080.0),
        },
    )
    .is_empty());
    assert_eq!(query::viewport(&world).width, 800.0);
}

//! Headless soak run: Poisson comment arrivals, scripted pointer moderation
//! and a concurrent snapshot reader.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, bail, Context, Result};
use danmaku_core::{Command, Event, IncomingComment, Rect, RemovalReason};
use danmaku_system_snapshot::SnapshotReader;
use danmaku_world::{self as world, query, World};
use glam::DVec2;
use rand::{seq::SliceRandom, Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson};
use serde::Serialize;

use crate::Args;

const AUTHORS: u64 = 97;
const MAX_ARRIVAL_LAG_MS: i64 = 300;
const WORKER_WAIT: Duration = Duration::from_millis(250);
const WORDS: &[&str] = &[
    "w", "lol", "888", "nice", "草", "wwwww", "gg", "kawaii", "!!!", "clip it", "first", "pog",
];

/// Parameters of a soak run.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SoakPlan {
    duration_ms: u64,
    frame: Duration,
    arrivals_per_sec: f64,
    seed: u64,
    drag_chance: f64,
    seek_every_ms: Option<u64>,
    playback_rate: Option<f64>,
}

impl SoakPlan {
    pub(crate) fn from_args(args: &Args) -> Self {
        Self {
            duration_ms: args.seconds.saturating_mul(1000),
            frame: Duration::from_nanos(1_000_000_000 / u64::from(args.fps.max(1))),
            arrivals_per_sec: args.arrivals.max(0.0),
            seed: args.seed,
            drag_chance: args.drag_chance.clamp(0.0, 1.0),
            seek_every_ms: args
                .seek_every
                .filter(|seconds| *seconds > 0)
                .map(|seconds| seconds.saturating_mul(1000)),
            playback_rate: args.playback_rate,
        }
    }

    fn frame_count(&self) -> u64 {
        let frame_ns = self.frame.as_nanos().max(1);
        (u128::from(self.duration_ms) * 1_000_000 / frame_ns) as u64
    }
}

/// Totals gathered over a soak run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub(crate) struct SoakReport {
    kernel: String,
    worker: bool,
    frames: u64,
    spawned: u64,
    discarded: u64,
    off_screen: u64,
    faded: u64,
    moderated: u64,
    seek_cleared: u64,
    drags: u64,
    drags_rejected: u64,
    compactions: u64,
    published: u64,
    peak_active: usize,
    final_active: usize,
    final_slots: usize,
    lanes: usize,
    reader_loads: u64,
    reader_max_items: usize,
}

impl SoakReport {
    fn record(&mut self, events: &[Event], fades: &mut Vec<Command>) {
        for event in events {
            match event {
                Event::CommentSpawned { .. } => self.spawned += 1,
                Event::CommentDiscarded { .. } => self.discarded += 1,
                Event::CommentRemoved { reason, .. } => match reason {
                    RemovalReason::OffScreen => self.off_screen += 1,
                    RemovalReason::FadedOut => self.faded += 1,
                    RemovalReason::ModerationDrop => self.moderated += 1,
                    RemovalReason::Seek => self.seek_cleared += 1,
                },
                Event::DragStarted { .. } => self.drags += 1,
                Event::DragRejected { .. } => self.drags_rejected += 1,
                Event::ModerationDropRequested { author } => fades.push(Command::ApplyFade {
                    author: author.clone(),
                }),
                Event::TableCompacted { .. } => self.compactions += 1,
                Event::SnapshotPublished { .. } => self.published += 1,
                Event::DragReleased { .. }
                | Event::ModerationZoneVisibilityChanged { .. }
                | Event::PlaybackPausedChanged { .. }
                | Event::PlaybackRateChanged { .. }
                | Event::LanesReconfigured { .. } => {}
            }
        }
    }
}

impl fmt::Display for SoakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "kernel            {}", self.kernel)?;
        writeln!(f, "worker            {}", self.worker)?;
        writeln!(f, "frames            {}", self.frames)?;
        writeln!(f, "spawned           {}", self.spawned)?;
        writeln!(f, "discarded         {}", self.discarded)?;
        writeln!(f, "off screen        {}", self.off_screen)?;
        writeln!(f, "faded             {}", self.faded)?;
        writeln!(f, "moderated         {}", self.moderated)?;
        writeln!(f, "seek cleared      {}", self.seek_cleared)?;
        writeln!(f, "drags             {} ({} rejected)", self.drags, self.drags_rejected)?;
        writeln!(f, "compactions       {}", self.compactions)?;
        writeln!(f, "snapshots         {}", self.published)?;
        writeln!(f, "peak active       {}", self.peak_active)?;
        writeln!(f, "final active      {} of {} slots", self.final_active, self.final_slots)?;
        writeln!(f, "lanes             {}", self.lanes)?;
        writeln!(
            f,
            "reader            {} loads, at most {} items",
            self.reader_loads, self.reader_max_items
        )
    }
}

/// Pointer gesture that walks a grabbed comment toward a target.
#[derive(Clone, Copy, Debug)]
struct DragScript {
    pointer: DVec2,
    step: DVec2,
    frames_left: u32,
}

#[derive(Clone, Copy, Debug, Default)]
struct ReaderStats {
    loads: u64,
    max_items: usize,
}

/// Runs the plan against the world and reports what happened.
pub(crate) fn run(world: &mut World, plan: &SoakPlan) -> Result<SoakReport> {
    let mut rng = ChaCha8Rng::seed_from_u64(plan.seed);
    let frame_ms = plan.frame.as_secs_f64() * 1000.0;
    let arrivals = match plan.arrivals_per_sec * frame_ms / 1000.0 {
        lambda if lambda > 0.0 => Some(Poisson::new(lambda).context("invalid arrival rate")?),
        _ => None,
    };

    let viewport = query::viewport(world);
    let zone = Rect::new(0.0, (viewport.height - 120.0).max(0.0), 320.0, 120.0);
    let mut report = SoakReport {
        kernel: query::kernel_mode(world).to_string(),
        worker: query::worker_enabled(world),
        ..SoakReport::default()
    };
    let mut events = Vec::new();
    let mut fades = Vec::new();

    world::apply(world, Command::SetModerationZoneRect { rect: zone }, &mut events);
    world::apply(world, Command::SetPlaybackPaused { paused: false }, &mut events);
    if let Some(rate) = plan.playback_rate {
        world::apply(world, Command::SetPlaybackRate { rate }, &mut events);
    }
    report.record(&events, &mut fades);

    let stop = Arc::new(AtomicBool::new(false));
    let reader = spawn_reader(world.snapshot_reader(), Arc::clone(&stop))?;

    let mut next_id: u64 = 0;
    let mut drag: Option<DragScript> = None;
    let mut playback_ms = 0.0;
    let mut next_seek_ms = plan.seek_every_ms.map(|every| every as f64);

    for _ in 0..plan.frame_count() {
        events.clear();
        playback_ms += frame_ms;

        if let Some(poisson) = &arrivals {
            let count = poisson.sample(&mut rng) as u64;
            let comments = (0..count)
                .map(|_| {
                    next_id += 1;
                    random_comment(&mut rng, next_id, playback_ms as i64)
                })
                .collect::<Vec<_>>();
            if !comments.is_empty() {
                world::apply(
                    world,
                    Command::Append {
                        comments,
                        playback_position_ms: playback_ms as i64,
                    },
                    &mut events,
                );
            }
        }

        drag = advance_drag(world, drag, &zone, plan.drag_chance, &mut rng, &mut events);

        if next_seek_ms.is_some_and(|at| playback_ms >= at) {
            world::apply(world, Command::ResetForSeek, &mut events);
            drag = None;
            next_seek_ms = next_seek_ms.zip(plan.seek_every_ms).map(|(at, every)| at + every as f64);
        }

        world::apply(world, Command::Tick { dt: plan.frame }, &mut events);
        report.record(&events, &mut fades);
        report.frames += 1;

        events.clear();
        for fade in fades.drain(..) {
            world::apply(world, fade, &mut events);
        }
        report.record(&events, &mut fades);

        report.peak_active = report.peak_active.max(query::active_count(world));
    }

    if query::worker_in_flight(world).is_some() {
        events.clear();
        let _ = world::await_worker(world, WORKER_WAIT, &mut events);
        report.record(&events, &mut fades);
    }

    stop.store(true, Ordering::Release);
    let stats = reader
        .join()
        .map_err(|_| anyhow!("snapshot reader panicked"))??;

    report.reader_loads = stats.loads;
    report.reader_max_items = stats.max_items;
    report.final_active = query::active_count(world);
    report.final_slots = query::slot_count(world);
    report.lanes = query::lane_count(world);
    tracing::info!(
        frames = report.frames,
        spawned = report.spawned,
        moderated = report.moderated,
        compactions = report.compactions,
        "soak run finished"
    );
    Ok(report)
}

fn random_comment(rng: &mut ChaCha8Rng, serial: u64, playback_ms: i64) -> IncomingComment {
    let words = rng.gen_range(1..=6);
    let text = (0..words)
        .filter_map(|_| WORDS.choose(&mut *rng).copied())
        .collect::<Vec<_>>()
        .join(" ");
    let author = format!("viewer-{}", rng.gen_range(0..AUTHORS));
    let arrival_ms = playback_ms - rng.gen_range(0..MAX_ARRIVAL_LAG_MS);
    IncomingComment::new(
        format!("c{serial}").as_str(),
        author.as_str(),
        text,
        arrival_ms,
    )
}

/// Starts a new gesture or moves the current one a step, dropping it on the last frame.
fn advance_drag(
    world: &mut World,
    drag: Option<DragScript>,
    zone: &Rect,
    chance: f64,
    rng: &mut ChaCha8Rng,
    events: &mut Vec<Event>,
) -> Option<DragScript> {
    let Some(mut script) = drag else {
        if !rng.gen_bool(chance) {
            return None;
        }
        return start_drag(world, zone, rng, events);
    };

    script.pointer += script.step;
    world::apply(
        world,
        Command::MoveActiveDrag {
            point: script.pointer,
        },
        events,
    );
    script.frames_left = script.frames_left.saturating_sub(1);
    if script.frames_left > 0 {
        return Some(script);
    }

    world::apply(
        world,
        Command::DropActiveDrag {
            in_zone: zone.contains(script.pointer),
        },
        events,
    );
    None
}

fn start_drag(
    world: &mut World,
    zone: &Rect,
    rng: &mut ChaCha8Rng,
    events: &mut Vec<Event>,
) -> Option<DragScript> {
    let snapshot = query::render_snapshot(world);
    let target = snapshot.items().choose(rng)?;
    let item_height = query::config(world).item_height;
    let pointer = DVec2::new(target.x + target.width / 2.0, target.y + item_height / 2.0);
    if !world::begin_drag_at(world, pointer, events) {
        return None;
    }

    let viewport = query::viewport(world);
    let destination = if rng.gen_bool(0.5) {
        zone.center()
    } else {
        DVec2::new(
            rng.gen_range(0.0..viewport.width.max(1.0)),
            rng.gen_range(0.0..viewport.height.max(1.0)),
        )
    };
    let frames_left = rng.gen_range(5..30);
    Some(DragScript {
        pointer,
        step: (destination - pointer) / f64::from(frames_left),
        frames_left,
    })
}

fn spawn_reader(
    reader: SnapshotReader,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<Result<ReaderStats>>> {
    thread::Builder::new()
        .name("danmaku-reader".to_owned())
        .spawn(move || {
            let mut stats = ReaderStats::default();
            let mut last_generation = 0;
            while !stop.load(Ordering::Acquire) {
                let snapshot = reader.load();
                if snapshot.generation() < last_generation {
                    bail!(
                        "snapshot generation went backwards ({} after {last_generation})",
                        snapshot.generation()
                    );
                }
                last_generation = snapshot.generation();
                stats.loads += 1;
                stats.max_items = stats.max_items.max(snapshot.len());
                thread::sleep(Duration::from_millis(1));
            }
            Ok(stats)
        })
        .context("failed to start snapshot reader thread")
}

#[cfg(test)]
mod tests {
    use danmaku_core::{EngineConfig, KernelMode};

    use super::*;

    fn plan(seed: u64) -> SoakPlan {
        SoakPlan {
            duration_ms: 5_000,
            frame: Duration::from_millis(16),
            arrivals_per_sec: 60.0,
            seed,
            drag_chance: 0.2,
            seek_every_ms: None,
            playback_rate: Some(1.5),
        }
    }

    fn soak(config: EngineConfig, plan: &SoakPlan) -> SoakReport {
        let mut world = World::new(config).expect("valid configuration");
        let mut report = run(&mut world, plan).expect("soak run");
        report.reader_loads = 0;
        report.reader_max_items = 0;
        report
    }

    fn scalar() -> EngineConfig {
        EngineConfig {
            kernel_mode: KernelMode::Scalar,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn frame_count_covers_the_duration() {
        assert_eq!(plan(1).frame_count(), 312);
    }

    #[test]
    fn inline_runs_are_reproducible() {
        let first = soak(scalar(), &plan(11));
        let second = soak(scalar(), &plan(11));
        assert_eq!(first, second);
        assert_eq!(first.frames, 312);
        assert!(first.spawned > 0);
        assert!(first.drags > 0);
        assert!(first.moderated > 0);
        assert!(first.peak_active >= first.final_active);
        assert!(first.final_slots >= first.final_active);
    }

    #[test]
    fn seeks_clear_the_table() {
        let plan = SoakPlan {
            seek_every_ms: Some(1_000),
            ..plan(3)
        };
        let report = soak(scalar(), &plan);
        assert!(report.seek_cleared > 0);
        assert!(report.compactions > 0);
    }

    #[test]
    fn threaded_run_completes() {
        let config = EngineConfig {
            worker_enabled: true,
            ..scalar()
        };
        let report = soak(config, &plan(5));
        assert!(report.worker);
        assert!(report.spawned > 0);
        assert_eq!(report.frames, 312);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = SoakReport {
            kernel: "scalar".to_owned(),
            spawned: 3,
            ..SoakReport::default()
        };
        let value = serde_json::to_value(&report).expect("serializable");
        assert_eq!(value["spawned"], 3);
        assert_eq!(value["kernel"], "scalar");
        assert!(report.to_string().contains("spawned           3"));
    }
}

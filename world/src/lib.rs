#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Authoritative world state for the danmaku simulation engine.
//!
//! The world owns the slot table of live comments, the lane scheduler, the
//! spatial index and the render snapshot publisher. Drivers mutate it only
//! through [`apply`] and read it through the [`query`] module.

mod item;
mod perf;
mod pipeline;

use std::time::Duration;

use danmaku_core::{
    AuthorId, ColumnarBatch, Command, CommentId, EngineConfig, Event, FrameParams, FrameResponse,
    IncomingComment, ItemFlags, Rect, RemovalReason, Viewport,
};
use danmaku_system_kinematics::Kernel;
use danmaku_system_lanes::{cooldown_ms, lane_count, LaneScheduler};
use danmaku_system_snapshot::{SnapshotPublisher, SnapshotReader};
use danmaku_system_spatial_index::SpatialGrid;
use danmaku_system_update_worker::{FrameStepper, WorkerError};
use fxhash::FxHashSet;
use glam::DVec2;
use thiserror::Error;

use item::{Item, ItemTable};
use perf::PerfWindow;
use pipeline::{Delivery, Pipeline};

pub use danmaku_system_snapshot::RenderSnapshot;
pub use perf::{FrameStats, FrameSummary};

/// Errors raised while constructing a world.
#[derive(Debug, Error)]
pub enum WorldError {
    /// The configuration cannot drive the engine.
    #[error("invalid engine configuration")]
    Config(#[from] danmaku_core::ConfigError),
    /// The update worker could not be started.
    #[error("update worker unavailable")]
    Worker(#[from] WorkerError),
}

/// Pointer ownership of a dragged comment.
#[derive(Clone, Copy, Debug, PartialEq)]
struct ActiveDrag {
    row: usize,
    offset: DVec2,
}

/// Rows whose derived index and snapshot entries are out of date.
#[derive(Debug, Default)]
struct PendingSync {
    upserts: Vec<usize>,
    queued: FxHashSet<usize>,
    removals: Vec<usize>,
    full: bool,
}

impl PendingSync {
    fn upsert(&mut self, row: usize) {
        if self.queued.insert(row) {
            self.upserts.push(row);
        }
    }

    fn remove(&mut self, row: usize) {
        self.removals.push(row);
    }

    fn is_empty(&self) -> bool {
        !self.full && self.upserts.is_empty() && self.removals.is_empty()
    }

    fn clear(&mut self) {
        self.upserts.clear();
        self.queued.clear();
        self.removals.clear();
        self.full = false;
    }
}

/// Represents the authoritative danmaku world state.
#[derive(Debug)]
pub struct World {
    config: EngineConfig,
    viewport: Viewport,
    font_px: u32,
    lane_gap: u32,
    paused: bool,
    rate: f64,
    clock_ms: f64,
    items: ItemTable,
    lanes: LaneScheduler,
    grid: SpatialGrid,
    publisher: SnapshotPublisher,
    zone: Rect,
    zone_visible: bool,
    active_drag: Option<ActiveDrag>,
    pending: PendingSync,
    pipeline: Pipeline,
    stepper: FrameStepper,
    perf: PerfWindow,
}

impl World {
    /// Creates an empty world from a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self, WorldError> {
        config.validate()?;
        let kernel = Kernel::new(config.kernel_mode);
        let pipeline = Pipeline::new(kernel, config.worker_enabled, config.worker_elapsed_cap_ms)?;
        let font_px = config.font_px.max(config.min_font_px);
        let lane_gap = config.lane_gap;
        let viewport = config.viewport;
        let grid = SpatialGrid::new(
            config.spatial_cell_width,
            cell_height(config.item_height, font_px, lane_gap),
        );

        tracing::info!(
            requested = %kernel.requested(),
            kernel = %kernel.mode(),
            worker = pipeline.is_threaded(),
            "danmaku world ready"
        );

        Ok(Self {
            viewport,
            font_px,
            lane_gap,
            paused: config.start_paused,
            rate: 1.0,
            clock_ms: 0.0,
            items: ItemTable::default(),
            lanes: LaneScheduler::new(lane_count(viewport.height, font_px, lane_gap)),
            grid,
            publisher: SnapshotPublisher::new(),
            zone: Rect::default(),
            zone_visible: false,
            active_drag: None,
            pending: PendingSync::default(),
            pipeline,
            stepper: FrameStepper::new(kernel),
            perf: PerfWindow::new(config.perf_log_window_ms),
            config,
        })
    }

    /// Handle that loads published render snapshots from any thread.
    #[must_use]
    pub fn snapshot_reader(&self) -> SnapshotReader {
        self.publisher.reader()
    }

    fn lane_pitch(&self) -> f64 {
        EngineConfig::lane_pitch(self.font_px, self.lane_gap)
    }

    fn lane_y(&self, lane: usize) -> f64 {
        lane as f64 * self.lane_pitch() + self.config.lane_top_margin
    }

    fn now_ms(&self) -> i64 {
        self.clock_ms.floor() as i64
    }

    fn frame_params(&self, elapsed_ms: f64) -> FrameParams {
        FrameParams {
            paused: self.paused,
            rate: self.rate,
            elapsed_ms,
            viewport_height: self.viewport.height,
            cull_threshold: self.config.cull_threshold,
            item_height: self.config.item_height,
            fade_window_ms: self.config.fade_window_ms,
        }
    }

    fn in_zone(&self, item: &Item) -> bool {
        if self.zone.is_empty() {
            return false;
        }
        let rect = item.rect(self.config.item_height);
        rect.touches(&self.zone) || self.zone.contains(rect.center())
    }

    fn ingest(&mut self, comments: Vec<IncomingComment>, playback_position_ms: i64, out_events: &mut Vec<Event>) {
        self.pipeline.invalidate();
        let now = self.now_ms();
        let char_width = f64::from(self.font_px / 2 + 4);

        for comment in comments {
            if comment.id.is_empty() {
                continue;
            }

            let chars = comment.text.chars().count() as f64;
            let width = (chars * char_width).max(self.config.min_width);
            let speed = spawn_speed(&comment.id, self.config.speed_base, self.config.speed_spread);
            let pick = self.lanes.pick(now);
            let lag_ms = playback_position_ms
                .saturating_sub(comment.arrival_ms)
                .clamp(0, self.config.max_lag_compensation_ms);
            let x = self.viewport.width + self.config.spawn_offset
                - speed * self.rate * lag_ms as f64 / 1000.0;
            if x + width < self.config.cull_threshold {
                out_events.push(Event::CommentDiscarded { comment: comment.id });
                continue;
            }

            let id = comment.id.clone();
            let y = self.lane_y(pick.lane);
            let row = self.items.acquire(Item {
                id: comment.id,
                author: comment.author,
                text: comment.text,
                x,
                y,
                speed,
                alpha: 1.0,
                width,
                lane: pick.lane,
                original_lane: pick.lane,
                flags: ItemFlags::empty(),
                hovered: false,
                fade_remaining_ms: 0.0,
            });
            let cooldown = cooldown_ms(width, speed, self.rate, self.config.lane_spawn_gap);
            self.lanes.reserve(pick.lane, now, cooldown, row);
            self.pending.upsert(row);
            self.perf.stats_mut().appended += 1;
            out_events.push(Event::CommentSpawned {
                comment: id,
                row,
                lane: pick.lane,
            });
        }
    }

    fn tick(&mut self, dt: Duration, out_events: &mut Vec<Event>) {
        let elapsed_ms = dt.as_nanos() as f64 / 1.0e6;
        if elapsed_ms <= 0.0 {
            return;
        }
        self.clock_ms += elapsed_ms;
        self.perf.record_frame(elapsed_ms);

        let _ = self.collect_worker(None, out_events);

        if self.items.active_count() > 0 {
            if self.pipeline.is_threaded() {
                self.pipeline.accumulate(elapsed_ms);
                if self.pipeline.in_flight().is_none() {
                    let elapsed = self.pipeline.take_elapsed();
                    self.schedule_worker(elapsed, out_events);
                }
            } else {
                self.step_inline(elapsed_ms, out_events);
            }
        }

        self.maybe_log_perf();
    }

    fn build_columns(&mut self) -> ColumnarBatch {
        let mut columns = self.pipeline.take_buffers();
        columns.reserve(self.items.active_count());
        for (row, item) in self.items.iter() {
            columns.push(item.batch_row(row));
        }
        columns
    }

    fn step_inline(&mut self, elapsed_ms: f64, out_events: &mut Vec<Event>) {
        let columns = self.build_columns();
        let request = self
            .pipeline
            .inline_request(self.frame_params(elapsed_ms), columns);
        let response = self.stepper.step(request);
        self.apply_response(response, out_events);
    }

    fn schedule_worker(&mut self, elapsed_ms: f64, out_events: &mut Vec<Event>) {
        let columns = self.build_columns();
        if columns.is_empty() {
            self.pipeline.recycle(columns);
            return;
        }
        let params = self.frame_params(elapsed_ms);
        if let Err(error) = self.pipeline.submit(params, columns) {
            tracing::warn!(%error, "update worker failed, continuing on the frame thread");
            self.pipeline.disable();
            self.step_inline(elapsed_ms, out_events);
        }
    }

    /// Applies a finished worker response, waiting up to `timeout` when provided.
    ///
    /// Returns true when a response matching the current generation was applied.
    fn collect_worker(&mut self, timeout: Option<Duration>, out_events: &mut Vec<Event>) -> bool {
        let delivery = match timeout {
            Some(timeout) => self.pipeline.wait(timeout),
            None => self.pipeline.poll(),
        };
        match delivery {
            Ok(Some(Delivery::Current(response))) => {
                self.apply_response(response, out_events);
                true
            }
            Ok(Some(Delivery::Stale)) | Ok(None) => false,
            Err(error) => {
                tracing::warn!(%error, "update worker lost, continuing on the frame thread");
                self.pipeline.disable();
                false
            }
        }
    }

    fn apply_response(&mut self, response: FrameResponse, out_events: &mut Vec<Event>) {
        let columns = &response.columns;
        for index in 0..columns.len() {
            let Some(item) = self.items.get_mut(columns.rows[index]) else {
                continue;
            };
            item.x = columns.x[index];
            item.y = columns.y[index];
            item.alpha = columns.alpha[index];
            item.fade_remaining_ms = columns.fade_remaining_ms[index];
        }

        let mut updates = 0;
        for &row in &response.changed_rows {
            if self.items.get(row).is_some() {
                self.pending.upsert(row);
                updates += 1;
            }
        }
        self.perf.stats_mut().geometry_updates += updates;
        self.refresh_hover();

        let mut doomed = response.remove_rows.clone();
        doomed.sort_unstable_by(|left, right| right.cmp(left));
        doomed.dedup();
        for row in doomed {
            let reason = match self.items.get(row) {
                Some(item) if item.alpha <= 0.0 => RemovalReason::FadedOut,
                Some(_) => RemovalReason::OffScreen,
                None => continue,
            };
            if self.release(row, reason, out_events).is_some() {
                self.perf.stats_mut().removed += 1;
            }
        }
        self.maybe_compact(out_events);

        self.pipeline.recycle(response.into_buffers());
    }

    fn release(&mut self, row: usize, reason: RemovalReason, out_events: &mut Vec<Event>) -> Option<Item> {
        let item = self.items.release(row)?;
        if self.active_drag.is_some_and(|drag| drag.row == row) {
            self.active_drag = None;
        }
        self.pending.remove(row);
        out_events.push(Event::CommentRemoved {
            comment: item.id.clone(),
            reason,
        });
        Some(item)
    }

    fn maybe_compact(&mut self, out_events: &mut Vec<Event>) {
        let total = self.items.len();
        let free = self.items.free_count();
        if total == 0 || free <= self.config.free_rows_soft_limit {
            return;
        }
        if (free as f64 / total as f64) < self.config.compaction_ratio {
            return;
        }
        if self.items.any_dragging() {
            return;
        }
        self.compact(out_events);
    }

    fn compact(&mut self, out_events: &mut Vec<Event>) {
        let (before, after) = self.items.compact();
        if before == after {
            return;
        }
        self.lanes.clear_assignments();
        self.pending.full = true;
        self.perf.stats_mut().compacted = true;
        tracing::debug!(before, after, "compacted comment table");
        out_events.push(Event::TableCompacted { before, after });
    }

    fn refresh_hover(&mut self) {
        let hovered: Vec<(usize, bool)> = self
            .items
            .iter()
            .filter(|(_, item)| item.is_dragging())
            .map(|(row, item)| (row, self.in_zone(item)))
            .collect();
        for (row, hovered) in hovered {
            if let Some(item) = self.items.get_mut(row) {
                if item.hovered != hovered {
                    item.hovered = hovered;
                    self.pending.upsert(row);
                }
            }
        }
    }

    fn refresh_zone_visibility(&mut self, out_events: &mut Vec<Event>) {
        let visible = self.items.any_dragging();
        if visible != self.zone_visible {
            self.zone_visible = visible;
            out_events.push(Event::ModerationZoneVisibilityChanged { visible });
        }
    }

    fn hit_test(&self, point: DVec2) -> Option<usize> {
        let mut candidates = Vec::new();
        self.grid.query_point(point, &mut candidates);
        if candidates.is_empty() {
            self.grid
                .query_rect(&Rect::around(point, self.config.drag_pick_slop), &mut candidates);
        }
        candidates.sort_unstable_by(|left, right| right.cmp(left));
        candidates.into_iter().find(|row| {
            self.items
                .get(*row)
                .is_some_and(|item| item.rect(self.config.item_height).contains(point))
        })
    }

    fn begin_drag(&mut self, row: usize, pointer: Option<DVec2>, out_events: &mut Vec<Event>) -> bool {
        let hovered = match self.items.get(row) {
            Some(item) if !item.is_dragging() => self.in_zone(item),
            _ => return false,
        };
        let Some(item) = self.items.get_mut(row) else {
            return false;
        };
        item.flags.insert(ItemFlags::FROZEN | ItemFlags::DRAGGING);
        item.original_lane = item.lane;
        item.hovered = hovered;
        let offset = pointer.map_or(DVec2::ZERO, |point| point - item.origin());
        let comment = item.id.clone();

        self.active_drag = Some(ActiveDrag { row, offset });
        self.pipeline.invalidate();
        self.pending.upsert(row);
        out_events.push(Event::DragStarted { comment, row });
        self.refresh_zone_visibility(out_events);
        true
    }

    fn move_drag(&mut self, row: usize, point: DVec2, use_offset: bool) {
        let offset = match self.active_drag {
            Some(drag) if use_offset && drag.row == row => drag.offset,
            _ => DVec2::ZERO,
        };
        let Some(item) = self.items.get_mut(row) else {
            return;
        };
        if !item.is_dragging() {
            return;
        }
        let origin = point - offset;
        item.x = origin.x;
        item.y = origin.y;

        self.pipeline.invalidate();
        self.refresh_hover();
        self.pending.upsert(row);
    }

    fn drop_drag(&mut self, row: usize, in_zone: bool, out_events: &mut Vec<Event>) {
        let resolved = match self.items.get(row) {
            Some(item) if item.is_dragging() => in_zone || self.in_zone(item),
            _ => return,
        };
        self.pipeline.invalidate();
        if self.active_drag.is_some_and(|drag| drag.row == row) {
            self.active_drag = None;
        }

        if resolved {
            if let Some(item) = self.release(row, RemovalReason::ModerationDrop, out_events) {
                out_events.push(Event::ModerationDropRequested {
                    author: item.author,
                });
            }
            self.maybe_compact(out_events);
        } else if let Some(item) = self.items.get_mut(row) {
            item.flags.remove(ItemFlags::FROZEN | ItemFlags::DRAGGING);
            item.hovered = false;
            let lane = self.recover_to_lane(row);
            self.pending.upsert(row);
            if let Some(item) = self.items.get(row) {
                out_events.push(Event::DragReleased {
                    comment: item.id.clone(),
                    lane,
                });
            }
        }

        self.refresh_zone_visibility(out_events);
    }

    /// Returns the item to its original lane, walking outward on collisions.
    fn recover_to_lane(&mut self, row: usize) -> usize {
        let lanes = self.lanes.len();
        let Some(item) = self.items.get(row) else {
            return 0;
        };
        let original = item.original_lane.min(lanes - 1);

        let mut candidates = Vec::with_capacity(lanes);
        candidates.push(original);
        for offset in 1..lanes {
            if let Some(up) = original.checked_sub(offset) {
                candidates.push(up);
            }
            if original + offset < lanes {
                candidates.push(original + offset);
            }
        }

        let mut settled = original;
        for lane in candidates {
            settled = lane;
            self.place_in_lane(row, lane);
            if !self.lane_has_collision(row) {
                break;
            }
        }
        settled
    }

    fn place_in_lane(&mut self, row: usize, lane: usize) {
        let y = self.lane_y(lane);
        if let Some(item) = self.items.get_mut(row) {
            item.lane = lane;
            item.y = y;
        }
    }

    /// Lane membership is decided by the lane tag, not by the stored y.
    fn lane_has_collision(&self, row: usize) -> bool {
        let Some(candidate) = self.items.get(row) else {
            return false;
        };
        let left = candidate.x;
        let right = candidate.x + candidate.width;
        self.items.iter().any(|(other, item)| {
            other != row
                && item.lane == candidate.lane
                && !item.is_dragging()
                && !(right < item.x || item.x + item.width < left)
        })
    }

    fn set_zone(&mut self, rect: Rect) {
        self.pipeline.invalidate();
        self.zone = Rect::new(rect.x, rect.y, rect.width.max(0.0), rect.height.max(0.0));
        self.refresh_hover();
    }

    fn apply_fade(&mut self, author: &AuthorId) {
        self.pipeline.invalidate();
        let window = self.config.fade_window_ms;
        for (_, item) in self.items.iter_mut() {
            if &item.author == author {
                item.flags.insert(ItemFlags::FADING);
                item.fade_remaining_ms = window;
            }
        }
    }

    fn reset_for_seek(&mut self, out_events: &mut Vec<Event>) {
        self.pipeline.invalidate();
        for item in self.items.release_all() {
            out_events.push(Event::CommentRemoved {
                comment: item.id,
                reason: RemovalReason::Seek,
            });
        }
        self.active_drag = None;
        self.compact(out_events);
        self.reset_lanes(out_events);
        self.refresh_zone_visibility(out_events);
        self.pending.full = true;
    }

    fn reset_lanes(&mut self, out_events: &mut Vec<Event>) {
        let count = lane_count(self.viewport.height, self.font_px, self.lane_gap);
        self.lanes.reset(count);
        let pitch = self.lane_pitch();
        let top = self.config.lane_top_margin;
        for (_, item) in self.items.iter_mut() {
            item.lane = item.lane.min(count - 1);
            item.original_lane = item.original_lane.min(count - 1);
            if !item.is_dragging() {
                item.y = item.lane as f64 * pitch + top;
            }
        }
        self.pending.full = true;
        tracing::debug!(lanes = count, "lane table reset");
        out_events.push(Event::LanesReconfigured { lane_count: count });
    }

    fn set_viewport(&mut self, viewport: Viewport, out_events: &mut Vec<Event>) {
        self.pipeline.invalidate();
        let height_changed = viewport.height != self.viewport.height;
        self.viewport = viewport;
        if height_changed {
            self.reset_lanes(out_events);
        }
        self.pending.full = true;
    }

    fn set_lane_metrics(&mut self, font_px: u32, lane_gap: u32, out_events: &mut Vec<Event>) {
        let font_px = font_px.max(self.config.min_font_px);
        if font_px == self.font_px && lane_gap == self.lane_gap {
            return;
        }
        self.pipeline.invalidate();
        self.font_px = font_px;
        self.lane_gap = lane_gap;
        self.reset_lanes(out_events);
        self.grid.set_cell_size(
            self.config.spatial_cell_width,
            cell_height(self.config.item_height, font_px, lane_gap),
        );
        self.pending.full = true;
    }

    fn set_paused(&mut self, paused: bool, out_events: &mut Vec<Event>) {
        if paused == self.paused {
            return;
        }
        self.paused = paused;
        self.pipeline.invalidate();
        out_events.push(Event::PlaybackPausedChanged { paused });
    }

    fn set_rate(&mut self, rate: f64, out_events: &mut Vec<Event>) {
        if !rate.is_finite() {
            return;
        }
        let rate = rate.clamp(self.config.playback_rate_min, self.config.playback_rate_max);
        if (rate - self.rate).abs() < 1e-9 {
            return;
        }
        self.rate = rate;
        self.pipeline.invalidate();
        out_events.push(Event::PlaybackRateChanged { rate });
    }

    /// Brings the spatial index and snapshot up to date and publishes when dirty.
    fn flush(&mut self, out_events: &mut Vec<Event>) {
        if !self.pending.is_empty() {
            let item_height = self.config.item_height;
            let rebuild = self.pending.full
                || self.pending.upserts.len() + self.pending.removals.len()
                    > self.items.active_count() / 2 + 1;
            if rebuild {
                let (cell_width, cell_height) = self.grid.cell_size();
                self.grid.rebuild(
                    self.items.iter().map(|(row, item)| (row, item.rect(item_height))),
                    cell_width,
                    cell_height,
                );
                self.publisher
                    .rebuild(self.items.iter().map(|(row, item)| (row, item.render())));
            } else {
                for &row in &self.pending.removals {
                    self.grid.remove_row(row);
                }
                self.publisher.remove_rows(&self.pending.removals);
                for &row in &self.pending.upserts {
                    match self.items.get(row) {
                        Some(item) => {
                            self.grid.upsert_row(row, item.rect(item_height));
                            self.publisher.upsert_row(row, item.render());
                        }
                        None => self.grid.remove_row(row),
                    }
                }
            }
            self.pending.clear();
        }

        if let Some(generation) = self.publisher.publish() {
            out_events.push(Event::SnapshotPublished { generation });
        }
    }

    fn maybe_log_perf(&mut self) {
        if self.items.active_count() == 0 {
            return;
        }
        let lanes = self.lanes.stats();
        let Some((summary, stats)) = self.perf.roll(self.clock_ms, lanes) else {
            return;
        };
        let _ = self.lanes.take_stats();
        tracing::info!(
            window_ms = summary.window_ms,
            frames = stats.frames,
            fps = summary.fps,
            avg_ms = summary.avg_ms,
            p50_ms = summary.p50_ms,
            p95_ms = summary.p95_ms,
            p99_ms = summary.p99_ms,
            max_ms = summary.max_ms,
            rows_total = self.items.len(),
            rows_active = self.items.active_count(),
            rows_free = self.items.free_count(),
            compacted = stats.compacted,
            appended = stats.appended,
            updates = stats.geometry_updates,
            removed = stats.removed,
            lane_picks = stats.lanes.picks(),
            lane_ready = stats.lanes.ready,
            lane_forced = stats.lanes.forced,
            lane_wait_avg_ms = stats.lanes.wait_avg_ms(),
            lane_wait_max_ms = stats.lanes.wait_max_ms,
            dragging = self.active_drag.is_some(),
            paused = self.paused,
            rate = self.rate,
            "danmaku frame statistics"
        );
    }
}

fn cell_height(item_height: f64, font_px: u32, lane_gap: u32) -> f64 {
    item_height.max(EngineConfig::lane_pitch(font_px, lane_gap))
}

fn spawn_speed(id: &CommentId, base: f64, spread: u32) -> f64 {
    let spread = u64::from(spread.max(1));
    base + (fxhash::hash64(id.as_str()) % spread) as f64
}

/// Applies the provided command to the world, mutating state deterministically.
pub fn apply(world: &mut World, command: Command, out_events: &mut Vec<Event>) {
    match command {
        Command::Append {
            comments,
            playback_position_ms,
        } => world.ingest(comments, playback_position_ms, out_events),
        Command::SetViewportSize { viewport } => world.set_viewport(viewport, out_events),
        Command::SetLaneMetrics { font_px, lane_gap } => {
            world.set_lane_metrics(font_px, lane_gap, out_events);
        }
        Command::SetPlaybackPaused { paused } => world.set_paused(paused, out_events),
        Command::SetPlaybackRate { rate } => world.set_rate(rate, out_events),
        Command::BeginDragAt { point } => {
            let _ = begin_drag_at_inner(world, point, out_events);
        }
        Command::MoveActiveDrag { point } => {
            if let Some(drag) = world.active_drag {
                world.move_drag(drag.row, point, true);
            }
        }
        Command::DropActiveDrag { in_zone } => {
            if let Some(drag) = world.active_drag {
                world.drop_drag(drag.row, in_zone, out_events);
            }
        }
        Command::CancelActiveDrag => {
            if let Some(drag) = world.active_drag {
                world.drop_drag(drag.row, false, out_events);
            }
        }
        Command::BeginDrag { comment } => {
            let started = world
                .items
                .find(&comment)
                .is_some_and(|row| world.begin_drag(row, None, out_events));
            if !started {
                out_events.push(Event::DragRejected { point: None });
            }
        }
        Command::MoveDrag { comment, point } => {
            if let Some(row) = world.items.find(&comment) {
                world.move_drag(row, point, false);
            }
        }
        Command::DropDrag { comment, in_zone } => {
            if let Some(row) = world.items.find(&comment) {
                world.drop_drag(row, in_zone, out_events);
            }
        }
        Command::CancelDrag { comment } => {
            if let Some(row) = world.items.find(&comment) {
                world.drop_drag(row, false, out_events);
            }
        }
        Command::SetModerationZoneRect { rect } => world.set_zone(rect),
        Command::ApplyFade { author } => world.apply_fade(&author),
        Command::ResetForSeek => world.reset_for_seek(out_events),
        Command::Tick { dt } => world.tick(dt, out_events),
    }
    world.flush(out_events);
}

fn begin_drag_at_inner(world: &mut World, point: DVec2, out_events: &mut Vec<Event>) -> bool {
    let started = world
        .hit_test(point)
        .is_some_and(|row| world.begin_drag(row, Some(point), out_events));
    if !started {
        out_events.push(Event::DragRejected { point: Some(point) });
    }
    started
}

/// Starts a pointer drag on the topmost comment under `point`.
///
/// Returns whether a comment was picked up.
pub fn begin_drag_at(world: &mut World, point: DVec2, out_events: &mut Vec<Event>) -> bool {
    let started = begin_drag_at_inner(world, point, out_events);
    world.flush(out_events);
    started
}

/// Blocks up to `timeout` for the outstanding worker response and applies it.
///
/// Returns true when a response was applied. Stale responses are discarded
/// and their elapsed time is carried into the next request.
pub fn await_worker(world: &mut World, timeout: Duration, out_events: &mut Vec<Event>) -> bool {
    let applied = world.collect_worker(Some(timeout), out_events);
    world.flush(out_events);
    applied
}

/// Query functions that provide read-only access to the world state.
pub mod query {
    use std::sync::Arc;

    use danmaku_core::{AuthorId, CommentId, EngineConfig, ItemFlags, KernelMode, Rect, Viewport};
    use danmaku_system_lanes::LaneState;
    use glam::DVec2;

    use super::{FrameStats, RenderSnapshot, World};

    /// Read-only copy of a live comment's state.
    #[derive(Clone, Debug, PartialEq)]
    pub struct ItemView {
        /// Slot holding the comment.
        pub row: usize,
        /// Comment identifier.
        pub id: CommentId,
        /// Author identifier.
        pub author: AuthorId,
        /// Display text.
        pub text: Arc<str>,
        /// Left edge.
        pub x: f64,
        /// Top edge.
        pub y: f64,
        /// Horizontal speed in pixels per second.
        pub speed: f64,
        /// Opacity.
        pub alpha: f64,
        /// Estimated width.
        pub width: f64,
        /// Current lane.
        pub lane: usize,
        /// Lane held before the most recent drag.
        pub original_lane: usize,
        /// State bits.
        pub flags: ItemFlags,
        /// Whether the comment hovers over the moderation zone.
        pub hovered: bool,
        /// Remaining fade time in milliseconds.
        pub fade_remaining_ms: f64,
    }

    fn view(row: usize, item: &super::Item) -> ItemView {
        ItemView {
            row,
            id: item.id.clone(),
            author: item.author.clone(),
            text: Arc::clone(&item.text),
            x: item.x,
            y: item.y,
            speed: item.speed,
            alpha: item.alpha,
            width: item.width,
            lane: item.lane,
            original_lane: item.original_lane,
            flags: item.flags,
            hovered: item.hovered,
            fade_remaining_ms: item.fade_remaining_ms,
        }
    }

    /// Latest published render snapshot.
    #[must_use]
    pub fn render_snapshot(world: &World) -> Arc<RenderSnapshot> {
        world.publisher.published()
    }

    /// State of the comment held in `row`, if the slot is live.
    #[must_use]
    pub fn item(world: &World, row: usize) -> Option<ItemView> {
        world.items.get(row).map(|item| view(row, item))
    }

    /// Every live comment in slot order.
    #[must_use]
    pub fn items(world: &World) -> Vec<ItemView> {
        world.items.iter().map(|(row, item)| view(row, item)).collect()
    }

    /// Slot holding the comment with the provided id.
    #[must_use]
    pub fn row_of(world: &World, id: &CommentId) -> Option<usize> {
        world.items.find(id)
    }

    /// Topmost live comment whose rectangle contains the point.
    #[must_use]
    pub fn hit_test(world: &World, point: DVec2) -> Option<usize> {
        world.hit_test(point)
    }

    /// Number of live comments.
    #[must_use]
    pub fn active_count(world: &World) -> usize {
        world.items.active_count()
    }

    /// Number of slots, live or free.
    #[must_use]
    pub fn slot_count(world: &World) -> usize {
        world.items.len()
    }

    /// Number of free slots awaiting reuse.
    #[must_use]
    pub fn free_count(world: &World) -> usize {
        world.items.free_count()
    }

    /// Rectangle the spatial index holds for `row`.
    #[must_use]
    pub fn indexed_rect(world: &World, row: usize) -> Option<Rect> {
        world.grid.rect_of(row)
    }

    /// Number of rows held by the spatial index.
    #[must_use]
    pub fn indexed_count(world: &World) -> usize {
        world.grid.len()
    }

    /// Number of lanes.
    #[must_use]
    pub fn lane_count(world: &World) -> usize {
        world.lanes.len()
    }

    /// Cooldown state of every lane.
    #[must_use]
    pub fn lane_states(world: &World) -> &[LaneState] {
        world.lanes.lanes()
    }

    /// Slot under pointer ownership, if any.
    #[must_use]
    pub fn active_drag_row(world: &World) -> Option<usize> {
        world.active_drag.map(|drag| drag.row)
    }

    /// Whether the moderation zone should be shown.
    #[must_use]
    pub fn moderation_zone_visible(world: &World) -> bool {
        world.zone_visible
    }

    /// Current moderation zone rectangle.
    #[must_use]
    pub fn moderation_zone(world: &World) -> Rect {
        world.zone
    }

    /// Whether autonomous motion is paused.
    #[must_use]
    pub fn paused(world: &World) -> bool {
        world.paused
    }

    /// Current playback rate.
    #[must_use]
    pub fn playback_rate(world: &World) -> f64 {
        world.rate
    }

    /// Simulated time accumulated from ticks, in milliseconds.
    #[must_use]
    pub fn clock_ms(world: &World) -> f64 {
        world.clock_ms
    }

    /// Configuration the world was created with.
    #[must_use]
    pub fn config(world: &World) -> &EngineConfig {
        &world.config
    }

    /// Current viewport.
    #[must_use]
    pub fn viewport(world: &World) -> Viewport {
        world.viewport
    }

    /// Current font size and lane gap.
    #[must_use]
    pub fn lane_metrics(world: &World) -> (u32, u32) {
        (world.font_px, world.lane_gap)
    }

    /// Kernel implementation used for position updates.
    #[must_use]
    pub fn kernel_mode(world: &World) -> KernelMode {
        world.stepper.kernel().mode()
    }

    /// Whether physics runs on the background worker.
    #[must_use]
    pub fn worker_enabled(world: &World) -> bool {
        world.pipeline.is_threaded()
    }

    /// Generation of the outstanding worker request, if any.
    #[must_use]
    pub fn worker_in_flight(world: &World) -> Option<u64> {
        world.pipeline.in_flight()
    }

    /// Current worker generation.
    #[must_use]
    pub fn worker_seq(world: &World) -> u64 {
        world.pipeline.seq()
    }

    /// Counters for the current statistics window.
    #[must_use]
    pub fn frame_stats(world: &World) -> FrameStats {
        let mut stats = *world.perf.stats();
        stats.lanes = world.lanes.stats();
        stats
    }
}

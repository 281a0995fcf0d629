#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Lane table and spawn-lane picker.
//!
//! Each lane remembers when it can next accept a spawn without the new
//! comment overlapping the tail of the previous one. Picks rotate through
//! lanes from a cursor so simultaneous spawns spread across the viewport
//! instead of stacking in the top lane.

use danmaku_core::EngineConfig;

/// Cooldown bookkeeping for a single lane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaneState {
    /// Clock time in milliseconds at which the lane accepts another spawn.
    pub next_available_at_ms: i64,
    /// Slot of the most recent comment spawned into the lane.
    pub last_assigned_row: Option<usize>,
}

/// Outcome of a lane pick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LanePick {
    /// Chosen lane.
    pub lane: usize,
    /// How long the lane still needed before it would have been ready.
    pub wait_ms: i64,
    /// Whether every lane was cooling down and the earliest one was taken.
    pub forced: bool,
}

/// Counters describing pick behaviour since the last [`LaneScheduler::take_stats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaneStats {
    /// Picks that found a ready lane.
    pub ready: u64,
    /// Picks that had to take a lane still cooling down.
    pub forced: u64,
    /// Sum of forced waits in milliseconds.
    pub wait_total_ms: i64,
    /// Longest forced wait in milliseconds.
    pub wait_max_ms: i64,
}

impl LaneStats {
    /// Total number of picks.
    #[must_use]
    pub const fn picks(&self) -> u64 {
        self.ready + self.forced
    }

    /// Mean forced wait in milliseconds, zero when nothing was forced.
    #[must_use]
    pub fn wait_avg_ms(&self) -> f64 {
        if self.forced == 0 {
            0.0
        } else {
            self.wait_total_ms as f64 / self.forced as f64
        }
    }
}

/// Number of lanes that fit in the viewport, never less than one.
#[must_use]
pub fn lane_count(viewport_height: f64, font_px: u32, lane_gap: u32) -> usize {
    let pitch = EngineConfig::lane_pitch(font_px, lane_gap);
    if pitch <= 0.0 || !viewport_height.is_finite() {
        return 1;
    }
    ((viewport_height / pitch).floor().max(0.0) as usize).max(1)
}

/// Time in milliseconds for a comment to clear its own width plus `spawn_gap`.
#[must_use]
pub fn cooldown_ms(width: f64, speed: f64, rate: f64, spawn_gap: f64) -> i64 {
    let effective_speed = (speed * rate).max(1.0);
    let travel_ms = (width + spawn_gap) * 1000.0 / effective_speed;
    (travel_ms.round() as i64).max(1)
}

/// Table of lanes plus the rotating pick cursor.
#[derive(Clone, Debug)]
pub struct LaneScheduler {
    lanes: Vec<LaneState>,
    cursor: usize,
    stats: LaneStats,
}

impl LaneScheduler {
    /// Creates a scheduler with `count` idle lanes, at least one.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            lanes: vec![LaneState::default(); count.max(1)],
            cursor: 0,
            stats: LaneStats::default(),
        }
    }

    /// Number of lanes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    /// Always false; a scheduler keeps at least one lane.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Read-only view of every lane.
    #[must_use]
    pub fn lanes(&self) -> &[LaneState] {
        &self.lanes
    }

    /// Lane the next pick starts scanning from.
    #[must_use]
    pub const fn cursor(&self) -> usize {
        self.cursor
    }

    /// Resizes the table, keeping surviving lanes. Returns true when the size changed.
    pub fn ensure_size(&mut self, count: usize) -> bool {
        let count = count.max(1);
        if self.lanes.len() == count {
            return false;
        }
        self.lanes.resize(count, LaneState::default());
        self.cursor %= count;
        true
    }

    /// Resizes the table and makes every lane immediately available.
    pub fn reset(&mut self, count: usize) {
        let _ = self.ensure_size(count);
        self.lanes.fill(LaneState::default());
        self.cursor = 0;
    }

    /// Forgets which rows were last spawned into each lane.
    pub fn clear_assignments(&mut self) {
        for lane in &mut self.lanes {
            lane.last_assigned_row = None;
        }
    }

    /// Chooses the lane for a spawn at `now_ms`.
    ///
    /// The first ready lane at or after the cursor wins. When every lane is
    /// cooling down, the one that frees up first is taken, earliest in scan
    /// order on ties. Either way the cursor moves past the chosen lane.
    pub fn pick(&mut self, now_ms: i64) -> LanePick {
        let count = self.lanes.len();
        let start = self.cursor % count;

        let ready = (0..count)
            .map(|offset| (start + offset) % count)
            .find(|lane| self.lanes[*lane].next_available_at_ms <= now_ms);
        if let Some(lane) = ready {
            self.cursor = (lane + 1) % count;
            self.stats.ready += 1;
            return LanePick {
                lane,
                wait_ms: 0,
                forced: false,
            };
        }

        let mut chosen = start;
        for offset in 1..count {
            let lane = (start + offset) % count;
            if self.lanes[lane].next_available_at_ms < self.lanes[chosen].next_available_at_ms {
                chosen = lane;
            }
        }
        let wait_ms = (self.lanes[chosen].next_available_at_ms - now_ms).max(0);
        self.cursor = (chosen + 1) % count;
        self.stats.forced += 1;
        self.stats.wait_total_ms += wait_ms;
        self.stats.wait_max_ms = self.stats.wait_max_ms.max(wait_ms);
        LanePick {
            lane: chosen,
            wait_ms,
            forced: true,
        }
    }

    /// Books the lane for a spawn that takes `cooldown_ms` to clear.
    pub fn reserve(&mut self, lane: usize, now_ms: i64, cooldown_ms: i64, row: usize) {
        debug_assert!(lane < self.lanes.len(), "lane {lane} out of range");
        let Some(state) = self.lanes.get_mut(lane) else {
            return;
        };
        state.next_available_at_ms = state.next_available_at_ms.max(now_ms) + cooldown_ms;
        state.last_assigned_row = Some(row);
    }

    /// Counters accumulated since the last call to [`Self::take_stats`].
    #[must_use]
    pub const fn stats(&self) -> LaneStats {
        self.stats
    }

    /// Returns and resets the pick counters.
    pub fn take_stats(&mut self) -> LaneStats {
        std::mem::take(&mut self.stats)
    }
}

impl Default for LaneScheduler {
    fn default() -> Self {
        Self::new(1)
    }
}

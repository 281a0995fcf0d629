//! Engine configuration shared by the world, its systems and drivers.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimensions of the surface comments scroll across.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in pixels.
    pub width: f64,
    /// Height in pixels.
    pub height: f64,
}

impl Viewport {
    /// Creates a viewport description.
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1280.0, 720.0)
    }
}

/// Selects the implementation of the position-update kernel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelMode {
    /// Probe the host once and pick the widest supported implementation.
    #[default]
    Auto,
    /// Always use the scalar reference loop.
    Scalar,
    /// Always use the four-lane double-precision implementation.
    Wide,
}

impl KernelMode {
    /// Stable lowercase name used in logs and on the command line.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Scalar => "scalar",
            Self::Wide => "wide",
        }
    }
}

impl fmt::Display for KernelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for KernelMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "scalar" => Ok(Self::Scalar),
            "wide" | "simd" | "avx2" => Ok(Self::Wide),
            other => Err(ConfigError::UnknownKernelMode(other.to_owned())),
        }
    }
}

/// Errors raised when a configuration cannot drive the engine.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    /// The kernel mode string did not name a known implementation.
    #[error("unknown kernel mode `{0}` (expected auto, scalar or wide)")]
    UnknownKernelMode(String),
    /// A length or duration that must be strictly positive was not.
    #[error("`{field}` must be finite and greater than zero (got {value})")]
    NotPositive {
        /// Name of the offending field.
        field: &'static str,
        /// Value that was supplied.
        value: f64,
    },
    /// A value that must be finite and non-negative was not.
    #[error("`{field}` must be finite and non-negative (got {value})")]
    Negative {
        /// Name of the offending field.
        field: &'static str,
        /// Value that was supplied.
        value: f64,
    },
    /// The playback rate bounds are inverted.
    #[error("playback rate range is empty ({min}..={max})")]
    EmptyRateRange {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// The compaction ratio falls outside `(0, 1]`.
    #[error("compaction ratio must lie in (0, 1] (got {0})")]
    CompactionRatio(f64),
}

/// Tunables for the simulation engine.
///
/// Every field has a default so partial JSON documents deserialize cleanly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Initial viewport.
    pub viewport: Viewport,
    /// Initial font size in pixels.
    pub font_px: u32,
    /// Initial vertical gap between lanes in pixels.
    pub lane_gap: u32,
    /// Smallest font size accepted by lane metric updates.
    pub min_font_px: u32,
    /// Offset of the first lane from the top of the viewport.
    pub lane_top_margin: f64,
    /// Distance beyond the right edge where comments spawn.
    pub spawn_offset: f64,
    /// Height of a single comment.
    pub item_height: f64,
    /// Comments whose right edge passes left of this coordinate are culled.
    pub cull_threshold: f64,
    /// Upper bound on lag compensation applied at ingestion, in milliseconds.
    pub max_lag_compensation_ms: i64,
    /// Horizontal spacing kept between consecutive spawns in a lane.
    pub lane_spawn_gap: f64,
    /// Minimum estimated comment width.
    pub min_width: f64,
    /// Slowest spawn speed in pixels per second.
    pub speed_base: f64,
    /// Width of the spawn speed band in pixels per second.
    pub speed_spread: u32,
    /// Duration of a moderation fade in milliseconds.
    pub fade_window_ms: f64,
    /// Free slots required before compaction is considered.
    pub free_rows_soft_limit: usize,
    /// Free-to-total ratio at which compaction triggers.
    pub compaction_ratio: f64,
    /// Width of a spatial index cell.
    pub spatial_cell_width: f64,
    /// Half extent of the tolerance square used when a pointer misses every item.
    pub drag_pick_slop: f64,
    /// Largest elapsed time handed to the worker in one request, in milliseconds.
    pub worker_elapsed_cap_ms: f64,
    /// Slowest accepted playback rate.
    pub playback_rate_min: f64,
    /// Fastest accepted playback rate.
    pub playback_rate_max: f64,
    /// Whether the world starts with playback paused.
    pub start_paused: bool,
    /// Whether physics runs on the background worker.
    pub worker_enabled: bool,
    /// Requested kernel implementation.
    pub kernel_mode: KernelMode,
    /// Length of a frame statistics window in milliseconds; `None` disables logging.
    pub perf_log_window_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            viewport: Viewport::default(),
            font_px: 36,
            lane_gap: 6,
            min_font_px: 12,
            lane_top_margin: 10.0,
            spawn_offset: 12.0,
            item_height: 42.0,
            cull_threshold: -20.0,
            max_lag_compensation_ms: 2_000,
            lane_spawn_gap: 20.0,
            min_width: 80.0,
            speed_base: 120.0,
            speed_spread: 70,
            fade_window_ms: 300.0,
            free_rows_soft_limit: 512,
            compaction_ratio: 0.5,
            spatial_cell_width: 192.0,
            drag_pick_slop: 4.0,
            worker_elapsed_cap_ms: 200.0,
            playback_rate_min: 0.5,
            playback_rate_max: 3.0,
            start_paused: true,
            worker_enabled: false,
            kernel_mode: KernelMode::Auto,
            perf_log_window_ms: None,
        }
    }
}

impl EngineConfig {
    /// Checks that every value can drive the engine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("viewport.width", self.viewport.width)?;
        non_negative("viewport.height", self.viewport.height)?;
        positive("item_height", self.item_height)?;
        positive("spatial_cell_width", self.spatial_cell_width)?;
        positive("fade_window_ms", self.fade_window_ms)?;
        positive("worker_elapsed_cap_ms", self.worker_elapsed_cap_ms)?;
        positive("speed_base", self.speed_base)?;
        positive("speed_spread", f64::from(self.speed_spread))?;
        non_negative("min_width", self.min_width)?;
        non_negative("lane_spawn_gap", self.lane_spawn_gap)?;
        non_negative("drag_pick_slop", self.drag_pick_slop)?;
        non_negative("max_lag_compensation_ms", self.max_lag_compensation_ms as f64)?;
        positive("playback_rate_min", self.playback_rate_min)?;
        positive("playback_rate_max", self.playback_rate_max)?;
        if self.playback_rate_min > self.playback_rate_max {
            return Err(ConfigError::EmptyRateRange {
                min: self.playback_rate_min,
                max: self.playback_rate_max,
            });
        }
        if !(self.compaction_ratio > 0.0 && self.compaction_ratio <= 1.0) {
            return Err(ConfigError::CompactionRatio(self.compaction_ratio));
        }
        Ok(())
    }

    /// Vertical distance between the tops of adjacent lanes for the given metrics.
    #[must_use]
    pub fn lane_pitch(font_px: u32, lane_gap: u32) -> f64 {
        f64::from(font_px) + f64::from(lane_gap)
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Negative { field, value })
    }
}

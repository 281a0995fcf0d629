#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Core contracts shared across the danmaku simulation engine.
//!
//! This crate defines the message surface that connects drivers, the
//! authoritative world, and pure systems. Drivers submit [`Command`] values
//! describing desired mutations, the world executes those commands via its
//! `apply` entry point, and then reports [`Event`] values describing what
//! happened. Systems operate on plain data handed to them (columnar batches,
//! rectangles, lane tables) and never reach back into the world.

use std::{fmt, sync::Arc, time::Duration};

use glam::DVec2;
use serde::{Deserialize, Serialize};

pub mod batch;
pub mod config;

pub use batch::{BatchRow, ColumnarBatch, FrameParams, FrameRequest, FrameResponse, ItemFlags};
pub use config::{ConfigError, EngineConfig, KernelMode, Viewport};

/// Stable identifier assigned to a comment by the comment source.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommentId(Arc<str>);

impl CommentId {
    /// Creates a new comment identifier from the provided text.
    #[must_use]
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    /// Borrows the textual representation of the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reports whether the identifier carries no characters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of the user who authored a comment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorId(Arc<str>);

impl AuthorId {
    /// Creates a new author identifier from the provided text.
    #[must_use]
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    /// Borrows the textual representation of the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AuthorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Comment record delivered by the comment source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingComment {
    /// Identifier of the comment. Records with an empty id are ignored.
    pub id: CommentId,
    /// Author of the comment, used for moderation requests and fades.
    pub author: AuthorId,
    /// Display text rendered inside the overlay.
    pub text: Arc<str>,
    /// Playback timestamp at which the comment was posted, in milliseconds.
    pub arrival_ms: i64,
}

impl IncomingComment {
    /// Creates a new comment record.
    #[must_use]
    pub fn new(
        id: impl Into<CommentId>,
        author: impl Into<AuthorId>,
        text: impl Into<Arc<str>>,
        arrival_ms: i64,
    ) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            text: text.into(),
            arrival_ms,
        }
    }
}

/// Axis-aligned rectangle measured in viewport pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Horizontal extent.
    pub width: f64,
    /// Vertical extent.
    pub height: f64,
}

impl Rect {
    /// Creates a rectangle from its origin and extents.
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Square rectangle of the given half extent centred on `point`.
    #[must_use]
    pub fn around(point: DVec2, half_extent: f64) -> Self {
        Self::new(
            point.x - half_extent,
            point.y - half_extent,
            half_extent * 2.0,
            half_extent * 2.0,
        )
    }

    /// Right edge.
    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge.
    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Geometric centre.
    #[must_use]
    pub fn center(&self) -> DVec2 {
        DVec2::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Reports whether the rectangle covers no area.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }

    /// Reports whether the point lies inside the rectangle, edges included.
    #[must_use]
    pub fn contains(&self, point: DVec2) -> bool {
        !self.is_empty()
            && point.x >= self.x
            && point.x <= self.right()
            && point.y >= self.y
            && point.y <= self.bottom()
    }

    /// Reports whether both rectangles share a region of positive area.
    #[must_use]
    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Reports whether the rectangles overlap or touch along an edge.
    #[must_use]
    pub fn touches(&self, other: &Rect) -> bool {
        !(self.right() < other.x
            || other.right() < self.x
            || self.bottom() < other.y
            || other.bottom() < self.y)
    }
}

/// Commands that express all permissible world mutations.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Ingests a batch of comments relative to the current playback position.
    Append {
        /// Records delivered by the comment source.
        comments: Vec<IncomingComment>,
        /// Current playback position used for lag compensation, in milliseconds.
        playback_position_ms: i64,
    },
    /// Resizes the viewport the overlays scroll across.
    SetViewportSize {
        /// New viewport dimensions.
        viewport: Viewport,
    },
    /// Updates the font size and vertical gap that determine lane pitch.
    SetLaneMetrics {
        /// Font size in pixels. Values below the configured minimum are raised.
        font_px: u32,
        /// Vertical gap between lanes in pixels.
        lane_gap: u32,
    },
    /// Pauses or resumes autonomous motion.
    SetPlaybackPaused {
        /// Whether playback is paused.
        paused: bool,
    },
    /// Changes the playback rate scaling every item's speed.
    SetPlaybackRate {
        /// Requested rate, clamped to the configured range.
        rate: f64,
    },
    /// Starts dragging the topmost item under the pointer.
    BeginDragAt {
        /// Pointer location in viewport pixels.
        point: DVec2,
    },
    /// Moves the item currently owned by the pointer.
    MoveActiveDrag {
        /// Pointer location in viewport pixels.
        point: DVec2,
    },
    /// Releases the item currently owned by the pointer.
    DropActiveDrag {
        /// Whether the driver observed the drop inside the moderation zone.
        in_zone: bool,
    },
    /// Releases the pointer-owned item without a moderation request.
    CancelActiveDrag,
    /// Starts dragging the comment with the provided id.
    BeginDrag {
        /// Comment to pick up.
        comment: CommentId,
    },
    /// Moves the comment with the provided id so its origin sits at `point`.
    MoveDrag {
        /// Comment being dragged.
        comment: CommentId,
        /// New origin of the comment in viewport pixels.
        point: DVec2,
    },
    /// Releases the comment with the provided id.
    DropDrag {
        /// Comment being released.
        comment: CommentId,
        /// Whether the driver observed the drop inside the moderation zone.
        in_zone: bool,
    },
    /// Releases the comment with the provided id without a moderation request.
    CancelDrag {
        /// Comment being released.
        comment: CommentId,
    },
    /// Places the moderation zone on screen.
    SetModerationZoneRect {
        /// Zone rectangle in viewport pixels. Negative extents collapse to zero.
        rect: Rect,
    },
    /// Fades out every live comment written by the author.
    ApplyFade {
        /// Author whose comments should disappear.
        author: AuthorId,
    },
    /// Clears all live comments and lane cooldowns after a playback discontinuity.
    ResetForSeek,
    /// Advances the simulation clock by the provided delta time.
    Tick {
        /// Wall time that elapsed since the previous tick.
        dt: Duration,
    },
}

/// Reasons a live comment left the entity table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// The comment scrolled past the cull threshold or left the viewport vertically.
    OffScreen,
    /// The comment's opacity reached zero.
    FadedOut,
    /// The comment was dropped into the moderation zone.
    ModerationDrop,
    /// The comment was cleared by a seek reset.
    Seek,
}

/// Events reported by the world after processing commands.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Confirms that a comment was placed into a slot.
    CommentSpawned {
        /// Identifier of the spawned comment.
        comment: CommentId,
        /// Slot that now holds the comment.
        row: usize,
        /// Lane assigned to the comment.
        lane: usize,
    },
    /// Reports that a comment was dropped at ingestion because lag placed it off screen.
    CommentDiscarded {
        /// Identifier of the discarded comment.
        comment: CommentId,
    },
    /// Reports that a live comment released its slot.
    CommentRemoved {
        /// Identifier of the removed comment.
        comment: CommentId,
        /// Why the comment was removed.
        reason: RemovalReason,
    },
    /// Confirms that the pointer picked up a comment.
    DragStarted {
        /// Identifier of the dragged comment.
        comment: CommentId,
        /// Slot that holds the comment.
        row: usize,
    },
    /// Reports that a drag could not begin.
    DragRejected {
        /// Pointer location of the attempt, when one was provided.
        point: Option<DVec2>,
    },
    /// Confirms that a dragged comment returned to scrolling in a lane.
    DragReleased {
        /// Identifier of the released comment.
        comment: CommentId,
        /// Lane the comment settled into.
        lane: usize,
    },
    /// Requests that the comment source moderate the author.
    ModerationDropRequested {
        /// Author of the comment dropped into the zone.
        author: AuthorId,
    },
    /// Announces that the moderation zone should be shown or hidden.
    ModerationZoneVisibilityChanged {
        /// Whether any drag is currently in progress.
        visible: bool,
    },
    /// Announces that playback was paused or resumed.
    PlaybackPausedChanged {
        /// New pause state.
        paused: bool,
    },
    /// Announces that the playback rate changed.
    PlaybackRateChanged {
        /// Rate after clamping.
        rate: f64,
    },
    /// Announces that the lane table was resized or reset.
    LanesReconfigured {
        /// Number of lanes available after the change.
        lane_count: usize,
    },
    /// Reports that free slots were physically removed from the entity table.
    TableCompacted {
        /// Slot count before compaction.
        before: usize,
        /// Slot count after compaction.
        after: usize,
    },
    /// Reports that a new render snapshot became visible to readers.
    SnapshotPublished {
        /// Generation of the published snapshot.
        generation: u64,
    },
}

/// Immutable projection of a live comment consumed by renderers.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderItem {
    /// Identifier of the comment.
    pub id: CommentId,
    /// Display text.
    pub text: Arc<str>,
    /// Left edge in viewport pixels.
    pub x: f64,
    /// Top edge in viewport pixels.
    pub y: f64,
    /// Opacity in the range 0.0..=1.0.
    pub opacity: f64,
    /// Estimated width in pixels.
    pub width: f64,
    /// Whether the item is being dragged over the moderation zone.
    pub hovered: bool,
}

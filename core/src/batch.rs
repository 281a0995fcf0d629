//! Columnar frame batches exchanged between the world and the update worker.
//!
//! A batch stores one entry per live row in parallel arrays so the position
//! kernel can stream over `x` and `speed` without touching the rest of the
//! item state. Batches are moved across threads, never shared: the world fills
//! one, hands it to the worker inside a [`FrameRequest`], and receives the same
//! buffers back inside a [`FrameResponse`] ready to be cleared and refilled.

use bitflags::bitflags;

bitflags! {
    /// Per-row state bits carried through columnar batches.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ItemFlags: u8 {
        /// The row does not move on its own.
        const FROZEN = 1 << 0;
        /// The row is owned by a pointer drag and may not be culled.
        const DRAGGING = 1 << 1;
        /// The row is fading out after a moderation request.
        const FADING = 1 << 2;
    }
}

/// One row's worth of columnar state, used when filling a batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchRow {
    /// Slot index of the row inside the entity table.
    pub row: usize,
    /// Left edge in pixels.
    pub x: f64,
    /// Top edge in pixels.
    pub y: f64,
    /// Horizontal speed in pixels per second.
    pub speed: f64,
    /// Opacity in the range 0.0..=1.0.
    pub alpha: f64,
    /// Estimated width in pixels.
    pub width: f64,
    /// Remaining fade time in milliseconds.
    pub fade_remaining_ms: f64,
    /// State bits.
    pub flags: ItemFlags,
}

/// Structure-of-arrays snapshot of movable entity state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColumnarBatch {
    /// Slot index of each entry.
    pub rows: Vec<usize>,
    /// Left edges.
    pub x: Vec<f64>,
    /// Top edges.
    pub y: Vec<f64>,
    /// Horizontal speeds.
    pub speed: Vec<f64>,
    /// Opacities.
    pub alpha: Vec<f64>,
    /// Estimated widths.
    pub width: Vec<f64>,
    /// Remaining fade times in milliseconds.
    pub fade_remaining_ms: Vec<f64>,
    /// State bits.
    pub flags: Vec<ItemFlags>,
}

impl ColumnarBatch {
    /// Empties every column while keeping the allocations.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.x.clear();
        self.y.clear();
        self.speed.clear();
        self.alpha.clear();
        self.width.clear();
        self.fade_remaining_ms.clear();
        self.flags.clear();
    }

    /// Reserves room for `additional` more rows in every column.
    pub fn reserve(&mut self, additional: usize) {
        self.rows.reserve(additional);
        self.x.reserve(additional);
        self.y.reserve(additional);
        self.speed.reserve(additional);
        self.alpha.reserve(additional);
        self.width.reserve(additional);
        self.fade_remaining_ms.reserve(additional);
        self.flags.reserve(additional);
    }

    /// Appends a row to every column.
    pub fn push(&mut self, entry: BatchRow) {
        self.rows.push(entry.row);
        self.x.push(entry.x);
        self.y.push(entry.y);
        self.speed.push(entry.speed);
        self.alpha.push(entry.alpha);
        self.width.push(entry.width);
        self.fade_remaining_ms.push(entry.fade_remaining_ms);
        self.flags.push(entry.flags);
    }

    /// Number of rows, as measured by the `rows` column.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Reports whether the batch holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Reports whether every column has the same length as `rows`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let count = self.rows.len();
        self.x.len() == count
            && self.y.len() == count
            && self.speed.len() == count
            && self.alpha.len() == count
            && self.width.len() == count
            && self.fade_remaining_ms.len() == count
            && self.flags.len() == count
    }
}

/// Per-frame parameters shared by every row of a batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameParams {
    /// Whether autonomous motion is suspended.
    pub paused: bool,
    /// Playback rate multiplier.
    pub rate: f64,
    /// Simulated time covered by the frame, in milliseconds.
    pub elapsed_ms: f64,
    /// Height of the viewport used for vertical culling.
    pub viewport_height: f64,
    /// Rows whose right edge falls left of this x coordinate are culled.
    pub cull_threshold: f64,
    /// Height of a single item.
    pub item_height: f64,
    /// Duration of a full fade in milliseconds.
    pub fade_window_ms: f64,
}

impl FrameParams {
    /// Distance multiplier applied to speeds: seconds elapsed times rate.
    #[must_use]
    pub fn movement_factor(&self) -> f64 {
        (self.elapsed_ms / 1000.0) * self.rate
    }
}

/// Work handed to the update worker.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRequest {
    /// Generation tag compared against the world's current sequence on return.
    pub seq: u64,
    /// Frame parameters.
    pub params: FrameParams,
    /// Columnar state of every live row.
    pub columns: ColumnarBatch,
}

/// Result produced by the update worker for a single request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameResponse {
    /// Generation tag copied from the request.
    pub seq: u64,
    /// Simulated time the request covered, in milliseconds.
    pub elapsed_ms: f64,
    /// Mutated columns, in request order.
    pub columns: ColumnarBatch,
    /// Slot indices whose geometry or opacity changed.
    pub changed_rows: Vec<usize>,
    /// Slot indices eligible for removal.
    pub remove_rows: Vec<usize>,
}

impl FrameResponse {
    /// Splits the response into reusable buffers for the next request.
    #[must_use]
    pub fn into_buffers(self) -> ColumnarBatch {
        let mut columns = self.columns;
        columns.clear();
        columns
    }
}

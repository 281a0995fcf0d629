#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Uniform grid that buckets row rectangles for hit-testing and collision queries.
//!
//! Rows are opaque slot indices owned by the caller. Each row is stored in
//! every cell its rectangle overlaps, and a reverse map remembers those cells
//! so moving or removing a row only touches the buckets it previously
//! occupied.

use danmaku_core::Rect;
use fxhash::FxHashMap;
use glam::DVec2;
use smallvec::SmallVec;

/// Smallest accepted cell extent in pixels.
pub const MIN_CELL_SIZE: f64 = 8.0;

type CellKey = u64;

/// Incrementally maintained grid of row rectangles.
#[derive(Clone, Debug)]
pub struct SpatialGrid {
    cell_width: f64,
    cell_height: f64,
    cells: FxHashMap<CellKey, SmallVec<[usize; 8]>>,
    rects: FxHashMap<usize, Rect>,
    memberships: FxHashMap<usize, SmallVec<[CellKey; 4]>>,
}

impl SpatialGrid {
    /// Creates an empty grid with the provided cell extents.
    #[must_use]
    pub fn new(cell_width: f64, cell_height: f64) -> Self {
        Self {
            cell_width: sanitize_cell_size(cell_width),
            cell_height: sanitize_cell_size(cell_height),
            cells: FxHashMap::default(),
            rects: FxHashMap::default(),
            memberships: FxHashMap::default(),
        }
    }

    /// Current cell extents as `(width, height)`.
    #[must_use]
    pub fn cell_size(&self) -> (f64, f64) {
        (self.cell_width, self.cell_height)
    }

    /// Changes the cell extents, re-bucketing every stored row.
    pub fn set_cell_size(&mut self, cell_width: f64, cell_height: f64) {
        let cell_width = sanitize_cell_size(cell_width);
        let cell_height = sanitize_cell_size(cell_height);
        if cell_width == self.cell_width && cell_height == self.cell_height {
            return;
        }
        let entries: Vec<(usize, Rect)> = self.rects.drain().collect();
        self.rebuild(entries, cell_width, cell_height);
    }

    /// Removes every row.
    pub fn clear(&mut self) {
        self.cells.clear();
        self.rects.clear();
        self.memberships.clear();
    }

    /// Replaces the contents of the grid with `entries`.
    pub fn rebuild<I>(&mut self, entries: I, cell_width: f64, cell_height: f64)
    where
        I: IntoIterator<Item = (usize, Rect)>,
    {
        self.clear();
        self.cell_width = sanitize_cell_size(cell_width);
        self.cell_height = sanitize_cell_size(cell_height);
        for (row, rect) in entries {
            self.upsert_row(row, rect);
        }
    }

    /// Inserts the row or moves it to a new rectangle.
    ///
    /// Rows with an empty rectangle are dropped from the grid entirely.
    pub fn upsert_row(&mut self, row: usize, rect: Rect) {
        self.remove_row(row);
        if rect.is_empty() {
            return;
        }

        let mut keys = SmallVec::<[CellKey; 4]>::new();
        let (first_x, last_x) = self.column_span(rect.x, rect.right());
        let (first_y, last_y) = self.row_span(rect.y, rect.bottom());
        for cell_x in first_x..=last_x {
            for cell_y in first_y..=last_y {
                let key = cell_key(cell_x, cell_y);
                self.cells.entry(key).or_default().push(row);
                keys.push(key);
            }
        }

        let _ = self.rects.insert(row, rect);
        let _ = self.memberships.insert(row, keys);
    }

    /// Removes the row from every cell it occupies. Unknown rows are ignored.
    pub fn remove_row(&mut self, row: usize) {
        let Some(keys) = self.memberships.remove(&row) else {
            return;
        };
        let _ = self.rects.remove(&row);
        for key in keys {
            if let Some(bucket) = self.cells.get_mut(&key) {
                bucket.retain(|candidate| *candidate != row);
                if bucket.is_empty() {
                    let _ = self.cells.remove(&key);
                }
            }
        }
    }

    /// Rectangle currently stored for the row.
    #[must_use]
    pub fn rect_of(&self, row: usize) -> Option<Rect> {
        self.rects.get(&row).copied()
    }

    /// Number of rows stored in the grid.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rects.len()
    }

    /// Reports whether the grid holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Number of non-empty cells.
    #[must_use]
    pub fn occupied_cells(&self) -> usize {
        self.cells.len()
    }

    /// Collects rows whose rectangle contains the point, edges included.
    ///
    /// `out` is cleared first and receives unique rows in ascending order.
    pub fn query_point(&self, point: DVec2, out: &mut Vec<usize>) {
        out.clear();
        let key = cell_key(
            cell_coord(point.x, self.cell_width),
            cell_coord(point.y, self.cell_height),
        );
        let Some(bucket) = self.cells.get(&key) else {
            return;
        };
        out.extend(bucket.iter().copied().filter(|row| {
            self.rects
                .get(row)
                .is_some_and(|rect| rect.contains(point))
        }));
        out.sort_unstable();
        out.dedup();
    }

    /// Collects rows whose rectangle shares a region of positive area with `area`.
    ///
    /// `out` is cleared first and receives unique rows in ascending order.
    pub fn query_rect(&self, area: &Rect, out: &mut Vec<usize>) {
        out.clear();
        if area.is_empty() {
            return;
        }
        let (first_x, last_x) = self.column_span(area.x, area.right());
        let (first_y, last_y) = self.row_span(area.y, area.bottom());
        for cell_x in first_x..=last_x {
            for cell_y in first_y..=last_y {
                let Some(bucket) = self.cells.get(&cell_key(cell_x, cell_y)) else {
                    continue;
                };
                out.extend(bucket.iter().copied().filter(|row| {
                    self.rects
                        .get(row)
                        .is_some_and(|rect| rect.intersects(area))
                }));
            }
        }
        out.sort_unstable();
        out.dedup();
    }

    fn column_span(&self, left: f64, right: f64) -> (i32, i32) {
        (
            cell_coord(left, self.cell_width),
            cell_coord(right, self.cell_width),
        )
    }

    fn row_span(&self, top: f64, bottom: f64) -> (i32, i32) {
        (
            cell_coord(top, self.cell_height),
            cell_coord(bottom, self.cell_height),
        )
    }
}

impl Default for SpatialGrid {
    fn default() -> Self {
        Self::new(192.0, 42.0)
    }
}

fn sanitize_cell_size(size: f64) -> f64 {
    if size.is_finite() {
        size.max(MIN_CELL_SIZE)
    } else {
        MIN_CELL_SIZE
    }
}

fn cell_coord(value: f64, size: f64) -> i32 {
    (value / size).floor() as i32
}

fn cell_key(cell_x: i32, cell_y: i32) -> CellKey {
    ((cell_x as u32 as u64) << 32) | cell_y as u32 as u64
}

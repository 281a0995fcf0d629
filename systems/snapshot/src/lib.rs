#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Render snapshot publishing.
//!
//! The frame thread edits a working list of [`RenderItem`] values and
//! publishes it as an immutable [`RenderSnapshot`]. Readers on any thread load
//! the latest published snapshot wait-free through an [`ArcSwap`] and never
//! observe a half-updated list. Edits after a publish copy the list on first
//! write while readers still hold the previous one.

use std::sync::Arc;

use arc_swap::ArcSwap;
use danmaku_core::{CommentId, RenderItem};
use fxhash::FxHashMap;

/// Immutable, ordered list of renderable comments.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderSnapshot {
    generation: u64,
    items: Vec<RenderItem>,
}

impl RenderSnapshot {
    /// Publish generation, zero before the first publish.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Items in insertion order.
    #[must_use]
    pub fn items(&self) -> &[RenderItem] {
        &self.items
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Reports whether the snapshot holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Looks up an item by comment id.
    #[must_use]
    pub fn find(&self, id: &CommentId) -> Option<&RenderItem> {
        self.items.iter().find(|item| &item.id == id)
    }
}

/// Cloneable, thread-safe handle that loads the latest published snapshot.
#[derive(Clone, Debug)]
pub struct SnapshotReader {
    cell: Arc<ArcSwap<RenderSnapshot>>,
}

impl SnapshotReader {
    /// Returns the most recently published snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<RenderSnapshot> {
        self.cell.load_full()
    }

    /// Generation of the most recently published snapshot.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.cell.load().generation
    }
}

/// Owner of the working snapshot and the slot-to-index bookkeeping.
#[derive(Debug)]
pub struct SnapshotPublisher {
    working: Arc<RenderSnapshot>,
    item_rows: Vec<usize>,
    row_to_index: FxHashMap<usize, usize>,
    cell: Arc<ArcSwap<RenderSnapshot>>,
    dirty: bool,
}

impl SnapshotPublisher {
    /// Creates a publisher whose readers initially see an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        let working = Arc::new(RenderSnapshot::default());
        Self {
            cell: Arc::new(ArcSwap::new(Arc::clone(&working))),
            working,
            item_rows: Vec::new(),
            row_to_index: FxHashMap::default(),
            dirty: false,
        }
    }

    /// Handle for readers on other threads.
    #[must_use]
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            cell: Arc::clone(&self.cell),
        }
    }

    /// Working list, including edits that are not yet published.
    #[must_use]
    pub fn working(&self) -> &RenderSnapshot {
        &self.working
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn published(&self) -> Arc<RenderSnapshot> {
        self.cell.load_full()
    }

    /// Whether the working list differs from the published one.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Index of the row's item inside the working list.
    #[must_use]
    pub fn index_of(&self, row: usize) -> Option<usize> {
        self.row_to_index.get(&row).copied()
    }

    /// Replaces the row's item in place, or appends it.
    pub fn upsert_row(&mut self, row: usize, item: RenderItem) {
        if let Some(&index) = self.row_to_index.get(&row) {
            if self.working.items[index] == item {
                return;
            }
            Arc::make_mut(&mut self.working).items[index] = item;
        } else {
            let working = Arc::make_mut(&mut self.working);
            let _ = self.row_to_index.insert(row, working.items.len());
            working.items.push(item);
            self.item_rows.push(row);
        }
        self.dirty = true;
    }

    /// Drops every listed row in one pass and reindexes the survivors.
    pub fn remove_rows(&mut self, rows: &[usize]) {
        let mut doomed = vec![false; self.item_rows.len()];
        let mut any = false;
        for row in rows {
            if let Some(&index) = self.row_to_index.get(row) {
                doomed[index] = true;
                any = true;
            }
        }
        if !any {
            return;
        }

        let mut position = 0;
        Arc::make_mut(&mut self.working).items.retain(|_| {
            let keep = !doomed[position];
            position += 1;
            keep
        });
        let mut position = 0;
        self.item_rows.retain(|_| {
            let keep = !doomed[position];
            position += 1;
            keep
        });
        self.reindex();
        self.dirty = true;
    }

    /// Replaces the whole working list. Identical contents leave the publisher clean.
    pub fn rebuild<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (usize, RenderItem)>,
    {
        let (rows, items): (Vec<usize>, Vec<RenderItem>) = entries.into_iter().unzip();
        if rows == self.item_rows && items == self.working.items {
            return;
        }
        Arc::make_mut(&mut self.working).items = items;
        self.item_rows = rows;
        self.reindex();
        self.dirty = true;
    }

    /// Empties the working list.
    pub fn clear(&mut self) {
        if self.item_rows.is_empty() {
            return;
        }
        self.rebuild(std::iter::empty());
    }

    /// Makes pending edits visible to readers.
    ///
    /// Returns the new generation, or `None` when nothing changed.
    pub fn publish(&mut self) -> Option<u64> {
        if !self.dirty {
            return None;
        }
        let working = Arc::make_mut(&mut self.working);
        working.generation += 1;
        let generation = working.generation;
        self.cell.store(Arc::clone(&self.working));
        self.dirty = false;
        Some(generation)
    }

    fn reindex(&mut self) {
        self.row_to_index.clear();
        for (index, row) in self.item_rows.iter().enumerate() {
            let _ = self.row_to_index.insert(*row, index);
        }
    }
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

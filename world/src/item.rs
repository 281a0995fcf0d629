//! Slot arena holding live comments.

use std::sync::Arc;

use danmaku_core::{AuthorId, BatchRow, CommentId, ItemFlags, Rect, RenderItem};
use glam::DVec2;

/// Authoritative state of a live comment.
#[derive(Clone, Debug)]
pub(crate) struct Item {
    pub(crate) id: CommentId,
    pub(crate) author: AuthorId,
    pub(crate) text: Arc<str>,
    pub(crate) x: f64,
    pub(crate) y: f64,
    pub(crate) speed: f64,
    pub(crate) alpha: f64,
    pub(crate) width: f64,
    pub(crate) lane: usize,
    pub(crate) original_lane: usize,
    pub(crate) flags: ItemFlags,
    pub(crate) hovered: bool,
    pub(crate) fade_remaining_ms: f64,
}

impl Item {
    pub(crate) fn origin(&self) -> DVec2 {
        DVec2::new(self.x, self.y)
    }

    pub(crate) fn rect(&self, item_height: f64) -> Rect {
        Rect::new(self.x, self.y, self.width, item_height)
    }

    pub(crate) fn is_dragging(&self) -> bool {
        self.flags.contains(ItemFlags::DRAGGING)
    }

    pub(crate) fn render(&self) -> RenderItem {
        RenderItem {
            id: self.id.clone(),
            text: Arc::clone(&self.text),
            x: self.x,
            y: self.y,
            opacity: self.alpha,
            width: self.width,
            hovered: self.hovered,
        }
    }

    pub(crate) fn batch_row(&self, row: usize) -> BatchRow {
        BatchRow {
            row,
            x: self.x,
            y: self.y,
            speed: self.speed,
            alpha: self.alpha,
            width: self.width,
            fade_remaining_ms: self.fade_remaining_ms,
            flags: self.flags,
        }
    }
}

/// Table of slots where a free slot holds no item and sits on the free stack.
#[derive(Debug, Default)]
pub(crate) struct ItemTable {
    slots: Vec<Option<Item>>,
    free: Vec<usize>,
}

impl ItemTable {
    /// Total number of slots, live or free.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    pub(crate) fn active_count(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn get(&self, row: usize) -> Option<&Item> {
        self.slots.get(row).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, row: usize) -> Option<&mut Item> {
        self.slots.get_mut(row).and_then(Option::as_mut)
    }

    /// Live items with their slot index, in slot order.
    pub(crate) fn iter(&self) -> impl DoubleEndedIterator<Item = (usize, &Item)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(row, slot)| slot.as_ref().map(|item| (row, item)))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut Item)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(row, slot)| slot.as_mut().map(|item| (row, item)))
    }

    /// First live slot holding the comment.
    pub(crate) fn find(&self, id: &CommentId) -> Option<usize> {
        self.iter().find(|(_, item)| &item.id == id).map(|(row, _)| row)
    }

    pub(crate) fn any_dragging(&self) -> bool {
        self.iter().any(|(_, item)| item.is_dragging())
    }

    /// Stores the item in the most recently freed slot, or grows the table.
    pub(crate) fn acquire(&mut self, item: Item) -> usize {
        if let Some(row) = self.free.pop() {
            debug_assert!(self.slots[row].is_none(), "free slot {row} is occupied");
            self.slots[row] = Some(item);
            return row;
        }
        self.slots.push(Some(item));
        self.slots.len() - 1
    }

    /// Frees the slot and returns the item it held.
    pub(crate) fn release(&mut self, row: usize) -> Option<Item> {
        let item = self.slots.get_mut(row)?.take()?;
        self.free.push(row);
        Some(item)
    }

    /// Frees every live slot, returning the released items in descending slot order.
    pub(crate) fn release_all(&mut self) -> Vec<Item> {
        let rows: Vec<usize> = self.iter().map(|(row, _)| row).rev().collect();
        rows.into_iter()
            .filter_map(|row| self.release(row))
            .collect()
    }

    /// Drops every free slot, renumbering live items in slot order.
    ///
    /// Returns the slot count before and after.
    pub(crate) fn compact(&mut self) -> (usize, usize) {
        let before = self.slots.len();
        self.slots.retain(Option::is_some);
        self.free.clear();
        (before, self.slots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> Item {
        Item {
            id: CommentId::new(id),
            author: AuthorId::new("author"),
            text: Arc::from("text"),
            x: 0.0,
            y: 10.0,
            speed: 150.0,
            alpha: 1.0,
            width: 80.0,
            lane: 0,
            original_lane: 0,
            flags: ItemFlags::empty(),
            hovered: false,
            fade_remaining_ms: 0.0,
        }
    }

    #[test]
    fn released_slots_are_reused_last_in_first_out() {
        let mut table = ItemTable::default();
        for id in ["a", "b", "c"] {
            let _ = table.acquire(item(id));
        }
        assert!(table.release(2).is_some());
        assert!(table.release(0).is_some());
        assert!(table.release(0).is_none());
        assert_eq!(table.active_count(), 1);

        assert_eq!(table.acquire(item("d")), 0);
        assert_eq!(table.acquire(item("e")), 2);
        assert_eq!(table.acquire(item("f")), 3);
    }

    #[test]
    fn compaction_keeps_live_order() {
        let mut table = ItemTable::default();
        for id in ["a", "b", "c", "d"] {
            let _ = table.acquire(item(id));
        }
        let _ = table.release(0);
        let _ = table.release(2);
        assert_eq!(table.compact(), (4, 2));
        assert_eq!(table.find(&CommentId::new("b")), Some(0));
        assert_eq!(table.find(&CommentId::new("d")), Some(1));
        assert_eq!(table.free_count(), 0);
    }

    #[test]
    fn release_all_frees_descending() {
        let mut table = ItemTable::default();
        for id in ["a", "b", "c"] {
            let _ = table.acquire(item(id));
        }
        let released: Vec<String> = table
            .release_all()
            .into_iter()
            .map(|item| item.id.to_string())
            .collect();
        assert_eq!(released, vec!["c", "b", "a"]);
        assert_eq!(table.acquire(item("z")), 0);
    }
}

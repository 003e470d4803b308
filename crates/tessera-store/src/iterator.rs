//! Merge iteration over an overlay and its parent, plus prefix ranges

use crate::error::StorageResult;
use crate::traits::{KvIterator, KvPair};
use std::cmp::Ordering;
use std::iter::Peekable;

/// Buffered overlay entries in iteration order. `None` marks a tombstone.
pub type OverlayEntries<'a> = Box<dyn Iterator<Item = (&'a Vec<u8>, &'a Option<Vec<u8>>)> + 'a>;

/// Iterator merging buffered overlay entries with a parent iterator.
///
/// Both inputs must cover the same range and be sorted in the same
/// direction. On equal keys the overlay entry wins and the parent is
/// advanced past it; tombstones are skipped.
pub struct MergeIterator<'a> {
    parent: Option<Peekable<KvIterator<'a>>>,
    overlay: Peekable<OverlayEntries<'a>>,
    ascending: bool,
    released: bool,
}

impl<'a> MergeIterator<'a> {
    /// Create a merge iterator
    pub fn new(parent: KvIterator<'a>, overlay: OverlayEntries<'a>, ascending: bool) -> Self {
        Self {
            parent: Some(parent.peekable()),
            overlay: overlay.peekable(),
            ascending,
            released: false,
        }
    }

    /// Release the parent iterator. Safe to call more than once; the
    /// iterator yields nothing afterwards.
    pub fn release(&mut self) {
        self.parent = None;
        self.released = true;
    }

    /// Check if `release` was called
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Order of the parent head relative to the overlay head, in
    /// iteration direction.
    fn compare(&self, parent_key: &[u8], overlay_key: &[u8]) -> Ordering {
        let ord = parent_key.cmp(overlay_key);
        if self.ascending {
            ord
        } else {
            ord.reverse()
        }
    }

    fn next_parent(&mut self) -> Option<StorageResult<KvPair>> {
        self.parent.as_mut().and_then(|p| p.next())
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = StorageResult<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.released {
            return None;
        }
        loop {
            let parent_head = match self.parent.as_mut().and_then(|p| p.peek()) {
                Some(Ok((key, _))) => Some(key.clone()),
                Some(Err(_)) => return self.next_parent(),
                None => None,
            };
            let overlay_head = self.overlay.peek().map(|(key, _)| (*key).clone());

            let take_overlay = match (parent_head, overlay_head) {
                (None, None) => return None,
                (Some(_), None) => return self.next_parent(),
                (None, Some(_)) => true,
                (Some(pk), Some(ok)) => match self.compare(&pk, &ok) {
                    Ordering::Less => return self.next_parent(),
                    Ordering::Equal => {
                        // shadowed by the overlay
                        self.next_parent();
                        true
                    }
                    Ordering::Greater => true,
                },
            };

            if take_overlay {
                match self.overlay.next() {
                    Some((key, Some(value))) => return Some(Ok((key.clone(), value.clone()))),
                    Some((_, None)) => continue,
                    None => return None,
                }
            }
        }
    }
}

/// Compute the `[start, end)` range covering every key with `prefix`.
///
/// The end bound is the prefix with its last byte incremented, carrying
/// into earlier bytes and dropping trailing `0xFF`s. A prefix made only of
/// `0xFF` bytes has no upper bound. An empty prefix covers the whole store.
pub fn prefix_range(prefix: &[u8]) -> (Option<Vec<u8>>, Option<Vec<u8>>) {
    if prefix.is_empty() {
        return (None, None);
    }
    (Some(prefix.to_vec()), prefix_end(prefix))
}

fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

//! Ad slot layout for a merged feed.
//!
//! A [`PlacementSpec`] designates virtual positions `p0 + k * r` as ad
//! slots. The merged feed is the host content with the live ads spliced in,
//! so its length is `content_len + live_ad_count` and only the slots below
//! that length are active. A slot without a bound ad shows content like any
//! other position: the content position of `v` is `v - |live slots below v|`.

use crate::ad::Ad;
use crate::error::FeedError;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Initial slot positions plus a repeat interval. An interval of zero
/// places ads at the initial positions only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementSpec {
    initial_positions: Vec<usize>,
    repeat_interval: usize,
}

impl PlacementSpec {
    pub fn new(initial_positions: impl IntoIterator<Item = usize>, repeat_interval: usize) -> Self {
        let mut sorted: Vec<usize> = initial_positions.into_iter().collect();
        sorted.sort_unstable();
        sorted.dedup();

        // With repetition, a start that lies on an earlier start's
        // progression adds no new slots. Dropping it keeps the
        // progressions disjoint, so slot listings never repeat a position.
        let initial_positions = if repeat_interval == 0 {
            sorted
        } else {
            let mut kept: Vec<usize> = Vec::with_capacity(sorted.len());
            for p in sorted {
                if !kept.iter().any(|&q| (p - q) % repeat_interval == 0) {
                    kept.push(p);
                }
            }
            kept
        };

        Self {
            initial_positions,
            repeat_interval,
        }
    }

    pub fn initial_positions(&self) -> &[usize] {
        &self.initial_positions
    }

    pub fn repeat_interval(&self) -> usize {
        self.repeat_interval
    }

    /// Whether `position` lies on the slot pattern, ignoring feed length.
    pub fn is_slot(&self, position: usize) -> bool {
        self.initial_positions.iter().any(|&p0| {
            position >= p0
                && match self.repeat_interval {
                    0 => position == p0,
                    r => (position - p0) % r == 0,
                }
        })
    }

    /// Pattern positions below `limit`, ascending.
    pub fn slots_below(&self, limit: usize) -> Vec<usize> {
        let mut slots = Vec::new();
        for &p0 in &self.initial_positions {
            let mut p = p0;
            while p < limit {
                slots.push(p);
                if self.repeat_interval == 0 {
                    break;
                }
                p += self.repeat_interval;
            }
        }
        slots.sort_unstable();
        slots
    }
}

/// Lifecycle of one ad slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// Nothing requested or assigned.
    Empty,
    /// Waiting on a fetch.
    Pending,
    /// Showing an ad.
    Live,
}

#[derive(Debug)]
enum Slot {
    Pending,
    Live(Arc<Ad>),
}

/// Per-list slot tracking on top of a [`PlacementSpec`].
#[derive(Debug)]
pub struct FeedPlacement {
    spec: PlacementSpec,
    slots: BTreeMap<usize, Slot>,
    content_len: usize,
    live: usize,
}

impl FeedPlacement {
    pub fn new(spec: PlacementSpec) -> Self {
        Self {
            spec,
            slots: BTreeMap::new(),
            content_len: 0,
            live: 0,
        }
    }

    pub fn spec(&self) -> &PlacementSpec {
        &self.spec
    }

    pub fn content_len(&self) -> usize {
        self.content_len
    }

    /// Update the host content length. Live ads that no longer have content
    /// before them, and pending slots that fall off the end, are released.
    pub fn set_content_len(&mut self, content_len: usize) {
        if content_len < self.content_len {
            // retain walks keys in ascending order
            let mut live_below = 0;
            self.slots.retain(|&position, slot| {
                let before = position - live_below;
                match slot {
                    Slot::Live(_) if content_len > 0 && before <= content_len => {
                        live_below += 1;
                        true
                    }
                    Slot::Pending => before < content_len,
                    Slot::Live(_) => false,
                }
            });
            self.live = live_below;
        }
        self.content_len = content_len;
    }

    /// Length of the merged feed. Always zero without content.
    pub fn virtual_len(&self) -> usize {
        if self.content_len == 0 {
            0
        } else {
            self.content_len + self.live
        }
    }

    pub fn live_ad_count(&self) -> usize {
        self.live
    }

    /// Whether an ad may be bound at `position`.
    pub fn is_ad_slot(&self, position: usize) -> bool {
        position < self.virtual_len() && self.spec.is_slot(position)
    }

    /// Whether `position` currently shows an ad.
    pub fn is_live(&self, position: usize) -> bool {
        matches!(self.slots.get(&position), Some(Slot::Live(_)))
    }

    /// Active slots without a live ad.
    pub fn unfilled_count(&self) -> usize {
        self.ad_slots()
            .into_iter()
            .filter(|&position| !self.is_live(position))
            .count()
    }

    /// Active slot positions, ascending.
    pub fn ad_slots(&self) -> Vec<usize> {
        self.spec.slots_below(self.virtual_len())
    }

    pub fn slot_state(&self, position: usize) -> SlotState {
        match self.slots.get(&position) {
            Some(Slot::Live(_)) => SlotState::Live,
            Some(Slot::Pending) => SlotState::Pending,
            None => SlotState::Empty,
        }
    }

    pub fn content_position(&self, position: usize) -> Result<usize, FeedError> {
        self.check_range(position)?;
        if self.is_live(position) {
            return Err(FeedError::NotContent { position });
        }
        let live_below = self
            .slots
            .range(..position)
            .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
            .count();
        Ok(position - live_below)
    }

    pub fn ad_at(&self, position: usize) -> Option<&Arc<Ad>> {
        match self.slots.get(&position) {
            Some(Slot::Live(ad)) => Some(ad),
            _ => None,
        }
    }

    /// Bind `ad` to the slot at `position`, making it live. Returns the ad
    /// it replaced, if any.
    pub fn assign(&mut self, position: usize, ad: Arc<Ad>) -> Result<Option<Arc<Ad>>, FeedError> {
        self.check_slot(position)?;
        match self.slots.insert(position, Slot::Live(ad)) {
            Some(Slot::Live(previous)) => Ok(Some(previous)),
            _ => {
                self.live += 1;
                Ok(None)
            }
        }
    }

    /// Empty -> Pending. Returns false if the slot was not empty.
    pub fn mark_pending(&mut self, position: usize) -> Result<bool, FeedError> {
        self.check_slot(position)?;
        if self.slots.contains_key(&position) {
            return Ok(false);
        }
        self.slots.insert(position, Slot::Pending);
        Ok(true)
    }

    /// Pending slots, ascending.
    pub fn pending_slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Pending))
            .map(|(&position, _)| position)
            .collect()
    }

    /// Return every pending slot to empty. Returns how many were released.
    pub fn release_pending(&mut self) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| !matches!(slot, Slot::Pending));
        before - self.slots.len()
    }

    /// Drop every assignment.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.live = 0;
    }

    fn check_range(&self, position: usize) -> Result<(), FeedError> {
        let len = self.virtual_len();
        if position >= len {
            return Err(FeedError::OutOfRange { position, len });
        }
        Ok(())
    }

    fn check_slot(&self, position: usize) -> Result<(), FeedError> {
        self.check_range(position)?;
        if !self.spec.is_slot(position) {
            return Err(FeedError::NotAdSlot { position });
        }
        Ok(())
    }
}

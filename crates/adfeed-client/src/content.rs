use adfeed_cache::{Ad, AdId};
use std::sync::Arc;

/// The host's content list, as seen by the feed controller.
///
/// Content indices are dense, `0..len()`. The defaults treat every item as
/// one view type and use the index as its stable id.
pub trait ContentSource {
    type Item;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn item(&self, index: usize) -> Option<&Self::Item>;

    fn stable_id(&self, index: usize) -> u64 {
        index as u64
    }

    fn view_type(&self, _index: usize) -> usize {
        0
    }

    fn view_type_count(&self) -> usize {
        1
    }
}

impl<T> ContentSource for Vec<T> {
    type Item = T;

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn item(&self, index: usize) -> Option<&T> {
        self.get(index)
    }
}

/// What sits at a merged feed position.
#[derive(Debug)]
pub enum FeedItem<'a, T> {
    Ad(Arc<Ad>),
    Content(&'a T),
}

impl<'a, T> FeedItem<'a, T> {
    pub fn is_ad(&self) -> bool {
        matches!(self, FeedItem::Ad(_))
    }

    pub fn ad(&self) -> Option<&Arc<Ad>> {
        match self {
            FeedItem::Ad(ad) => Some(ad),
            FeedItem::Content(_) => None,
        }
    }

    pub fn into_ad(self) -> Option<Arc<Ad>> {
        match self {
            FeedItem::Ad(ad) => Some(ad),
            FeedItem::Content(_) => None,
        }
    }

    pub fn content(&self) -> Option<&'a T> {
        match self {
            FeedItem::Content(item) => Some(item),
            FeedItem::Ad(_) => None,
        }
    }
}

/// Layout kind of a merged feed position. Every ad shares one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewType {
    Ad,
    Content(usize),
}

/// Stable list identity of a merged feed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StableId {
    Ad(AdId),
    Content(u64),
}

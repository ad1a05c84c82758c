// Representation module
// The contract between the cache and whatever knows how to slice a channel or a
// segmentation. The cache never inspects concrete types: the kind is read once,
// when the representation is registered.

use std::fmt;
use std::sync::Arc;

use crate::actor::Actor;
use crate::geometry::{Nm, NmVector3};

/// Stable identity of a representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepresentationId(pub u64);

impl fmt::Display for RepresentationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rep#{}", self.0)
    }
}

/// Identity of the model item (channel or segmentation) owning representations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    Channel,
    Segmentation,
}

/// A model item as seen by the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewItem {
    pub id: ItemId,
    pub item_type: ItemType,
}

impl ViewItem {
    pub fn channel(id: u64) -> Self {
        Self { id: ItemId(id), item_type: ItemType::Channel }
    }

    pub fn segmentation(id: u64) -> Self {
        Self { id: ItemId(id), item_type: ItemType::Segmentation }
    }
}

/// Kinds of representation. Only the slice kinds are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepresentationKind {
    ChannelSlice,
    SegmentationSlice,
    Mesh,
    Volume,
}

impl RepresentationKind {
    pub fn is_slice(self) -> bool {
        matches!(self, RepresentationKind::ChannelSlice | RepresentationKind::SegmentationSlice)
    }
}

/// Filter of item types accepted by picking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderableItems {
    pub channels: bool,
    pub segmentations: bool,
}

impl RenderableItems {
    pub const NONE: Self = Self { channels: false, segmentations: false };
    pub const CHANNELS: Self = Self { channels: true, segmentations: false };
    pub const SEGMENTATIONS: Self = Self { channels: false, segmentations: true };
    pub const ALL: Self = Self { channels: true, segmentations: true };

    pub fn accepts(&self, item_type: ItemType) -> bool {
        match item_type {
            ItemType::Channel => self.channels,
            ItemType::Segmentation => self.segmentations,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.channels && !self.segmentations
    }
}

/// Producer of slice actors.
///
/// `actor_at` is called from scheduler worker threads and may be slow; every other
/// method is expected to be cheap.
pub trait SliceRepresentation: Send + Sync {
    fn id(&self) -> RepresentationId;

    fn kind(&self) -> RepresentationKind;

    /// Build the actor for the slice at `position`, or `None` if there is nothing to show.
    fn actor_at(&self, position: Nm) -> Option<Actor>;

    /// Modification stamp of the underlying data. Cached actors built with an
    /// older stamp are stale.
    fn last_modified(&self) -> u64;

    fn is_visible(&self) -> bool;

    fn opacity(&self) -> f64;

    /// Whether the data intersects the slice at `position`.
    fn exists_in(&self, position: Nm) -> bool;

    /// Whether `point` falls inside the represented data.
    fn is_inside(&self, point: NmVector3) -> bool;
}

pub type RepresentationSPtr = Arc<dyn SliceRepresentation>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_kinds() {
        assert!(RepresentationKind::ChannelSlice.is_slice());
        assert!(RepresentationKind::SegmentationSlice.is_slice());
        assert!(!RepresentationKind::Mesh.is_slice());
        assert!(!RepresentationKind::Volume.is_slice());
    }

    #[test]
    fn test_renderable_items_filter() {
        assert!(RenderableItems::ALL.accepts(ItemType::Channel));
        assert!(RenderableItems::ALL.accepts(ItemType::Segmentation));
        assert!(!RenderableItems::CHANNELS.accepts(ItemType::Segmentation));
        assert!(RenderableItems::NONE.is_empty());
        assert!(RenderableItems::default().is_empty());
    }
}

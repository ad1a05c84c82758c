// Actor module
// An actor is the renderable result of slicing one representation at one position.
// Actors are produced off the controlling thread and shared with the view through Arc,
// so the display properties the renderer touches live behind a lock.

use bytes::Bytes;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::geometry::{Extent2D, Nm};
use crate::representation::RepresentationId;

static NEXT_ACTOR_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub u64);

/// Display properties the renderer changes after the actor has been built.
#[derive(Debug, Clone, Copy)]
struct DisplayProperties {
    visible: bool,
    opacity: f64,
    // Bumped on every change so the view knows it must redraw.
    modified: u64,
}

/// A pre-rendered slice frame.
#[derive(Debug)]
pub struct Actor {
    id: ActorId,
    representation: RepresentationId,
    position: Nm,
    extent: Extent2D,
    // Stacking order; higher values are drawn (and picked) on top.
    depth: f64,
    pixels: Bytes,
    display: RwLock<DisplayProperties>,
}

impl Actor {
    /// Create an actor for `representation` at slice `position`.
    pub fn new(representation: RepresentationId, position: Nm, extent: Extent2D, pixels: Bytes) -> Self {
        Self {
            id: ActorId(NEXT_ACTOR_ID.fetch_add(1, Ordering::Relaxed)),
            representation,
            position,
            extent,
            depth: 0.0,
            pixels,
            display: RwLock::new(DisplayProperties {
                visible: true,
                opacity: 1.0,
                modified: 0,
            }),
        }
    }

    /// Set the stacking depth (segmentations sit above channels).
    pub fn with_depth(mut self, depth: f64) -> Self {
        self.depth = depth;
        self
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn representation(&self) -> RepresentationId {
        self.representation
    }

    pub fn position(&self) -> Nm {
        self.position
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn depth(&self) -> f64 {
        self.depth
    }

    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    pub fn is_visible(&self) -> bool {
        self.display.read().visible
    }

    pub fn set_visibility(&self, visible: bool) {
        let mut display = self.display.write();
        if display.visible != visible {
            display.visible = visible;
            display.modified += 1;
        }
    }

    pub fn opacity(&self) -> f64 {
        self.display.read().opacity
    }

    pub fn set_opacity(&self, opacity: f64) {
        let mut display = self.display.write();
        let opacity = opacity.clamp(0.0, 1.0);
        if display.opacity != opacity {
            display.opacity = opacity;
            display.modified += 1;
        }
    }

    /// Force the view to consider this actor changed.
    pub fn mark_modified(&self) {
        self.display.write().modified += 1;
    }

    pub fn modified(&self) -> u64 {
        self.display.read().modified
    }

    /// Approximate memory held by this actor, in bytes.
    pub fn estimated_memory(&self) -> u64 {
        (self.pixels.len() + std::mem::size_of::<Self>()) as u64
    }
}

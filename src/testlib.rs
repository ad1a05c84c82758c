//! Test utilities for slicecache-rs
// Synthetic representations and a recording view, used by the tests, the benchmark
// and the demo binary in place of a real imaging pipeline and GUI.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::actor::{Actor, ActorId};
use crate::geometry::{Extent2D, Nm, NmVector3, Plane};
use crate::representation::{RepresentationId, RepresentationKind, SliceRepresentation};
use crate::view::SliceView;

// Side of the square pixel buffer generated for every slice.
const SLICE_PIXELS: usize = 16;

/// A representation that renders a small gradient for every slice of a slab.
#[derive(Debug)]
pub struct SyntheticRepresentation {
    id: RepresentationId,
    kind: RepresentationKind,
    plane: Plane,
    extent: Extent2D,
    // Slab along the slicing axis where the data exists, inclusive.
    slab: (Nm, Nm),
    depth: f64,
    delay: Duration,
    modified: AtomicU64,
    visible: AtomicBool,
    opacity_bits: AtomicU64,
    renders: AtomicUsize,
}

impl SyntheticRepresentation {
    fn new(id: u64, kind: RepresentationKind) -> Self {
        Self {
            id: RepresentationId(id),
            kind,
            plane: Plane::XY,
            extent: Extent2D::new([0.0, 0.0], [100.0, 100.0]),
            slab: (Nm::MIN, Nm::MAX),
            depth: 0.0,
            delay: Duration::ZERO,
            modified: AtomicU64::new(1),
            visible: AtomicBool::new(true),
            opacity_bits: AtomicU64::new(1.0f64.to_bits()),
            renders: AtomicUsize::new(0),
        }
    }

    /// Channel covering every slice.
    pub fn channel(id: u64) -> Arc<Self> {
        Arc::new(Self::new(id, RepresentationKind::ChannelSlice))
    }

    /// Segmentation drawn above channels, restricted to `slab` and `extent`.
    pub fn segmentation(id: u64, extent: Extent2D, slab: (Nm, Nm)) -> Arc<Self> {
        let mut rep = Self::new(id, RepresentationKind::SegmentationSlice);
        rep.extent = extent;
        rep.slab = slab;
        rep.depth = 1.0;
        Arc::new(rep)
    }

    /// A kind the slice cache does not manage.
    pub fn mesh(id: u64) -> Arc<Self> {
        Arc::new(Self::new(id, RepresentationKind::Mesh))
    }

    /// Channel whose slices take `delay` to render.
    pub fn slow_channel(id: u64, delay: Duration) -> Arc<Self> {
        let mut rep = Self::new(id, RepresentationKind::ChannelSlice);
        rep.delay = delay;
        Arc::new(rep)
    }

    /// Simulate a data change.
    pub fn touch(&self) {
        self.modified.fetch_add(1, Ordering::AcqRel);
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Release);
    }

    pub fn set_opacity(&self, opacity: f64) {
        self.opacity_bits.store(opacity.to_bits(), Ordering::Release);
    }

    /// Number of actors built so far.
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::Acquire)
    }

    fn pixels_for(&self, position: Nm) -> Bytes {
        let base = (position.abs() as u64 % 256) as u8;
        let data: Vec<u8> = (0..SLICE_PIXELS * SLICE_PIXELS)
            .map(|i| base.wrapping_add((i % SLICE_PIXELS) as u8))
            .collect();
        Bytes::from(data)
    }
}

impl SliceRepresentation for SyntheticRepresentation {
    fn id(&self) -> RepresentationId {
        self.id
    }

    fn kind(&self) -> RepresentationKind {
        self.kind
    }

    fn actor_at(&self, position: Nm) -> Option<Actor> {
        if !self.exists_in(position) {
            return None;
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.renders.fetch_add(1, Ordering::AcqRel);
        Some(Actor::new(self.id, position, self.extent, self.pixels_for(position)).with_depth(self.depth))
    }

    fn last_modified(&self) -> u64 {
        self.modified.load(Ordering::Acquire)
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Acquire)
    }

    fn opacity(&self) -> f64 {
        f64::from_bits(self.opacity_bits.load(Ordering::Acquire))
    }

    fn exists_in(&self, position: Nm) -> bool {
        position >= self.slab.0 && position <= self.slab.1
    }

    fn is_inside(&self, point: NmVector3) -> bool {
        let (h, v) = self.plane.in_plane_indexes();
        self.exists_in(point[self.plane.normal_index()]) && self.extent.contains(point[h], point[v])
    }
}

/// A view that records what the renderer does to it.
#[derive(Debug)]
pub struct RecordingView {
    plane: Plane,
    crosshair: Mutex<NmVector3>,
    resolution: Mutex<NmVector3>,
    actors: Mutex<Vec<Arc<Actor>>>,
    updates: AtomicUsize,
    camera_resets: AtomicUsize,
}

impl RecordingView {
    /// Axial view at slice `position` with `spacing` between slices.
    pub fn new(position: Nm, spacing: Nm) -> Arc<Self> {
        Self::with_plane(Plane::XY, position, spacing)
    }

    pub fn with_plane(plane: Plane, position: Nm, spacing: Nm) -> Arc<Self> {
        let mut crosshair = [0.0; 3];
        crosshair[plane.normal_index()] = position;
        let mut resolution = [1.0; 3];
        resolution[plane.normal_index()] = spacing;
        Arc::new(Self {
            plane,
            crosshair: Mutex::new(crosshair),
            resolution: Mutex::new(resolution),
            actors: Mutex::new(Vec::new()),
            updates: AtomicUsize::new(0),
            camera_resets: AtomicUsize::new(0),
        })
    }

    pub fn set_slice(&self, position: Nm) {
        self.crosshair.lock()[self.plane.normal_index()] = position;
    }

    pub fn set_spacing(&self, spacing: Nm) {
        self.resolution.lock()[self.plane.normal_index()] = spacing;
    }

    pub fn attached_actors(&self) -> Vec<Arc<Actor>> {
        self.actors.lock().clone()
    }

    pub fn attached_ids(&self) -> Vec<ActorId> {
        self.actors.lock().iter().map(|actor| actor.id()).collect()
    }

    /// Slice positions of the attached actors, sorted and deduplicated.
    pub fn attached_positions(&self) -> Vec<Nm> {
        let mut positions: Vec<Nm> = self.actors.lock().iter().map(|actor| actor.position()).collect();
        positions.sort_by(|a, b| a.total_cmp(b));
        positions.dedup();
        positions
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::Acquire)
    }

    pub fn camera_reset_count(&self) -> usize {
        self.camera_resets.load(Ordering::Acquire)
    }
}

impl SliceView for RecordingView {
    fn plane(&self) -> Plane {
        self.plane
    }

    fn crosshair_point(&self) -> NmVector3 {
        *self.crosshair.lock()
    }

    fn scene_resolution(&self) -> NmVector3 {
        *self.resolution.lock()
    }

    fn add_actor(&self, actor: &Arc<Actor>) {
        let mut actors = self.actors.lock();
        if !actors.iter().any(|a| a.id() == actor.id()) {
            actors.push(Arc::clone(actor));
        }
    }

    fn remove_actor(&self, actor: &Arc<Actor>) {
        self.actors.lock().retain(|a| a.id() != actor.id());
    }

    fn update_view(&self) {
        self.updates.fetch_add(1, Ordering::AcqRel);
    }

    fn reset_camera(&self) {
        self.camera_resets.fetch_add(1, Ordering::AcqRel);
    }
}

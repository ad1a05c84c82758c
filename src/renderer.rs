// Cached slice renderer module
// Keeps a ring of pre-rendered slices centred on the view's current slice and moves
// it as the view scrolls. Everything here runs on the controlling thread; slices are
// computed by scheduler tasks and come back as completion messages that
// `process_completions` (or `next_completion`) turns into view updates.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace, warn};

use crate::actor::Actor;
use crate::geometry::{point_on_plane, Nm, Plane};
use crate::node::{CacheNode, NodeState, WorkerSlot};
use crate::picker::PropPicker;
use crate::representation::{
    ItemId, RenderableItems, RepresentationId, RepresentationKind, RepresentationSPtr, ViewItem,
};
use crate::ring::CacheRing;
use crate::scheduler::{Priority, Scheduler};
use crate::task::{RenderCompletion, SliceRenderTask};
use crate::view::SliceViewSPtr;

pub const DEFAULT_WINDOW_WIDTH: usize = 15;
pub const DEFAULT_MAX_WINDOW_WIDTH: usize = 25;
pub const DEFAULT_WINDOW_INCREMENT: usize = 5;
pub const WINDOW_WIDTH_LIMIT: usize = 256;

// Fraction of the spacing under which two positions are on the same slice.
const GRID_TOLERANCE: f64 = 0.001;

#[derive(Error, Debug, PartialEq)]
pub enum RendererError {
    #[error("Invalid scene resolution along the slicing axis: {0}")]
    InvalidResolution(Nm),
    #[error("No view has been set")]
    NoView,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub window_width: usize,
    pub max_window_width: usize,
    pub window_increment: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            window_width: DEFAULT_WINDOW_WIDTH,
            max_window_width: DEFAULT_MAX_WINDOW_WIDTH,
            window_increment: DEFAULT_WINDOW_INCREMENT,
        }
    }
}

impl RendererConfig {
    pub fn builder() -> RendererConfigBuilder {
        RendererConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct RendererConfigBuilder {
    config: RendererConfig,
}

impl RendererConfigBuilder {
    pub fn window_width(mut self, width: usize) -> Self {
        self.config.window_width = width.min(WINDOW_WIDTH_LIMIT);
        self
    }

    pub fn max_window_width(mut self, width: usize) -> Self {
        self.config.max_window_width = width.min(WINDOW_WIDTH_LIMIT);
        self
    }

    /// Growth applied after every cache miss.
    pub fn window_increment(mut self, increment: usize) -> Self {
        self.config.window_increment = increment.clamp(1, WINDOW_WIDTH_LIMIT);
        self
    }

    pub fn build(mut self) -> RendererConfig {
        self.config.window_width = self.config.window_width.min(self.config.max_window_width);
        self.config
    }
}

/// Counters describing the cache's activity since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub tasks_submitted: u64,
    pub tasks_aborted: u64,
    pub cache_misses: u64,
    pub refills: u64,
    pub stale_completions: u64,
    pub frames_rendered: u64,
}

struct RegisteredRepresentation {
    rep: RepresentationSPtr,
    item: ViewItem,
    kind: RepresentationKind,
    // Actor of this representation currently attached to the view.
    displayed: Option<Arc<Actor>>,
}

pub struct CachedSliceRenderer {
    config: RendererConfig,
    window_width: usize,
    max_window_width: usize,
    window_spacing: Nm,
    plane: Plane,
    ring: CacheRing,
    view: Option<SliceViewSPtr>,
    scheduler: Scheduler,
    items: HashMap<ItemId, Vec<RepresentationId>>,
    representations: BTreeMap<RepresentationId, RegisteredRepresentation>,
    picker: PropPicker,
    enabled: bool,
    hidden: bool,
    need_camera_reset: bool,
    completion_tx: UnboundedSender<RenderCompletion>,
    completion_rx: UnboundedReceiver<RenderCompletion>,
    stats: CacheStats,
    stale: Arc<AtomicU64>,
}

impl CachedSliceRenderer {
    pub fn new(scheduler: Scheduler, config: RendererConfig) -> Self {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            window_width: config.window_width.min(config.max_window_width),
            max_window_width: config.max_window_width,
            config,
            window_spacing: 1.0,
            plane: Plane::XY,
            ring: CacheRing::new(),
            view: None,
            scheduler,
            items: HashMap::new(),
            representations: BTreeMap::new(),
            picker: PropPicker::new(),
            enabled: true,
            hidden: false,
            need_camera_reset: true,
            completion_tx,
            completion_rx,
            stats: CacheStats::default(),
            stale: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_defaults(scheduler: Scheduler) -> Self {
        Self::new(scheduler, RendererConfig::default())
    }

    /// Attach the renderer to `view` and build the ring around its crosshair.
    pub fn set_view(&mut self, view: SliceViewSPtr) -> Result<(), RendererError> {
        let plane = view.plane();
        let spacing = view.scene_resolution()[plane.normal_index()];
        if !spacing.is_finite() || spacing <= 0.0 {
            return Err(RendererError::InvalidResolution(spacing));
        }

        if self.view.is_some() {
            self.teardown();
        }
        self.plane = plane;
        self.window_spacing = spacing;
        self.view = Some(view);
        self.picker.initialize_pick_list();
        self.need_camera_reset = true;
        self.init_cache()
    }

    pub fn view(&self) -> Option<&SliceViewSPtr> {
        self.view.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// While disabled the renderer ignores position changes and shows nothing.
    /// Enabling again resynchronises the cache with the view's position.
    pub fn set_enable(&mut self, value: bool) {
        if self.enabled == value {
            return;
        }
        if value {
            self.enabled = true;
            self.hidden = false;
            if let Some(position) = self.view_position() {
                self.fill_cache(position);
            }
        } else {
            self.hide();
            self.enabled = false;
        }
    }

    /// Detach displayed actors from the view without forgetting them.
    pub fn hide(&mut self) {
        if self.hidden {
            return;
        }
        if let Some(view) = self.view.clone() {
            if self.enabled {
                for entry in self.representations.values() {
                    if let Some(actor) = &entry.displayed {
                        view.remove_actor(actor);
                    }
                }
                view.update_view();
            }
        }
        self.hidden = true;
    }

    pub fn show(&mut self) {
        if !self.hidden {
            return;
        }
        self.hidden = false;
        // Frames delivered while hidden were never published: rebuild from the actual node.
        for entry in self.representations.values_mut() {
            entry.displayed = None;
        }
        if self.displaying() {
            self.attach_actual();
            self.redraw();
        }
    }

    fn displaying(&self) -> bool {
        self.enabled && !self.hidden
    }

    fn view_position(&self) -> Option<Nm> {
        self.view
            .as_ref()
            .map(|view| view.crosshair_point()[self.plane.normal_index()])
    }

    pub fn manages_representation(&self, kind: RepresentationKind) -> bool {
        kind.is_slice()
    }

    pub fn has_representation(&self, id: RepresentationId) -> bool {
        self.representations.contains_key(&id)
    }

    /// Actors currently attached to the view.
    pub fn number_of_actors(&self) -> usize {
        if !self.displaying() {
            return 0;
        }
        self.representations.values().filter(|entry| entry.displayed.is_some()).count()
    }

    pub fn number_of_rendered_items(&self) -> usize {
        self.items.len()
    }

    pub fn add_representation(&mut self, item: ViewItem, rep: RepresentationSPtr) {
        let kind = rep.kind();
        let id = rep.id();
        if !self.manages_representation(kind) || self.has_representation(id) || self.view.is_none() {
            return;
        }

        self.items.entry(item.id).or_default().push(id);
        self.representations.insert(
            id,
            RegisteredRepresentation {
                rep: Arc::clone(&rep),
                item,
                kind,
                displayed: None,
            },
        );
        debug!(rep = %id, ?kind, "representation added");

        if !self.enabled {
            return;
        }
        let nodes: Vec<Arc<CacheNode>> = self.ring.iter().cloned().collect();
        for node in nodes {
            let mut state = node.state().write();
            if !rep.exists_in(state.position) {
                continue;
            }
            state.representations.entry(id).or_default();
            if state.worker.is_none() {
                let priority = self.priority_for(&node);
                self.submit_task(&node, &mut state, vec![Arc::clone(&rep)], priority);
            } else {
                state.cancel_delete(id);
                state.queue_add(id);
            }
        }
    }

    pub fn remove_representation(&mut self, id: RepresentationId) {
        let Some(entry) = self.representations.remove(&id) else {
            return;
        };
        if let Some(reps) = self.items.get_mut(&entry.item.id) {
            reps.retain(|r| *r != id);
            if reps.is_empty() {
                self.items.remove(&entry.item.id);
            }
        }

        if let Some(actor) = entry.displayed {
            if let (Some(view), true) = (self.view.clone(), self.displaying()) {
                view.remove_actor(&actor);
                view.update_view();
            }
        }

        for node in self.ring.iter() {
            let mut state = node.state().write();
            state.representations.remove(&id);
            if state.worker.is_some() {
                state.cancel_add(id);
                state.queue_delete(id);
            }
        }

        if self.representations.is_empty() {
            self.need_camera_reset = true;
        }
        debug!(rep = %id, kind = ?entry.kind, "representation removed");
    }

    /// Recompute every cached slice of `id` after its data changed.
    pub fn update_representation(&mut self, id: RepresentationId) {
        if !self.enabled {
            return;
        }
        let Some(entry) = self.representations.get_mut(&id) else {
            return;
        };
        let rep = Arc::clone(&entry.rep);
        let displayed = entry.displayed.take();
        let displaying = self.displaying();

        if let (Some(actor), Some(view)) = (displayed, self.view.clone()) {
            if displaying {
                view.remove_actor(&actor);
                view.update_view();
            }
        }

        let nodes: Vec<Arc<CacheNode>> = self.ring.iter().cloned().collect();
        for node in nodes {
            let mut state = node.state().write();
            if let Some(slot) = state.representations.get_mut(&id) {
                slot.actor = None;
            }
            if !rep.exists_in(state.position) {
                continue;
            }
            if state.worker.is_none() {
                let priority = self.priority_for(&node);
                self.submit_task(&node, &mut state, vec![Arc::clone(&rep)], priority);
            } else {
                state.queue_add(id);
                state.queue_delete(id);
            }
        }
    }

    pub fn update_representation_visibility(&mut self, id: RepresentationId) {
        let Some(entry) = self.representations.get(&id) else {
            return;
        };
        let visible = entry.rep.is_visible();
        for node in self.ring.iter() {
            let state = node.state().read();
            if let Some(actor) = state.representations.get(&id).and_then(|slot| slot.actor.as_ref()) {
                actor.set_visibility(visible);
            }
        }
        if let Some(actor) = &entry.displayed {
            actor.set_visibility(visible);
            self.redraw();
        }
    }

    pub fn update_representation_opacity(&mut self, id: RepresentationId) {
        let Some(entry) = self.representations.get(&id) else {
            return;
        };
        let opacity = entry.rep.opacity();
        for node in self.ring.iter() {
            let state = node.state().read();
            if let Some(actor) = state.representations.get(&id).and_then(|slot| slot.actor.as_ref()) {
                actor.set_opacity(opacity);
            }
        }
        if let Some(actor) = &entry.displayed {
            actor.set_opacity(opacity);
            self.redraw();
        }
    }

    fn redraw(&self) {
        if let (Some(view), true) = (&self.view, self.displaying()) {
            view.update_view();
        }
    }

    /// Move the cache to the slice at `position`.
    pub fn set_position(&mut self, position: Nm) {
        if !self.enabled {
            return;
        }
        let Some(actual) = self.ring.actual().cloned() else {
            return;
        };
        let current = actual.position();
        if current == position {
            return;
        }

        let spacing = self.window_spacing;
        let delta = position - current;
        let steps = (delta / spacing).round();
        let off_grid = (delta - steps * spacing).abs() > spacing * GRID_TOLERANCE;
        if off_grid || delta.abs() > (self.window_width as f64 + GRID_TOLERANCE) * spacing {
            debug!(from = current, to = position, off_grid, "non local jump, refilling cache");
            self.fill_cache(position);
            return;
        }
        if steps == 0.0 {
            return;
        }

        self.detach_displayed();
        if let Some(worker) = &actual.state().read().worker {
            worker.handle.set_priority(Priority::Low);
        }

        let forward = steps > 0.0;
        for _ in 0..steps.abs() as usize {
            self.shift(forward);
        }

        self.attach_actual();
        self.redraw();
        debug!(position, buffer = %self.buffer_info(), "cache shifted");

        let Some(actual) = self.ring.actual().cloned() else {
            return;
        };
        // A worker that already committed is only waiting for its completion to be drained.
        let pending = actual
            .state()
            .read()
            .worker
            .clone()
            .filter(|worker| !worker.handle.has_finished());
        if let Some(worker) = pending {
            worker.handle.set_priority(Priority::VeryHigh);
            self.stats.cache_misses += 1;
            let width = self.window_width + self.config.window_increment;
            debug!(position, width, "cache miss");
            self.set_window_width(width);
        }
    }

    // Advance the actual node by one slice, recycling the node at the far end.
    fn shift(&mut self, forward: bool) {
        let spacing = self.window_spacing;
        let rotated = if forward {
            self.ring.rotate_forward(spacing)
        } else {
            self.ring.rotate_backward(spacing)
        };
        let Some((node, position)) = rotated else {
            return;
        };
        let mut state = node.state().write();
        self.reset_state(&mut state, position);
        let reps = self.live_representations(position);
        self.submit_task(&node, &mut state, reps, Priority::Normal);
    }

    /// Re-read the view's slice spacing and rebuild the cache if it changed.
    pub fn resolution_changed(&mut self) {
        let Some(view) = self.view.clone() else {
            return;
        };
        let spacing = view.scene_resolution()[self.plane.normal_index()];
        if !spacing.is_finite() || spacing <= 0.0 {
            warn!(spacing, "ignoring invalid scene resolution");
            return;
        }
        if spacing == self.window_spacing {
            return;
        }
        self.window_spacing = spacing;
        let position = view.crosshair_point()[self.plane.normal_index()];
        debug!(spacing, position, "scene resolution changed");
        self.fill_cache(position);
    }

    pub fn window_width(&self) -> usize {
        self.window_width
    }

    pub fn maximum_window_width(&self) -> usize {
        self.max_window_width
    }

    pub fn window_spacing(&self) -> Nm {
        self.window_spacing
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Resize the window to `width` slices on each side of the actual one.
    pub fn set_window_width(&mut self, width: usize) {
        let width = width.min(self.max_window_width);
        if width == self.window_width {
            return;
        }
        if self.ring.is_empty() {
            self.window_width = width;
            return;
        }

        let spacing = self.window_spacing;
        if width > self.window_width {
            for _ in self.window_width..width {
                let Some((low, high)) = self.ring.grow(spacing) else {
                    break;
                };
                self.stats.nodes_created += 2;
                if !self.enabled {
                    continue;
                }
                for node in [low, high] {
                    let mut state = node.state().write();
                    let reps = self.live_representations(state.position);
                    self.submit_task(&node, &mut state, reps, Priority::Normal);
                }
            }
        } else {
            for _ in width..self.window_width {
                let Some((low, high)) = self.ring.shrink() else {
                    break;
                };
                self.stats.nodes_deleted += 2;
                for node in [low, high] {
                    let mut state = node.state().write();
                    let position = state.position;
                    self.reset_state(&mut state, position);
                }
            }
        }
        debug!(from = self.window_width, to = width, "window resized");
        self.window_width = width;
    }

    pub fn set_window_maximum_width(&mut self, width: usize) {
        self.max_window_width = width.min(WINDOW_WIDTH_LIMIT);
        if self.window_width > self.max_window_width {
            self.set_window_width(self.max_window_width);
        }
    }

    /// Bytes held by every cached actor.
    pub fn estimated_memory_used(&self) -> u64 {
        self.ring.iter().map(|node| node.state().read().estimated_memory()).sum()
    }

    /// Items whose visible data lies under the in-plane point `(x, y)` of the
    /// current slice. `z` is ignored: the slice is always the actual one.
    pub fn pick(&mut self, x: Nm, y: Nm, _z: Nm, items: RenderableItems, repeat: bool) -> Vec<ItemId> {
        let mut selection = Vec::new();
        if self.representations.is_empty() || items.is_empty() || !self.displaying() {
            return selection;
        }
        let Some(slice) = self.ring.actual().map(|node| node.position()) else {
            return selection;
        };

        let saved = self.picker.pick_list().to_vec();
        let candidates: Vec<Arc<Actor>> = self
            .representations
            .values()
            .filter(|entry| entry.rep.exists_in(slice))
            .filter_map(|entry| entry.displayed.clone())
            .collect();
        for actor in &candidates {
            self.picker.add_pick_list(actor);
        }

        let point = point_on_plane(self.plane, x, y, slice);
        while let Some(result) = self.picker.pick(x, y) {
            let actor = result.actor;
            self.picker.delete_pick_list(actor.id());
            if !candidates.iter().any(|c| c.id() == actor.id()) {
                continue;
            }
            let Some(entry) = self.representations.get(&actor.representation()) else {
                continue;
            };
            if !items.accepts(entry.item.item_type)
                || !entry.rep.is_visible()
                || !entry.rep.is_inside(point)
                || selection.contains(&entry.item.id)
            {
                continue;
            }
            selection.push(entry.item.id);
            if !repeat {
                break;
            }
        }

        self.picker.set_pick_list(saved);
        selection
    }

    pub fn picker(&self) -> &PropPicker {
        &self.picker
    }

    pub fn picker_mut(&mut self) -> &mut PropPicker {
        &mut self.picker
    }

    /// Apply every completion posted so far. Returns how many were handled.
    pub fn process_completions(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.render_frame(completion);
            handled += 1;
        }
        handled
    }

    /// Wait for the next completion and apply it.
    pub async fn next_completion(&mut self) -> bool {
        match self.completion_rx.recv().await {
            Some(completion) => {
                self.render_frame(completion);
                true
            }
            None => false,
        }
    }

    /// Whether no node is waiting on a task.
    pub fn is_idle(&self) -> bool {
        self.ring.iter().all(|node| !node.has_worker())
    }

    fn render_frame(&mut self, completion: RenderCompletion) {
        let node = completion.node;
        if !self.ring.contains(node.id()) {
            self.stats.stale_completions += 1;
            return;
        }
        let mut state = node.state().write();
        if !state.is_current_worker(completion.task, completion.generation) {
            self.stats.stale_completions += 1;
            trace!(task = %completion.task, position = state.position, "ignoring stale completion");
            return;
        }
        state.worker = None;
        for rep in std::mem::take(&mut state.reps_to_delete) {
            state.representations.remove(&rep);
        }
        self.stats.frames_rendered += 1;

        let is_actual = self.ring.is_actual(node.id());
        if is_actual && self.displaying() {
            if let Some(view) = self.view.clone() {
                let mut changed = false;
                let mut attached = false;
                for (rep_id, slot) in state.representations.iter() {
                    let Some(entry) = self.representations.get_mut(rep_id) else {
                        continue;
                    };
                    let current = slot
                        .actor
                        .as_ref()
                        .filter(|_| slot.is_valid(entry.rep.last_modified()))
                        .cloned();
                    let displayed_id = entry.displayed.as_ref().map(|a| a.id());
                    if displayed_id == current.as_ref().map(|a| a.id()) {
                        continue;
                    }
                    changed = true;
                    if let Some(old) = entry.displayed.take() {
                        view.remove_actor(&old);
                    }
                    if let Some(actor) = current {
                        actor.set_visibility(entry.rep.is_visible());
                        actor.set_opacity(entry.rep.opacity());
                        actor.mark_modified();
                        view.add_actor(&actor);
                        entry.displayed = Some(actor);
                        attached = true;
                    }
                }
                if attached && self.need_camera_reset {
                    self.need_camera_reset = false;
                    view.reset_camera();
                }
                if changed {
                    view.update_view();
                }
            }
        }

        let to_add = std::mem::take(&mut state.reps_to_add);
        if !to_add.is_empty() {
            let position = state.position;
            let reps: Vec<RepresentationSPtr> = to_add
                .iter()
                .filter_map(|id| self.representations.get(id))
                .filter(|entry| entry.rep.exists_in(position))
                .map(|entry| Arc::clone(&entry.rep))
                .collect();
            let priority = if is_actual { Priority::VeryHigh } else { Priority::Normal };
            self.submit_task(&node, &mut state, reps, priority);
        }
    }

    /// Abort every task and empty every node, keeping positions.
    pub fn clear_cache(&mut self) {
        self.detach_displayed();
        let nodes: Vec<Arc<CacheNode>> = self.ring.iter().cloned().collect();
        for node in nodes {
            let mut state = node.state().write();
            let position = state.position;
            self.reset_state(&mut state, position);
        }
    }

    /// Reposition every node around `position` and recompute all of them, the
    /// actual node first.
    pub fn fill_cache(&mut self, position: Nm) {
        self.detach_displayed();
        self.stats.refills += 1;

        let width = self.ring.width() as f64;
        let spacing = self.window_spacing;
        let center = self.ring.actual_index();
        for index in self.ring.outward_indexes() {
            let Some(node) = self.ring.get(index).cloned() else {
                continue;
            };
            let node_position = position + (index as f64 - width) * spacing;
            let mut state = node.state().write();
            self.reset_state(&mut state, node_position);
            let reps = self.live_representations(node_position);
            let priority = if index == center { Priority::VeryHigh } else { Priority::Normal };
            self.submit_task(&node, &mut state, reps, priority);
        }
        debug!(position, buffer = %self.buffer_info(), "cache filled");
    }

    fn init_cache(&mut self) -> Result<(), RendererError> {
        let position = self.view_position().ok_or(RendererError::NoView)?;
        let old = self.ring.init(position, self.window_width, self.window_spacing);
        self.release_nodes(old);
        self.stats.nodes_created += self.ring.len() as u64;
        debug!(position, width = self.window_width, spacing = self.window_spacing, "cache initialised");
        if self.enabled && !self.representations.is_empty() {
            self.fill_cache(position);
        }
        Ok(())
    }

    /// One line per ring: `| X | 3 | ... |`, the actual node marked `X`.
    pub fn buffer_info(&self) -> String {
        let mut info = String::from("|");
        for node in self.ring.iter() {
            if self.ring.is_actual(node.id()) {
                info.push_str(" X |");
            } else {
                let _ = write!(info, " {} |", node.position());
            }
        }
        let _ = write!(info, " memory used: {} bytes", self.estimated_memory_used());
        info
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats;
        stats.stale_completions += self.stale.load(Ordering::Relaxed);
        stats
    }

    pub fn ring(&self) -> &CacheRing {
        &self.ring
    }

    pub fn node_positions(&self) -> Vec<Nm> {
        self.ring.positions()
    }

    pub fn actual_position(&self) -> Option<Nm> {
        self.ring.actual().map(|node| node.position())
    }

    fn priority_for(&self, node: &CacheNode) -> Priority {
        if self.ring.is_actual(node.id()) {
            Priority::VeryHigh
        } else {
            Priority::Normal
        }
    }

    fn live_representations(&self, position: Nm) -> Vec<RepresentationSPtr> {
        self.representations
            .values()
            .filter(|entry| entry.rep.exists_in(position))
            .map(|entry| Arc::clone(&entry.rep))
            .collect()
    }

    // The caller holds the node's write lock, so the worker is recorded before
    // the task can try to commit.
    fn submit_task(
        &mut self,
        node: &Arc<CacheNode>,
        state: &mut NodeState,
        reps: Vec<RepresentationSPtr>,
        priority: Priority,
    ) -> bool {
        if reps.is_empty() {
            return false;
        }
        if state.abort_worker() {
            self.stats.tasks_aborted += 1;
        }
        let task = SliceRenderTask::new(
            Arc::clone(node),
            state.position,
            state.generation,
            reps,
            self.completion_tx.clone(),
        )
        .with_stale_counter(Arc::clone(&self.stale))
        .with_description(format!("Cache {} Pos {}", self.plane.name(), state.position));

        match self.scheduler.submit(Arc::new(task), priority) {
            Ok(handle) => {
                state.worker = Some(WorkerSlot {
                    handle,
                    generation: state.generation,
                });
                self.stats.tasks_submitted += 1;
                true
            }
            Err(err) => {
                warn!(%err, position = state.position, "slice render not scheduled");
                false
            }
        }
    }

    fn reset_state(&mut self, state: &mut NodeState, position: Nm) {
        if state.reset(position) {
            self.stats.tasks_aborted += 1;
        }
    }

    fn detach_displayed(&mut self) {
        let view = self.view.clone().filter(|_| self.displaying());
        for entry in self.representations.values_mut() {
            if let Some(actor) = entry.displayed.take() {
                if let Some(view) = &view {
                    view.remove_actor(&actor);
                }
            }
        }
    }

    // Attach the valid actors of the actual node. Returns how many were attached.
    fn attach_actual(&mut self) -> usize {
        let Some(view) = self.view.clone().filter(|_| self.displaying()) else {
            return 0;
        };
        let Some(actual) = self.ring.actual().cloned() else {
            return 0;
        };
        let state = actual.state().read();
        let mut attached = 0;
        for (rep_id, slot) in state.representations.iter() {
            let Some(entry) = self.representations.get_mut(rep_id) else {
                continue;
            };
            if !slot.is_valid(entry.rep.last_modified()) {
                continue;
            }
            if let Some(actor) = &slot.actor {
                actor.set_visibility(entry.rep.is_visible());
                actor.set_opacity(entry.rep.opacity());
                actor.mark_modified();
                view.add_actor(actor);
                entry.displayed = Some(Arc::clone(actor));
                attached += 1;
            }
        }
        drop(state);
        if attached > 0 && self.need_camera_reset {
            self.need_camera_reset = false;
            view.reset_camera();
        }
        attached
    }

    fn release_nodes(&mut self, nodes: Vec<Arc<CacheNode>>) {
        for node in nodes {
            let mut state = node.state().write();
            if state.abort_worker() {
                self.stats.tasks_aborted += 1;
            }
            state.representations.clear();
            state.generation += 1;
            self.stats.nodes_deleted += 1;
        }
    }

    fn teardown(&mut self) {
        self.detach_displayed();
        let nodes = self.ring.clear();
        self.release_nodes(nodes);
    }
}

impl Drop for CachedSliceRenderer {
    fn drop(&mut self) {
        self.teardown();
    }
}

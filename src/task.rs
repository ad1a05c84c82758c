// Slice render task module
// Computes the actors of one cache node off the controlling thread. The task only
// reads the representations and, once at the end and under the node's lock, writes
// its results into the node. The view is never touched here: completion is posted
// as a message and the renderer installs the actors on its own thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::trace;

use crate::geometry::Nm;
use crate::node::{ActorSlot, CacheNode};
use crate::representation::{RepresentationId, RepresentationSPtr};
use crate::scheduler::{Task, TaskContext, TaskId};

/// Posted by a task whose results were committed to its node.
#[derive(Debug, Clone)]
pub struct RenderCompletion {
    pub node: Arc<CacheNode>,
    pub task: TaskId,
    pub generation: u64,
}

pub struct SliceRenderTask {
    node: Arc<CacheNode>,
    // Snapshot taken at creation, compared again before committing.
    position: Nm,
    generation: u64,
    representations: Vec<RepresentationSPtr>,
    completion: UnboundedSender<RenderCompletion>,
    stale_counter: Option<Arc<AtomicU64>>,
    description: String,
}

impl SliceRenderTask {
    pub fn new(
        node: Arc<CacheNode>,
        position: Nm,
        generation: u64,
        representations: Vec<RepresentationSPtr>,
        completion: UnboundedSender<RenderCompletion>,
    ) -> Self {
        Self {
            node,
            position,
            generation,
            representations,
            completion,
            stale_counter: None,
            description: format!("Cache Pos {}", position),
        }
    }

    /// Count discarded (stale) results in `counter`.
    pub fn with_stale_counter(mut self, counter: Arc<AtomicU64>) -> Self {
        self.stale_counter = Some(counter);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn position(&self) -> Nm {
        self.position
    }

    pub fn representation_ids(&self) -> Vec<RepresentationId> {
        self.representations.iter().map(|rep| rep.id()).collect()
    }

    // Actor already cached in the node for `rep`, if it is still valid.
    fn cached_slot(&self, rep: RepresentationId, timestamp: u64) -> Option<ActorSlot> {
        let state = self.node.state().read();
        if state.position != self.position || state.generation != self.generation {
            return None;
        }
        state
            .representations
            .get(&rep)
            .filter(|slot| slot.is_valid(timestamp))
            .cloned()
    }
}

impl Task for SliceRenderTask {
    fn run(&self, ctx: &TaskContext) {
        let total = self.representations.len().max(1);
        let mut computed = Vec::with_capacity(self.representations.len());

        for (i, rep) in self.representations.iter().enumerate() {
            if !ctx.can_execute() {
                return;
            }
            let timestamp = rep.last_modified();
            let slot = match self.cached_slot(rep.id(), timestamp) {
                Some(slot) => slot,
                None => ActorSlot {
                    actor: rep.actor_at(self.position).map(Arc::new),
                    timestamp,
                },
            };
            computed.push((rep.id(), slot));
            ctx.report_progress(((i + 1) * 100 / total) as u8);
        }

        if !ctx.can_execute() {
            return;
        }

        {
            let mut state = self.node.state().write();
            if state.position != self.position || !state.is_current_worker(ctx.id(), self.generation) {
                drop(state);
                if let Some(counter) = &self.stale_counter {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                trace!(task = %ctx.id(), position = self.position, "discarding stale slice render");
                return;
            }
            for (rep, slot) in computed {
                state.representations.insert(rep, slot);
            }
        }

        // The receiver is gone only when the renderer has been dropped.
        let _ = self.completion.send(RenderCompletion {
            node: Arc::clone(&self.node),
            task: ctx.id(),
            generation: self.generation,
        });
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

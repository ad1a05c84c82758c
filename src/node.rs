// Cache node module
// One slot of the ring: the cached actors for a single slice position.
// The renderer and the task filling a node both touch its state, always through the
// node's reader/writer lock. Ring links are not stored here (see ring.rs).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::actor::Actor;
use crate::geometry::Nm;
use crate::representation::RepresentationId;
use crate::scheduler::{TaskHandle, TaskId};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Cached actor of one representation. An actor is valid only while `timestamp`
/// matches the representation's modification stamp.
#[derive(Debug, Clone, Default)]
pub struct ActorSlot {
    pub actor: Option<Arc<Actor>>,
    pub timestamp: u64,
}

impl ActorSlot {
    pub fn is_valid(&self, last_modified: u64) -> bool {
        self.actor.is_some() && self.timestamp == last_modified
    }
}

/// The task currently populating a node.
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    pub handle: TaskHandle,
    // Node generation the task was created for.
    pub generation: u64,
}

impl WorkerSlot {
    pub fn id(&self) -> TaskId {
        self.handle.id()
    }
}

#[derive(Debug, Default)]
pub struct NodeState {
    pub position: Nm,
    // Bumped every time the node is repurposed; tasks snapshot it.
    pub generation: u64,
    pub worker: Option<WorkerSlot>,
    pub representations: HashMap<RepresentationId, ActorSlot>,
    pub reps_to_add: Vec<RepresentationId>,
    pub reps_to_delete: Vec<RepresentationId>,
}

impl NodeState {
    /// Whether `task` is still the recorded worker for the current generation.
    pub fn is_current_worker(&self, task: TaskId, generation: u64) -> bool {
        self.generation == generation && self.worker.as_ref().map(|w| w.id()) == Some(task)
    }

    /// Abort the in-flight task, if any, and forget it.
    pub fn abort_worker(&mut self) -> bool {
        match self.worker.take() {
            Some(worker) => {
                worker.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Drop every cached actor and pending change, and invalidate in-flight work.
    /// Returns whether a task was aborted.
    pub fn reset(&mut self, position: Nm) -> bool {
        let aborted = self.abort_worker();
        self.position = position;
        self.generation += 1;
        self.representations.clear();
        self.reps_to_add.clear();
        self.reps_to_delete.clear();
        aborted
    }

    /// Queue `rep` to be (re)computed once the running task completes.
    pub fn queue_add(&mut self, rep: RepresentationId) {
        if !self.reps_to_add.contains(&rep) {
            self.reps_to_add.push(rep);
        }
    }

    pub fn queue_delete(&mut self, rep: RepresentationId) {
        if !self.reps_to_delete.contains(&rep) {
            self.reps_to_delete.push(rep);
        }
    }

    pub fn cancel_add(&mut self, rep: RepresentationId) -> bool {
        let before = self.reps_to_add.len();
        self.reps_to_add.retain(|r| *r != rep);
        before != self.reps_to_add.len()
    }

    pub fn cancel_delete(&mut self, rep: RepresentationId) -> bool {
        let before = self.reps_to_delete.len();
        self.reps_to_delete.retain(|r| *r != rep);
        before != self.reps_to_delete.len()
    }

    /// Actors currently cached in this node.
    pub fn actors(&self) -> impl Iterator<Item = (&RepresentationId, &Arc<Actor>)> {
        self.representations
            .iter()
            .filter_map(|(rep, slot)| slot.actor.as_ref().map(|actor| (rep, actor)))
    }

    pub fn estimated_memory(&self) -> u64 {
        self.actors().map(|(_, actor)| actor.estimated_memory()).sum()
    }
}

#[derive(Debug)]
pub struct CacheNode {
    id: NodeId,
    state: RwLock<NodeState>,
}

impl CacheNode {
    pub fn new(position: Nm) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)),
            state: RwLock::new(NodeState {
                position,
                ..NodeState::default()
            }),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> &RwLock<NodeState> {
        &self.state
    }

    pub fn position(&self) -> Nm {
        self.state.read().position
    }

    pub fn has_worker(&self) -> bool {
        self.state.read().worker.is_some()
    }
}

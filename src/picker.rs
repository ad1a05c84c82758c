// Picker module
// Picks the topmost actor under an in-plane point, restricted to a pick list.

use std::sync::Arc;

use crate::actor::{Actor, ActorId};
use crate::geometry::Nm;

/// Result of a successful pick.
#[derive(Debug, Clone)]
pub struct PickResult {
    pub actor: Arc<Actor>,
    /// In-plane coordinates of the pick.
    pub position: [Nm; 2],
}

#[derive(Debug, Default)]
pub struct PropPicker {
    pick_list: Vec<Arc<Actor>>,
}

impl PropPicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty the pick list.
    pub fn initialize_pick_list(&mut self) {
        self.pick_list.clear();
    }

    /// Add an actor to the pick list; duplicates are ignored.
    pub fn add_pick_list(&mut self, actor: &Arc<Actor>) {
        if !self.pick_list.iter().any(|a| a.id() == actor.id()) {
            self.pick_list.push(Arc::clone(actor));
        }
    }

    pub fn delete_pick_list(&mut self, actor: ActorId) {
        self.pick_list.retain(|a| a.id() != actor);
    }

    pub fn pick_list(&self) -> &[Arc<Actor>] {
        &self.pick_list
    }

    pub fn pick_list_ids(&self) -> Vec<ActorId> {
        self.pick_list.iter().map(|a| a.id()).collect()
    }

    /// Replace the whole pick list.
    pub fn set_pick_list(&mut self, actors: Vec<Arc<Actor>>) {
        self.pick_list = actors;
    }

    /// Topmost visible actor in the pick list whose extent contains `(x, y)`.
    /// On equal depth the most recently added actor wins.
    pub fn pick(&self, x: Nm, y: Nm) -> Option<PickResult> {
        let mut best: Option<&Arc<Actor>> = None;
        for actor in &self.pick_list {
            if !actor.is_visible() || !actor.extent().contains(x, y) {
                continue;
            }
            match best {
                Some(current) if current.depth() > actor.depth() => {}
                _ => best = Some(actor),
            }
        }
        best.map(|actor| PickResult {
            actor: Arc::clone(actor),
            position: [x, y],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Extent2D;
    use crate::representation::RepresentationId;
    use bytes::Bytes;

    fn actor(rep: u64, extent: Extent2D, depth: f64) -> Arc<Actor> {
        Arc::new(Actor::new(RepresentationId(rep), 0.0, extent, Bytes::new()).with_depth(depth))
    }

    #[test]
    fn test_pick_topmost() {
        let mut picker = PropPicker::new();
        let bottom = actor(1, Extent2D::new([0.0, 0.0], [10.0, 10.0]), 0.0);
        let top = actor(2, Extent2D::new([0.0, 0.0], [5.0, 5.0]), 1.0);
        picker.add_pick_list(&top);
        picker.add_pick_list(&bottom);

        assert_eq!(picker.pick(2.0, 2.0).unwrap().actor.id(), top.id());
        assert_eq!(picker.pick(8.0, 8.0).unwrap().actor.id(), bottom.id());
        assert!(picker.pick(20.0, 20.0).is_none());
    }

    #[test]
    fn test_hidden_actors_are_not_picked() {
        let mut picker = PropPicker::new();
        let hidden = actor(1, Extent2D::new([0.0, 0.0], [10.0, 10.0]), 0.0);
        hidden.set_visibility(false);
        picker.add_pick_list(&hidden);
        assert!(picker.pick(1.0, 1.0).is_none());
    }

    #[test]
    fn test_pick_list_management() {
        let mut picker = PropPicker::new();
        let a = actor(1, Extent2D::new([0.0, 0.0], [1.0, 1.0]), 0.0);
        picker.add_pick_list(&a);
        picker.add_pick_list(&a);
        assert_eq!(picker.pick_list().len(), 1);
        picker.delete_pick_list(a.id());
        assert!(picker.pick_list().is_empty());
    }
}

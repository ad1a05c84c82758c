// View module
// What the cache needs from a 2D view. The view owns the scene; the renderer only
// attaches and detaches actors and asks for redraws.

use std::sync::Arc;

use crate::actor::Actor;
use crate::geometry::{NmVector3, Plane};

pub trait SliceView {
    fn plane(&self) -> Plane;

    /// Current crosshair; its normal component is the slice position.
    fn crosshair_point(&self) -> NmVector3;

    /// Scene resolution; its normal component is the slice spacing.
    fn scene_resolution(&self) -> NmVector3;

    fn add_actor(&self, actor: &Arc<Actor>);

    fn remove_actor(&self, actor: &Arc<Actor>);

    /// Request a redraw.
    fn update_view(&self);

    fn reset_camera(&self);
}

pub type SliceViewSPtr = Arc<dyn SliceView>;

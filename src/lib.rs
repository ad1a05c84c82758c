//! slicecache-rs: a ring of pre-rendered slices kept around the current slice of a 2D view
//!
//! The cache is driven from one controlling thread through [`CachedSliceRenderer`];
//! slices are computed by [`SliceRenderTask`]s on a [`Scheduler`], optionally run by a
//! [`TaskPool`] on a tokio runtime.

pub mod actor;
pub mod geometry;
pub mod node;
pub mod picker;
pub mod renderer;
pub mod representation;
pub mod ring;
pub mod runtime;
pub mod scheduler;
pub mod task;
pub mod testlib;
pub mod view;

pub use actor::{Actor, ActorId};
pub use geometry::{Extent2D, Nm, NmVector3, Plane};
pub use picker::{PickResult, PropPicker};
pub use renderer::{CacheStats, CachedSliceRenderer, RendererConfig, RendererConfigBuilder, RendererError};
pub use representation::{
    ItemId, ItemType, RenderableItems, RepresentationId, RepresentationKind, RepresentationSPtr,
    SliceRepresentation, ViewItem,
};
pub use scheduler::{Priority, Scheduler, SchedulerError, Task, TaskContext, TaskHandle, TaskId, TaskPool};
pub use task::{RenderCompletion, SliceRenderTask};
pub use view::{SliceView, SliceViewSPtr};

static PLUGIN_NAME: &str = "slicecache-rs";
static PLUGIN_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn name() -> &'static str {
    PLUGIN_NAME
}

pub fn version() -> &'static str {
    PLUGIN_VERSION
}
